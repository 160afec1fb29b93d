//! Forbidden-header filter (component A). A direct generalization of the
//! teacher's `utils::http::should_forward_request_header` /
//! `should_forward_response_header`, which hard-coded a single
//! hop-by-hop set; here the set is widened to the spec's HTTP and
//! WebSocket variants and made overridable per-transaction via
//! `MessageInfo::exempted_headers`.

use std::collections::HashSet;
use std::sync::OnceLock;

const FORBIDDEN_HTTP: &[&str] = &[
    "x-sdhc",
    "avail-dictionary",
    "content-length",
    "content-encoding",
    "alternate-protocol",
    "alt-svc",
    "public-key-pins",
    "public-key-pins-report-only",
    "get-dictionary",
    "accept-encoding",
    "transfer-encoding",
];

const FORBIDDEN_WEBSOCKET_EXTRA: &[&str] = &[
    "sec-websocket-extensions",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-accept",
    "cookie",
    "connection",
    "upgrade",
];

fn forbidden_http_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| FORBIDDEN_HTTP.iter().copied().collect())
}

fn forbidden_websocket_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        FORBIDDEN_HTTP
            .iter()
            .chain(FORBIDDEN_WEBSOCKET_EXTRA.iter())
            .copied()
            .collect()
    })
}

/// `true` when `name` must be stripped when copying across the proxy,
/// for the given protocol, unless the transaction exempts it.
pub fn is_forbidden(name: &str, protocol: crate::models::Protocol) -> bool {
    let lower = name.to_ascii_lowercase();
    match protocol {
        crate::models::Protocol::Http => forbidden_http_set().contains(lower.as_str()),
        crate::models::Protocol::WebSocket => forbidden_websocket_set().contains(lower.as_str()),
    }
}

/// `true` when `name` should be copied from source to destination: either
/// it is not forbidden, or the transaction has exempted it. `Host` is
/// handled by callers separately (it is never forbidden, but must be
/// taken verbatim from the original request rather than re-derived).
pub fn should_forward(name: &str, protocol: crate::models::Protocol, exempted: &HashSet<String>) -> bool {
    if name.eq_ignore_ascii_case("host") {
        return true;
    }
    !is_forbidden(name, protocol) || exempted.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;

    #[test]
    fn content_length_is_forbidden_case_insensitively() {
        assert!(is_forbidden("Content-Length", Protocol::Http));
        assert!(is_forbidden("CONTENT-LENGTH", Protocol::Http));
    }

    #[test]
    fn websocket_set_is_superset_of_http_set() {
        assert!(is_forbidden("Sec-WebSocket-Key", Protocol::WebSocket));
        assert!(is_forbidden("Content-Length", Protocol::WebSocket));
        assert!(!is_forbidden("Sec-WebSocket-Key", Protocol::Http));
    }

    #[test]
    fn ordinary_header_is_not_forbidden() {
        assert!(!is_forbidden("X-Request-Id", Protocol::Http));
    }

    #[test]
    fn exempted_header_is_forwarded_despite_being_forbidden() {
        let mut exempted = HashSet::new();
        exempted.insert("Content-Length".to_string());
        assert!(should_forward("content-length", Protocol::Http, &exempted));
    }

    #[test]
    fn host_is_always_forwarded() {
        let exempted = HashSet::new();
        assert!(should_forward("Host", Protocol::Http, &exempted));
    }

    #[test]
    fn non_exempted_forbidden_header_is_not_forwarded() {
        let exempted = HashSet::new();
        assert!(!should_forward("Transfer-Encoding", Protocol::Http, &exempted));
    }
}
