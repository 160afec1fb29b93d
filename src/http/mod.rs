//! HTTP(S) request/response pipeline (component F) and the dispatcher
//! (component E) that feeds it or the WebSocket bridge.
//!
//! This module replaces the teacher's `proxy::server::handle_request` /
//! `handle_regular_request` pair — which always buffers the whole body
//! and has no concept of a host decision — with the seven-branch
//! `ProxyNextAction` state machine of spec §4.6. The header-copy and
//! upstream-dispatch shape (one pooled client, skip hop-by-hop headers,
//! preserve `Host`) is kept from the teacher; everything about
//! buffering-vs-streaming-vs-replay is new, grounded directly in §4.6's
//! numbered algorithm.

pub mod inspection;
pub mod upstream;

use crate::error::{Error, Result};
use crate::headers;
use crate::host::ProxyHost;
use crate::models::{MessageInfo, Protocol, ProxyNextAction};
use crate::replay::ReplayRegistry;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use hyper::{Body, HeaderMap, Method, Request, Response, StatusCode, Uri, Version};
use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use upstream::UpstreamClient;

/// Per-connection facts the dispatcher needs that are not carried on the
/// `hyper::Request` itself — equivalent to the teacher's `AddrStream`
/// destructuring in `proxy::server::ProxyServer::start`, generalized to
/// also know whether the TLS adapter (§4.3) terminated this connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionContext {
    pub local_address: IpAddr,
    pub local_port: u16,
    pub remote_address: IpAddr,
    pub remote_port: u16,
    pub is_encrypted: bool,
}

/// The shared, per-connection collaborators a dispatched transaction
/// needs. Bundled so `dispatch`'s signature does not grow with every new
/// subsystem (§9: "ambient singletons... passed by reference to tasks
/// that need them").
pub struct ProxyServices {
    pub host: Arc<dyn ProxyHost>,
    pub upstream: Arc<UpstreamClient>,
    pub replay_registry: Arc<ReplayRegistry>,
    pub max_body_bytes: usize,
}

/// Dispatcher (component E, §4.5): routes to the WebSocket bridge when the
/// request is a GET upgrade, otherwise to the HTTP transaction handler.
pub async fn dispatch(
    req: Request<Body>,
    ctx: ConnectionContext,
    services: Arc<ProxyServices>,
) -> std::result::Result<Response<Body>, Infallible> {
    if req.method() == Method::GET && hyper_tungstenite::is_upgrade_request(&req) {
        match crate::websocket::handle_upgrade(req, ctx, services).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::warn!(error = %e, "websocket upgrade failed");
                Ok(bad_gateway())
            }
        }
    } else {
        Ok(handle_transaction(req, ctx, services).await)
    }
}

fn bad_gateway() -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Body::empty())
        .unwrap()
}

/// Builds the absolute URL for a request arriving in origin form (the
/// shape a transparently diverted connection always uses — there is no
/// CONNECT leg per §1, so `req.uri()` carries only path+query). Preferring
/// `req.uri()`'s raw path_and_query preserves percent-encoding exactly as
/// received, matching the spec's "`RawTarget` if available" rule.
fn build_url(headers: &HeaderMap, uri: &Uri, is_encrypted: bool) -> Result<url::Url> {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Other("request carried no Host header".into()))?;
    let scheme = if is_encrypted { "https" } else { "http" };
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    url::Url::parse(&format!("{scheme}://{host}{path_and_query}")).map_err(Error::from)
}

/// Caps the client's HTTP version at 1.1 for the upstream leg (§4.6 step
/// 5: "mirroring the client version...capped at 1.1"); this core never
/// speaks HTTP/2 or HTTP/3 upstream (§1 non-goals).
fn cap_version(version: Version) -> Version {
    match version {
        Version::HTTP_09 | Version::HTTP_10 => version,
        _ => Version::HTTP_11,
    }
}

/// Copies headers across the proxy boundary from `info.headers` — the
/// record the host's callbacks just had a chance to mutate — skipping
/// forbidden ones unless exempted (§4.1). Reading from `info.headers`
/// rather than the pre-callback client/upstream snapshot is what makes a
/// host's additions or rewrites in `new_http_message`/
/// `whole_body_inspection` actually reach the wire. `Host` is always
/// copied verbatim by virtue of `headers::should_forward` always allowing
/// it through.
fn copy_filtered_headers(protocol: Protocol, info: &MessageInfo) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(info.headers.len());
    for (name, value) in info.headers.iter() {
        if headers::should_forward(name.as_str(), protocol, &info.exempted_headers) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Maps a host-assigned `body_content_type` onto the record's own
/// `Content-Type` header, so a body rewritten via `copy_and_set_body`
/// actually carries its new content type onto the forwarded request or
/// response (§8 scenario 2: whole-body rewrite sets `Content-Type:
/// text/plain` alongside the new body).
fn apply_body_content_type(info: &mut MessageInfo) {
    if let Some(content_type) = info.body_content_type.clone() {
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            info.headers.insert(CONTENT_TYPE, value);
        }
    }
}

/// Statuses that must never carry a body (§8 boundary test: "status 204
/// and non-empty inspected body: the proxy MUST NOT write a body
/// downstream").
fn is_bodiless_status(status: StatusCode) -> bool {
    status.is_informational() || matches!(status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED)
}

/// Reads `body` into memory, stopping at `max_bytes` and treating that as
/// "body complete" rather than an error (§5: "Timeouts... bounded by 128
/// MiB"; §7 `BufferLimitExceeded`: "transaction: treat as body-complete at
/// the cap").
async fn buffer_body_capped(mut body: Body, max_bytes: usize) -> std::result::Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    while let Some(chunk) = hyper::body::HttpBody::data(&mut body).await {
        let chunk = chunk.map_err(|e| Error::UpstreamReadFailed(e.to_string()))?;
        if buffer.len() + chunk.len() > max_bytes {
            let remaining = max_bytes.saturating_sub(buffer.len());
            buffer.extend_from_slice(&chunk[..remaining]);
            break;
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

/// Builds a synthetic response from whatever the host (or the default
/// `DropConnection` handling) left on `info`: status/headers/body as set,
/// or a 204 if the body was never populated (§4.6 algorithm step 3, §3
/// "If `next_action == DropConnection` and `body.is_empty()`...a 204 is
/// synthesised").
fn synthesize_dropped_response(info: &mut MessageInfo) -> Response<Body> {
    if info.body().is_empty() {
        info.make_204_no_content();
    }
    apply_body_content_type(info);
    let bodiless = is_bodiless_status(info.status);
    let mut builder = Response::builder().status(info.status);
    for (name, value) in info.headers.iter() {
        if bodiless && *name == CONTENT_LENGTH {
            continue;
        }
        builder = builder.header(name, value);
    }
    let body = if bodiless { Body::empty() } else { Body::from(info.body().to_vec()) };
    builder.body(body).unwrap_or_else(|_| bad_gateway())
}

/// The per-transaction state machine (§4.6). Every early return below
/// corresponds to one of the algorithm's explicit exit points.
pub async fn handle_transaction(req: Request<Body>, ctx: ConnectionContext, services: Arc<ProxyServices>) -> Response<Body> {
    let (parts, body) = req.into_parts();

    let url = match build_url(&parts.headers, &parts.uri, ctx.is_encrypted) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(error = %e, "failed to resolve request URL");
            return bad_gateway();
        }
    };

    let mut request_info = MessageInfo::new_request(
        url,
        parts.method.clone(),
        parts.version,
        parts.headers.clone(),
        Protocol::Http,
        ctx.is_encrypted,
        ctx.local_address,
        ctx.local_port,
        ctx.remote_address,
        ctx.remote_port,
    );

    services.host.new_http_message(&mut request_info).await;
    apply_body_content_type(&mut request_info);

    if request_info.next_action == ProxyNextAction::DropConnection {
        return synthesize_dropped_response(&mut request_info);
    }

    if request_info.next_action == ProxyNextAction::AllowButDelegateHandler {
        let original = Request::from_parts(parts, body);
        return match services.host.external_request_handler(&request_info, original).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "external request handler failed");
                bad_gateway()
            }
        };
    }

    let upstream_version = cap_version(parts.version);
    let has_content_length_zero = parts
        .headers
        .get(CONTENT_LENGTH)
        .map(|v| v.as_bytes() == b"0")
        .unwrap_or(false);

    if request_info.next_action == ProxyNextAction::AllowButRequestResponseReplay {
        tracing::warn!(message_id = request_info.message_id, "host requested response-replay on a request; ignoring");
        request_info.next_action = ProxyNextAction::AllowAndIgnoreContent;
    }

    // Arc'd now so the still-unconsumed client body stream can be wrapped
    // for streamed inspection with a stable handle to the record the host
    // already populated, and so the same record becomes the response's
    // `originating_message` further down without being rebuilt.
    let mut request_info = Arc::new(request_info);
    let request_url = request_info.url.clone();
    let request_method = parts.method.clone();

    let upstream_body = match request_info.next_action {
        ProxyNextAction::AllowButRequestContentInspection => {
            let buffered = match buffer_body_capped(body, services.max_body_bytes).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "failed reading client request body");
                    return bad_gateway();
                }
            };
            let info = Arc::get_mut(&mut request_info).expect("sole owner before first clone");
            info.set_body_internal(buffered);
            services.host.whole_body_inspection(info).await;
            if info.next_action == ProxyNextAction::DropConnection {
                return synthesize_dropped_response(info);
            }
            apply_body_content_type(info);
            Body::from(request_info.body().to_vec())
        }
        ProxyNextAction::AllowButRequestStreamedContentInspection => {
            // `direction_is_write = true`: these bytes are being written
            // onward to the upstream connection, the mirror of the
            // response leg's read-from-upstream direction below.
            inspection::streamed_inspection_body(body, services.host.clone(), request_info.clone(), true)
        }
        _ => {
            let has_length = parts.headers.contains_key(CONTENT_LENGTH) || parts.headers.contains_key(TRANSFER_ENCODING);
            if has_length {
                body
            } else {
                Body::empty()
            }
        }
    };

    // Built from `request_info.headers` now that both `new_http_message`
    // and, for the buffered branch, `whole_body_inspection` have had a
    // chance to mutate it — any header a host added or rewrote reaches
    // the upstream request.
    let upstream_headers = copy_filtered_headers(Protocol::Http, &request_info);

    let mut upstream_request_builder = Request::builder()
        .method(request_method)
        .uri(request_url.as_str())
        .version(upstream_version);
    for (name, value) in upstream_headers.iter() {
        upstream_request_builder = upstream_request_builder.header(name, value);
    }
    if has_content_length_zero {
        upstream_request_builder = upstream_request_builder.header(CONTENT_LENGTH, HeaderValue::from_static("0"));
    }
    if request_info.next_action == ProxyNextAction::AllowButRequestContentInspection {
        upstream_request_builder = upstream_request_builder.header(CONTENT_LENGTH, request_info.body().len().to_string());
    }

    let upstream_request = match upstream_request_builder.body(upstream_body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "failed to build upstream request");
            return bad_gateway();
        }
    };

    let upstream_response = match services.upstream.send(upstream_request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "upstream send failed");
            return bad_gateway();
        }
    };

    let (upstream_parts, upstream_body) = upstream_response.into_parts();
    let mut response_info = MessageInfo::new_response(&request_info, upstream_parts.status, upstream_parts.version, upstream_parts.headers.clone());

    if request_info.next_action == ProxyNextAction::AllowAndIgnoreContentAndResponse {
        return forward_response_body(upstream_parts.status, &upstream_parts.headers, upstream_body, &response_info, upstream_parts.version).await;
    }

    services.host.new_http_message(&mut response_info).await;
    apply_body_content_type(&mut response_info);

    if response_info.next_action == ProxyNextAction::DropConnection {
        return synthesize_dropped_response(&mut response_info);
    }

    if response_info.next_action == ProxyNextAction::AllowButDelegateHandler {
        return match services.host.external_request_handler(&response_info, Request::new(Body::empty())).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "external request handler failed on response side");
                bad_gateway()
            }
        };
    }

    match response_info.next_action {
        ProxyNextAction::AllowButRequestContentInspection => {
            let buffered = match buffer_body_capped(upstream_body, services.max_body_bytes).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "failed reading upstream response body");
                    return bad_gateway();
                }
            };
            response_info.set_body_internal(buffered);
            services.host.whole_body_inspection(&mut response_info).await;
            if response_info.next_action == ProxyNextAction::DropConnection {
                return synthesize_dropped_response(&mut response_info);
            }
            apply_body_content_type(&mut response_info);
            // Recomputed after `whole_body_inspection`, which is the one
            // response-side callback that can still mutate headers after
            // the snapshot used by the other branches below was taken.
            let response_headers = copy_filtered_headers(Protocol::Http, &response_info);
            let bodiless = is_bodiless_status(response_info.status);
            let mut builder = Response::builder().status(response_info.status).version(upstream_parts.version);
            for (name, value) in response_headers.iter() {
                if bodiless && *name == CONTENT_LENGTH {
                    continue;
                }
                builder = builder.header(name, value);
            }
            if bodiless {
                builder.body(Body::empty()).unwrap_or_else(|_| bad_gateway())
            } else {
                builder = builder.header(CONTENT_LENGTH, response_info.body().len().to_string());
                builder.body(Body::from(response_info.body().to_vec())).unwrap_or_else(|_| bad_gateway())
            }
        }
        ProxyNextAction::AllowButRequestStreamedContentInspection => {
            let response_headers = copy_filtered_headers(Protocol::Http, &response_info);
            let info = Arc::new(response_info);
            let body = inspection::streamed_inspection_body(upstream_body, services.host.clone(), info.clone(), false);
            let mut builder = Response::builder().status(info.status).version(upstream_parts.version);
            for (name, value) in response_headers.iter() {
                builder = builder.header(name, value);
            }
            builder.body(body).unwrap_or_else(|_| bad_gateway())
        }
        ProxyNextAction::AllowButRequestResponseReplay => {
            let response_headers = copy_filtered_headers(Protocol::Http, &response_info);
            let replay = services
                .replay_registry
                .create(response_info.message_id, response_info.status, response_headers.clone());
            if let Some(replay_url) = services.replay_registry.replay_url(response_info.message_id) {
                services.host.replay_inspection(&response_info, &replay_url).await;
            }
            let body = inspection::replay_duplicating_body(upstream_body, replay);
            let mut builder = Response::builder().status(response_info.status).version(upstream_parts.version);
            for (name, value) in response_headers.iter() {
                builder = builder.header(name, value);
            }
            builder.body(body).unwrap_or_else(|_| bad_gateway())
        }
        _ => {
            let response_headers = copy_filtered_headers(Protocol::Http, &response_info);
            let mut builder = Response::builder().status(response_info.status).version(upstream_parts.version);
            for (name, value) in response_headers.iter() {
                builder = builder.header(name, value);
            }
            builder.body(upstream_body).unwrap_or_else(|_| bad_gateway())
        }
    }
}

/// `AllowAndIgnoreContentAndResponse` (§4.6 step 9): forward the upstream
/// body untouched, no further callbacks. HTTP/1.0 clients get a fully
/// buffered body with an exact `Content-Length` (they cannot chunk);
/// HTTP/1.1 clients without an explicit length get the body streamed
/// through as-is, relying on hyper to chunk it.
async fn forward_response_body(status: StatusCode, headers: &HeaderMap, body: Body, info: &MessageInfo, client_version: Version) -> Response<Body> {
    let filtered = copy_filtered_headers(Protocol::Http, info);
    let mut builder = Response::builder().status(status).version(client_version);
    for (name, value) in filtered.iter() {
        builder = builder.header(name, value);
    }

    if client_version <= Version::HTTP_10 && !headers.contains_key(CONTENT_LENGTH) {
        let buffered = match hyper::body::to_bytes(body).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed buffering HTTP/1.0 passthrough body");
                return bad_gateway();
            }
        };
        builder = builder.header(CONTENT_LENGTH, buffered.len().to_string());
        builder.body(Body::from(buffered)).unwrap_or_else(|_| bad_gateway())
    } else {
        builder.body(body).unwrap_or_else(|_| bad_gateway())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_version_never_exceeds_1_1() {
        assert_eq!(cap_version(Version::HTTP_2), Version::HTTP_11);
        assert_eq!(cap_version(Version::HTTP_11), Version::HTTP_11);
        assert_eq!(cap_version(Version::HTTP_10), Version::HTTP_10);
    }

    #[tokio::test]
    async fn buffer_body_capped_truncates_at_limit() {
        let body = Body::from(vec![b'x'; 100]);
        let buffered = buffer_body_capped(body, 10).await.unwrap();
        assert_eq!(buffered.len(), 10);
    }

    #[test]
    fn build_url_uses_host_header_and_raw_path() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/a%20b?x=1")
            .header(HOST, "example.test")
            .body(Body::empty())
            .unwrap();
        let url = build_url(req.headers(), req.uri(), true).unwrap();
        assert_eq!(url.as_str(), "https://example.test/a%20b?x=1");
    }

    fn sample_info() -> MessageInfo {
        MessageInfo::new_request(
            url::Url::parse("http://example.test/").unwrap(),
            Method::GET,
            Version::HTTP_11,
            HeaderMap::new(),
            Protocol::Http,
            false,
            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            80,
            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            1234,
        )
    }

    #[test]
    fn copy_filtered_headers_reflects_host_mutations() {
        let mut info = sample_info();
        info.headers.insert("x-injected", HeaderValue::from_static("yes"));
        info.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        let out = copy_filtered_headers(Protocol::Http, &info);
        assert_eq!(out.get("x-injected").unwrap(), "yes");
        assert!(!out.contains_key(CONTENT_LENGTH), "forbidden header should still be stripped");
    }

    #[test]
    fn apply_body_content_type_sets_content_type_header() {
        let mut info = sample_info();
        info.copy_and_set_body(b"ABCDEFGHIJKLMNOPQRST", 0, 20, Some("text/plain".to_string()));
        apply_body_content_type(&mut info);
        assert_eq!(info.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn bodiless_status_excludes_204_304_and_1xx() {
        assert!(is_bodiless_status(StatusCode::NO_CONTENT));
        assert!(is_bodiless_status(StatusCode::NOT_MODIFIED));
        assert!(is_bodiless_status(StatusCode::CONTINUE));
        assert!(!is_bodiless_status(StatusCode::OK));
    }

    #[test]
    fn synthesize_dropped_response_with_204_and_body_sends_no_body() {
        let mut info = sample_info();
        info.copy_and_set_body(b"should not be sent", 0, 19, None);
        info.status = StatusCode::NO_CONTENT;
        info.direction = crate::models::Direction::Response;
        let response = synthesize_dropped_response(&mut info);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!response.headers().contains_key(CONTENT_LENGTH));
    }
}
