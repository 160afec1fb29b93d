//! The canonical per-transaction record ([`MessageInfo`]) and the small
//! value types that travel with it. This module replaces the teacher's
//! `RequestData`/`ResponseData`/`ProxyLog` trio with a single shared record,
//! since request and response sides of one transaction now need to be
//! linked (`originating_message`) rather than logged independently.

use async_trait::async_trait;
use hyper::{Body, HeaderMap, Method, Request, Response, StatusCode, Version};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

static NEXT_MESSAGE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique, monotonically increasing, wrapping id shared by a
/// request and its response.
pub fn next_message_id() -> u32 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    WebSocket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

/// The seven-valued instruction a host callback returns, driving the
/// transaction state machine of `proxy::http_handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyNextAction {
    AllowAndIgnoreContent,
    AllowAndIgnoreContentAndResponse,
    AllowButRequestContentInspection,
    AllowButRequestStreamedContentInspection,
    /// Response-only; downgraded to `AllowAndIgnoreContent` with a logged
    /// warning if a host sets it on a request (see `http::handle_transaction`).
    AllowButRequestResponseReplay,
    AllowButDelegateHandler,
    DropConnection,
}

impl Default for ProxyNextAction {
    fn default() -> Self {
        ProxyNextAction::AllowAndIgnoreContent
    }
}

/// An upstream client override a host may attach to a transaction via
/// `MessageInfo::fulfillment_client`, replacing the proxy's default
/// `UpstreamClient` for that one request.
#[async_trait]
pub trait FulfillmentClient: Send + Sync {
    async fn send(&self, req: Request<Body>) -> crate::error::Result<Response<Body>>;
}

/// The shared per-transaction descriptor passed to every inspection
/// callback.
pub struct MessageInfo {
    pub message_id: u32,
    pub url: url::Url,
    pub method: Option<Method>,
    pub status: StatusCode,
    pub http_version: Version,
    pub headers: HeaderMap,
    pub exempted_headers: HashSet<String>,
    body: Vec<u8>,
    pub body_is_user_created: bool,
    pub body_content_type: Option<String>,
    pub protocol: Protocol,
    pub direction: Direction,
    pub is_encrypted: bool,
    pub local_address: IpAddr,
    pub local_port: u16,
    pub remote_address: IpAddr,
    pub remote_port: u16,
    pub next_action: ProxyNextAction,
    pub fulfillment_client: Option<Arc<dyn FulfillmentClient>>,
    /// Non-owning in spirit: the response never outlives the request's
    /// task scope (§9 design notes), so an `Arc` clone is sufficient and
    /// never creates a reference cycle back to itself.
    pub originating_message: Option<Arc<MessageInfo>>,
}

#[allow(clippy::too_many_arguments)]
impl MessageInfo {
    pub fn new_request(
        url: url::Url,
        method: Method,
        http_version: Version,
        headers: HeaderMap,
        protocol: Protocol,
        is_encrypted: bool,
        local_address: IpAddr,
        local_port: u16,
        remote_address: IpAddr,
        remote_port: u16,
    ) -> Self {
        Self {
            message_id: next_message_id(),
            url,
            method: Some(method),
            status: StatusCode::OK,
            http_version,
            headers,
            exempted_headers: HashSet::new(),
            body: Vec::new(),
            body_is_user_created: false,
            body_content_type: None,
            protocol,
            direction: Direction::Request,
            is_encrypted,
            local_address,
            local_port,
            remote_address,
            remote_port,
            next_action: ProxyNextAction::default(),
            fulfillment_client: None,
            originating_message: None,
        }
    }

    /// Builds the response-side record for a transaction, carrying the
    /// request's id forward and linking back to it.
    pub fn new_response(request: &Arc<MessageInfo>, status: StatusCode, http_version: Version, headers: HeaderMap) -> Self {
        Self {
            message_id: request.message_id,
            url: request.url.clone(),
            method: None,
            status,
            http_version,
            headers,
            exempted_headers: request.exempted_headers.clone(),
            body: Vec::new(),
            body_is_user_created: false,
            body_content_type: None,
            protocol: request.protocol,
            direction: Direction::Response,
            is_encrypted: request.is_encrypted,
            local_address: request.local_address,
            local_port: request.local_port,
            remote_address: request.remote_address,
            remote_port: request.remote_port,
            next_action: ProxyNextAction::default(),
            fulfillment_client: None,
            originating_message: Some(request.clone()),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Public body setter: flips `body_is_user_created`.
    pub fn copy_and_set_body(&mut self, bytes: &[u8], offset: usize, count: usize, content_type: Option<String>) {
        let end = (offset + count).min(bytes.len());
        let start = offset.min(end);
        self.body = bytes[start..end].to_vec();
        self.body_is_user_created = true;
        if content_type.is_some() {
            self.body_content_type = content_type;
        }
    }

    /// Internal body setter used while streaming upstream bytes through;
    /// leaves `body_is_user_created` untouched.
    pub fn set_body_internal(&mut self, bytes: Vec<u8>) {
        self.body = bytes;
    }

    pub fn make_204_no_content(&mut self) {
        self.headers.clear();
        self.status = StatusCode::NO_CONTENT;
        self.direction = Direction::Response;
        self.body.clear();
        self.body_is_user_created = false;
        self.set_expires_epoch();
    }

    pub fn make_temporary_redirect(&mut self, location: &str) {
        self.headers.clear();
        self.body.clear();
        self.body_is_user_created = false;
        self.status = StatusCode::FOUND;
        if let Ok(value) = hyper::header::HeaderValue::from_str(location) {
            self.headers.insert(hyper::header::LOCATION, value);
        }
        self.set_expires_epoch();
    }

    /// Builds a fresh record carrying the same connection/transaction
    /// identity as `self` but with an empty body, for per-frame WebSocket
    /// inspection (§4.7): each frame gets its own `whole_body_inspection`
    /// call against a record that looks like a normal request/response,
    /// without cloning the (possibly large) body already delivered.
    pub fn clone_for_frame(&self) -> MessageInfo {
        MessageInfo {
            message_id: self.message_id,
            url: self.url.clone(),
            method: self.method.clone(),
            status: self.status,
            http_version: self.http_version,
            headers: self.headers.clone(),
            exempted_headers: self.exempted_headers.clone(),
            body: Vec::new(),
            body_is_user_created: false,
            body_content_type: None,
            protocol: self.protocol,
            direction: self.direction,
            is_encrypted: self.is_encrypted,
            local_address: self.local_address,
            local_port: self.local_port,
            remote_address: self.remote_address,
            remote_port: self.remote_port,
            next_action: self.next_action,
            fulfillment_client: self.fulfillment_client.clone(),
            originating_message: self.originating_message.clone(),
        }
    }

    fn set_expires_epoch(&mut self) {
        // RFC 1123 rendering of the Unix epoch, matching the spec's literal
        // "already expired" Expires value.
        self.headers.insert(
            hyper::header::EXPIRES,
            hyper::header::HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"),
        );
    }
}

/// Originating binary absolute path, or the literal `"SYSTEM"` when the
/// traffic did not originate from an attributable process.
#[derive(Debug, Clone)]
pub struct FirewallRequest {
    pub binary_path: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub process_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallDecision {
    DontFilterApplication,
    FilterApplication,
    BlockInternetForApplication,
}

#[derive(Debug, Clone)]
pub struct FirewallResponse {
    pub decision: FirewallDecision,
    /// Set when the flow is on a non-standard port and the diverter needs
    /// a hint about whether to expect TLS.
    pub encrypted_hint: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_request() -> MessageInfo {
        MessageInfo::new_request(
            url::Url::parse("https://example.test/path").unwrap(),
            Method::GET,
            Version::HTTP_11,
            HeaderMap::new(),
            Protocol::Http,
            true,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            443,
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            51234,
        )
    }

    #[test]
    fn response_shares_request_message_id_and_back_reference() {
        let request = Arc::new(sample_request());
        let response = MessageInfo::new_response(&request, StatusCode::OK, Version::HTTP_11, HeaderMap::new());
        assert_eq!(response.message_id, request.message_id);
        assert!(response.originating_message.is_some());
        assert_eq!(
            response.originating_message.as_ref().unwrap().message_id,
            request.message_id
        );
    }

    #[test]
    fn copy_and_set_body_flips_user_created_flag() {
        let mut info = sample_request();
        assert!(!info.body_is_user_created);
        info.copy_and_set_body(b"hello world", 0, 5, Some("text/plain".into()));
        assert!(info.body_is_user_created);
        assert_eq!(info.body(), b"hello");
        assert_eq!(info.body_content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn internal_setter_does_not_flip_flag() {
        let mut info = sample_request();
        info.set_body_internal(b"raw".to_vec());
        assert!(!info.body_is_user_created);
        assert_eq!(info.body(), b"raw");
    }

    #[test]
    fn make_204_clears_state_and_sets_expires() {
        let mut info = sample_request();
        info.copy_and_set_body(b"unused", 0, 6, None);
        info.make_204_no_content();
        assert_eq!(info.status, StatusCode::NO_CONTENT);
        assert!(info.body().is_empty());
        assert_eq!(
            info.headers.get(hyper::header::EXPIRES).unwrap(),
            "Thu, 01 Jan 1970 00:00:00 GMT"
        );
    }

    #[test]
    fn make_temporary_redirect_sets_location() {
        let mut info = sample_request();
        info.make_temporary_redirect("https://example.test/new");
        assert_eq!(info.status, StatusCode::FOUND);
        assert_eq!(
            info.headers.get(hyper::header::LOCATION).unwrap(),
            "https://example.test/new"
        );
    }

    #[test]
    fn next_message_id_is_monotonic() {
        let a = next_message_id();
        let b = next_message_id();
        assert!(b > a);
    }
}
