//! The host-application callback surface (§6 "Host configuration").
//!
//! The teacher has no analog for this — its `ProxyMiddleware` trait
//! (`proxy::core`) mutates request/response structs in place and returns
//! `()`/`ProxyResult<()>`, with no way for a callback to say "buffer this",
//! "stream this", "replay this". Per design note §9 ("exceptions as control
//! flow"), every inspection point here returns a value-typed outcome
//! instead: `MessageInfo::next_action` is read back off the record the
//! callback was handed, exactly as the source's callback contract does.

use crate::error::Result;
use crate::models::{FirewallRequest, FirewallResponse, MessageInfo};
use async_trait::async_trait;
use hyper::{Body, Request, Response};

/// One hook invocation of a streamed-content inspection (component F,
/// `AllowButRequestStreamedContentInspection`) or of the per-frame
/// websocket inspection (component G). `Close` fires exactly once per
/// stream, per the open question in §9 about `Dispose`/`Close` semantics.
pub enum StreamEvent<'a> {
    Read(&'a [u8]),
    Write(&'a [u8]),
    Close,
}

/// Every callback a host must supply. All are required (§6): a host that
/// only cares about a subset still implements the others as pass-through
/// (see [`PassthroughHost`] below for the default used when embedding
/// without a bespoke inspection policy).
#[async_trait]
pub trait ProxyHost: Send + Sync {
    /// Decides whether a flow may leave the box at all, before any proxy
    /// logic runs. Invoked once per accepted connection by the diverter's
    /// `confirm_deny_firewall_access` hook (§6); the core only threads the
    /// request/response through, it does not call this itself except via
    /// the lifecycle controller's wiring (§4.9).
    async fn firewall_check(&self, request: &FirewallRequest) -> FirewallResponse;

    /// Fired once per direction per transaction (`request-begin` then
    /// `response-begin`, §4.6's ordering rule). The callback mutates
    /// `info` in place — including `next_action` — and the caller applies
    /// whatever it finds there afterward.
    async fn new_http_message(&self, info: &mut MessageInfo);

    /// `AllowButRequestContentInspection`: the whole body has been
    /// buffered into `info`'s internal body; the callback may replace it
    /// via `copy_and_set_body` and may re-set `next_action` to
    /// `DropConnection`.
    async fn whole_body_inspection(&self, info: &mut MessageInfo);

    /// `AllowButRequestStreamedContentInspection`: fired for every
    /// read/write/close of the body stream. Returns `true` to request
    /// that the wrapping `InspectionStream` tear the connection down
    /// immediately (the spec's "mutable drop flag").
    async fn streamed_inspection(&self, info: &MessageInfo, event: StreamEvent<'_>) -> bool;

    /// `AllowButRequestResponseReplay`: fired once per response with the
    /// loopback URL the host can fetch the live duplicate from.
    async fn replay_inspection(&self, info: &MessageInfo, replay_url: &str);

    /// `AllowButDelegateHandler`: full responsibility for producing a
    /// response is handed to the host; the core performs no further work
    /// for this transaction (§4.6 step 4).
    async fn external_request_handler(&self, info: &MessageInfo, request: Request<Body>) -> Result<Response<Body>>;
}

/// A host that never blocks, never inspects, and never delegates — every
/// transaction resolves to `AllowAndIgnoreContent` for requests and
/// `AllowAndIgnoreContentAndResponse` semantics are left to the caller.
/// Useful standalone (no bespoke embedding) and as the CLI's default.
pub struct PassthroughHost;

#[async_trait]
impl ProxyHost for PassthroughHost {
    async fn firewall_check(&self, _request: &FirewallRequest) -> FirewallResponse {
        FirewallResponse {
            decision: crate::models::FirewallDecision::DontFilterApplication,
            encrypted_hint: None,
        }
    }

    async fn new_http_message(&self, _info: &mut MessageInfo) {}

    async fn whole_body_inspection(&self, _info: &mut MessageInfo) {}

    async fn streamed_inspection(&self, _info: &MessageInfo, _event: StreamEvent<'_>) -> bool {
        false
    }

    async fn replay_inspection(&self, _info: &MessageInfo, _replay_url: &str) {}

    async fn external_request_handler(&self, _info: &MessageInfo, _request: Request<Body>) -> Result<Response<Body>> {
        Ok(Response::builder()
            .status(hyper::StatusCode::NOT_IMPLEMENTED)
            .body(Body::empty())
            .unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, Protocol};
    use hyper::{HeaderMap, Method, Version};
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_info() -> MessageInfo {
        MessageInfo::new_request(
            url::Url::parse("http://example.test/").unwrap(),
            Method::GET,
            Version::HTTP_11,
            HeaderMap::new(),
            Protocol::Http,
            false,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            80,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            1234,
        )
    }

    #[tokio::test]
    async fn passthrough_host_never_drops() {
        let host = PassthroughHost;
        let mut info = sample_info();
        host.new_http_message(&mut info).await;
        assert_eq!(info.direction, Direction::Request);
        assert!(!host.streamed_inspection(&info, StreamEvent::Close).await);
    }
}
