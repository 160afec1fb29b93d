//! Inspection streams (§9 design notes: "the wrapper is the sole owner of
//! the underlying stream so close is unambiguous"). Two wrappers are
//! built on the same shape — pump a source `Body` through a channel-backed
//! `Body`, invoking a hook on every chunk and exactly once on close:
//!
//! - [`streamed_inspection_body`] backs
//!   `AllowButRequestStreamedContentInspection` (§4.6): the host's
//!   `streamed_inspection` callback may request early teardown.
//! - [`replay_duplicating_body`] backs `AllowButRequestResponseReplay`
//!   (§4.8): every chunk read from upstream is both forwarded to the
//!   client and pushed onto a [`ResponseReplay`](crate::replay::ResponseReplay).
//!
//! Unlike the teacher (which has no equivalent — its bodies are always
//! either buffered whole via `hyper::body::to_bytes` or piped through
//! untouched), this is new machinery grounded in the `InspectionStream`
//! contract of §4.6/§4.8 and in the general "wrap a body, hook every
//! chunk" shape the `cursor-proxy` reference example uses for its own
//! streaming proxy bodies.

use crate::host::{ProxyHost, StreamEvent};
use crate::models::MessageInfo;
use crate::replay::ResponseReplay;
use hyper::Body;
use std::sync::Arc;

/// Wraps `source` so every chunk is handed to `host.streamed_inspection`
/// (as a `Read`, matching the direction the proxy observed it in) before
/// being forwarded; `direction_is_write` flips the event kind to `Write`
/// for the upstream-bound leg, since the same wrapper serves both the
/// request and response sides of §4.6 step 6. Closing fires exactly once,
/// whether the source ends normally or the callback requests a drop.
pub fn streamed_inspection_body(
    mut source: Body,
    host: Arc<dyn ProxyHost>,
    info: Arc<MessageInfo>,
    direction_is_write: bool,
) -> Body {
    let (mut sender, body) = Body::channel();
    tokio::spawn(async move {
        loop {
            match hyper::body::HttpBody::data(&mut source).await {
                Some(Ok(chunk)) => {
                    let event = if direction_is_write {
                        StreamEvent::Write(&chunk)
                    } else {
                        StreamEvent::Read(&chunk)
                    };
                    let drop_requested = host.streamed_inspection(&info, event).await;
                    if drop_requested {
                        host.streamed_inspection(&info, StreamEvent::Close).await;
                        return;
                    }
                    if sender.send_data(chunk).await.is_err() {
                        host.streamed_inspection(&info, StreamEvent::Close).await;
                        return;
                    }
                }
                Some(Err(_)) => {
                    host.streamed_inspection(&info, StreamEvent::Close).await;
                    return;
                }
                None => {
                    host.streamed_inspection(&info, StreamEvent::Close).await;
                    return;
                }
            }
        }
    });
    body
}

/// Wraps `source` so every chunk is duplicated onto `replay`'s queue
/// while being forwarded to the client unchanged. Marks `body_complete`
/// on normal EOF; abandons the duplicate (but keeps forwarding to the
/// client) once `replay.push_chunk` reports the buffer cap exceeded,
/// matching §4.8's "abandon the replay; freeing resources" rule.
pub fn replay_duplicating_body(mut source: Body, replay: Arc<ResponseReplay>) -> Body {
    let (mut sender, body) = Body::channel();
    tokio::spawn(async move {
        let mut replay_live = true;
        loop {
            match hyper::body::HttpBody::data(&mut source).await {
                Some(Ok(chunk)) => {
                    if replay_live && !replay.push_chunk(chunk.clone()) {
                        replay_live = false;
                    }
                    if sender.send_data(chunk).await.is_err() {
                        break;
                    }
                }
                Some(Err(_)) | None => break,
            }
        }
        replay.mark_body_complete();
    });
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PassthroughHost;
    use crate::models::{Direction, Protocol};
    use hyper::{HeaderMap, Method, StatusCode, Version};
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_info() -> Arc<MessageInfo> {
        Arc::new(MessageInfo::new_request(
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
        ))
    }

    #[tokio::test]
    async fn identity_inspection_forwards_bytes_unchanged() {
        let source = Body::from("hello world");
        let host: Arc<dyn ProxyHost> = Arc::new(PassthroughHost);
        let out = streamed_inspection_body(source, host, sample_info(), false);
        let collected = hyper::body::to_bytes(out).await.unwrap();
        assert_eq!(&collected[..], b"hello world");
    }

    #[tokio::test]
    async fn replay_duplication_forwards_and_completes() {
        let source = Body::from("abc");
        let replay = Arc::new(ResponseReplay::new(1, StatusCode::OK, HeaderMap::new(), 1024));
        let out = replay_duplicating_body(source, replay.clone());
        let collected = hyper::body::to_bytes(out).await.unwrap();
        assert_eq!(&collected[..], b"abc");

        // Give the spawned task a chance to mark completion after the
        // channel drains.
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if replay.body_complete.load(std::sync::atomic::Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(replay.body_complete.load(std::sync::atomic::Ordering::Acquire));
        assert_eq!(replay.pop_chunk().unwrap(), hyper::body::Bytes::from_static(b"abc"));
    }
}
