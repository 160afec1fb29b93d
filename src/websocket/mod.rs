//! WebSocket bridge (component G, §4.7). Grounded in the `hudsucker`
//! reference example's `InternalProxy::upgrade_websocket` /
//! `handle_websocket` pair: connect upstream first with the client's own
//! handshake request (rewritten to `ws`/`wss`), then complete the
//! downstream upgrade and splice negotiated-subprotocol state back onto
//! the response before it is sent. The teacher has no WebSocket support
//! at all, so the connect-then-upgrade ordering and the `futures::Stream`/
//! `Sink` split used for the two pumps below both come from that example
//! rather than from the teacher.

use crate::error::{Error, Result};
use crate::headers;
use crate::http::{ConnectionContext, ProxyServices};
use crate::models::{MessageInfo, Protocol, ProxyNextAction};
use futures::{Sink, SinkExt, Stream, StreamExt};
use hyper::header::{HOST, SEC_WEBSOCKET_PROTOCOL};
use hyper::{Body, Request, Response};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

/// Handles a single `GET` upgrade request end to end: negotiates both legs
/// of the handshake and, once both succeed, spawns the bidirectional pump.
/// Returns the 101 response to send downstream; the pump runs detached.
pub async fn handle_upgrade(mut req: Request<Body>, ctx: ConnectionContext, services: Arc<ProxyServices>) -> Result<Response<Body>> {
    let url = build_ws_url(req.headers(), req.uri(), ctx.is_encrypted)?;

    let mut info = MessageInfo::new_request(
        url.clone(),
        req.method().clone(),
        req.version(),
        req.headers().clone(),
        Protocol::WebSocket,
        ctx.is_encrypted,
        ctx.local_address,
        ctx.local_port,
        ctx.remote_address,
        ctx.remote_port,
    );

    services.host.new_http_message(&mut info).await;

    if info.next_action == ProxyNextAction::DropConnection {
        return Ok(Response::builder()
            .status(hyper::StatusCode::FORBIDDEN)
            .body(Body::empty())
            .unwrap_or_else(|_| Response::new(Body::empty())));
    }

    let outbound_request = build_outbound_request(&req, &url, &info)?;

    let (upstream_socket, upstream_response) = tokio_tungstenite::connect_async(outbound_request)
        .await
        .map_err(|e| Error::WebSocket(e))?;

    let (mut downstream_response, downstream_upgrade) =
        hyper_tungstenite::upgrade(&mut req, None).map_err(|e| Error::Other(e.to_string()))?;

    if let Some(protocol) = upstream_response.headers().get(SEC_WEBSOCKET_PROTOCOL) {
        downstream_response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
    }

    let host = services.host.clone();
    let inspect = !matches!(
        info.next_action,
        ProxyNextAction::AllowAndIgnoreContent | ProxyNextAction::AllowAndIgnoreContentAndResponse
    );
    let info = Arc::new(info);

    tokio::spawn(async move {
        let downstream_socket = match downstream_upgrade.await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(error = %e, "downstream websocket upgrade failed after accepting handshake");
                return;
            }
        };

        let (server_sink, server_stream) = upstream_socket.split();
        let (client_sink, client_stream) = downstream_socket.split();

        let upstream_to_downstream = pump(server_stream, client_sink, host.clone(), info.clone(), inspect);
        let downstream_to_upstream = pump(client_stream, server_sink, host, info, inspect);

        tokio::join!(upstream_to_downstream, downstream_to_upstream);
    });

    Ok(downstream_response)
}

fn build_ws_url(headers: &hyper::HeaderMap, uri: &hyper::Uri, is_encrypted: bool) -> Result<url::Url> {
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Other("websocket upgrade request carried no Host header".into()))?;
    let scheme = if is_encrypted { "wss" } else { "ws" };
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    url::Url::parse(&format!("{scheme}://{host}{path_and_query}")).map_err(Error::from)
}

/// Builds the request used to perform the upstream handshake: same
/// method/headers as the client sent (tokio-tungstenite needs the real
/// `Sec-WebSocket-Key`/`Upgrade`/`Connection` triplet, which only the
/// client's own request carries), `Cookie` and the subprotocol list
/// carried through explicitly per the handshake contract, forbidden-header
/// filtering applied to everything else, rewritten onto the `ws`/`wss` URL.
fn build_outbound_request(original: &Request<Body>, url: &url::Url, info: &MessageInfo) -> Result<Request<()>> {
    let mut builder = Request::builder().method(original.method()).uri(url.as_str());
    for (name, value) in original.headers().iter() {
        let passthrough = matches!(
            name.as_str(),
            "upgrade" | "connection" | "sec-websocket-key" | "sec-websocket-version" | "sec-websocket-extensions" | "sec-websocket-protocol" | "host" | "cookie"
        );
        if passthrough || headers::should_forward(name.as_str(), Protocol::WebSocket, &info.exempted_headers) {
            builder = builder.header(name, value);
        }
    }
    builder.body(()).map_err(|e| Error::Other(e.to_string()))
}

/// One direction of the bridge. Inspects and may rewrite every text/binary
/// frame via `whole_body_inspection` when `inspect` is set; `DropConnection`
/// tears this direction down without forwarding the offending frame.
/// Ping/Pong/Close frames are always forwarded uninspected — they carry no
/// application content to review.
async fn pump<S, K>(mut source: S, mut sink: K, host: Arc<dyn crate::host::ProxyHost>, info: Arc<MessageInfo>, inspect: bool)
where
    S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    K: Sink<Message> + Unpin,
{
    let mut frame_info = info.clone_for_frame();

    loop {
        let message = match source.next().await {
            Some(Ok(m)) => m,
            Some(Err(_)) | None => break,
        };

        if matches!(message, Message::Close(_)) {
            let _ = sink.send(message).await;
            break;
        }

        let outgoing = if inspect {
            match message {
                Message::Text(text) => {
                    frame_info.body_content_type = Some("text/plain".to_string());
                    frame_info.set_body_internal(text.into_bytes());
                    host.whole_body_inspection(&mut frame_info).await;
                    if frame_info.next_action == ProxyNextAction::DropConnection {
                        break;
                    }
                    Message::Text(String::from_utf8_lossy(frame_info.body()).into_owned())
                }
                Message::Binary(bytes) => {
                    frame_info.body_content_type = Some("application/octet-stream".to_string());
                    frame_info.set_body_internal(bytes);
                    host.whole_body_inspection(&mut frame_info).await;
                    if frame_info.next_action == ProxyNextAction::DropConnection {
                        break;
                    }
                    Message::Binary(frame_info.body().to_vec())
                }
                other => other,
            }
        } else {
            message
        };

        if sink.send(outgoing).await.is_err() {
            break;
        }
    }

    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::{HeaderMap, Method};

    #[test]
    fn build_ws_url_rewrites_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, "example.test".parse().unwrap());
        let uri: hyper::Uri = "/chat".parse().unwrap();
        let url = build_ws_url(&headers, &uri, true).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.as_str(), "wss://example.test/chat");

        let url = build_ws_url(&headers, &uri, false).unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn build_outbound_request_keeps_handshake_headers() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/chat")
            .header(HOST, "example.test")
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("Sec-WebSocket-Version", "13")
            .header("Cookie", "session=abc")
            .body(Body::empty())
            .unwrap();
        let url = url::Url::parse("ws://example.test/chat").unwrap();
        let info = MessageInfo::new_request(
            url.clone(),
            Method::GET,
            hyper::Version::HTTP_11,
            req.headers().clone(),
            Protocol::WebSocket,
            false,
            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            80,
            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            1234,
        );
        let outbound = build_outbound_request(&req, &url, &info).unwrap();
        assert_eq!(outbound.headers().get("Sec-WebSocket-Key").unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(outbound.headers().get("Cookie").unwrap(), "session=abc");
    }
}
