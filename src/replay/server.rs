//! The private loopback listener that serves `GET /replay/<message_id>`
//! duplicates (§4.8). `ReplayResponseHandlerFactory` in the spec maps to
//! `serve` below: it atomically takes the matching `ResponseReplay` out
//! of the registry and drains it chunk by chunk, sleeping 10ms whenever
//! the queue runs dry, exactly as the source algorithm describes.

use crate::error::{Error, Result};
use crate::replay::ReplayRegistry;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const REPLAY_QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Binds the private loopback replay listener and serves it until the
/// returned `JoinHandle` is aborted. Returns the bound address so the
/// caller can publish it to the registry and the diverter.
pub async fn bind(addr: SocketAddr, registry: Arc<ReplayRegistry>) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| serve(req, registry.clone()))) }
    });

    let server = Server::try_bind(&addr)
        .map_err(|e| Error::BindFailed(e.to_string()))?
        .serve(make_svc);
    let bound_addr = server.local_addr();

    let handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!(error = %e, "replay listener terminated unexpectedly");
        }
    });

    Ok((bound_addr, handle))
}

async fn serve(req: Request<Body>, registry: Arc<ReplayRegistry>) -> std::result::Result<Response<Body>, Infallible> {
    let message_id = match parse_message_id(req.uri().path()) {
        Some(id) => id,
        None => return Ok(not_found()),
    };

    let Some(replay) = registry.take(message_id) else {
        return Ok(not_found());
    };

    let mut builder = Response::builder().status(replay.status);
    for (name, value) in replay.headers.iter() {
        builder = builder.header(name, value);
    }

    let (mut sender, body) = Body::channel();
    tokio::spawn(async move {
        loop {
            if let Some(chunk) = replay.pop_chunk() {
                if sender.send_data(chunk).await.is_err() {
                    replay.abort_replay();
                    break;
                }
                continue;
            }
            if replay.should_stop_serving() {
                break;
            }
            tokio::time::sleep(REPLAY_QUEUE_POLL_INTERVAL).await;
        }
    });

    Ok(builder.body(body).unwrap_or_else(|_| not_found()))
}

fn parse_message_id(path: &str) -> Option<u32> {
    let suffix = path.strip_prefix("/replay/")?;
    suffix.parse().ok()
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_message_id() {
        assert_eq!(parse_message_id("/replay/42"), Some(42));
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(parse_message_id("/replay/"), None);
        assert_eq!(parse_message_id("/replay/abc"), None);
        assert_eq!(parse_message_id("/other/42"), None);
    }
}
