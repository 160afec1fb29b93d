//! Transparent TLS-intercepting filtering proxy core for HTTP/1.x, HTTPS
//! and WebSocket traffic.
//!
//! This library provides the proxy core described by the lettered
//! components in `DESIGN.md`: the TLS adapter and spoofed certificate
//! authority, the HTTP and WebSocket transaction pipelines, the replay
//! subsystem, and the lifecycle controller that binds and serves it all.
//! Everything that decides *what* happens to a given request or response
//! lives behind the `host` module's `ProxyHost` trait; this crate only
//! supplies the plumbing.

pub mod cli;
pub mod config;
pub mod error;
pub mod headers;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod replay;
pub mod tls;
pub mod websocket;

pub use config::ProxyConfig;
pub use error::{Error, Result};
pub use host::{PassthroughHost, ProxyHost};
pub use lifecycle::{Diverter, DiverterEndpoints, LifecycleController, StandaloneDiverter};
pub use logging::init_logger;
pub use models::MessageInfo;
