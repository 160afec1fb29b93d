//! Error types shared across the proxy core.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by the proxy core.
///
/// Every per-connection and per-transaction variant is caught at its own
/// boundary and logged; none of them tear down the listener that produced
/// them. See the module docs on `lifecycle` for how the fatal variants
/// (`ConfigurationInvalid`, `TrustInstallFailed`, `BindFailed`) are handled
/// at startup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("failed to install CA into trust store: {0}")]
    TrustInstallFailed(String),

    #[error("failed to bind listener: {0}")]
    BindFailed(String),

    #[error("failed to peek TLS ClientHello: {0}")]
    HandshakePeekFailed(String),

    #[error("ClientHello carried no SNI server_name extension")]
    SniMissing,

    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("failed to send request upstream: {0}")]
    UpstreamSendFailed(String),

    #[error("failed to read upstream response: {0}")]
    UpstreamReadFailed(String),

    #[error("failed to apply header {name}: {reason}")]
    HeaderApplyFailed { name: String, reason: String },

    #[error("buffer limit of {limit} bytes exceeded")]
    BufferLimitExceeded { limit: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Http(#[from] hyper::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error(transparent)]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    InvalidHeaderValue(#[from] hyper::header::InvalidHeaderValue),

    #[error(transparent)]
    InvalidHeaderName(#[from] hyper::header::InvalidHeaderName),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl Error {
    /// True for errors that should be logged; `Cancelled` is the sole
    /// exception per the error handling design (cancellation is caller
    /// initiated and not a fault).
    pub fn should_log(&self) -> bool {
        !matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_silent() {
        assert!(!Error::Cancelled.should_log());
        assert!(Error::SniMissing.should_log());
    }

    #[test]
    fn header_apply_failed_is_non_fatal_in_shape() {
        let err = Error::HeaderApplyFailed {
            name: "X-Foo".into(),
            reason: "not ascii".into(),
        };
        assert!(err.to_string().contains("X-Foo"));
    }
}
