//! Layered configuration for the proxy core.
//!
//! Precedence, lowest to highest: [`ProxyConfig::default`] → an optional
//! YAML file → `PROXY_*` environment variables → CLI flags (applied by
//! `cli::server::ServerArgs::apply`). [`ProxyConfig::load`] is the single
//! entry point; nothing else in the crate re-derives configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// 128 MiB, the per-direction in-memory buffering cap (§5 of the design).
pub const MAX_REQUEST_BODY_BYTES_DEFAULT: usize = 128 * 1024 * 1024;
/// 65 535 000 bytes, the per-replay buffer cap.
pub const MAX_REPLAY_BUFFER_BYTES_DEFAULT: usize = 65_535_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// CN used for the minted root CA. Default mirrors the host-config
    /// default named in the external interface contract.
    pub authority_name: String,

    /// Whether the diverter should be asked to block traffic from
    /// processes that fail the firewall check outright.
    pub block_external_proxies: bool,

    /// Public dual HTTP/HTTPS listener, IPv4.
    pub public_v4_addr: SocketAddr,
    /// Public dual HTTP/HTTPS listener, IPv6.
    pub public_v6_addr: SocketAddr,
    /// Private loopback listener serving replay duplicates.
    pub replay_loopback_addr: SocketAddr,

    /// Per-direction in-memory body buffering cap.
    pub max_request_body_bytes: usize,
    /// Per-replay buffer cap.
    pub max_replay_buffer_bytes: usize,
    /// Interval between orphan-replay sweeps.
    pub replay_sweep_interval: Duration,

    /// Wall-clock timeout applied to upstream requests.
    pub request_timeout: Duration,

    pub ca: CaConfig,
    pub downstream_tls: DownstreamTlsConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    pub organization: String,
    /// Validity floor, expressed as days before "now" (spec: -1y).
    pub validity_days_before: i64,
    /// Validity ceiling, expressed as days after "now" (spec: +2y).
    pub validity_days_after: i64,
}

/// Downstream (client-facing) TLS posture. Deliberately generous per §9
/// design notes: the proxy must interoperate with legacy clients even
/// though the upstream leg always negotiates modern TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamTlsConfig {
    pub allow_ssl3: bool,
    pub allow_tls1_0: bool,
    pub allow_tls1_1: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_idle_per_host: usize,
    /// Optional single upstream proxy override (§1 non-goals: no chaining
    /// beyond this one hop).
    pub proxy_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub enable_file_logging: bool,
    pub directory: String,
    pub file_prefix: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            authority_name: "CitadelCore".to_string(),
            block_external_proxies: true,
            public_v4_addr: "0.0.0.0:0".parse().unwrap(),
            public_v6_addr: "[::]:0".parse().unwrap(),
            replay_loopback_addr: "127.0.0.1:0".parse().unwrap(),
            max_request_body_bytes: MAX_REQUEST_BODY_BYTES_DEFAULT,
            max_replay_buffer_bytes: MAX_REPLAY_BUFFER_BYTES_DEFAULT,
            replay_sweep_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            ca: CaConfig::default(),
            downstream_tls: DownstreamTlsConfig::default(),
            upstream: UpstreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            organization: "Citadel Proxy".to_string(),
            validity_days_before: 365,
            validity_days_after: 730,
        }
    }
}

impl Default for DownstreamTlsConfig {
    fn default() -> Self {
        Self {
            allow_ssl3: true,
            allow_tls1_0: true,
            allow_tls1_1: true,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            max_idle_per_host: 32,
            proxy_override: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_file_logging: false,
            directory: "logs".to_string(),
            file_prefix: "citadel-proxy".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Load defaults, optionally overlay a YAML file, then overlay
    /// `PROXY_*` environment variables.
    pub fn load(file_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = file_path {
            config = Self::merge_from_file(config, path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn merge_from_file(base: Self, path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let from_file: PartialProxyConfig = serde_yaml::from_str(&contents)
            .map_err(|e| Error::ConfigurationInvalid(e.to_string()))?;
        Ok(from_file.apply_onto(base))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PROXY_AUTHORITY_NAME") {
            self.authority_name = v;
        }
        if let Ok(v) = std::env::var("PROXY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("PROXY_PUBLIC_V4_ADDR") {
            if let Ok(addr) = v.parse() {
                self.public_v4_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("PROXY_PUBLIC_V6_ADDR") {
            if let Ok(addr) = v.parse() {
                self.public_v6_addr = addr;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.authority_name.trim().is_empty() {
            return Err(Error::ConfigurationInvalid(
                "authority_name must not be empty".into(),
            ));
        }
        if self.max_request_body_bytes == 0 {
            return Err(Error::ConfigurationInvalid(
                "max_request_body_bytes must be non-zero".into(),
            ));
        }
        if self.max_replay_buffer_bytes == 0 {
            return Err(Error::ConfigurationInvalid(
                "max_replay_buffer_bytes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Mirror of [`ProxyConfig`] with every field optional, used only to parse
/// a partial YAML overlay without forcing the file to specify everything.
#[derive(Debug, Default, Deserialize)]
struct PartialProxyConfig {
    authority_name: Option<String>,
    block_external_proxies: Option<bool>,
    public_v4_addr: Option<SocketAddr>,
    public_v6_addr: Option<SocketAddr>,
    replay_loopback_addr: Option<SocketAddr>,
    max_request_body_bytes: Option<usize>,
    max_replay_buffer_bytes: Option<usize>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialLoggingConfig {
    level: Option<String>,
    enable_file_logging: Option<bool>,
    directory: Option<String>,
    file_prefix: Option<String>,
}

impl PartialProxyConfig {
    fn apply_onto(self, mut base: ProxyConfig) -> ProxyConfig {
        if let Some(v) = self.authority_name {
            base.authority_name = v;
        }
        if let Some(v) = self.block_external_proxies {
            base.block_external_proxies = v;
        }
        if let Some(v) = self.public_v4_addr {
            base.public_v4_addr = v;
        }
        if let Some(v) = self.public_v6_addr {
            base.public_v6_addr = v;
        }
        if let Some(v) = self.replay_loopback_addr {
            base.replay_loopback_addr = v;
        }
        if let Some(v) = self.max_request_body_bytes {
            base.max_request_body_bytes = v;
        }
        if let Some(v) = self.max_replay_buffer_bytes {
            base.max_replay_buffer_bytes = v;
        }
        if let Some(logging) = self.logging {
            if let Some(v) = logging.level {
                base.logging.level = v;
            }
            if let Some(v) = logging.enable_file_logging {
                base.logging.enable_file_logging = v;
            }
            if let Some(v) = logging.directory {
                base.logging.directory = v;
            }
            if let Some(v) = logging.file_prefix {
                base.logging.file_prefix = v;
            }
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_authority_name() {
        let mut config = ProxyConfig::default();
        config.authority_name = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(Error::ConfigurationInvalid(_))
        ));
    }

    #[test]
    fn load_without_file_uses_env_and_defaults() {
        std::env::remove_var("PROXY_AUTHORITY_NAME");
        let config = ProxyConfig::load(None).unwrap();
        assert_eq!(config.authority_name, "CitadelCore");
    }

    #[test]
    fn file_overlay_merges_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.yaml");
        std::fs::write(&path, "authority_name: TestAuthority\n").unwrap();
        let config = ProxyConfig::load(Some(&path)).unwrap();
        assert_eq!(config.authority_name, "TestAuthority");
        assert_eq!(
            config.max_request_body_bytes,
            MAX_REQUEST_BODY_BYTES_DEFAULT
        );
    }
}
