//! `citadel-proxy run`: start the proxy core standalone, bound directly to
//! the public listeners with no platform diverter in front of it. Grounded
//! in the teacher's `cli::server::ServerArgs`/`start_server`, trimmed of
//! the teacher's Pingora/backend-selection flags since this crate has a
//! single transaction pipeline, not several interchangeable ones.

use crate::config::ProxyConfig;
use crate::host::PassthroughHost;
use crate::lifecycle::{Diverter, LifecycleController, StandaloneDiverter};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Optional YAML configuration file overlaid onto the built-in defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address for the public IPv4 listeners.
    #[arg(long)]
    pub public_v4_addr: Option<std::net::SocketAddr>,

    /// Bind address for the public IPv6 listeners.
    #[arg(long)]
    pub public_v6_addr: Option<std::net::SocketAddr>,
}

impl RunArgs {
    pub async fn execute(self) -> Result<()> {
        let mut config = ProxyConfig::load(self.config.as_deref())?;
        if let Some(addr) = self.public_v4_addr {
            config.public_v4_addr = addr;
        }
        if let Some(addr) = self.public_v6_addr {
            config.public_v6_addr = addr;
        }

        crate::logging::init_logger(
            &config.logging.level,
            config.logging.enable_file_logging,
            &config.logging.directory,
            &config.logging.file_prefix,
        );

        let host: Arc<dyn crate::host::ProxyHost> = Arc::new(PassthroughHost);
        let controller = LifecycleController::new(config, host.clone())?;
        let diverter: Arc<dyn Diverter> = Arc::new(StandaloneDiverter::new(host));

        let endpoints = controller.start(diverter.clone()).await?;
        info!(
            v4_http = %endpoints.v4_http,
            v4_https = %endpoints.v4_https,
            v6_http = %endpoints.v6_http,
            v6_https = %endpoints.v6_https,
            "proxy running; point clients at these listeners, Ctrl-C to stop",
        );

        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        controller.stop(diverter.as_ref());

        Ok(())
    }
}
