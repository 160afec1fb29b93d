//! The `Diverter` contract (§6 external interfaces) and a standalone
//! stand-in for it.
//!
//! The real diverter is a platform packet-redirection component entirely
//! outside this crate's scope (§1/§6: "the platform packet diverter...
//! whose implementations do not constitute interesting engineering"). For
//! embedding without one — the CLI's `run` subcommand — `StandaloneDiverter`
//! satisfies the contract by doing nothing beyond delegating the firewall
//! question to the host; traffic reaches the bound listeners because
//! clients are pointed at them directly, not because anything here
//! redirects packets.

use crate::host::ProxyHost;
use crate::models::{FirewallRequest, FirewallResponse};
use std::sync::Arc;

/// External component the core consumes (§6). `confirm_deny_firewall_access`
/// is called by whatever owns the diverter when it needs a per-process
/// allow/deny decision; a real implementation resolves `binary_path`/`pid`
/// from the OS's connection table before asking.
pub trait Diverter: Send + Sync {
    fn confirm_deny_firewall_access(&self, binary_path: &str, pid: u32, local_port: u16, remote_port: u16) -> FirewallResponse;

    /// `num_threads <= 0` means one thread per logical core.
    fn start(&self, num_threads: i32);

    fn stop(&self);

    fn drop_external_proxies(&self) -> bool;
}

/// A `Diverter` with no platform hook: `confirm_deny_firewall_access`
/// delegates straight to the embedding host's `firewall_check`, and
/// `start`/`stop` are no-ops since there is no packet redirection to
/// manage.
pub struct StandaloneDiverter {
    host: Arc<dyn ProxyHost>,
    drop_external_proxies: bool,
}

impl StandaloneDiverter {
    pub fn new(host: Arc<dyn ProxyHost>) -> Self {
        Self {
            host,
            drop_external_proxies: true,
        }
    }

    pub fn with_drop_external_proxies(mut self, drop_external_proxies: bool) -> Self {
        self.drop_external_proxies = drop_external_proxies;
        self
    }
}

impl Diverter for StandaloneDiverter {
    fn confirm_deny_firewall_access(&self, binary_path: &str, pid: u32, local_port: u16, remote_port: u16) -> FirewallResponse {
        let request = FirewallRequest {
            binary_path: binary_path.to_string(),
            local_port,
            remote_port,
            process_id: pid,
        };
        futures::executor::block_on(self.host.firewall_check(&request))
    }

    fn start(&self, _num_threads: i32) {
        tracing::info!("standalone diverter started (no packet redirection; point clients at the bound listeners directly)");
    }

    fn stop(&self) {
        tracing::info!("standalone diverter stopped");
    }

    fn drop_external_proxies(&self) -> bool {
        self.drop_external_proxies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PassthroughHost;
    use crate::models::FirewallDecision;

    #[test]
    fn standalone_diverter_allows_by_default() {
        let diverter = StandaloneDiverter::new(Arc::new(PassthroughHost));
        let response = diverter.confirm_deny_firewall_access("SYSTEM", 0, 8080, 443);
        assert_eq!(response.decision, FirewallDecision::DontFilterApplication);
    }
}
