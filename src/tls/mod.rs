//! TLS interception: the spoofed certificate authority (component B) and
//! the per-connection SNI adapter (component C).

pub mod ca;
pub mod sni;
pub mod trust_store;

pub use ca::SpoofedCertStore;
pub use sni::{accept, PeekedConnection};
pub use trust_store::{FileExportTrustStoreInstaller, NoopTrustStoreInstaller, TrustStoreInstaller};
