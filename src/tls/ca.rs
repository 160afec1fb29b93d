//! Spoofed certificate authority and cache (component B).
//!
//! Grounded in the teacher's `tls::cert_gen` and `tls::cache`, but fixes a
//! real gap in both: the teacher's `generate_trusted_domain_cert` only
//! *mimics* a CA-signed certificate (a second independent self-sign that
//! merely copies the organization name), it never actually chains a leaf
//! to the root via `serialize_der_with_signer`. This store performs a
//! genuine signature: every leaf's Authority Key Identifier is derived by
//! `rcgen` from the CA's key when it signs, and `subject(leaf).issuer ==
//! subject(ca)` holds for real.

use crate::error::{Error, Result};
use crate::tls::trust_store::TrustStoreInstaller;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa,
    KeyUsagePurpose, SanType, PKCS_ECDSA_P256_SHA256,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// CA keypair + certificate, and the memoized per-hostname leaf issuance
/// cache. Constructed once at proxy start.
pub struct SpoofedCertStore {
    ca_cert: Certificate,
    ca_cert_der: rustls::Certificate,
    organization: String,
    validity_days_before: i64,
    validity_days_after: i64,
    /// Single mutex guarding both the map and the issuer, per the
    /// concurrency model's certificate-cache rule.
    cache: Mutex<HashMap<String, Arc<rustls::ServerConfig>>>,
}

impl SpoofedCertStore {
    /// Generates the CA (EC P-256, SHA-256/ECDSA), self-signs it, and
    /// installs it into the trust store via `installer`. Any pre-existing
    /// certificate under the same subject is removed first, to keep
    /// installation idempotent across repeated starts.
    pub fn new(
        authority_cn: &str,
        organization: &str,
        validity_days_before: i64,
        validity_days_after: i64,
        installer: &dyn TrustStoreInstaller,
    ) -> Result<Self> {
        let mut params = CertificateParams::new(Vec::<String>::new());
        params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, authority_cn);
            dn.push(DnType::OrganizationName, organization);
            dn
        };
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.alg = &PKCS_ECDSA_P256_SHA256;
        let (not_before, not_after) = validity_window(validity_days_before, validity_days_after);
        params.not_before = not_before;
        params.not_after = not_after;

        let ca_cert = Certificate::from_params(params)
            .map_err(|e| Error::ConfigurationInvalid(format!("CA generation failed: {e}")))?;
        let ca_der = ca_cert
            .serialize_der()
            .map_err(|e| Error::ConfigurationInvalid(format!("CA serialization failed: {e}")))?;

        installer.remove_existing(authority_cn)?;
        installer
            .install(&ca_der, authority_cn)
            .map_err(|e| Error::TrustInstallFailed(e.to_string()))?;

        Ok(Self {
            ca_cert,
            ca_cert_der: rustls::Certificate(ca_der),
            organization: organization.to_string(),
            validity_days_before,
            validity_days_after,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// The CA certificate in DER form, for hosts that want to install it
    /// themselves or display it in a CLI.
    pub fn ca_certificate_der(&self) -> &[u8] {
        &self.ca_cert_der.0
    }

    /// Returns a cached leaf's server config if present; otherwise mints
    /// a fresh EC P-256 leaf signed by the CA, caches it, and returns it.
    /// Hostname comparison case-folds via `to_lowercase`. Never regenerates
    /// or overwrites a cached entry within the process lifetime.
    pub fn leaf_for(&self, host: &str) -> Result<Arc<rustls::ServerConfig>> {
        let key = host.to_lowercase();
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Error::Other("certificate cache mutex poisoned".into()))?;

        if let Some(existing) = cache.get(&key) {
            return Ok(existing.clone());
        }

        let config = Arc::new(self.issue_leaf(&key)?);
        cache.insert(key, config.clone());
        Ok(config)
    }

    fn issue_leaf(&self, host: &str) -> Result<rustls::ServerConfig> {
        let mut params = CertificateParams::new(vec![host.to_string()]);
        params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, host);
            dn.push(DnType::OrganizationName, self.organization.as_str());
            dn
        };
        params.subject_alt_names = vec![SanType::DnsName(host.to_string())];
        params.alg = &PKCS_ECDSA_P256_SHA256;
        let (not_before, not_after) = validity_window(self.validity_days_before, self.validity_days_after);
        params.not_before = not_before;
        params.not_after = not_after;

        let leaf = Certificate::from_params(params)
            .map_err(|e| Error::HandshakeFailed(format!("leaf generation failed for {host}: {e}")))?;
        let leaf_der = leaf
            .serialize_der_with_signer(&self.ca_cert)
            .map_err(|e| Error::HandshakeFailed(format!("leaf signing failed for {host}: {e}")))?;
        let leaf_key_der = leaf.serialize_private_key_der();

        let chain = vec![
            rustls::Certificate(leaf_der),
            self.ca_cert_der.clone(),
        ];
        let key = rustls::PrivateKey(leaf_key_der);

        let mut server_config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| Error::HandshakeFailed(format!("server config build failed for {host}: {e}")))?;
        server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(server_config)
    }
}

/// Computes `(not_before, not_after)` as an offset from the current
/// instant, expressed the way rcgen's `CertificateParams` wants them.
fn validity_window(days_before: i64, days_after: i64) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (
        now - time::Duration::days(days_before),
        now + time::Duration::days(days_after),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::trust_store::NoopTrustStoreInstaller;

    fn store() -> SpoofedCertStore {
        SpoofedCertStore::new("Test CA", "Test Org", 365, 730, &NoopTrustStoreInstaller).unwrap()
    }

    #[test]
    fn leaf_for_is_idempotent_within_process() {
        let store = store();
        let first = store.leaf_for("a.test").unwrap();
        let second = store.leaf_for("a.test").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn different_hosts_get_different_leaves() {
        let store = store();
        let a = store.leaf_for("a.test").unwrap();
        let b = store.leaf_for("b.test").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn hostname_lookup_is_case_insensitive() {
        let store = store();
        let lower = store.leaf_for("a.test").unwrap();
        let upper = store.leaf_for("A.TEST").unwrap();
        assert!(Arc::ptr_eq(&lower, &upper));
    }
}
