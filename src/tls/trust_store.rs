//! The OS certificate-store installer is one of the external collaborators
//! named in §6: installing/removing a DER certificate from the platform
//! trust store is platform-specific and out of this core's scope. This
//! module only defines the contract the certificate store consumes, plus
//! two implementations suitable for embedding and for tests: a no-op (the
//! host is expected to have installed the CA some other way) and one that
//! exports the CA to a file for an external install step to pick up.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Installs or removes a DER-encoded certificate from the current user's
/// or machine's trusted-root store. Implementations must be idempotent:
/// installing twice, or removing a certificate that is not present, must
/// not error.
pub trait TrustStoreInstaller: Send + Sync {
    fn install(&self, der: &[u8], subject_cn: &str) -> Result<()>;
    fn remove_existing(&self, subject_cn: &str) -> Result<()>;
}

/// Does nothing. Appropriate when the embedding host installs the CA
/// through its own platform-specific mechanism and only needs the
/// certificate bytes (available via `SpoofedCertStore::ca_certificate_der`).
pub struct NoopTrustStoreInstaller;

impl TrustStoreInstaller for NoopTrustStoreInstaller {
    fn install(&self, _der: &[u8], _subject_cn: &str) -> Result<()> {
        Ok(())
    }

    fn remove_existing(&self, _subject_cn: &str) -> Result<()> {
        Ok(())
    }
}

/// Writes the CA's DER bytes to a fixed path on every install, so that an
/// external step (shell script, OS-specific tool) can pick it up and
/// perform the actual trust-store mutation. `remove_existing` is a no-op:
/// there is nothing on disk to remove beyond the file this installer
/// itself just overwrites.
pub struct FileExportTrustStoreInstaller {
    path: PathBuf,
}

impl FileExportTrustStoreInstaller {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TrustStoreInstaller for FileExportTrustStoreInstaller {
    fn install(&self, der: &[u8], _subject_cn: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        std::fs::write(&self.path, der).map_err(Error::Io)?;
        Ok(())
    }

    fn remove_existing(&self, _subject_cn: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_export_writes_der_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.der");
        let installer = FileExportTrustStoreInstaller::new(&path);
        installer.install(b"fake-der-bytes", "Test CA").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"fake-der-bytes");
    }

    #[test]
    fn noop_installer_is_idempotent() {
        let installer = NoopTrustStoreInstaller;
        installer.install(b"x", "Test CA").unwrap();
        installer.remove_existing("Test CA").unwrap();
        installer.remove_existing("Test CA").unwrap();
    }
}
