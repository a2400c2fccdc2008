//! Certificate file location
//!
//! Maps a hostname to `<certdir>/<host>.pem` and `<certdir>/<host>-key.pem`
//! and decides whether those files still have to be generated.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ProxyError, Result};

/// Resolved certificate and key paths for a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateLocation {
    /// Certificate file path
    pub cert_file: PathBuf,
    /// Private key file path
    pub key_file: PathBuf,
    /// Whether a computed path is missing and must be provisioned
    pub needs_provisioning: bool,
}

/// Locates certificate material inside a certificate directory
#[derive(Debug, Clone)]
pub struct CertificateLocator {
    cert_dir: PathBuf,
}

impl CertificateLocator {
    /// Create a locator rooted at `cert_dir`
    pub fn new(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
        }
    }

    /// The certificate directory
    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    /// Canonical certificate path for a host
    pub fn cert_path_for(&self, host: &str) -> PathBuf {
        self.cert_dir.join(format!("{}.pem", host))
    }

    /// Canonical private key path for a host
    pub fn key_path_for(&self, host: &str) -> PathBuf {
        self.cert_dir.join(format!("{}-key.pem", host))
    }

    /// Resolve the certificate and key paths for `host`.
    ///
    /// Caller-supplied paths are returned untouched and never inspected.
    /// Computed paths are stat'ed: a failed stat marks the pair for
    /// provisioning, a directory is a hard error.
    pub fn locate(
        &self,
        host: &str,
        cert_file: Option<&Path>,
        key_file: Option<&Path>,
    ) -> Result<CertificateLocation> {
        let mut needs_provisioning = false;

        let cert_file = match cert_file {
            Some(path) => path.to_path_buf(),
            None => {
                let path = self.cert_path_for(host);
                needs_provisioning |= check_computed_path("certfile", &path)?;
                path
            }
        };

        let key_file = match key_file {
            Some(path) => path.to_path_buf(),
            None => {
                let path = self.key_path_for(host);
                needs_provisioning |= check_computed_path("keyfile", &path)?;
                path
            }
        };

        Ok(CertificateLocation {
            cert_file,
            key_file,
            needs_provisioning,
        })
    }
}

/// Returns whether the path still needs to be generated.
fn check_computed_path(kind: &'static str, path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(ProxyError::PathIsDirectory {
            kind,
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(false),
        Err(e) => {
            debug!("{} {:?} not usable ({}), will provision", kind, path, e);
            Ok(true)
        }
    }
}

/// Verify that a path exists and is not a directory.
pub fn ensure_regular_file(kind: &'static str, path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(ProxyError::PathIsDirectory {
            kind,
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(_) => Err(ProxyError::MissingCertificate {
            kind,
            path: path.to_path_buf(),
        }),
    }
}
