//! Certificate provisioning
//!
//! A provisioner turns a [`CertificateRequest`] into certificate and key
//! files on disk. The default strategy shells out to `mkcert`, which signs
//! with a locally-trusted CA.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::{ProxyError, Result};

/// Default certificate tool executable
pub const DEFAULT_MKCERT: &str = "mkcert";

/// What to generate and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    /// Hostname the certificate is issued for
    pub domain: String,
    /// Destination of the PEM certificate
    pub cert_file: PathBuf,
    /// Destination of the PEM private key
    pub key_file: PathBuf,
}

/// Strategy that makes certificate material exist.
///
/// On `Ok(())` both `cert_file` and `key_file` of the request must exist.
pub trait CertificateProvisioner: Send + Sync {
    fn provision(&self, request: &CertificateRequest) -> Result<()>;
}

/// Provisioner backed by the `mkcert` command line tool
#[derive(Debug, Clone)]
pub struct MkcertProvisioner {
    exe: PathBuf,
}

impl MkcertProvisioner {
    /// Create a provisioner that runs `exe`
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// The executable this provisioner runs
    pub fn exe(&self) -> &Path {
        &self.exe
    }

    fn command(&self, request: &CertificateRequest) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("-cert-file")
            .arg(&request.cert_file)
            .arg("-key-file")
            .arg(&request.key_file)
            .arg(&request.domain);
        cmd
    }

    /// Shell-style rendering of the command for logs and errors
    fn command_line(&self, request: &CertificateRequest) -> String {
        format!(
            "{} -cert-file {} -key-file {} {}",
            self.exe.display(),
            request.cert_file.display(),
            request.key_file.display(),
            request.domain
        )
    }
}

impl Default for MkcertProvisioner {
    fn default() -> Self {
        Self::new(DEFAULT_MKCERT)
    }
}

impl CertificateProvisioner for MkcertProvisioner {
    fn provision(&self, request: &CertificateRequest) -> Result<()> {
        let command_line = self.command_line(request);

        for path in [&request.cert_file, &request.key_file] {
            ensure_parent_dir(path).map_err(|e| ProxyError::ProvisioningFailed {
                command: command_line.clone(),
                reason: format!("could not create certificate directory: {}", e),
                output: String::new(),
            })?;
        }

        info!("$ {}", command_line);

        let output = self
            .command(request)
            .output()
            .map_err(|e| ProxyError::ProvisioningFailed {
                command: command_line.clone(),
                reason: format!("could not be started: {}", e),
                output: String::new(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ProxyError::ProvisioningFailed {
                command: command_line,
                reason: format!("exited with {}", output.status),
                output: combined,
            });
        }

        info!("{}", combined.trim_end());
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            debug!("Creating certificate directory {:?}", dir);
            fs::create_dir_all(dir)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn request_in(dir: &Path) -> CertificateRequest {
        CertificateRequest {
            domain: "myhost".to_string(),
            cert_file: dir.join("myhost.pem"),
            key_file: dir.join("myhost-key.pem"),
        }
    }

    #[test]
    fn test_command_line() {
        let provisioner = MkcertProvisioner::default();
        let request = CertificateRequest {
            domain: "myhost".to_string(),
            cert_file: PathBuf::from("certs/myhost.pem"),
            key_file: PathBuf::from("certs/myhost-key.pem"),
        };

        assert_eq!(
            provisioner.command_line(&request),
            "mkcert -cert-file certs/myhost.pem -key-file certs/myhost-key.pem myhost"
        );

        let cmd = provisioner.command(&request);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["-cert-file", "certs/myhost.pem", "-key-file", "certs/myhost-key.pem", "myhost"]
        );
    }

    #[test]
    fn test_missing_executable() {
        let dir = tempdir().unwrap();
        let provisioner = MkcertProvisioner::new(dir.path().join("no-such-mkcert"));

        let err = provisioner.provision(&request_in(dir.path())).unwrap_err();
        assert!(matches!(err, ProxyError::ProvisioningFailed { .. }));
    }

    #[test]
    fn test_uncreatable_directory_fails_provisioning() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("notadir");
        fs::write(&blocker, "").unwrap();

        let provisioner = MkcertProvisioner::new(dir.path().join("no-such-mkcert"));
        let err = provisioner
            .provision(&request_in(&blocker.join("sub")))
            .unwrap_err();

        match err {
            ProxyError::ProvisioningFailed { reason, output, .. } => {
                assert!(reason.contains("certificate directory"));
                assert!(output.is_empty());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    fn fake_mkcert(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-mkcert");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_run_writes_files() {
        let tool_dir = tempdir().unwrap();
        let cert_dir = tempdir().unwrap();
        // $2 is the cert path, $4 the key path
        let exe = fake_mkcert(tool_dir.path(), "echo cert > \"$2\"; echo key > \"$4\"; echo \"created $5\"");

        let request = request_in(&cert_dir.path().join("nested"));
        MkcertProvisioner::new(exe).provision(&request).unwrap();

        assert!(request.cert_file.is_file());
        assert!(request.key_file.is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_captures_output() {
        let tool_dir = tempdir().unwrap();
        let exe = fake_mkcert(tool_dir.path(), "echo 'to stdout'; echo 'ERROR: no CA' >&2; exit 3");

        let err = MkcertProvisioner::new(exe)
            .provision(&request_in(tool_dir.path()))
            .unwrap_err();

        match err {
            ProxyError::ProvisioningFailed { command, output, .. } => {
                assert!(command.ends_with("myhost"));
                assert!(output.contains("to stdout"));
                assert!(output.contains("ERROR: no CA"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
