//! Proxy bootstrap
//!
//! Turns a [`ProxyConfig`] into a ready-to-run [`ProxyServer`]:
//!
//! ```text
//! ProxyConfig
//!     → resolve_listen        (ListenAddr)
//!     → CertificateLocator    (CertificateLocation)
//!     → CertificateProvisioner, only if a file is missing
//!     → upstream_target       (ResolvedConfig)
//!     → load_key_pair + ReverseProxy
//!     → ProxyServer
//! ```
//!
//! Every failure is terminal; nothing is retried.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::address::resolve_listen;
use crate::certs::{ensure_regular_file, CertificateLocator};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::provision::{CertificateProvisioner, CertificateRequest, MkcertProvisioner};
use crate::proxy::{upstream_target, ProxyServer, ReverseProxy};
use crate::tls::load_key_pair;

/// Fully resolved bootstrap state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// TLS server name, `None` when the listen host was empty
    pub domain: Option<String>,
    /// Port to bind
    pub listen_port: u16,
    /// Certificate path, set whenever `domain` is set or both paths were supplied
    pub cert_file: Option<PathBuf>,
    /// Private key path, set alongside `cert_file`
    pub key_file: Option<PathBuf>,
    /// Upstream target
    pub target: Url,
}

/// Runs the bootstrap sequence with a given provisioning strategy
#[derive(Clone)]
pub struct Bootstrapper {
    provisioner: Arc<dyn CertificateProvisioner>,
}

impl Bootstrapper {
    /// Create a bootstrapper that provisions through `provisioner`
    pub fn new(provisioner: Arc<dyn CertificateProvisioner>) -> Self {
        Self { provisioner }
    }

    /// Create a bootstrapper that runs the given mkcert executable
    pub fn with_mkcert(exe: &str) -> Result<Self> {
        if exe.trim().is_empty() {
            return Err(ProxyError::Config(
                "Certificate tool executable must not be empty".to_string(),
            ));
        }
        Ok(Self::new(Arc::new(MkcertProvisioner::new(exe))))
    }

    /// Resolve addresses, certificates and target without building a server.
    ///
    /// May block while the provisioner runs.
    pub fn resolve(&self, config: &ProxyConfig) -> Result<ResolvedConfig> {
        config.validate()?;

        let listen = resolve_listen(&config.listen)?;

        let (cert_file, key_file) = match listen.domain() {
            Some(domain) => {
                let (cert, key) = self.ensure_certificates(config, domain)?;
                (Some(cert), Some(key))
            }
            None => match (&config.cert_file, &config.key_file) {
                (Some(cert), Some(key)) => {
                    ensure_regular_file("certfile", cert)?;
                    ensure_regular_file("keyfile", key)?;
                    (Some(cert.clone()), Some(key.clone()))
                }
                (None, None) => (None, None),
                _ => {
                    warn!("Listen address has no host and only one of cert/key is set; serving plain HTTP");
                    (None, None)
                }
            },
        };

        let target = upstream_target(&config.proxy)?;

        Ok(ResolvedConfig {
            domain: listen.domain().map(str::to_string),
            listen_port: listen.port,
            cert_file,
            key_file,
            target,
        })
    }

    /// Run the full bootstrap and assemble the server
    pub fn bootstrap(&self, config: &ProxyConfig) -> Result<ProxyServer> {
        let resolved = self.resolve(config)?;
        assemble(resolved)
    }

    fn ensure_certificates(&self, config: &ProxyConfig, domain: &str) -> Result<(PathBuf, PathBuf)> {
        let locator = CertificateLocator::new(&config.cert_dir);
        let location = locator.locate(
            domain,
            config.cert_file.as_deref(),
            config.key_file.as_deref(),
        )?;

        if location.needs_provisioning {
            info!("Provisioning certificate for {}", domain);
            self.provisioner.provision(&CertificateRequest {
                domain: domain.to_string(),
                cert_file: location.cert_file.clone(),
                key_file: location.key_file.clone(),
            })?;

            ensure_regular_file("certfile", &location.cert_file)?;
            ensure_regular_file("keyfile", &location.key_file)?;
        }

        Ok((location.cert_file, location.key_file))
    }
}

impl Default for Bootstrapper {
    fn default() -> Self {
        Self::new(Arc::new(MkcertProvisioner::default()))
    }
}

/// Load the key pair, if any, and build the server
pub fn assemble(resolved: ResolvedConfig) -> Result<ProxyServer> {
    let tls = match (&resolved.cert_file, &resolved.key_file) {
        (Some(cert), Some(key)) => Some(load_key_pair(cert, key)?),
        _ => None,
    };

    let proxy = ReverseProxy::new(resolved.target)?;
    Ok(ProxyServer::new(resolved.listen_port, tls, proxy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records requests and optionally writes a real key pair
    #[derive(Default)]
    struct RecordingProvisioner {
        requests: Mutex<Vec<CertificateRequest>>,
        write_files: bool,
    }

    impl RecordingProvisioner {
        fn writing() -> Self {
            Self {
                write_files: true,
                ..Self::default()
            }
        }

        fn requests(&self) -> Vec<CertificateRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl CertificateProvisioner for RecordingProvisioner {
        fn provision(&self, request: &CertificateRequest) -> Result<()> {
            self.requests.lock().unwrap().push(request.clone());
            if self.write_files {
                write_key_pair(&request.cert_file, &request.key_file, &request.domain);
            }
            Ok(())
        }
    }

    struct FailingProvisioner;

    impl CertificateProvisioner for FailingProvisioner {
        fn provision(&self, request: &CertificateRequest) -> Result<()> {
            Err(ProxyError::ProvisioningFailed {
                command: format!("mkcert {}", request.domain),
                reason: "exited with exit status: 1".to_string(),
                output: "ERROR: failed to find the default CA location".to_string(),
            })
        }
    }

    fn write_key_pair(cert: &Path, key: &Path, domain: &str) {
        let generated = rcgen::generate_simple_self_signed(vec![domain.to_string()]).unwrap();
        fs::write(cert, generated.cert.pem()).unwrap();
        fs::write(key, generated.key_pair.serialize_pem()).unwrap();
    }

    fn config(listen: &str, cert_dir: &Path) -> ProxyConfig {
        ProxyConfig {
            listen: listen.to_string(),
            cert_dir: cert_dir.to_path_buf(),
            proxy: "localhost:3000".to_string(),
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn test_provisions_missing_certificates() {
        let dir = tempdir().unwrap();
        let provisioner = Arc::new(RecordingProvisioner::writing());
        let bootstrapper = Bootstrapper::new(provisioner.clone());

        let server = bootstrapper
            .bootstrap(&config("myhost:8443", dir.path()))
            .unwrap();

        assert_eq!(
            provisioner.requests(),
            vec![CertificateRequest {
                domain: "myhost".to_string(),
                cert_file: dir.path().join("myhost.pem"),
                key_file: dir.path().join("myhost-key.pem"),
            }]
        );
        assert_eq!(server.port(), 8443);
        assert!(server.is_tls());
    }

    #[test]
    fn test_existing_certificates_skip_provisioning() {
        let dir = tempdir().unwrap();
        write_key_pair(
            &dir.path().join("myhost.pem"),
            &dir.path().join("myhost-key.pem"),
            "myhost",
        );
        let provisioner = Arc::new(RecordingProvisioner::writing());
        let bootstrapper = Bootstrapper::new(provisioner.clone());

        let resolved = bootstrapper
            .resolve(&config("myhost:8443", dir.path()))
            .unwrap();

        assert!(provisioner.requests().is_empty());
        assert_eq!(resolved.domain.as_deref(), Some("myhost"));
        assert_eq!(resolved.cert_file, Some(dir.path().join("myhost.pem")));
        assert_eq!(resolved.key_file, Some(dir.path().join("myhost-key.pem")));
    }

    #[test]
    fn test_empty_host_skips_certificates() {
        let dir = tempdir().unwrap();
        let provisioner = Arc::new(RecordingProvisioner::writing());
        let bootstrapper = Bootstrapper::new(provisioner.clone());

        let resolved = bootstrapper.resolve(&config(":8080", dir.path())).unwrap();
        assert!(provisioner.requests().is_empty());
        assert_eq!(resolved.domain, None);
        assert_eq!(resolved.listen_port, 8080);
        assert_eq!(resolved.cert_file, None);

        let server = assemble(resolved).unwrap();
        assert!(!server.is_tls());
        assert_eq!(server.port(), 8080);
    }

    #[test]
    fn test_target_defaults_to_http() {
        let dir = tempdir().unwrap();
        let mut cfg = config(":8080", dir.path());
        cfg.proxy = "example.com:9000".to_string();

        let resolved = Bootstrapper::default().resolve(&cfg).unwrap();
        assert_eq!(resolved.target.scheme(), "http");
        assert_eq!(resolved.target.host_str(), Some("example.com"));
        assert_eq!(resolved.target.port(), Some(9000));
    }

    #[test]
    fn test_provisioning_failure_is_terminal() {
        let dir = tempdir().unwrap();
        let bootstrapper = Bootstrapper::new(Arc::new(FailingProvisioner));

        let err = bootstrapper
            .bootstrap(&config("myhost:8443", dir.path()))
            .unwrap_err();
        assert!(matches!(err, ProxyError::ProvisioningFailed { .. }));
    }

    #[test]
    fn test_provisioner_that_writes_nothing() {
        let dir = tempdir().unwrap();
        let bootstrapper = Bootstrapper::new(Arc::new(RecordingProvisioner::default()));

        let err = bootstrapper
            .resolve(&config("myhost:8443", dir.path()))
            .unwrap_err();
        assert!(matches!(err, ProxyError::MissingCertificate { kind: "certfile", .. }));
    }

    #[test]
    fn test_directory_in_place_of_certificate() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("myhost-key.pem")).unwrap();
        let provisioner = Arc::new(RecordingProvisioner::writing());
        let bootstrapper = Bootstrapper::new(provisioner.clone());

        let err = bootstrapper
            .resolve(&config("myhost:8443", dir.path()))
            .unwrap_err();
        assert!(matches!(err, ProxyError::PathIsDirectory { .. }));
        assert!(provisioner.requests().is_empty());
    }

    #[test]
    fn test_supplied_broken_key_pair_is_caught() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("custom.crt");
        let key = dir.path().join("custom.key");
        fs::write(&cert, "garbage").unwrap();
        fs::write(&key, "garbage").unwrap();

        let mut cfg = config("myhost:8443", dir.path());
        cfg.cert_file = Some(cert);
        cfg.key_file = Some(key);

        let provisioner = Arc::new(RecordingProvisioner::writing());
        let err = Bootstrapper::new(provisioner.clone())
            .bootstrap(&cfg)
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidKeyPair { .. }));
        assert!(provisioner.requests().is_empty());
    }

    #[test]
    fn test_empty_proxy_fails_before_provisioning() {
        let dir = tempdir().unwrap();
        let mut cfg = config("myhost:8443", dir.path());
        cfg.proxy = String::new();

        let provisioner = Arc::new(RecordingProvisioner::writing());
        let err = Bootstrapper::new(provisioner.clone())
            .resolve(&cfg)
            .unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
        assert!(provisioner.requests().is_empty());
    }

    #[test]
    fn test_empty_host_with_supplied_pair_serves_tls() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("custom.crt");
        let key = dir.path().join("custom.key");
        write_key_pair(&cert, &key, "localhost");

        let mut cfg = config(":8443", dir.path());
        cfg.cert_file = Some(cert.clone());
        cfg.key_file = Some(key.clone());

        let provisioner = Arc::new(RecordingProvisioner::writing());
        let bootstrapper = Bootstrapper::new(provisioner.clone());

        let resolved = bootstrapper.resolve(&cfg).unwrap();
        assert_eq!(resolved.domain, None);
        assert_eq!(resolved.cert_file, Some(cert));
        assert_eq!(resolved.key_file, Some(key));

        let server = assemble(resolved).unwrap();
        assert!(server.is_tls());
        assert_eq!(server.port(), 8443);
        assert!(provisioner.requests().is_empty());
    }

    #[test]
    fn test_empty_host_with_broken_pair_fails() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("custom.crt");
        let key = dir.path().join("custom.key");
        fs::write(&cert, "garbage").unwrap();
        fs::write(&key, "garbage").unwrap();

        let mut cfg = config(":8443", dir.path());
        cfg.cert_file = Some(cert);
        cfg.key_file = Some(key);

        let err = Bootstrapper::default().bootstrap(&cfg).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidKeyPair { .. }));
    }

    #[test]
    fn test_empty_host_with_missing_supplied_file() {
        let dir = tempdir().unwrap();
        let mut cfg = config(":8443", dir.path());
        cfg.cert_file = Some(dir.path().join("absent.crt"));
        cfg.key_file = Some(dir.path().join("absent.key"));

        let err = Bootstrapper::default().resolve(&cfg).unwrap_err();
        assert!(matches!(err, ProxyError::MissingCertificate { kind: "certfile", .. }));
    }

    #[test]
    fn test_with_mkcert_rejects_empty_executable() {
        let err = Bootstrapper::with_mkcert("").err().unwrap();
        assert!(matches!(err, ProxyError::Config(_)));
        assert!(Bootstrapper::with_mkcert("/opt/bin/mkcert").is_ok());
    }

    #[test]
    fn test_custom_provisioner_ignores_mkcert_setting() {
        let dir = tempdir().unwrap();
        let mut cfg = config("myhost:8443", dir.path());
        cfg.mkcert = String::new();

        let provisioner = Arc::new(RecordingProvisioner::writing());
        let resolved = Bootstrapper::new(provisioner.clone()).resolve(&cfg).unwrap();
        assert_eq!(resolved.domain.as_deref(), Some("myhost"));
        assert_eq!(provisioner.requests().len(), 1);
    }

    #[test]
    fn test_bad_listen_address() {
        let dir = tempdir().unwrap();
        let err = Bootstrapper::default()
            .resolve(&config("myhost", dir.path()))
            .unwrap_err();
        assert!(matches!(err, ProxyError::MalformedAddress { .. }));

        let err = Bootstrapper::default()
            .resolve(&config("myhost:https", dir.path()))
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidPort { .. }));
    }
}
