//! Configuration for mkcert-proxy

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ProxyError, Result};
use crate::provision::DEFAULT_MKCERT;

/// Bootstrap input, as supplied by the command line or a config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Listen address as `host:port`; the host is the certificate name
    #[serde(default)]
    pub listen: String,
    /// Directory holding `<host>.pem` and `<host>-key.pem`
    #[serde(default)]
    pub cert_dir: PathBuf,
    /// Explicit certificate path, skips path derivation
    pub cert_file: Option<PathBuf>,
    /// Explicit private key path, skips path derivation
    pub key_file: Option<PathBuf>,
    /// Upstream target, scheme optional (e.g. "localhost:3000")
    #[serde(default)]
    pub proxy: String,
    /// Certificate tool executable
    #[serde(default = "default_mkcert")]
    pub mkcert: String,
}

fn default_mkcert() -> String {
    DEFAULT_MKCERT.to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: String::new(),
            cert_dir: PathBuf::new(),
            cert_file: None,
            key_file: None,
            proxy: String::new(),
            mkcert: default_mkcert(),
        }
    }
}

/// Values that override a loaded configuration.
///
/// `None` keeps the existing value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub cert_dir: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub proxy: Option<String>,
    pub mkcert: Option<String>,
}

impl ProxyConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply overrides on top of this configuration
    pub fn merge(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if let Some(cert_dir) = overrides.cert_dir {
            self.cert_dir = cert_dir;
        }
        if let Some(cert_file) = overrides.cert_file {
            self.cert_file = Some(cert_file);
        }
        if let Some(key_file) = overrides.key_file {
            self.key_file = Some(key_file);
        }
        if let Some(proxy) = overrides.proxy {
            self.proxy = proxy;
        }
        if let Some(mkcert) = overrides.mkcert {
            self.mkcert = mkcert;
        }
        self
    }

    /// Validate configuration before any filesystem work happens
    pub fn validate(&self) -> Result<()> {
        if self.proxy.trim().is_empty() {
            return Err(ProxyError::Config(
                "No proxy target configured (use --proxy)".to_string(),
            ));
        }

        Ok(())
    }
}
