//! Error types for mkcert-proxy

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy error types
///
/// Every variant is terminal at bootstrap time. Once the server is
/// running, upstream failures are answered with 502 instead.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Listen address could not be split into host and port
    #[error("Malformed listen address '{addr}': {reason}")]
    MalformedAddress { addr: String, reason: String },

    /// Listen port is not a number in 1..=65535
    #[error("Invalid port '{port}': must be a number between 1 and 65535")]
    InvalidPort { port: String },

    /// A certificate or key path points at a directory
    #[error("{kind} {path:?} is a directory")]
    PathIsDirectory { kind: &'static str, path: PathBuf },

    /// Provisioning reported success but left no file behind
    #[error("{kind} {path:?} does not exist after provisioning")]
    MissingCertificate { kind: &'static str, path: PathBuf },

    /// The certificate tool failed
    #[error("Certificate provisioning failed: `{command}` {reason}\n{output}")]
    ProvisioningFailed {
        command: String,
        reason: String,
        output: String,
    },

    /// Certificate and key could not be loaded as a TLS key pair
    #[error("Invalid key pair ({cert:?}, {key:?}): {reason}")]
    InvalidKeyPair {
        cert: PathBuf,
        key: PathBuf,
        reason: String,
    },

    /// Upstream target is not a usable URL
    #[error("Invalid proxy target '{target}': {reason}")]
    InvalidProxyTarget { target: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
