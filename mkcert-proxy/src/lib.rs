//! mkcert-proxy: local TLS-terminating reverse proxy
//!
//! Serves HTTPS for a local hostname and forwards every request to a
//! single upstream. If no certificate exists for the hostname yet, one is
//! generated with `mkcert` so browsers trust it out of the box.
//!
//! # Features
//!
//! - Certificate lookup in a directory (`<host>.pem`, `<host>-key.pem`)
//! - Automatic provisioning through a pluggable [`CertificateProvisioner`]
//! - Key pair validation at startup
//! - Single-host reverse proxy with streaming bodies
//!
//! # Example Configuration
//!
//! ```toml
//! listen = "myapp.test:8443"
//! cert_dir = "/home/me/.local/share/mkcert-proxy"
//! proxy = "localhost:3000"
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use mkcert_proxy::{Bootstrapper, ProxyConfig};
//!
//! # async fn run() -> mkcert_proxy::Result<()> {
//! let config = ProxyConfig {
//!     listen: "myapp.test:8443".to_string(),
//!     proxy: "localhost:3000".to_string(),
//!     ..ProxyConfig::default()
//! };
//!
//! let server = Bootstrapper::default().bootstrap(&config)?;
//! server.run().await
//! # }
//! ```

pub mod address;
pub mod bootstrap;
pub mod certs;
pub mod config;
pub mod error;
pub mod provision;
pub mod proxy;
pub mod tls;

pub use bootstrap::{Bootstrapper, ResolvedConfig};
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use provision::{CertificateProvisioner, CertificateRequest, MkcertProvisioner};
pub use proxy::ProxyServer;
