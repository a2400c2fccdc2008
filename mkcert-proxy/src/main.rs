//! mkcert-proxy: HTTPS reverse proxy for local development
//!
//! Generates a locally-trusted certificate for the listen host with
//! mkcert when none exists, then forwards all traffic to one upstream.

use clap::Parser;
use mkcert_proxy::config::ConfigOverrides;
use mkcert_proxy::{Bootstrapper, ProxyConfig, ResolvedConfig};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mkcert-proxy")]
#[command(about = "TLS reverse proxy with certificates from mkcert")]
#[command(version)]
struct Cli {
    /// host:port for the server to listen on
    #[arg(long)]
    listen: Option<String>,

    /// Directory to find or create <host>.pem and <host>-key.pem in
    #[arg(long)]
    certdir: Option<PathBuf>,

    /// Location of the TLS certificate file
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Location of the TLS key file
    #[arg(long)]
    key: Option<PathBuf>,

    /// Server URL to receive proxied requests. Defaults to http://
    #[arg(long)]
    proxy: Option<String>,

    /// mkcert executable used to generate missing certificates
    #[arg(long)]
    mkcert: Option<String>,

    /// TOML file with the same settings; flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen: self.listen.clone(),
            cert_dir: self.certdir.clone(),
            cert_file: self.cert.clone(),
            key_file: self.key.clone(),
            proxy: self.proxy.clone(),
            mkcert: self.mkcert.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mkcert_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("Starting mkcert-proxy v{}", env!("CARGO_PKG_VERSION"));

    let base = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ProxyConfig::from_file(path)?
        }
        None => ProxyConfig::default(),
    };
    let config = base.merge(cli.overrides());

    // Provisioning blocks on a subprocess
    let bootstrapper = Bootstrapper::with_mkcert(&config.mkcert)?;
    let resolved = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || bootstrapper.resolve(&config)).await??
    };

    log_banner(&resolved);

    let mut server = mkcert_proxy::bootstrap::assemble(resolved)?;
    server.reverse_proxy_mut().set_response_hook(|res| {
        info!("{} {:>9} {}", res.status.as_u16(), res.method.as_str(), res.url);
    });

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

fn log_banner(resolved: &ResolvedConfig) {
    match &resolved.domain {
        Some(domain) => info!("LISTEN        https://{}:{}", domain, resolved.listen_port),
        None => info!("LISTEN        :{}", resolved.listen_port),
    }
    info!("REVERSE PROXY {}", resolved.target);

    if let (Some(cert), Some(key)) = (&resolved.cert_file, &resolved.key_file) {
        info!("CERT FILE     {}", cert.display());
        info!("KEY FILE      {}", key.display());
    }
}
