//! Listen address parsing
//!
//! Splits a `host:port` listen specification. The host doubles as the TLS
//! server name; an empty host means no domain binding and no certificate
//! handling.

use crate::error::{ProxyError, Result};

/// A parsed listen specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    /// Host part, possibly empty
    pub host: String,
    /// Numeric port
    pub port: u16,
}

impl ListenAddr {
    /// The TLS server name, if a host was given
    pub fn domain(&self) -> Option<&str> {
        if self.host.is_empty() {
            None
        } else {
            Some(&self.host)
        }
    }
}

/// Parse a `host:port` string into its host and port.
///
/// IPv6 hosts must be bracketed (`[::1]:8443`); the brackets are removed
/// from the returned host.
pub fn resolve_listen(listen: &str) -> Result<ListenAddr> {
    let (host, port) = split_host_port(listen)?;

    let port_num = port
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ProxyError::InvalidPort {
            port: port.to_string(),
        })?;

    Ok(ListenAddr {
        host: host.to_string(),
        port: port_num,
    })
}

fn split_host_port(listen: &str) -> Result<(&str, &str)> {
    let malformed = |reason: &str| ProxyError::MalformedAddress {
        addr: listen.to_string(),
        reason: reason.to_string(),
    };

    let colon = listen.rfind(':').ok_or_else(|| malformed("missing port"))?;
    let (host_part, port) = (&listen[..colon], &listen[colon + 1..]);

    let host = if let Some(rest) = host_part.strip_prefix('[') {
        let host = rest
            .strip_suffix(']')
            .ok_or_else(|| malformed("missing ']'"))?;
        if host.contains('[') || host.contains(']') {
            return Err(malformed("unexpected bracket"));
        }
        host
    } else {
        if host_part.contains(':') {
            return Err(malformed("too many colons"));
        }
        if host_part.contains('[') || host_part.contains(']') {
            return Err(malformed("unexpected bracket"));
        }
        host_part
    };

    Ok((host, port))
}
