//! TLS key pair loading
//!
//! Reads a PEM certificate chain and private key and turns them into a
//! rustls server configuration. Broken or mismatched material is rejected
//! here so it surfaces at startup instead of on the first handshake.

use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, ec_private_keys, pkcs8_private_keys, rsa_private_keys};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ProxyError, Result};

/// Load a certificate/key pair into a rustls server config.
///
/// ALPN advertises HTTP/2 and HTTP/1.1.
pub fn load_key_pair(cert_path: &Path, key_path: &Path) -> Result<ServerConfig> {
    let invalid = |reason: String| ProxyError::InvalidKeyPair {
        cert: cert_path.to_path_buf(),
        key: key_path.to_path_buf(),
        reason,
    };

    info!("Loading TLS certificate from {:?} and {:?}", cert_path, key_path);

    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| invalid(format!("Failed to read certificate file: {}", e)))?;
    let chain = certs(&mut cert_pem.as_slice())
        .map_err(|e| invalid(format!("Failed to read certificates: {}", e)))?;

    if chain.is_empty() {
        return Err(invalid("No certificates found in file".to_string()));
    }

    let key_pem = std::fs::read(key_path)
        .map_err(|e| invalid(format!("Failed to read key file: {}", e)))?;
    let key = read_private_key(&key_pem).map_err(invalid)?;

    check_key_matches(&chain[0], &key).map_err(invalid)?;

    let chain: Vec<Certificate> = chain.into_iter().map(Certificate).collect();

    let mut config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| invalid(format!("TLS config error: {}", e)))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

/// Try PKCS8 first, then RSA, then SEC1 EC
fn read_private_key(pem: &[u8]) -> std::result::Result<PrivateKey, String> {
    let readers: [(&str, fn(&mut dyn std::io::BufRead) -> std::io::Result<Vec<Vec<u8>>>); 3] = [
        ("PKCS8", pkcs8_private_keys),
        ("RSA", rsa_private_keys),
        ("EC", ec_private_keys),
    ];

    for (label, read) in readers {
        let keys = read(&mut &pem[..])
            .map_err(|e| format!("Failed to read {} keys: {}", label, e))?;
        if let Some(key) = keys.into_iter().next() {
            return Ok(PrivateKey(key));
        }
    }

    Err("No private key found in file".to_string())
}

/// Compare the key's public half with the leaf certificate's.
///
/// Keys rcgen cannot decode (PKCS#1 RSA, SEC1 EC) are left to rustls.
fn check_key_matches(leaf_der: &[u8], key: &PrivateKey) -> std::result::Result<(), String> {
    let (_, leaf) = x509_parser::parse_x509_certificate(leaf_der)
        .map_err(|e| format!("Failed to parse certificate: {}", e))?;

    let key_pair = match rcgen::KeyPair::try_from(key.0.as_slice()) {
        Ok(key_pair) => key_pair,
        Err(e) => {
            debug!("Skipping key/certificate match check: {}", e);
            return Ok(());
        }
    };

    let cert_public_key: &[u8] = leaf.public_key().subject_public_key.data.as_ref();
    if cert_public_key != key_pair.public_key_raw() {
        return Err("private key does not match certificate".to_string());
    }

    Ok(())
}
