//! rustls server-side setup for the HTTPS endpoint.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::{ApexError, Result};

/// Build a TLS acceptor from PEM cert chain and private key files.
pub fn acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(ApexError::Config(format!(
            "no certificate found in {}",
            cert_path
        )));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| ApexError::Config(format!("no private key found in {}", key_path)))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ApexError::Config(format!("TLS configuration: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
