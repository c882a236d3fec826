use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::TlsAcceptor;

/// PEM encoded certificate chain and PKCS#8 private key.
#[derive(Clone)]
pub struct TlsMaterial {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert", &format_args!("{} bytes", self.cert.len()))
            .field("key", &"<redacted>")
            .finish()
    }
}

impl TlsMaterial {
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert = std::fs::read(cert_path)
            .with_context(|| format!("Failed to open certificate: {:?}", cert_path))?;
        let key = std::fs::read(key_path)
            .with_context(|| format!("Failed to open private key: {:?}", key_path))?;
        Ok(Self { cert, key })
    }

    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        let cert_chain: Vec<Certificate> = certs(&mut self.cert.as_slice())
            .map_err(|_| anyhow::anyhow!("Failed to parse certificate"))?
            .into_iter()
            .map(Certificate)
            .collect();
        if cert_chain.is_empty() {
            return Err(anyhow::anyhow!("No certificate found"));
        }

        let mut keys = pkcs8_private_keys(&mut self.key.as_slice())
            .map_err(|_| anyhow::anyhow!("Failed to parse private key"))?;
        if keys.is_empty() {
            return Err(anyhow::anyhow!("No private key found"));
        }
        let private_key = PrivateKey(keys.remove(0));

        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| anyhow::anyhow!("Failed to build TLS config: {}", e))?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}
