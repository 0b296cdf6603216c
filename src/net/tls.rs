use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::{digest, SHA256};
use std::path::{Path, PathBuf};
use tracing::info;
use wtransport::Identity;

use crate::config::ServerConfig;

// Dev certificate paths
const DEV_CERT_FILE: &str = "certs/cert.pem";
const DEV_KEY_FILE: &str = "certs/key.pem";

/// TLS configuration for WebTransport server
pub struct TlsConfig {
    /// The wtransport Identity containing certificate and key
    pub identity: Identity,
    /// Base64-encoded SHA-256 hash of the certificate (for browser flag)
    pub cert_hash: String,
}

impl TlsConfig {
    /// Load TLS configuration
    ///
    /// Production: set CERT_PATH and KEY_PATH (Let's Encrypt `live/` paths are
    /// also looked up under the container certificate mount).
    /// Development: place PEM files in certs/.
    pub async fn load(config: &ServerConfig) -> Result<Self> {
        let (cert_path, key_path) = Self::resolve_paths(config)?;
        info!("Using cert at {} and key at {}", cert_path.display(), key_path.display());
        Self::load_from_paths(&cert_path, &key_path).await
    }

    fn resolve_paths(config: &ServerConfig) -> Result<(PathBuf, PathBuf)> {
        if let Some(paths) = config.tls_paths() {
            return Ok(paths);
        }

        if Path::new(DEV_CERT_FILE).exists() && Path::new(DEV_KEY_FILE).exists() {
            info!("Loading dev certificate from certs/");
            return Ok((PathBuf::from(DEV_CERT_FILE), PathBuf::from(DEV_KEY_FILE)));
        }

        Err(anyhow!(
            "TLS certificate not found.\n\n\
            For development: place cert.pem and key.pem in certs/.\n\
            For production: set CERT_PATH and KEY_PATH."
        ))
    }

    /// Load certificate from PEM file paths
    async fn load_from_paths(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .context("Failed to load certificate from PEM files")?;

        let cert_hash = compute_cert_hash(&identity);
        info!("Certificate hash: {}", cert_hash);

        Ok(Self {
            identity,
            cert_hash,
        })
    }

    pub fn cert_hash(&self) -> &str {
        &self.cert_hash
    }
}

fn compute_cert_hash(identity: &Identity) -> String {
    identity
        .certificate_chain()
        .as_slice()
        .first()
        .map(|cert| hash_der(cert.der()))
        .unwrap_or_default()
}

/// Base64 SHA-256 of a DER certificate, the form browsers accept for pinning
pub fn hash_der(der: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, der).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_der_format() {
        let hash = hash_der(b"not really a certificate");
        let decoded = STANDARD.decode(&hash).unwrap();
        // SHA-256 produces 32 bytes
        assert_eq!(decoded.len(), 32);
        assert_eq!(hash, hash_der(b"not really a certificate"));
    }

    #[tokio::test]
    async fn test_missing_cert_error() {
        let config = ServerConfig {
            cert_path: Some("/definitely/not/here/cert.pem".into()),
            key_path: Some("/definitely/not/here/key.pem".into()),
            ..Default::default()
        };
        assert!(TlsConfig::load(&config).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires PEM files in certs/
    async fn test_load_dev_cert() {
        let config = TlsConfig::load(&ServerConfig::default()).await.unwrap();
        assert!(!config.cert_hash.is_empty());
    }
}
