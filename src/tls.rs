//! rustls server configuration from PEM material.

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;

use crate::error::ConfigError;

/// Builds a [`rustls::ServerConfig`] from PEM-encoded certificate chain and
/// private key bytes. ALPN advertises `h2` and `http/1.1`.
pub fn build_server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>, ConfigError> {
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("failed to parse certificate chain: {e}")))?;
    if certs.is_empty() {
        return Err(ConfigError::Tls("no certificate found in PEM data".into()));
    }

    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_pem))
        .map_err(|e| ConfigError::Tls(format!("failed to read private key: {e}")))?
        .ok_or_else(|| ConfigError::Tls("no private key found in PEM data".into()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ConfigError::Tls(format!("rejected certificate/key pair: {e}")))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Reads both PEM files and calls [`build_server_config`].
pub fn load_server_config(cert_file: &Path, key_file: &Path) -> Result<Arc<ServerConfig>, ConfigError> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|source| ConfigError::Io { path: path.to_owned(), source })
    };
    build_server_config(&read(cert_file)?, &read(key_file)?)
}
