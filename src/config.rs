//! Server configuration, loaded from TOML.
//!
//! ```toml
//! name = "orders"
//! host = "0.0.0.0"
//! port = 8080
//! timeout_ms = 3000
//! cert_file = "/etc/tls/cert.pem"
//! key_file = "/etc/tls/key.pem"
//!
//! [signature]
//! strict = true
//! expiry_secs = 300
//!
//! [[signature.private_keys]]
//! fingerprint = "k1"
//! key_file = "/etc/keys/k1.key"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::signature::{SignatureConfig, DEFAULT_EXPIRY};

/// Root configuration of a [`Server`](crate::Server).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestConf {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Per-request deadline in milliseconds; `0` disables it.
    pub timeout_ms: u64,
    /// Serve TLS from these PEM files unless a TLS config is passed explicitly.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub signature: SignatureConf,
}

impl Default for RestConf {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "0.0.0.0".to_owned(),
            port: 8888,
            timeout_ms: 3000,
            cert_file: None,
            key_file: None,
            signature: SignatureConf::default(),
        }
    }
}

impl RestConf {
    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_owned(), source })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let conf: Self = toml::from_str(content)?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        Ok(())
    }

    /// `host:port` to bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Signature settings as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignatureConf {
    pub strict: bool,
    pub expiry_secs: u64,
    pub private_keys: Vec<PrivateKeyConf>,
}

impl Default for SignatureConf {
    fn default() -> Self {
        Self { strict: false, expiry_secs: DEFAULT_EXPIRY.as_secs(), private_keys: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivateKeyConf {
    pub fingerprint: String,
    pub key_file: PathBuf,
}

impl SignatureConf {
    /// Reads every key file. The result is ready for
    /// [`with_signature`](crate::route::with_signature).
    pub fn load(&self) -> Result<SignatureConfig, ConfigError> {
        let mut private_keys = HashMap::with_capacity(self.private_keys.len());
        for key in &self.private_keys {
            let material = std::fs::read(&key.key_file)
                .map_err(|source| ConfigError::Io { path: key.key_file.clone(), source })?;
            private_keys.insert(key.fingerprint.clone(), material);
        }
        Ok(SignatureConfig {
            enabled: false,
            strict: self.strict,
            expiry: Duration::from_secs(self.expiry_secs),
            private_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let conf = RestConf::from_toml_str("").unwrap();
        assert_eq!(conf.addr(), "0.0.0.0:8888");
        assert_eq!(conf.timeout(), Some(Duration::from_secs(3)));
        assert_eq!(conf.signature.expiry_secs, 3600);
        assert!(conf.cert_file.is_none());
    }

    #[test]
    fn parses_full_document() {
        let conf = RestConf::from_toml_str(
            r#"
            name = "orders"
            host = "127.0.0.1"
            port = 9000
            timeout_ms = 0

            [signature]
            strict = true
            expiry_secs = 60

            [[signature.private_keys]]
            fingerprint = "k1"
            key_file = "/keys/k1"
            "#,
        )
        .unwrap();
        assert_eq!(conf.name, "orders");
        assert_eq!(conf.addr(), "127.0.0.1:9000");
        assert_eq!(conf.timeout(), None);
        assert!(conf.signature.strict);
        assert_eq!(conf.signature.private_keys[0].fingerprint, "k1");
    }

    #[test]
    fn zero_port_is_rejected() {
        assert!(matches!(RestConf::from_toml_str("port = 0"), Err(ConfigError::InvalidPort)));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(RestConf::from_toml_str("port = \"x\""), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn signature_keys_are_read_from_disk() {
        let path = std::env::temp_dir().join(format!("tollgate-key-{}", std::process::id()));
        std::fs::write(&path, b"secret key bytes").unwrap();
        let conf = SignatureConf {
            strict: true,
            expiry_secs: 120,
            private_keys: vec![PrivateKeyConf { fingerprint: "k1".into(), key_file: path.clone() }],
        };

        let loaded = conf.load().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(loaded.strict);
        assert_eq!(loaded.expiry, Duration::from_secs(120));
        assert_eq!(loaded.private_keys["k1"], b"secret key bytes");
    }

    #[test]
    fn missing_key_file_is_an_io_error() {
        let conf = SignatureConf {
            private_keys: vec![PrivateKeyConf { fingerprint: "k1".into(), key_file: "/nonexistent/k1".into() }],
            ..SignatureConf::default()
        };
        assert!(matches!(conf.load(), Err(ConfigError::Io { .. })));
    }
}
