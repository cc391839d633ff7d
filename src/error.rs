//! Unified error types.

use std::path::PathBuf;

use thiserror::Error;

/// The error type returned by tollgate's fallible operations.
///
/// Application-level rejections (401, 404, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// configuration mistakes and infrastructure failures: binding to a port,
/// registering a route the router refuses, or the server being shut down.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The router refused a route, usually because it conflicts with one
    /// already registered.
    #[error("invalid route `{path}`: {reason}")]
    Route { path: String, reason: String },

    /// Returned by an engine once a graceful shutdown has drained every
    /// connection. [`Server::start`](crate::Server::start) treats it as success.
    #[error("server closed")]
    ServerClosed,
}

/// Deployment-time configuration mistakes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("secret's length can't be less than {min}, got {len}", min = crate::auth::MIN_SECRET_LEN)]
    SecretTooShort { len: usize },

    #[error("port must be non-zero")]
    InvalidPort,

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("tls: {0}")]
    Tls(String),
}
