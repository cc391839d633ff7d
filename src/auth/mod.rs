//! Bearer-token authentication with a secret rotation window.
//!
//! A route set protected with [`with_jwt`](crate::route::with_jwt) accepts a
//! request only when its token verifies against the configured secret.
//! During a rotation ([`with_jwt_transition`](crate::route::with_jwt_transition))
//! a token that fails against the current secret is retried against the
//! previous one, so tokens issued before the rollover keep working until the
//! operator drops the previous secret.
//!
//! The token is read from `Authorization: Bearer <token>`, or failing that
//! from the `access_token` query parameter.

pub mod token;

use std::sync::Arc;

use http::StatusCode;
use http::header::AUTHORIZATION;
use thiserror::Error;
use tracing::warn;

use crate::error::ConfigError;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::{BoxedMiddleware, Middleware};
use crate::request::Request;
use crate::response::Response;

use self::token::{Claims, TokenError, TokenVerifier};

/// Shortest secret accepted by [`validate_secret`], in bytes.
pub const MIN_SECRET_LEN: usize = 8;

/// Per-set authentication settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthConfig {
    pub enabled: bool,
    pub secret: String,
    /// Secret being phased out. Never length-checked.
    pub prev_secret: Option<String>,
}

/// Rejects secrets shorter than [`MIN_SECRET_LEN`].
pub fn validate_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(ConfigError::SecretTooShort { len: secret.len() });
    }
    Ok(())
}

/// Why a request was not authenticated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token: {0}")]
    Invalid(#[from] TokenError),
}

/// Builds the response for a request that failed authentication.
pub type UnauthorizedCallback = Arc<dyn Fn(&Request, &AuthError) -> Response + Send + Sync>;

/// Returns the authentication middleware for `config`, or `None` when
/// authentication is disabled.
///
/// Without a callback, rejected requests get an empty `401 Unauthorized`.
pub fn authorize(
    config: &AuthConfig,
    verifier: Arc<dyn TokenVerifier>,
    callback: Option<UnauthorizedCallback>,
) -> Option<BoxedMiddleware> {
    if !config.enabled {
        return None;
    }
    let policy = Policy {
        secret: config.secret.clone(),
        prev_secret: config.prev_secret.clone().filter(|s| !s.is_empty()),
        verifier,
        callback,
    };
    Some(Arc::new(Authorize(Arc::new(policy))))
}

struct Policy {
    secret: String,
    prev_secret: Option<String>,
    verifier: Arc<dyn TokenVerifier>,
    callback: Option<UnauthorizedCallback>,
}

impl Policy {
    fn check(&self, req: &Request) -> Result<Claims, AuthError> {
        let token = extract_token(req).ok_or(AuthError::MissingToken)?;
        match self.verifier.verify(token, self.secret.as_bytes()) {
            Ok(claims) => Ok(claims),
            Err(err) => match &self.prev_secret {
                Some(prev) => Ok(self.verifier.verify(token, prev.as_bytes())?),
                None => Err(err.into()),
            },
        }
    }

    fn reject(&self, req: &Request, err: &AuthError) -> Response {
        match &self.callback {
            Some(cb) => cb(req, err),
            None => Response::status(StatusCode::UNAUTHORIZED),
        }
    }
}

fn extract_token(req: &Request) -> Option<&str> {
    let from_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        });
    from_header
        .or_else(|| req.query_param("access_token"))
        .filter(|t| !t.is_empty())
}

struct Authorize(Arc<Policy>);

impl Middleware for Authorize {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(AuthorizeHandler { policy: Arc::clone(&self.0), next })
    }
}

struct AuthorizeHandler {
    policy: Arc<Policy>,
    next: BoxedHandler,
}

impl ErasedHandler for AuthorizeHandler {
    fn call(&self, mut req: Request) -> BoxFuture {
        match self.policy.check(&req) {
            Ok(claims) => {
                req.claims = Some(claims);
                self.next.call(req)
            }
            Err(err) => {
                warn!(method = %req.method(), path = %req.path(), error = %err, "authorization failed");
                let res = self.policy.reject(&req, &err);
                Box::pin(async move { res })
            }
        }
    }
}
