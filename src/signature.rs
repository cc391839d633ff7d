//! Request-signature verification.
//!
//! A signed request carries two headers:
//!
//! ```text
//! X-Content-Security: key=<key id>; timestamp=<unix seconds>; signature=<base64>
//! X-Content-Sha256:   <hex sha256 of the body>
//! ```
//!
//! The signature is `HMAC-SHA256(private_keys[key id], content)` over
//!
//! ```text
//! {timestamp}\n{METHOD}\n{path}\n{query}\n{body hash}
//! ```
//!
//! with an empty body hash when the request carries none. In strict mode the
//! body hash is mandatory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use http::{Method, StatusCode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::auth::token::unix_now;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::{BoxedMiddleware, Middleware};
use crate::request::Request;
use crate::response::Response;

type HmacSha256 = Hmac<Sha256>;

pub const CONTENT_SECURITY: &str = "x-content-security";
pub const CONTENT_SHA256: &str = "x-content-sha256";

/// Accepted clock skew when no expiry is configured.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Per-set signature settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureConfig {
    pub enabled: bool,
    /// Require the body-hash header.
    pub strict: bool,
    /// Largest accepted distance between the signed timestamp and now.
    pub expiry: Duration,
    /// Key material by key id.
    pub private_keys: HashMap<String, Vec<u8>>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strict: false,
            expiry: DEFAULT_EXPIRY,
            private_keys: HashMap::new(),
        }
    }
}

/// Why a request signature was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing content security header")]
    MissingHeader,
    #[error("malformed content security header")]
    Malformed,
    #[error("signature timestamp outside the accepted window")]
    Expired,
    #[error("unknown key `{0}`")]
    UnknownKey(String),
    #[error("missing body hash")]
    MissingBodyHash,
    #[error("body hash mismatch")]
    BodyHashMismatch,
    #[error("signature mismatch")]
    BadSignature,
}

/// Builds the response for a request whose signature was refused.
pub type UnsignedCallback = Arc<dyn Fn(&Request, &SignatureError) -> Response + Send + Sync>;

/// Returns the verification middleware for `config`, or `None` when
/// signatures are disabled.
///
/// Without a callback, refused requests get an empty `401 Unauthorized`.
pub fn verify_signature(
    config: &SignatureConfig,
    callback: Option<UnsignedCallback>,
) -> Option<BoxedMiddleware> {
    if !config.enabled {
        return None;
    }
    let checker = Checker {
        strict: config.strict,
        expiry: config.expiry,
        keys: config.private_keys.clone(),
        callback,
    };
    Some(Arc::new(Verify(Arc::new(checker))))
}

struct Checker {
    strict: bool,
    expiry: Duration,
    keys: HashMap<String, Vec<u8>>,
    callback: Option<UnsignedCallback>,
}

struct ContentSecurity<'a> {
    key: &'a str,
    timestamp: i64,
    signature: Vec<u8>,
}

impl Checker {
    fn check(&self, req: &Request, now: i64) -> Result<(), SignatureError> {
        let header = req.header(CONTENT_SECURITY).ok_or(SignatureError::MissingHeader)?;
        let cs = parse_header(header)?;

        if now.abs_diff(cs.timestamp) > self.expiry.as_secs() {
            return Err(SignatureError::Expired);
        }

        let key = self.keys.get(cs.key)
            .ok_or_else(|| SignatureError::UnknownKey(cs.key.to_owned()))?;

        let hash = match req.header(CONTENT_SHA256) {
            Some(claimed) => {
                let actual = body_hash(req.body());
                if !claimed.trim().eq_ignore_ascii_case(&actual) {
                    return Err(SignatureError::BodyHashMismatch);
                }
                actual
            }
            None if self.strict => return Err(SignatureError::MissingBodyHash),
            None => String::new(),
        };

        let content = signing_content(cs.timestamp, req.method(), req.path(), req.query().unwrap_or(""), &hash);
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SignatureError::BadSignature)?;
        mac.update(content.as_bytes());
        mac.verify_slice(&cs.signature).map_err(|_| SignatureError::BadSignature)
    }

    fn reject(&self, req: &Request, err: &SignatureError) -> Response {
        match &self.callback {
            Some(cb) => cb(req, err),
            None => Response::status(StatusCode::UNAUTHORIZED),
        }
    }
}

fn parse_header(value: &str) -> Result<ContentSecurity<'_>, SignatureError> {
    let (mut key, mut timestamp, mut signature) = (None, None, None);
    for field in value.split(';') {
        let (name, val) = field.trim().split_once('=').ok_or(SignatureError::Malformed)?;
        match name.trim() {
            "key" => key = Some(val.trim()),
            "timestamp" => timestamp = Some(val.trim()),
            "signature" => signature = Some(val.trim()),
            _ => {}
        }
    }
    let (Some(key), Some(timestamp), Some(signature)) = (key, timestamp, signature) else {
        return Err(SignatureError::Malformed);
    };
    Ok(ContentSecurity {
        key,
        timestamp: timestamp.parse().map_err(|_| SignatureError::Malformed)?,
        signature: STANDARD.decode(signature).map_err(|_| SignatureError::Malformed)?,
    })
}

fn signing_content(timestamp: i64, method: &Method, path: &str, query: &str, body_hash: &str) -> String {
    format!("{timestamp}\n{method}\n{path}\n{query}\n{body_hash}")
}

/// Lowercase hex SHA-256 of `body`, the value of [`CONTENT_SHA256`].
pub fn body_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Value of the [`CONTENT_SECURITY`] header for a request.
///
/// Pass an empty `body_hash` when the request will not carry
/// [`CONTENT_SHA256`].
pub fn content_security(
    key_id: &str,
    key: &[u8],
    timestamp: i64,
    method: &Method,
    path: &str,
    query: &str,
    body_hash: &str,
) -> String {
    let content = signing_content(timestamp, method, path, query, body_hash);
    let sig = match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(content.as_bytes());
            STANDARD.encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    };
    format!("key={key_id}; timestamp={timestamp}; signature={sig}")
}

/// Adds signature headers to `req`, signed now. The body hash is included
/// when `with_body_hash` is set.
pub fn sign(req: Request, key_id: &str, key: &[u8], with_body_hash: bool) -> Request {
    sign_at(req, key_id, key, with_body_hash, unix_now())
}

pub(crate) fn sign_at(req: Request, key_id: &str, key: &[u8], with_body_hash: bool, timestamp: i64) -> Request {
    let hash = if with_body_hash { body_hash(req.body()) } else { String::new() };
    let header = content_security(
        key_id,
        key,
        timestamp,
        req.method(),
        req.path(),
        req.query().unwrap_or(""),
        &hash,
    );
    let req = req.with_header(CONTENT_SECURITY, &header);
    if with_body_hash { req.with_header(CONTENT_SHA256, &hash) } else { req }
}

struct Verify(Arc<Checker>);

impl Middleware for Verify {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(VerifyHandler { checker: Arc::clone(&self.0), next })
    }
}

struct VerifyHandler {
    checker: Arc<Checker>,
    next: BoxedHandler,
}

impl ErasedHandler for VerifyHandler {
    fn call(&self, req: Request) -> BoxFuture {
        match self.checker.check(&req, unix_now()) {
            Ok(()) => self.next.call(req),
            Err(err) => {
                warn!(method = %req.method(), path = %req.path(), error = %err, "signature verification failed");
                let res = self.checker.reject(&req, &err);
                Box::pin(async move { res })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::boxed;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn config(strict: bool) -> SignatureConfig {
        SignatureConfig {
            enabled: true,
            strict,
            expiry: Duration::from_secs(300),
            private_keys: HashMap::from([("k1".to_owned(), KEY.to_vec())]),
        }
    }

    fn checker(strict: bool) -> Checker {
        let c = config(strict);
        Checker { strict: c.strict, expiry: c.expiry, keys: c.private_keys, callback: None }
    }

    fn post() -> Request {
        Request::new(Method::POST, "/orders?dry=1").with_body(&br#"{"qty":2}"#[..])
    }

    #[test]
    fn valid_signature_with_body_hash() {
        let now = unix_now();
        let req = sign_at(post(), "k1", KEY, true, now);
        assert_eq!(checker(true).check(&req, now), Ok(()));
    }

    #[test]
    fn missing_header_is_refused() {
        assert_eq!(checker(false).check(&post(), unix_now()), Err(SignatureError::MissingHeader));
    }

    #[test]
    fn garbage_header_is_malformed() {
        let req = post().with_header(CONTENT_SECURITY, "nonsense");
        assert_eq!(checker(false).check(&req, unix_now()), Err(SignatureError::Malformed));
        let req = post().with_header(CONTENT_SECURITY, "key=k1; timestamp=abc; signature=AAAA");
        assert_eq!(checker(false).check(&req, unix_now()), Err(SignatureError::Malformed));
    }

    #[test]
    fn stale_and_future_timestamps_expire() {
        let now = unix_now();
        let stale = sign_at(post(), "k1", KEY, true, now - 301);
        assert_eq!(checker(true).check(&stale, now), Err(SignatureError::Expired));
        let future = sign_at(post(), "k1", KEY, true, now + 301);
        assert_eq!(checker(true).check(&future, now), Err(SignatureError::Expired));
        let edge = sign_at(post(), "k1", KEY, true, now - 300);
        assert_eq!(checker(true).check(&edge, now), Ok(()));
    }

    #[test]
    fn unknown_key_is_refused() {
        let now = unix_now();
        let req = sign_at(post(), "k9", KEY, true, now);
        assert_eq!(checker(true).check(&req, now), Err(SignatureError::UnknownKey("k9".into())));
    }

    #[test]
    fn strict_mode_requires_body_hash() {
        let now = unix_now();
        let req = sign_at(post(), "k1", KEY, false, now);
        assert_eq!(checker(true).check(&req, now), Err(SignatureError::MissingBodyHash));
        assert_eq!(checker(false).check(&req, now), Ok(()));
    }

    #[test]
    fn tampered_body_is_refused_in_both_modes() {
        let now = unix_now();
        let req = sign_at(post(), "k1", KEY, true, now).with_body(&br#"{"qty":200}"#[..]);
        assert_eq!(checker(true).check(&req, now), Err(SignatureError::BodyHashMismatch));
        assert_eq!(checker(false).check(&req, now), Err(SignatureError::BodyHashMismatch));
    }

    #[test]
    fn wrong_key_material_is_bad_signature() {
        let now = unix_now();
        let req = sign_at(post(), "k1", b"some other key", true, now);
        assert_eq!(checker(true).check(&req, now), Err(SignatureError::BadSignature));
    }

    #[test]
    fn query_is_covered_by_signature() {
        let now = unix_now();
        let signed = sign_at(post(), "k1", KEY, true, now);
        let mut moved = Request::new(Method::POST, "/orders?dry=0").with_body(&br#"{"qty":2}"#[..]);
        moved.headers = signed.headers.clone();
        assert_eq!(checker(true).check(&moved, now), Err(SignatureError::BadSignature));
    }

    #[test]
    fn disabled_config_adds_no_layer() {
        assert!(verify_signature(&SignatureConfig::default(), None).is_none());
    }

    #[tokio::test]
    async fn refused_request_goes_to_callback() {
        let cb: UnsignedCallback = Arc::new(|_req: &Request, err: &SignatureError| {
            Response::builder().status(StatusCode::FORBIDDEN).text(err.to_string())
        });
        let inner = boxed(|_req: Request| async { StatusCode::OK });
        let h = verify_signature(&config(false), Some(cb)).unwrap().wrap(inner);

        let res = h.call(post()).await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(res.body(), b"missing content security header");

        let res = h.call(sign(post(), "k1", KEY, true)).await;
        assert_eq!(res.status_code(), StatusCode::OK);
    }
}
