//! Bearer-token verification.
//!
//! The authorization layer only decides *which* secrets to try; checking a
//! token against one secret is delegated to a [`TokenVerifier`]. The default
//! is [`Hs256Verifier`]: compact JWTs signed with HMAC-SHA256.
//!
//! Format: `base64url(header).base64url(claims).base64url(mac)`, unpadded,
//! where `mac = HMAC-SHA256(secret, "<header>.<claims>")`.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a verified token.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a claim. Returns `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `sub` claim, if it is a string.
    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(Value::as_str)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Why a token did not verify against a given secret.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token not valid yet")]
    NotYetValid,
}

/// Checks one token against one secret.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str, secret: &[u8]) -> Result<Claims, TokenError>;
}

/// HS256 JWT verifier. `exp` and `nbf` are enforced when present.
#[derive(Clone, Copy, Debug, Default)]
pub struct Hs256Verifier;

#[derive(Deserialize)]
struct Header {
    alg: String,
}

impl TokenVerifier for Hs256Verifier {
    fn verify(&self, token: &str, secret: &[u8]) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let Header { alg } = decode_json(header)?;
        if alg != "HS256" {
            return Err(TokenError::UnsupportedAlgorithm(alg));
        }

        let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| TokenError::Malformed)?;
        mac(secret, header, payload)?
            .verify_slice(&sig)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: Map<String, Value> = decode_json(payload)?;
        let now = unix_now() as f64;
        if numeric_date(&claims, "exp")?.is_some_and(|exp| now >= exp) {
            return Err(TokenError::Expired);
        }
        if numeric_date(&claims, "nbf")?.is_some_and(|nbf| now < nbf) {
            return Err(TokenError::NotYetValid);
        }
        Ok(Claims(claims))
    }
}

/// A NumericDate claim may be fractional. Anything other than a number is
/// malformed rather than ignored.
fn numeric_date(claims: &Map<String, Value>, key: &str) -> Result<Option<f64>, TokenError> {
    match claims.get(key) {
        None => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or(TokenError::Malformed),
    }
}

/// Issues an HS256 token for `claims`.
pub fn encode(claims: &Claims, secret: &[u8]) -> Result<String, TokenError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(Value::Object(claims.0.clone()).to_string());
    let sig = mac(secret, &header, &payload)?.finalize().into_bytes();
    Ok(format!("{header}.{payload}.{}", URL_SAFE_NO_PAD.encode(sig)))
}

fn mac(secret: &[u8], header: &str, payload: &str) -> Result<HmacSha256, TokenError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::BadSignature)?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac)
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"current-secret";

    #[test]
    fn issued_token_verifies_with_same_secret() {
        let claims = Claims::new().with("sub", "alice").with("exp", unix_now() + 60);
        let token = encode(&claims, SECRET).unwrap();
        let verified = Hs256Verifier.verify(&token, SECRET).unwrap();
        assert_eq!(verified.subject(), Some("alice"));
    }

    #[test]
    fn other_secret_is_bad_signature() {
        let token = encode(&Claims::new().with("sub", "alice"), SECRET).unwrap();
        assert_eq!(Hs256Verifier.verify(&token, b"another-secret"), Err(TokenError::BadSignature));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = encode(&Claims::new().with("exp", unix_now() - 1), SECRET).unwrap();
        assert_eq!(Hs256Verifier.verify(&token, SECRET), Err(TokenError::Expired));
    }

    #[test]
    fn future_nbf_is_rejected() {
        let token = encode(&Claims::new().with("nbf", unix_now() + 3600), SECRET).unwrap();
        assert_eq!(Hs256Verifier.verify(&token, SECRET), Err(TokenError::NotYetValid));
    }

    #[test]
    fn fractional_expiry_is_enforced() {
        let token = encode(&Claims::new().with("exp", 1000.5), SECRET).unwrap();
        assert_eq!(Hs256Verifier.verify(&token, SECRET), Err(TokenError::Expired));

        let later = (unix_now() + 60) as f64 + 0.5;
        let token = encode(&Claims::new().with("exp", later), SECRET).unwrap();
        assert!(Hs256Verifier.verify(&token, SECRET).is_ok());
    }

    #[test]
    fn non_numeric_dates_are_malformed() {
        let token = encode(&Claims::new().with("exp", "1000"), SECRET).unwrap();
        assert_eq!(Hs256Verifier.verify(&token, SECRET), Err(TokenError::Malformed));

        let token = encode(&Claims::new().with("nbf", "soon"), SECRET).unwrap();
        assert_eq!(Hs256Verifier.verify(&token, SECRET), Err(TokenError::Malformed));
    }

    #[test]
    fn wrong_segment_count_is_malformed() {
        assert_eq!(Hs256Verifier.verify("a.b", SECRET), Err(TokenError::Malformed));
        assert_eq!(Hs256Verifier.verify("a.b.c.d", SECRET), Err(TokenError::Malformed));
    }

    #[test]
    fn none_algorithm_is_refused() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"mallory"}"#);
        let token = format!("{header}.{payload}.");
        assert_eq!(
            Hs256Verifier.verify(&token, SECRET),
            Err(TokenError::UnsupportedAlgorithm("none".into()))
        );
    }

    #[test]
    fn tampered_payload_fails() {
        let token = encode(&Claims::new().with("sub", "alice"), SECRET).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"root"}"#);
        parts[1] = &forged;
        assert_eq!(Hs256Verifier.verify(&parts.join("."), SECRET), Err(TokenError::BadSignature));
    }
}
