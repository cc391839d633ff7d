//! Route declarations and the per-set options folded over them.
//!
//! A [`RouteSet`] is a batch of routes sharing cross-cutting configuration.
//! Options are applied left to right during startup:
//!
//! ```rust
//! use tollgate::{Request, Route, RouteSet, StatusCode};
//! use tollgate::route::{with_jwt, with_prefix, with_priority};
//!
//! async fn list(_req: Request) -> StatusCode { StatusCode::OK }
//!
//! let set = RouteSet::new(vec![Route::get("/users", list)])
//!     .with_options([with_prefix("/api"), with_priority(), with_jwt("0123456789abcdef")])
//!     .unwrap();
//! assert_eq!(set.routes()[0].path(), "/api/users");
//! ```

use std::fmt;

use http::Method;

use crate::auth::{self, AuthConfig};
use crate::error::ConfigError;
use crate::handler::{BoxedHandler, Handler};
use crate::signature::SignatureConfig;

/// A `(method, path pattern, handler)` triple.
///
/// Options and middleware never mutate a `Route`; they build new ones.
#[derive(Clone)]
pub struct Route {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) handler: BoxedHandler,
}

impl Route {
    /// Path parameters use `{name}` syntax, catch-alls `{*name}`.
    pub fn new(method: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        Self { method, path: path.into(), handler: handler.into_boxed_handler() }
    }

    pub fn get(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::GET, path, handler)
    }

    pub fn post(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::POST, path, handler)
    }

    pub fn put(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::PUT, path, handler)
    }

    pub fn delete(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::DELETE, path, handler)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A mutation of a [`RouteSet`], built by the `with_*` functions below.
#[derive(Clone, Debug)]
pub enum RouteOption {
    Prefix(String),
    Priority,
    /// `prev_secret: None` leaves any configured previous secret in place;
    /// `Some("")` removes it.
    Jwt { secret: String, prev_secret: Option<String> },
    Signature(SignatureConfig),
}

/// Prepends `group` to every route path.
pub fn with_prefix(group: impl Into<String>) -> RouteOption {
    RouteOption::Prefix(group.into())
}

/// Matches these routes before overlapping ordinary ones.
pub fn with_priority() -> RouteOption {
    RouteOption::Priority
}

/// Requires a bearer token signed with `secret`.
///
/// The secret is checked when the option is applied; shorter than
/// [`MIN_SECRET_LEN`](crate::auth::MIN_SECRET_LEN) bytes is a
/// [`ConfigError::SecretTooShort`]. A previous secret set by an earlier
/// [`with_jwt_transition`] stays valid.
pub fn with_jwt(secret: impl Into<String>) -> RouteOption {
    RouteOption::Jwt { secret: secret.into(), prev_secret: None }
}

/// Like [`with_jwt`], additionally accepting tokens signed with
/// `prev_secret` while secrets are being rotated.
///
/// Only `secret` is length-checked: the previous secret is already deployed
/// and tokens signed with it must keep working until it is removed.
pub fn with_jwt_transition(secret: impl Into<String>, prev_secret: impl Into<String>) -> RouteOption {
    RouteOption::Jwt { secret: secret.into(), prev_secret: Some(prev_secret.into()) }
}

/// Requires signed requests; see [`signature`](crate::signature).
pub fn with_signature(config: SignatureConfig) -> RouteOption {
    RouteOption::Signature(config)
}

/// A batch of routes plus the features enabled on all of them.
#[derive(Clone, Debug, Default)]
pub struct RouteSet {
    pub(crate) routes: Vec<Route>,
    pub(crate) jwt: AuthConfig,
    pub(crate) signature: SignatureConfig,
    pub(crate) priority: bool,
}

impl RouteSet {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes, ..Self::default() }
    }

    /// Folds `options` over the set, left to right.
    pub fn with_options(
        mut self,
        options: impl IntoIterator<Item = RouteOption>,
    ) -> Result<Self, ConfigError> {
        for option in options {
            self.apply(option)?;
        }
        Ok(self)
    }

    /// Applies a single option.
    pub fn apply(&mut self, option: RouteOption) -> Result<(), ConfigError> {
        match option {
            RouteOption::Prefix(group) => {
                self.routes = self
                    .routes
                    .iter()
                    .map(|r| Route {
                        method: r.method.clone(),
                        path: join_paths(&group, &r.path),
                        handler: r.handler.clone(),
                    })
                    .collect();
            }
            RouteOption::Priority => self.priority = true,
            RouteOption::Jwt { secret, prev_secret } => {
                auth::validate_secret(&secret)?;
                self.jwt.enabled = true;
                self.jwt.secret = secret;
                if let Some(prev) = prev_secret {
                    self.jwt.prev_secret = Some(prev).filter(|s| !s.is_empty());
                }
            }
            RouteOption::Signature(config) => {
                self.signature = SignatureConfig { enabled: true, ..config };
            }
        }
        Ok(())
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn jwt(&self) -> &AuthConfig {
        &self.jwt
    }

    pub fn signature(&self) -> &SignatureConfig {
        &self.signature
    }

    pub fn is_priority(&self) -> bool {
        self.priority
    }
}

impl From<Vec<Route>> for RouteSet {
    fn from(routes: Vec<Route>) -> Self {
        Self::new(routes)
    }
}

/// Joins two path fragments into one clean absolute path.
///
/// Repeated separators collapse, `.` is dropped, `..` pops a segment, and
/// trailing separators go away. The root stays `/`.
pub(crate) fn join_paths(group: &str, path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in group.split('/').chain(path.split('/')) {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use http::StatusCode;

    use super::*;
    use crate::request::Request;

    async fn ok(_req: Request) -> StatusCode {
        StatusCode::OK
    }

    fn users() -> RouteSet {
        RouteSet::new(vec![Route::get("/users", ok)])
    }

    #[test]
    fn prefix_applies_left_to_right() {
        let set = users().with_options([with_prefix("/api")]).unwrap();
        assert_eq!(set.routes()[0].path(), "/api/users");
        assert_eq!(*set.routes()[0].method(), Method::GET);

        let set = set.with_options([with_prefix("/v1")]).unwrap();
        assert_eq!(set.routes()[0].path(), "/v1/api/users");
    }

    #[test]
    fn prefix_keeps_handler() {
        let before = users();
        let after = before.clone().with_options([with_prefix("/api")]).unwrap();
        assert!(Arc::ptr_eq(after.routes()[0].handler(), before.routes()[0].handler()));
    }

    #[test]
    fn join_normalizes_separators() {
        assert_eq!(join_paths("/api/", "/users/"), "/api/users");
        assert_eq!(join_paths("api", "users"), "/api/users");
        assert_eq!(join_paths("//api//", "//users"), "/api/users");
        assert_eq!(join_paths("/api", "/"), "/api");
        assert_eq!(join_paths("/", "/"), "/");
        assert_eq!(join_paths("/api/v1", "../users/./{id}"), "/api/users/{id}");
    }

    #[test]
    fn priority_only_sets_flag() {
        let before = users();
        let set = before.clone().with_options([with_priority()]).unwrap();
        assert!(set.is_priority());
        assert!(!set.jwt().enabled);
        assert!(Arc::ptr_eq(set.routes()[0].handler(), before.routes()[0].handler()));
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        for secret in ["", "a", "1234567"] {
            let err = users().with_options([with_jwt(secret)]).unwrap_err();
            assert!(matches!(err, ConfigError::SecretTooShort { len } if len == secret.len()));
        }
    }

    #[test]
    fn long_enough_jwt_secret_is_accepted() {
        for secret in ["12345678", "a much longer secret value"] {
            let set = users().with_options([with_jwt(secret)]).unwrap();
            assert!(set.jwt().enabled);
            assert_eq!(set.jwt().secret, secret);
            assert_eq!(set.jwt().prev_secret, None);
        }
    }

    #[test]
    fn transition_does_not_check_previous_secret() {
        let set = users().with_options([with_jwt_transition("longenough1", "x")]).unwrap();
        assert!(set.jwt().enabled);
        assert_eq!(set.jwt().secret, "longenough1");
        assert_eq!(set.jwt().prev_secret.as_deref(), Some("x"));
    }

    #[test]
    fn transition_still_checks_current_secret() {
        let err = users().with_options([with_jwt_transition("short", "previous-secret")]);
        assert!(matches!(err, Err(ConfigError::SecretTooShort { len: 5 })));
    }

    #[test]
    fn empty_previous_secret_means_no_window() {
        let set = users().with_options([with_jwt_transition("longenough1", "")]).unwrap();
        assert_eq!(set.jwt().prev_secret, None);
    }

    #[test]
    fn plain_jwt_after_transition_keeps_previous_secret() {
        let set = users()
            .with_options([with_jwt_transition("longenough1", "old"), with_jwt("longenough2")])
            .unwrap();
        assert_eq!(set.jwt().secret, "longenough2");
        assert_eq!(set.jwt().prev_secret.as_deref(), Some("old"));

        let set = users()
            .with_options([with_jwt("longenough2"), with_jwt_transition("longenough1", "old")])
            .unwrap();
        assert_eq!(set.jwt().secret, "longenough1");
        assert_eq!(set.jwt().prev_secret.as_deref(), Some("old"));
    }

    #[test]
    fn empty_previous_secret_closes_an_open_window() {
        let set = users()
            .with_options([with_jwt_transition("longenough1", "old"), with_jwt_transition("longenough2", "")])
            .unwrap();
        assert_eq!(set.jwt().prev_secret, None);
    }

    #[test]
    fn signature_copies_config_and_enables() {
        let config = SignatureConfig {
            enabled: false,
            strict: true,
            expiry: Duration::from_secs(30),
            private_keys: HashMap::from([("k1".to_owned(), b"key".to_vec())]),
        };
        let set = users().with_options([with_signature(config)]).unwrap();
        let sig = set.signature();
        assert!(sig.enabled);
        assert!(sig.strict);
        assert_eq!(sig.expiry, Duration::from_secs(30));
        assert_eq!(sig.private_keys["k1"], b"key");
    }

    #[test]
    fn options_commute() {
        let a = users()
            .with_options([with_prefix("/api"), with_priority(), with_jwt("0123456789")])
            .unwrap();
        let b = users()
            .with_options([with_jwt("0123456789"), with_priority(), with_prefix("/api")])
            .unwrap();
        assert_eq!(a.routes()[0].path(), b.routes()[0].path());
        assert_eq!(a.is_priority(), b.is_priority());
        assert_eq!(a.jwt(), b.jwt());
    }
}
