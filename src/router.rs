//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup via [`matchit`]. Routes
//! registered with priority live in a second set of trees that is consulted
//! first, so a priority route wins over an ordinary route matching the same
//! request (`/users/{id}` marked priority beats an ordinary `/users/me`).

use std::collections::HashMap;
use std::sync::Arc;

use http::header::ALLOW;
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::request::Request;
use crate::response::Response;

type Trees = HashMap<Method, MatchitRouter<BoxedHandler>>;

/// The application router.
///
/// The engine fills it with fully decorated handlers at start-up; pass a
/// preconfigured one with [`with_router`](crate::server::with_router) to
/// control the fallbacks.
#[derive(Default)]
pub struct Router {
    priority: Trees,
    routes: Trees,
    not_found: Option<BoxedHandler>,
    not_allowed: Option<BoxedHandler>,
}

enum Lookup {
    Found(BoxedHandler, HashMap<String, String>),
    NotAllowed(Vec<Method>),
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax. Fails when the path conflicts
    /// with one already registered in the same tree.
    pub fn add(
        &mut self,
        method: Method,
        path: &str,
        handler: BoxedHandler,
        priority: bool,
    ) -> Result<(), Error> {
        let trees = if priority { &mut self.priority } else { &mut self.routes };
        trees
            .entry(method)
            .or_default()
            .insert(path, handler)
            .map_err(|e| Error::Route { path: path.to_owned(), reason: e.to_string() })
    }

    /// Handler for requests no route matches. Defaults to an empty `404`.
    pub fn set_not_found_handler(&mut self, handler: impl Handler) {
        self.not_found = Some(handler.into_boxed_handler());
    }

    /// Handler for paths that exist under other methods only. Defaults to an
    /// empty `405` with an `Allow` header.
    pub fn set_not_allowed_handler(&mut self, handler: impl Handler) {
        self.not_allowed = Some(handler.into_boxed_handler());
    }

    pub(crate) fn set_not_found_boxed(&mut self, handler: BoxedHandler) {
        self.not_found = Some(handler);
    }

    pub(crate) fn set_not_allowed_boxed(&mut self, handler: BoxedHandler) {
        self.not_allowed = Some(handler);
    }

    /// Routes one request to its handler or to the matching fallback.
    pub fn dispatch(&self, mut req: Request) -> BoxFuture {
        match self.lookup(&req.method, &req.path) {
            Lookup::Found(handler, params) => {
                req.params = params;
                handler.call(req)
            }
            Lookup::NotAllowed(allowed) => match &self.not_allowed {
                Some(h) => h.call(req),
                None => {
                    let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                    let res = Response::builder()
                        .status(StatusCode::METHOD_NOT_ALLOWED)
                        .header(ALLOW.as_str(), &allow)
                        .no_body();
                    Box::pin(async move { res })
                }
            },
            Lookup::NotFound => match &self.not_found {
                Some(h) => h.call(req),
                None => Box::pin(async { Response::status(StatusCode::NOT_FOUND) }),
            },
        }
    }

    fn lookup(&self, method: &Method, path: &str) -> Lookup {
        for trees in [&self.priority, &self.routes] {
            let Some(tree) = trees.get(method) else { continue };
            if let Ok(matched) = tree.at(path) {
                let handler = Arc::clone(matched.value);
                let params = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                return Lookup::Found(handler, params);
            }
        }

        let mut allowed: Vec<Method> = self
            .priority
            .iter()
            .chain(self.routes.iter())
            .filter(|(m, tree)| *m != method && tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed.dedup();
        Lookup::NotAllowed(allowed)
    }
}
