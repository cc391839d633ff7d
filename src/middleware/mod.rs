//! Middleware layer.
//!
//! A middleware turns one handler into another. It is the place for
//! cross-cutting concerns: tracing, timeouts, authentication, signature
//! checks. Middleware is stateless and may be applied any number of times,
//! but **order matters**: the outermost wrapper runs first and returns last.
//!
//! ```rust
//! use tollgate::{middleware, Request, Response, StatusCode};
//! use tollgate::middleware::Next;
//!
//! let deny_bots = middleware::from_fn(|req: Request, next: Next| async move {
//!     if req.header("user-agent").is_some_and(|ua| ua.contains("bot")) {
//!         return Response::status(StatusCode::FORBIDDEN);
//!     }
//!     next.run(req).await
//! });
//! # let _ = deny_bots;
//! ```

mod timeout;
mod trace;

use std::future::Future;
use std::sync::Arc;

pub use timeout::Timeout;
pub use trace::Trace;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::route::Route;

/// A handler-to-handler transformation.
///
/// Satisfied by any `Fn(BoxedHandler) -> BoxedHandler`, by [`from_fn`], and
/// by the built-in [`Trace`] and [`Timeout`].
pub trait Middleware: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Middleware for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

/// A type-erased middleware, as stored by the engine.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The rest of the chain, handed to a [`from_fn`] middleware.
pub struct Next(BoxedHandler);

impl Next {
    /// Runs the wrapped handler (and every layer inside it).
    pub async fn run(self, req: Request) -> Response {
        self.0.call(req).await
    }
}

/// Builds a middleware from an async function of the request and the
/// remaining chain. Returning without calling [`Next::run`] short-circuits.
pub fn from_fn<F, Fut, R>(f: F) -> FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    FromFn(Arc::new(f))
}

/// Middleware returned by [`from_fn`].
pub struct FromFn<F>(Arc<F>);

impl<F, Fut, R> Middleware for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(FromFnHandler { f: Arc::clone(&self.0), next })
    }
}

struct FromFnHandler<F> {
    f: Arc<F>,
    next: BoxedHandler,
}

impl<F, Fut, R> ErasedHandler for FromFnHandler<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.f)(req, Next(Arc::clone(&self.next)));
        Box::pin(async move { fut.await.into_response() })
    }
}

/// Returns new routes whose handlers are wrapped by `middleware`.
/// Method and path are kept; the input routes are left untouched.
pub fn apply_middleware<M>(middleware: &M, routes: &[Route]) -> Vec<Route>
where
    M: Middleware + ?Sized,
{
    routes
        .iter()
        .map(|r| Route {
            method: r.method.clone(),
            path: r.path.clone(),
            handler: middleware.wrap(Arc::clone(&r.handler)),
        })
        .collect()
}

/// Wraps every route with all `middlewares`; the first one is outermost.
///
/// Applied back to front so that `[m1, m2, m3]` runs
/// `m1 → m2 → m3 → handler → m3 → m2 → m1`. An empty list returns the
/// routes with the very same handlers.
pub fn apply_middlewares(middlewares: &[BoxedMiddleware], routes: &[Route]) -> Vec<Route> {
    let mut routes = routes.to_vec();
    for middleware in middlewares.iter().rev() {
        routes = apply_middleware(middleware.as_ref(), &routes);
    }
    routes
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::{Method, StatusCode};

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(name: &'static str, log: &Log) -> BoxedMiddleware {
        let log = Arc::clone(log);
        Arc::new(from_fn(move |req: Request, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name.to_owned());
                let res = next.run(req).await;
                log.lock().unwrap().push(format!("{name}-post"));
                res
            }
        }))
    }

    fn handler_route(log: &Log) -> Route {
        let log = Arc::clone(log);
        Route::new(Method::GET, "/", move |_req: Request| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("handler".to_owned());
                StatusCode::OK
            }
        })
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let log: Log = Arc::default();
        let mws = vec![recording("m1", &log), recording("m2", &log), recording("m3", &log)];
        let routes = apply_middlewares(&mws, &[handler_route(&log)]);

        routes[0].handler.call(Request::new(Method::GET, "/")).await;

        assert_eq!(
            *log.lock().unwrap(),
            ["m1", "m2", "m3", "handler", "m3-post", "m2-post", "m1-post"]
        );
    }

    #[tokio::test]
    async fn nested_application_keeps_call_site_order() {
        let log: Log = Arc::default();
        let inner = apply_middlewares(&[recording("inner", &log)], &[handler_route(&log)]);
        let outer = apply_middlewares(&[recording("outer", &log)], &inner);

        outer[0].handler.call(Request::new(Method::GET, "/")).await;

        assert_eq!(
            *log.lock().unwrap(),
            ["outer", "inner", "handler", "inner-post", "outer-post"]
        );
    }

    #[test]
    fn empty_middleware_list_keeps_handlers() {
        let log: Log = Arc::default();
        let original = [handler_route(&log)];
        let routes = apply_middlewares(&[], &original);
        assert!(Arc::ptr_eq(&routes[0].handler, &original[0].handler));
    }

    #[test]
    fn apply_middleware_leaves_input_untouched() {
        let log: Log = Arc::default();
        let original = [handler_route(&log)];
        let routes = apply_middleware(recording("m", &log).as_ref(), &original);
        assert!(!Arc::ptr_eq(&routes[0].handler, &original[0].handler));
        assert_eq!(routes[0].method, Method::GET);
        assert_eq!(routes[0].path, "/");
    }

    #[tokio::test]
    async fn from_fn_can_short_circuit() {
        let log: Log = Arc::default();
        let deny: BoxedMiddleware =
            Arc::new(from_fn(|_req: Request, _next: Next| async { StatusCode::FORBIDDEN }));
        let routes = apply_middlewares(&[deny], &[handler_route(&log)]);

        let res = routes[0].handler.call(Request::new(Method::GET, "/")).await;

        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn plain_closures_are_middleware() {
        let log: Log = Arc::default();
        let replace: BoxedMiddleware = Arc::new(|_next: BoxedHandler| -> BoxedHandler {
            crate::handler::boxed(|_req: Request| async { StatusCode::ACCEPTED })
        });
        let routes = apply_middlewares(&[replace], &[handler_route(&log)]);
        let res = routes[0].handler.call(Request::new(Method::GET, "/")).await;
        assert_eq!(res.status_code(), StatusCode::ACCEPTED);
    }
}
