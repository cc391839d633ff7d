//! The user-facing server: global options, route registration, start/stop.
//!
//! ```rust,no_run
//! use tollgate::{Request, RestConf, Route, Server};
//! use tollgate::route::{with_jwt, with_prefix};
//! use tollgate::server::with_not_found_handler;
//!
//! # #[tokio::main]
//! # async fn main() {
//! async fn me(req: Request) -> String {
//!     req.claims().and_then(|c| c.subject()).unwrap_or("nobody").to_owned()
//! }
//!
//! let mut server = Server::must_new(
//!     RestConf::default(),
//!     [with_not_found_handler(|_req: Request| async { "nothing here" })],
//! );
//! server.must_add_routes(
//!     vec![Route::get("/me", me)],
//!     [with_prefix("/api"), with_jwt("a-long-enough-secret")],
//! );
//! server.start().await;
//! # }
//! ```

use std::sync::Arc;

use rustls::ServerConfig;
use tracing::error;

use crate::auth::{AuthError, UnauthorizedCallback};
use crate::config::RestConf;
use crate::engine::{Engine, HttpEngine};
use crate::error::{ConfigError, Error};
use crate::handler::{BoxedHandler, Handler};
use crate::lifecycle::Lifecycle;
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::Response;
use crate::route::{Route, RouteOption, RouteSet};
use crate::router::Router;
use crate::signature::{SignatureError, UnsignedCallback};

/// A global server option. When two options set the same thing, the later
/// one wins.
pub enum RunOption {
    Router(Router),
    NotFoundHandler(BoxedHandler),
    NotAllowedHandler(BoxedHandler),
    TlsConfig(Arc<ServerConfig>),
    UnauthorizedCallback(UnauthorizedCallback),
    UnsignedCallback(UnsignedCallback),
}

/// Serve on `router` instead of a fresh one.
pub fn with_router(router: Router) -> RunOption {
    RunOption::Router(router)
}

/// Answer unmatched requests with `handler`.
pub fn with_not_found_handler(handler: impl Handler) -> RunOption {
    RunOption::NotFoundHandler(handler.into_boxed_handler())
}

/// Answer requests whose path only exists under other methods with `handler`.
pub fn with_not_allowed_handler(handler: impl Handler) -> RunOption {
    RunOption::NotAllowedHandler(handler.into_boxed_handler())
}

pub fn with_tls_config(config: Arc<ServerConfig>) -> RunOption {
    RunOption::TlsConfig(config)
}

/// Build the response for requests failing token authentication.
pub fn with_unauthorized_callback<F>(callback: F) -> RunOption
where
    F: Fn(&Request, &AuthError) -> Response + Send + Sync + 'static,
{
    RunOption::UnauthorizedCallback(Arc::new(callback))
}

/// Build the response for requests failing signature verification.
pub fn with_unsigned_callback<F>(callback: F) -> RunOption
where
    F: Fn(&Request, &SignatureError) -> Response + Send + Sync + 'static,
{
    RunOption::UnsignedCallback(Arc::new(callback))
}

/// Options that decide how the server starts, kept until start.
#[derive(Default)]
pub struct RunOptions {
    router: Option<Router>,
    not_found: Option<BoxedHandler>,
    not_allowed: Option<BoxedHandler>,
}

/// How [`Server::try_start`] starts the engine.
pub enum StartStrategy {
    /// [`Engine::start`].
    Default,
    /// [`Engine::start_with_router`], with fallback handlers installed.
    WithRouter(Router),
}

impl RunOptions {
    /// Custom router if one was given (or a fresh one when only fallbacks
    /// were), with the configured fallbacks installed on it.
    pub fn start_strategy(self) -> StartStrategy {
        let Self { router, not_found, not_allowed } = self;
        if router.is_none() && not_found.is_none() && not_allowed.is_none() {
            return StartStrategy::Default;
        }
        let mut router = router.unwrap_or_default();
        if let Some(h) = not_found {
            router.set_not_found_boxed(h);
        }
        if let Some(h) = not_allowed {
            router.set_not_allowed_boxed(h);
        }
        StartStrategy::WithRouter(router)
    }
}

/// An HTTP server assembled from global options and route sets.
pub struct Server<E: Engine = HttpEngine> {
    engine: E,
    opts: RunOptions,
}

impl Server<HttpEngine> {
    /// Validates `conf` and applies `opts` in order.
    pub fn new(conf: RestConf, opts: impl IntoIterator<Item = RunOption>) -> Result<Self, Error> {
        conf.validate()?;
        Ok(Self::with_engine(HttpEngine::new(conf), opts))
    }

    /// Like [`new`](Self::new).
    ///
    /// # Panics
    ///
    /// Panics if `conf` is invalid.
    pub fn must_new(conf: RestConf, opts: impl IntoIterator<Item = RunOption>) -> Self {
        match Self::new(conf, opts) {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, "invalid server configuration");
                panic!("invalid server configuration: {e}");
            }
        }
    }
}

impl<E: Engine> Server<E> {
    /// Wraps an existing engine and applies `opts` in order.
    pub fn with_engine(engine: E, opts: impl IntoIterator<Item = RunOption>) -> Self {
        let mut server = Self { engine, opts: RunOptions::default() };
        for opt in opts {
            server.apply(opt);
        }
        server
    }

    /// Applies one global option. Overwrites an earlier option of the same kind.
    pub fn apply(&mut self, option: RunOption) {
        match option {
            RunOption::Router(router) => self.opts.router = Some(router),
            RunOption::NotFoundHandler(h) => self.opts.not_found = Some(h),
            RunOption::NotAllowedHandler(h) => self.opts.not_allowed = Some(h),
            RunOption::TlsConfig(config) => self.engine.set_tls_config(config),
            RunOption::UnauthorizedCallback(cb) => self.engine.set_unauthorized_callback(cb),
            RunOption::UnsignedCallback(cb) => self.engine.set_unsigned_callback(cb),
        }
    }

    /// Folds `opts` over `routes` and registers the result.
    pub fn add_routes(
        &mut self,
        routes: Vec<Route>,
        opts: impl IntoIterator<Item = RouteOption>,
    ) -> Result<(), ConfigError> {
        let set = RouteSet::new(routes).with_options(opts)?;
        self.engine.add_routes(set);
        Ok(())
    }

    pub fn add_route(
        &mut self,
        route: Route,
        opts: impl IntoIterator<Item = RouteOption>,
    ) -> Result<(), ConfigError> {
        self.add_routes(vec![route], opts)
    }

    /// Like [`add_routes`](Self::add_routes).
    ///
    /// # Panics
    ///
    /// Panics on a configuration error, e.g. a JWT secret that is too short.
    pub fn must_add_routes(&mut self, routes: Vec<Route>, opts: impl IntoIterator<Item = RouteOption>) {
        if let Err(e) = self.add_routes(routes, opts) {
            error!(error = %e, "invalid route configuration");
            panic!("invalid route configuration: {e}");
        }
    }

    /// Adds a middleware to every route, inside authentication and
    /// signature checks. The first one added is the outermost.
    pub fn use_middleware(&mut self, middleware: impl Middleware) {
        self.engine.use_middleware(Arc::new(middleware));
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// A handle that stops the server from anywhere, e.g. another task.
    pub fn shutdown_handle(&self) -> Lifecycle {
        self.engine.lifecycle()
    }

    /// Requests a graceful shutdown.
    pub fn stop(&self) {
        self.engine.lifecycle().shutdown();
    }

    /// Runs the server until it stops.
    ///
    /// A graceful shutdown ([`Error::ServerClosed`]) counts as success. Any
    /// other failure is logged and returned.
    pub async fn try_start(self) -> Result<(), Error> {
        let Self { mut engine, opts } = self;
        let result = match opts.start_strategy() {
            StartStrategy::Default => engine.start().await,
            StartStrategy::WithRouter(router) => engine.start_with_router(router).await,
        };
        match result {
            Ok(()) | Err(Error::ServerClosed) => Ok(()),
            Err(e) => {
                error!(error = %e, "server failed");
                Err(e)
            }
        }
    }

    /// Runs the server until it stops.
    ///
    /// # Panics
    ///
    /// Panics when the server fails for any reason other than a graceful
    /// shutdown.
    pub async fn start(self) {
        if let Err(e) = self.try_start().await {
            panic!("server failed: {e}");
        }
    }
}
