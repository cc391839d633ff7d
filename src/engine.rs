//! The engine owns registered route sets, global callbacks and the
//! listening socket.
//!
//! At start-up every [`RouteSet`] is bound into a [`Router`], each handler
//! wrapped outermost to innermost in this fixed order:
//!
//! 1. [`Trace`](crate::middleware::Trace)
//! 2. [`Timeout`](crate::middleware::Timeout), when configured
//! 3. token authentication, when the set enables it
//! 4. signature verification, when the set enables it
//! 5. global middleware, first registered outermost
//! 6. the route handler
//!
//! The order does not depend on the order options were given in.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::auth::{self, UnauthorizedCallback};
use crate::auth::token::{Hs256Verifier, TokenVerifier};
use crate::config::RestConf;
use crate::error::Error;
use crate::lifecycle::Lifecycle;
use crate::middleware::{apply_middlewares, BoxedMiddleware, Timeout, Trace};
use crate::request::Request;
use crate::response::Response;
use crate::route::RouteSet;
use crate::router::Router;
use crate::signature::{self, UnsignedCallback};
use crate::tls;

/// What a [`Server`](crate::Server) needs from the thing that actually
/// serves requests.
pub trait Engine {
    fn add_routes(&mut self, routes: RouteSet);
    fn use_middleware(&mut self, middleware: BoxedMiddleware);
    fn set_unauthorized_callback(&mut self, callback: UnauthorizedCallback);
    fn set_unsigned_callback(&mut self, callback: UnsignedCallback);
    fn set_tls_config(&mut self, config: Arc<ServerConfig>);
    /// Handle used to stop the engine.
    fn lifecycle(&self) -> Lifecycle;
    /// Serves on a fresh router until shut down.
    fn start(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
    /// Serves on `router`, after binding every registered route into it.
    fn start_with_router(&mut self, router: Router) -> impl Future<Output = Result<(), Error>> + Send;
}

/// hyper-based [`Engine`]: HTTP/1.1 and HTTP/2, optional TLS, graceful
/// shutdown through its [`Lifecycle`].
pub struct HttpEngine {
    conf: RestConf,
    route_sets: Vec<RouteSet>,
    middlewares: Vec<BoxedMiddleware>,
    unauthorized: Option<UnauthorizedCallback>,
    unsigned: Option<UnsignedCallback>,
    tls: Option<Arc<ServerConfig>>,
    verifier: Arc<dyn TokenVerifier>,
    lifecycle: Lifecycle,
}

impl HttpEngine {
    pub fn new(conf: RestConf) -> Self {
        Self {
            conf,
            route_sets: Vec::new(),
            middlewares: Vec::new(),
            unauthorized: None,
            unsigned: None,
            tls: None,
            verifier: Arc::new(Hs256Verifier),
            lifecycle: Lifecycle::new(),
        }
    }

    /// Replaces the default HS256 token verifier.
    pub fn with_token_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn tls_config(&self) -> Option<&Arc<ServerConfig>> {
        self.tls.as_ref()
    }

    /// Decorates every registered route and inserts it into `router`.
    pub fn bind(&self, router: &mut Router) -> Result<(), Error> {
        for set in &self.route_sets {
            let chain = self.chain(set);
            for route in apply_middlewares(&chain, &set.routes) {
                debug!(
                    method = %route.method,
                    path = %route.path,
                    priority = set.priority,
                    jwt = set.jwt.enabled,
                    signature = set.signature.enabled,
                    "binding route"
                );
                router.add(route.method, &route.path, route.handler, set.priority)?;
            }
        }
        Ok(())
    }

    fn chain(&self, set: &RouteSet) -> Vec<BoxedMiddleware> {
        let mut chain: Vec<BoxedMiddleware> = vec![Arc::new(Trace)];
        if let Some(limit) = self.conf.timeout() {
            chain.push(Arc::new(Timeout(limit)));
        }
        chain.extend(auth::authorize(&set.jwt, Arc::clone(&self.verifier), self.unauthorized.clone()));
        chain.extend(signature::verify_signature(&set.signature, self.unsigned.clone()));
        chain.extend(self.middlewares.iter().cloned());
        chain
    }

    fn resolve_tls(&self) -> Result<Option<Arc<ServerConfig>>, Error> {
        if let Some(config) = &self.tls {
            return Ok(Some(Arc::clone(config)));
        }
        match (&self.conf.cert_file, &self.conf.key_file) {
            (Some(cert), Some(key)) => Ok(Some(tls::load_server_config(cert, key)?)),
            _ => Ok(None),
        }
    }

    /// Accepts connections until the lifecycle is shut down, then drains
    /// in-flight connections and returns [`Error::ServerClosed`].
    async fn serve(&self, router: Router) -> Result<(), Error> {
        let acceptor = self.resolve_tls()?.map(TlsAcceptor::from);
        let listener = TcpListener::bind(self.conf.addr()).await?;
        // Shared by every connection task; the routing table is never cloned.
        let router = Arc::new(router);

        info!(
            name = %self.conf.name,
            addr = %listener.local_addr()?,
            tls = acceptor.is_some(),
            "listening"
        );

        // Every connection task lands here so shutdown can wait for them.
        let mut tasks = tokio::task::JoinSet::new();

        // Pinned on the stack so `select!` can poll it on every iteration
        // without moving it.
        let shutdown = self.lifecycle.wait();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown is checked first so a pending signal stops
                // accepting immediately, even with connections queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let router = Arc::clone(&router);
                    let lifecycle = self.lifecycle.clone();
                    let acceptor = acceptor.clone();

                    tasks.spawn(async move {
                        match acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(stream) => serve_connection(stream, router, peer, lifecycle).await,
                                Err(e) => warn!(%peer, "tls handshake failed: {e}"),
                            },
                            None => serve_connection(stream, router, peer, lifecycle).await,
                        }
                    });
                }

                // Reap finished connections so the set stays bounded on a
                // long-running server.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: every in-flight connection finishes before we return.
        while tasks.join_next().await.is_some() {}

        info!("server stopped");
        Err(Error::ServerClosed)
    }
}

impl Engine for HttpEngine {
    fn add_routes(&mut self, routes: RouteSet) {
        self.route_sets.push(routes);
    }

    fn use_middleware(&mut self, middleware: BoxedMiddleware) {
        self.middlewares.push(middleware);
    }

    fn set_unauthorized_callback(&mut self, callback: UnauthorizedCallback) {
        self.unauthorized = Some(callback);
    }

    fn set_unsigned_callback(&mut self, callback: UnsignedCallback) {
        self.unsigned = Some(callback);
    }

    fn set_tls_config(&mut self, config: Arc<ServerConfig>) {
        self.tls = Some(config);
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    async fn start(&mut self) -> Result<(), Error> {
        self.start_with_router(Router::new()).await
    }

    async fn start_with_router(&mut self, mut router: Router) -> Result<(), Error> {
        self.bind(&mut router)?;
        self.serve(router).await
    }
}

/// Serves one connection. `auto::Builder` speaks HTTP/1.1 and HTTP/2,
/// whichever the client negotiates. On shutdown the connection finishes
/// its current request and closes.
async fn serve_connection<I>(io: I, router: Arc<Router>, peer: SocketAddr, lifecycle: Lifecycle)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req| {
        let router = Arc::clone(&router);
        async move { dispatch(router, req).await }
    });

    // TokioIo adapts tokio's AsyncRead/AsyncWrite to hyper's IO traits.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(io), svc);
    // `graceful_shutdown` takes `Pin<&mut Self>`, and the connection is
    // polled again afterwards, so it lives pinned on the stack.
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        () = lifecycle.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        error!(%peer, "connection error: {e}");
    }
}

/// Reads the body and hands the request to the router. Every failure is
/// answered with a response, so hyper never sees an error.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(path = %parts.uri.path(), "failed to read request body: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_inner());
        }
    };

    let response = router.dispatch(Request::from_parts(parts, body)).await;
    Ok(response.into_inner())
}
