//! # tollgate
//!
//! An HTTP service framework that puts token authentication and request
//! signature checks in front of your handlers, declared per group of routes.
//!
//! ## The contract
//!
//! You describe routes and the options that apply to them. tollgate decides
//! the order things run in, and that order never depends on how you listed
//! the options:
//!
//! - **Trace** and **Timeout** wrap everything
//! - **JWT authentication** rejects requests without a valid token
//! - **Signature verification** rejects unsigned or tampered requests
//! - **Global middleware** runs only for requests that got this far
//!
//! Serving is hyper (HTTP/1.1 and HTTP/2, optional TLS via rustls) with
//! radix-tree routing and graceful shutdown on SIGTERM / Ctrl-C.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tollgate::{Request, Response, RestConf, Route, Server, StatusCode};
//! use tollgate::route::{with_jwt, with_prefix};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Server::must_new(RestConf::default(), []);
//!
//!     server.must_add_routes(vec![Route::get("/health", health)], []);
//!     server.must_add_routes(
//!         vec![
//!             Route::get("/users/{id}", get_user),
//!             Route::post("/users", create_user),
//!         ],
//!         [with_prefix("/api"), with_jwt("change-me-please")],
//!     );
//!
//!     server.start().await;
//! }
//!
//! async fn health(_req: Request) -> StatusCode {
//!     StatusCode::NO_CONTENT
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn create_user(req: Request) -> Response {
//!     if req.body().is_empty() {
//!         return Response::status(StatusCode::BAD_REQUEST);
//!     }
//!     Response::builder()
//!         .status(StatusCode::CREATED)
//!         .header("location", "/api/users/99")
//!         .no_body()
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;

pub mod auth;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod middleware;
pub mod route;
pub mod server;
pub mod signature;
pub mod tls;

pub use config::RestConf;
pub use engine::{Engine, HttpEngine};
pub use error::{ConfigError, Error};
pub use handler::{boxed, BoxFuture, BoxedHandler, ErasedHandler, Handler};
pub use http::{Method, StatusCode};
pub use lifecycle::Lifecycle;
pub use middleware::Middleware;
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use route::{Route, RouteOption, RouteSet};
pub use router::Router;
pub use server::{RunOption, Server};
