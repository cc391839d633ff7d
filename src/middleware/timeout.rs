//! Request deadline.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tracing::warn;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::Response;

/// Answers `503 Service Unavailable` when the inner chain takes longer than
/// the given duration. The inner future is dropped at that point.
pub struct Timeout(pub Duration);

impl Middleware for Timeout {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(TimeoutHandler { limit: self.0, next })
    }
}

struct TimeoutHandler {
    limit: Duration,
    next: BoxedHandler,
}

impl ErasedHandler for TimeoutHandler {
    fn call(&self, req: Request) -> BoxFuture {
        let limit = self.limit;
        let method = req.method().clone();
        let path = req.path().to_owned();
        let fut = self.next.call(req);
        Box::pin(async move {
            match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(%method, %path, limit_ms = limit.as_millis() as u64, "request timed out");
                    Response::status(StatusCode::SERVICE_UNAVAILABLE)
                }
            }
        })
    }
}
