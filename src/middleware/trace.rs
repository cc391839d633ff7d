//! Per-request span with method, path, status and latency.

use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, info, info_span};

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::Middleware;
use crate::request::Request;

/// Opens a `request` span around the chain and logs one line on completion.
///
/// The engine installs it as the outermost layer of every route.
pub struct Trace;

impl Middleware for Trace {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(TraceHandler { next })
    }
}

struct TraceHandler {
    next: BoxedHandler,
}

impl ErasedHandler for TraceHandler {
    fn call(&self, req: Request) -> BoxFuture {
        let span = info_span!("request", method = %req.method(), path = %req.path());
        let next = Arc::clone(&self.next);
        Box::pin(
            async move {
                let started = Instant::now();
                let res = next.call(req).await;
                info!(
                    status = res.status_code().as_u16(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "request completed"
                );
                res
            }
            .instrument(span),
        )
    }
}
