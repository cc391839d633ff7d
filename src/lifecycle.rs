//! Shutdown coordination.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! A [`Lifecycle`] resolves [`Lifecycle::wait`] on the first of:
//! - SIGTERM or SIGINT (Ctrl-C), when signal handling is enabled,
//! - an explicit [`Lifecycle::shutdown`] call from any clone.
//!
//! The engine then stops accepting connections, drains in-flight ones, and
//! returns [`Error::ServerClosed`](crate::Error::ServerClosed).

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared shutdown handle. Clones observe the same state.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    token: CancellationToken,
    signals: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A lifecycle that also reacts to SIGTERM and Ctrl-C.
    pub fn new() -> Self {
        Self { token: CancellationToken::new(), signals: true }
    }

    /// A lifecycle driven only by [`shutdown`](Self::shutdown). Useful in
    /// tests and when the host process owns signal handling.
    pub fn manual() -> Self {
        Self { token: CancellationToken::new(), signals: false }
    }

    /// Requests shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called, without
    /// listening for OS signals itself.
    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Resolves once shutdown has been requested by any means.
    pub async fn wait(&self) {
        if !self.signals {
            self.token.cancelled().await;
            return;
        }
        tokio::select! {
            () = self.token.cancelled() => {}
            () = os_signal() => {
                info!("shutdown signal received");
                self.token.cancel();
            }
        }
    }
}

/// Resolves on SIGTERM or SIGINT. If a handler cannot be installed the
/// failure is logged and that signal is ignored.
async fn os_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
