//! Graceful shutdown coordination.
//!
//! [`ShutdownSignal`] fans a single stop request out to every component
//! holding a clone: the process waits on SIGINT/SIGTERM, the dispatcher's
//! HTTP server waits on [`ShutdownSignal::recv`].
//!
//! # Example
//!
//! ```rust,ignore
//! use aweme_sub::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let server_shutdown = shutdown.clone();
//!
//! tokio::spawn(async move {
//!     server_shutdown.recv().await;
//!     // stop accepting
//! });
//!
//! shutdown.wait().await;
//! ```

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// A signal for coordinating graceful shutdown across components.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Wait for SIGINT or SIGTERM, then notify every holder.
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.recv() => {}
        }

        self.trigger();
    }

    /// Resolve once shutdown has been triggered, even if that happened
    /// before this call.
    pub async fn recv(&self) {
        let mut receiver = self.sender.subscribe();
        // Err means every sender is gone, which only happens on drop.
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }

    /// Check if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Trigger shutdown programmatically.
    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            info!("Shutdown triggered");
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
