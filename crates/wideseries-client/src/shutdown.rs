//! Pipeline shutdown signalling.
//!
//! A [`ShutdownHandle`] is a cloneable watch channel. The pipeline's producers
//! hold one and stop generating once it fires; everything downstream stops
//! when its input queue closes, so in-flight batches are written before the
//! pipeline reports.
//!
//! ```ignore
//! let shutdown = pipeline.shutdown_handle();
//! tokio::spawn(async move {
//!     let signal = shutdown_signal().await;
//!     shutdown.trigger(signal);
//! });
//! ```

use tokio::sync::watch;
use tracing::warn;

/// Why the pipeline is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Received SIGINT (Ctrl+C)
    SigInt,
    /// Received SIGTERM
    SigTerm,
    /// Requested by the caller
    Manual,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SigInt => write!(f, "SIGINT (Ctrl+C)"),
            Self::SigTerm => write!(f, "SIGTERM"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Handle for triggering and awaiting shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: watch::Sender<Option<ShutdownSignal>>,
    receiver: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(None);
        Self { sender, receiver }
    }

    /// Request a manual shutdown.
    pub fn shutdown(&self) {
        self.trigger(ShutdownSignal::Manual);
    }

    /// Record `signal` unless a shutdown is already in progress.
    pub fn trigger(&self, signal: ShutdownSignal) {
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(signal);
            true
        });
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.receiver.borrow_and_update() {
                return signal;
            }
            if self.receiver.changed().await.is_err() {
                return ShutdownSignal::Manual;
            }
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve on SIGINT or, on Unix, SIGTERM.
///
/// If a handler cannot be installed that source is ignored and the other
/// one is still awaited.
pub async fn shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownSignal::SigInt,
            Err(e) => {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                ShutdownSignal::SigTerm
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<ShutdownSignal>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}
