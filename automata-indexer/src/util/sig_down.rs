//! Shutdown signal handling.
//!
//! [`SigDown`] turns SIGTERM and SIGINT (Ctrl+C on Windows) into a
//! [`CancellationToken`] shared by the HTTP server and the background sync
//! task, so both stop on the same signal.

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a token when the process is asked to stop.
///
/// ```rust,ignore
/// let sig_down = SigDown::try_new()?;
/// let token = sig_down.cancellation_token();
/// let sync = cache.spawn_periodic(interval, token.clone());
/// axum::serve(listener, app)
///     .with_graceful_shutdown(token.cancelled_owned())
///     .await?;
/// sig_down.recv().await;
/// ```
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Installs the signal listeners.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if signal registration fails.
    #[allow(clippy::unnecessary_wraps)] // Result needed on Unix for signal registration
    pub fn try_new() -> Result<Self, std::io::Error> {
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            task_tracker.spawn(async move {
                let name = tokio::select! {
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigint.recv() => "SIGINT",
                    () = inner.cancelled() => return,
                };
                tracing::info!(signal = name, "Shutting down");
                inner.cancel();
            });
        }

        #[cfg(windows)]
        {
            task_tracker.spawn(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!(signal = "Ctrl-C", "Shutting down");
                        inner.cancel();
                    }
                    () = inner.cancelled() => {}
                }
            });
        }

        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: outer,
        })
    }

    /// A clone of the shutdown token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Waits for shutdown and for the listener task to finish.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
