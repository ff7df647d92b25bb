//! Process-wide shutdown signaling.
//!
//! Two sibling [`CancellationToken`]s instead of a single shutdown flag:
//! tripping `close` asks every loop to stop admitting new work and finish
//! in-flight work; tripping `quit` asks every wait to resolve immediately.
//! Both are checked independently — `quit` is not required to pass through
//! `close` first.

use tokio_util::sync::CancellationToken;

/// Shared handle to the two shutdown levels: graceful close and brutal quit.
#[derive(Debug, Clone, Default)]
pub struct CancelContext {
    close: CancellationToken,
    quit: CancellationToken,
}

impl CancelContext {
    pub fn new() -> Self {
        Self {
            close: CancellationToken::new(),
            quit: CancellationToken::new(),
        }
    }

    /// Graceful shutdown: stop admitting new customers, let in-flight
    /// customers finish.
    pub fn request_close(&self) {
        self.close.cancel();
    }

    /// Brutal shutdown: every waiting loop wakes up and exits now.
    pub fn request_quit(&self) {
        self.quit.cancel();
    }

    pub fn close_requested(&self) -> bool {
        self.close.is_cancelled()
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.is_cancelled()
    }

    /// Resolves once brutal shutdown has been requested. Intended for use
    /// in `tokio::select!` alongside the real work a task is waiting on.
    pub async fn quit(&self) {
        self.quit.cancelled().await
    }

    /// Resolves once graceful shutdown has been requested.
    pub async fn close(&self) {
        self.close.cancelled().await
    }
}
