//! Seam to the embedding application
//!
//! The supervisor never renders UI itself. Whatever hosts it (an editor
//! extension host, the CLI) answers the bridging presence question, shows
//! errors, asks the user about restarts and performs full reinitialization.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{error, warn};

/// Automatic restarts allowed within [`RESTART_WINDOW`]
pub const MAX_AUTO_RESTARTS: usize = 3;

/// Window over which automatic restarts are counted
pub const RESTART_WINDOW: Duration = Duration::from_secs(60);

/// Embedding application
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Host: Send + Sync {
    /// Whether the Java language support that hosts the importer is present
    fn java_extension_installed(&self) -> bool;

    /// Show an error message to the user
    async fn show_error(&self, message: String);

    /// Offer a restart; returns `true` when the user accepts
    async fn confirm_restart(&self, message: String) -> bool;

    /// Tear down and rebuild all in-process client state
    async fn reinitialize(&self);
}

/// Host used by the command line binary.
///
/// Messages go to the log and a reinitialization request wakes whoever
/// awaits [`ConsoleHost::reinitialize_requested`]. Restart prompts are
/// accepted automatically until the server has crashed
/// [`MAX_AUTO_RESTARTS`] times within [`RESTART_WINDOW`]; then they are
/// declined and the server stays down.
#[derive(Debug)]
pub struct ConsoleHost {
    java_extension_installed: bool,
    reinitialize: Notify,
    max_restarts: usize,
    window: Duration,
    /// Accepted restarts still inside the window
    restarts: Mutex<VecDeque<Instant>>,
}

impl ConsoleHost {
    /// Create a console host with the given bridging presence signal
    pub fn new(java_extension_installed: bool) -> Self {
        Self::with_restart_limit(java_extension_installed, MAX_AUTO_RESTARTS, RESTART_WINDOW)
    }

    /// Create a console host accepting at most `max_restarts` per `window`
    pub fn with_restart_limit(
        java_extension_installed: bool,
        max_restarts: usize,
        window: Duration,
    ) -> Self {
        Self {
            java_extension_installed,
            reinitialize: Notify::new(),
            max_restarts,
            window,
            restarts: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait for the next reinitialization request
    pub async fn reinitialize_requested(&self) {
        self.reinitialize.notified().await;
    }
}

impl Default for ConsoleHost {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl Host for ConsoleHost {
    fn java_extension_installed(&self) -> bool {
        self.java_extension_installed
    }

    async fn show_error(&self, message: String) {
        error!("{}", message);
    }

    async fn confirm_restart(&self, message: String) -> bool {
        let now = Instant::now();
        let mut restarts = self.restarts.lock().unwrap_or_else(|e| e.into_inner());
        while restarts
            .front()
            .is_some_and(|at| now.duration_since(*at) >= self.window)
        {
            restarts.pop_front();
        }

        if restarts.len() >= self.max_restarts {
            error!(
                "{} Not restarting: {} crashes within {:?}.",
                message,
                restarts.len(),
                self.window
            );
            return false;
        }

        restarts.push_back(now);
        warn!("{} Restarting.", message);
        true
    }

    async fn reinitialize(&self) {
        self.reinitialize.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_console_host_signals_reinitialize() {
        let host = ConsoleHost::new(true);
        assert!(host.java_extension_installed());
        assert!(host.confirm_restart("server stopped".to_string()).await);

        // The request is kept until someone waits for it
        host.reinitialize().await;
        tokio::time::timeout(Duration::from_secs(1), host.reinitialize_requested())
            .await
            .unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(20), host.reinitialize_requested()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_console_host_stops_restarting_a_crash_loop() {
        let host = ConsoleHost::with_restart_limit(false, 2, Duration::from_millis(200));
        assert!(host.confirm_restart("crashed".to_string()).await);
        assert!(host.confirm_restart("crashed".to_string()).await);
        assert!(!host.confirm_restart("crashed".to_string()).await);
        assert!(!host.confirm_restart("crashed".to_string()).await);

        // Old crashes age out of the window
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(host.confirm_restart("crashed".to_string()).await);
    }
}
