//! Message bridge between the Java importer and the Gradle build server
//!
//! Named pipes are poorly supported by Java on Windows, so both Java peers
//! connect as clients to endpoints hosted here and the bridge relays traffic:
//! importer requests go to the build server, build-server notifications go to
//! the importer.
//!
//! Startup order matters. The build-server endpoint must exist before the
//! server process is spawned, and the forwarders must be installed before
//! the importer connection starts consuming, or the importer's first
//! messages are lost.

mod forward;

pub use forward::{NotificationForwarder, RequestForwarder};

use crate::error::{BridgeError, Result};
use crate::ipc::{random_pipe_name, ImporterEndpoint, PipeEndpoint, RpcConnection};
use crate::telemetry;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BridgeState {
    /// Nothing set up
    Uninitialized,
    /// Build-server endpoint is listening
    BuildEndpointReady,
    /// Waiting for the importer to announce its address
    AwaitingImporterPath,
    /// Both peers connected, forwarders not yet active
    ImporterEndpointReady,
    /// Relaying traffic
    Forwarding,
    /// Torn down
    Closed,
}

impl BridgeState {
    /// Check if the bridge is relaying traffic
    pub fn is_forwarding(&self) -> bool {
        matches!(self, BridgeState::Forwarding)
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Uninitialized => write!(f, "uninitialized"),
            BridgeState::BuildEndpointReady => write!(f, "build-endpoint-ready"),
            BridgeState::AwaitingImporterPath => write!(f, "awaiting-importer-path"),
            BridgeState::ImporterEndpointReady => write!(f, "importer-endpoint-ready"),
            BridgeState::Forwarding => write!(f, "forwarding"),
            BridgeState::Closed => write!(f, "closed"),
        }
    }
}

/// Relays JSON-RPC traffic between the importer and the build server
pub struct MessageBridge {
    state: RwLock<BridgeState>,
    build_server: PipeEndpoint,
    importer: ImporterEndpoint,
    /// Cancelled by `close`; replaced by each `prepare_to_start`
    session: Mutex<CancellationToken>,
}

impl MessageBridge {
    /// Create an idle bridge
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BridgeState::Uninitialized),
            build_server: PipeEndpoint::new("build-server", true),
            importer: ImporterEndpoint::new(),
            session: Mutex::new(CancellationToken::new()),
        }
    }

    /// Current state
    pub async fn state(&self) -> BridgeState {
        *self.state.read().await
    }

    /// Listen on a fresh build-server endpoint.
    ///
    /// Must run before the build server is spawned. Returns `false` when no
    /// endpoint address could be generated; bridging is then unavailable.
    pub async fn prepare_to_start(&self) -> bool {
        let address = random_pipe_name();
        if address.is_empty() {
            return false;
        }
        self.prepare_at(&address).await;
        true
    }

    /// Listen on the build-server endpoint at a given address
    pub async fn prepare_at(&self, address: &str) {
        let mut state = self.state.write().await;
        *lock(&self.session) = CancellationToken::new();
        self.build_server.setup(address);
        *state = BridgeState::BuildEndpointReady;
    }

    /// Address the build server should connect to
    pub fn build_server_pipe_name(&self) -> Option<String> {
        self.build_server.address()
    }

    /// Deliver the importer's endpoint address; only the first call counts
    pub fn announce_importer(&self, path: impl AsRef<Path>) -> bool {
        self.importer.announce(path)
    }

    /// Complete startup: wait for the importer, connect both sides, install
    /// forwarders, then let the importer side consume.
    ///
    /// Returns early without error when the bridge is closed meanwhile.
    pub async fn start(&self) -> Result<()> {
        let session = lock(&self.session).clone();

        tokio::select! {
            result = self.run_startup() => result,
            _ = session.cancelled() => {
                info!("Bridge closed during startup");
                Ok(())
            }
        }
    }

    async fn run_startup(&self) -> Result<()> {
        if !self.advance(BridgeState::AwaitingImporterPath).await {
            return Err(BridgeError::InvalidState(
                "bridge must be prepared before start".to_string(),
            ));
        }

        let address = self.importer.wait_for_address().await?;
        info!("Importer endpoint address: {:?}", address);
        self.importer.setup()?;

        let importer = self.importer.endpoint().wait_for_connection().await?;
        let build_server = self.build_server.wait_for_connection().await?;

        if !self.advance(BridgeState::ImporterEndpointReady).await {
            return Ok(());
        }

        install_forwarding(&importer, &build_server);
        self.importer.start_listening()?;

        self.advance(BridgeState::Forwarding).await;
        info!("Bridge forwarding between importer and build server");
        Ok(())
    }

    /// Close both endpoints regardless of state. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        lock(&self.session).cancel();
        self.build_server.close().await;
        self.importer.close().await;
        if *state != BridgeState::Closed {
            info!("Build server connection closed");
        }
        *state = BridgeState::Closed;
    }

    /// Move forward to `next`; never backwards and never out of `Closed`
    async fn advance(&self, next: BridgeState) -> bool {
        let mut state = self.state.write().await;
        if *state == BridgeState::Closed || *state >= next {
            warn!("Ignoring bridge transition {} -> {}", *state, next);
            return false;
        }
        *state = next;
        true
    }
}

impl Default for MessageBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire the two typed forwarders and the error reporters.
///
/// Errors are logged and reported only; the connections stay open.
fn install_forwarding(importer: &Arc<RpcConnection>, build_server: &Arc<RpcConnection>) {
    importer.on_request(Arc::new(RequestForwarder::new(Arc::clone(build_server))));
    build_server.on_notification(Arc::new(NotificationForwarder::new(Arc::clone(importer))));

    importer.on_error(Arc::new(|err: &BridgeError| {
        error!("Error on importerConnection: {}", err);
        telemetry::send_error("bspProxy-importerConnectionError", err);
    }));
    build_server.on_error(Arc::new(|err: &BridgeError| {
        error!("Error on buildServerConnection: {}", err);
        telemetry::send_error("bspProxy-buildServerConnectionError", err);
    }));
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_state_order() {
        assert!(BridgeState::Uninitialized < BridgeState::BuildEndpointReady);
        assert!(BridgeState::ImporterEndpointReady < BridgeState::Forwarding);
        assert!(BridgeState::Forwarding.is_forwarding());
        assert_eq!(BridgeState::AwaitingImporterPath.to_string(), "awaiting-importer-path");
    }

    #[tokio::test]
    async fn test_start_requires_prepare() {
        let bridge = MessageBridge::new();
        assert!(matches!(bridge.start().await, Err(BridgeError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let bridge = MessageBridge::new();
        bridge.close().await;
        bridge.close().await;
        assert_eq!(bridge.state().await, BridgeState::Closed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_interrupts_waiting_start() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bridge = Arc::new(MessageBridge::new());
        bridge
            .prepare_at(&tmp.path().join("bs.sock").to_string_lossy())
            .await;
        assert_eq!(bridge.state().await, BridgeState::BuildEndpointReady);

        let start = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.start().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bridge.state().await, BridgeState::AwaitingImporterPath);

        bridge.close().await;
        let result = tokio::time::timeout(Duration::from_secs(2), start)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(bridge.state().await, BridgeState::Closed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prepare_reopens_after_close() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bridge = MessageBridge::new();
        bridge.close().await;

        bridge
            .prepare_at(&tmp.path().join("bs.sock").to_string_lossy())
            .await;
        assert_eq!(bridge.state().await, BridgeState::BuildEndpointReady);
        assert!(bridge.build_server_pipe_name().is_some());
        bridge.close().await;
    }
}
