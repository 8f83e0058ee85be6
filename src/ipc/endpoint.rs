//! Listening endpoints hosting a single client
//!
//! An endpoint listens on a Unix domain socket (Linux/macOS) or a named pipe
//! (Windows) and binds the first client that connects as an
//! [`RpcConnection`]. Bind failures are not returned from `setup`; they are
//! published through the endpoint's error signal.

use crate::error::{BridgeError, Result};
use crate::ipc::connection::RpcConnection;
use crate::telemetry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type ConnectionSlot = watch::Sender<Option<Arc<RpcConnection>>>;
type ErrorSlot = watch::Sender<Option<String>>;

/// One listening local-IPC server accepting exactly one client
pub struct PipeEndpoint {
    /// Name used in logs and connection labels
    label: &'static str,
    /// Start reading as soon as the client connects
    listen_on_connect: bool,
    /// Address passed to the last `setup`
    address: Mutex<Option<String>>,
    /// Bound connection
    connection: Arc<ConnectionSlot>,
    /// Setup failure, if any
    setup_error: Arc<ErrorSlot>,
    /// Stops the accept task of the current setup
    shutdown: Mutex<Option<CancellationToken>>,
}

impl PipeEndpoint {
    /// Create an endpoint.
    ///
    /// With `listen_on_connect` the bound connection starts consuming
    /// messages immediately; otherwise the owner calls `listen` on it.
    pub fn new(label: &'static str, listen_on_connect: bool) -> Self {
        let (connection, _) = watch::channel(None);
        let (setup_error, _) = watch::channel(None);

        Self {
            label,
            listen_on_connect,
            address: Mutex::new(None),
            connection: Arc::new(connection),
            setup_error: Arc::new(setup_error),
            shutdown: Mutex::new(None),
        }
    }

    /// Endpoint label
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Address of the last setup
    pub fn address(&self) -> Option<String> {
        lock(&self.address).clone()
    }

    /// Start listening on `address`. Must be called inside a tokio runtime.
    ///
    /// The endpoint is bound when this returns, so a client may connect right
    /// away. A bind failure is published on the error signal.
    pub fn setup(&self, address: &str) {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.shutdown).replace(token.clone()) {
            previous.cancel();
        }
        *lock(&self.address) = Some(address.to_string());
        self.setup_error.send_replace(None);

        info!("Setting up {} endpoint at {}", self.label, address);

        let listener = match Listener::bind(address) {
            Ok(listener) => listener,
            Err(e) => {
                let message = format!("Failed to listen on {}: {}", address, e);
                error!("{} endpoint: {}", self.label, message);
                telemetry::send_data("pipeEndpointSetupError", self.label);
                self.setup_error.send_replace(Some(message));
                return;
            }
        };

        let label = self.label;
        let listen_on_connect = self.listen_on_connect;
        let connection = Arc::clone(&self.connection);
        let setup_error = Arc::clone(&self.setup_error);
        let address = address.to_string();

        tokio::spawn(async move {
            accept_one(label, &address, listener, listen_on_connect, connection, setup_error, token)
                .await;
        });
    }

    /// Bound connection, `None` before a client connects
    pub fn connection(&self) -> Option<Arc<RpcConnection>> {
        self.connection.borrow().clone()
    }

    /// Setup failure published on the error signal
    pub fn setup_error(&self) -> Option<String> {
        self.setup_error.borrow().clone()
    }

    /// Wait for the first client.
    ///
    /// Fails when setup fails or the endpoint is closed first.
    pub async fn wait_for_connection(&self) -> Result<Arc<RpcConnection>> {
        let token = lock(&self.shutdown).clone().ok_or_else(|| {
            BridgeError::InvalidState(format!("{} endpoint has not been set up", self.label))
        })?;
        let mut connection = self.connection.subscribe();
        let mut setup_error = self.setup_error.subscribe();

        tokio::select! {
            bound = connection.wait_for(Option::is_some) => {
                bound
                    .ok()
                    .and_then(|c| c.clone())
                    .ok_or_else(|| BridgeError::InvalidState(format!("{} endpoint dropped", self.label)))
            }
            failed = setup_error.wait_for(Option::is_some) => {
                let message = failed.ok().and_then(|e| e.clone()).unwrap_or_default();
                Err(BridgeError::EndpointSetup(message))
            }
            _ = token.cancelled() => {
                Err(BridgeError::InvalidState(format!("{} endpoint closed", self.label)))
            }
        }
    }

    /// End and dispose the connection, then stop listening.
    ///
    /// Safe to call repeatedly and before `setup`.
    pub async fn close(&self) {
        if let Some(connection) = self.connection.send_replace(None) {
            connection.end().await;
            connection.dispose();
        }

        if let Some(token) = lock(&self.shutdown).take() {
            token.cancel();
            debug!("{} endpoint closed", self.label);
        }
    }
}

impl std::fmt::Debug for PipeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeEndpoint")
            .field("label", &self.label)
            .field("address", &self.address())
            .field("connected", &self.connection().is_some())
            .finish()
    }
}

/// Endpoint whose address is announced by the importer at runtime
pub struct ImporterEndpoint {
    endpoint: PipeEndpoint,
    /// Resolved once by the first announcement
    announced: watch::Sender<Option<PathBuf>>,
}

impl ImporterEndpoint {
    /// Create an importer endpoint with no address yet
    pub fn new() -> Self {
        let (announced, _) = watch::channel(None);
        Self {
            endpoint: PipeEndpoint::new("importer", false),
            announced,
        }
    }

    /// Deliver the importer's address.
    ///
    /// Only the first announcement resolves the address; returns whether
    /// this call did.
    pub fn announce(&self, path: impl AsRef<Path>) -> bool {
        let resolved = absolutize(path.as_ref());
        let accepted = self.announced.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(resolved.clone());
                true
            } else {
                false
            }
        });

        if accepted {
            info!("Importer announced endpoint {:?}", resolved);
        } else {
            debug!("Ignoring repeated importer announcement {:?}", resolved);
        }
        accepted
    }

    /// Announced address, if any
    pub fn announced_address(&self) -> Option<PathBuf> {
        self.announced.borrow().clone()
    }

    /// Wait until the importer has announced its address
    pub async fn wait_for_address(&self) -> Result<PathBuf> {
        let mut rx = self.announced.subscribe();
        let announced = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BridgeError::InvalidState("importer endpoint dropped".to_string()))?;
        announced
            .clone()
            .ok_or_else(|| BridgeError::InvalidState("importer address missing".to_string()))
    }

    /// Start listening on the announced address
    pub fn setup(&self) -> Result<()> {
        let address = self.announced_address().ok_or_else(|| {
            BridgeError::InvalidState("importer address has not been announced".to_string())
        })?;
        self.endpoint.setup(&address.to_string_lossy());
        Ok(())
    }

    /// Switch the bound connection into active consumption
    pub fn start_listening(&self) -> Result<()> {
        let connection = self.endpoint.connection().ok_or_else(|| {
            BridgeError::InvalidState("importer has not connected".to_string())
        })?;
        connection.listen();
        Ok(())
    }

    /// Underlying endpoint
    pub fn endpoint(&self) -> &PipeEndpoint {
        &self.endpoint
    }

    /// Close the underlying endpoint; the announced address is kept
    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}

impl Default for ImporterEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

async fn accept_one(
    label: &'static str,
    address: &str,
    mut listener: Listener,
    listen_on_connect: bool,
    connection: Arc<ConnectionSlot>,
    setup_error: Arc<ErrorSlot>,
    token: CancellationToken,
) {
    tokio::select! {
        accepted = listener.accept(label) => match accepted {
            Ok(conn) => {
                info!("{} connected on {}", label, address);
                let conn = Arc::new(conn);
                if token.is_cancelled() {
                    conn.dispose();
                    listener.shutdown();
                    return;
                }
                if listen_on_connect {
                    conn.listen();
                }
                connection.send_replace(Some(conn));
            }
            Err(e) => {
                error!("{} endpoint: accept failed: {}", label, e);
                setup_error.send_replace(Some(format!("Accept failed on {}: {}", address, e)));
            }
        },
        _ = token.cancelled() => {}
    }

    // Later clients are never accepted; the listener lives until close
    token.cancelled().await;
    listener.shutdown();
}

/// Platform listener
enum Listener {
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
    #[cfg(windows)]
    Pipe(Option<tokio::net::windows::named_pipe::NamedPipeServer>),
}

impl Listener {
    #[cfg(unix)]
    fn bind(address: &str) -> std::io::Result<Self> {
        let path = PathBuf::from(address);
        let listener = tokio::net::UnixListener::bind(&path)?;
        Ok(Listener::Unix { listener, path })
    }

    #[cfg(windows)]
    fn bind(address: &str) -> std::io::Result<Self> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(address)?;
        Ok(Listener::Pipe(Some(server)))
    }

    async fn accept(&mut self, label: &'static str) -> std::io::Result<RpcConnection> {
        match self {
            #[cfg(unix)]
            Listener::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Ok(RpcConnection::new(label, stream))
            }
            #[cfg(windows)]
            Listener::Pipe(server) => {
                let pipe = server.take().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "pipe already accepted")
                })?;
                pipe.connect().await?;
                Ok(RpcConnection::new(label, pipe))
            }
        }
    }

    fn shutdown(self) {
        match self {
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                drop(listener);
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!("Could not remove socket {:?}: {}", path, e);
                }
            }
            #[cfg(windows)]
            Listener::Pipe(server) => drop(server),
        }
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_announce_first_wins() {
        let importer = ImporterEndpoint::new();
        assert!(importer.announced_address().is_none());

        assert!(importer.announce("/tmp/importer-a.sock"));
        assert!(!importer.announce("/tmp/importer-b.sock"));
        assert_eq!(
            importer.announced_address(),
            Some(PathBuf::from("/tmp/importer-a.sock"))
        );
    }

    #[test]
    fn test_announce_resolves_relative_path() {
        let importer = ImporterEndpoint::new();
        importer.announce("relative.sock");
        let address = importer.announced_address().unwrap();
        assert!(address.is_absolute());
        assert!(address.ends_with("relative.sock"));
    }

    #[tokio::test]
    async fn test_wait_for_address_after_announce() {
        let importer = Arc::new(ImporterEndpoint::new());
        let waiter = {
            let importer = Arc::clone(&importer);
            tokio::spawn(async move { importer.wait_for_address().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        importer.announce("/tmp/late.sock");

        let address = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(address, PathBuf::from("/tmp/late.sock"));
    }

    #[tokio::test]
    async fn test_close_before_setup_is_safe() {
        let endpoint = PipeEndpoint::new("build-server", true);
        endpoint.close().await;
        endpoint.close().await;
        assert!(endpoint.connection().is_none());
    }

    #[tokio::test]
    async fn test_wait_without_setup_fails() {
        let endpoint = PipeEndpoint::new("build-server", true);
        assert!(matches!(
            endpoint.wait_for_connection().await,
            Err(BridgeError::InvalidState(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_accepts_first_client() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("endpoint.sock");
        let endpoint = PipeEndpoint::new("build-server", true);

        endpoint.setup(&path.to_string_lossy());
        assert!(path.exists());
        let _client = connect_with_retry(&path).await;

        let connection = tokio::time::timeout(Duration::from_secs(2), endpoint.wait_for_connection())
            .await
            .unwrap()
            .unwrap();
        assert!(connection.is_listening());
        assert_eq!(endpoint.address().as_deref(), Some(&*path.to_string_lossy()));

        endpoint.close().await;
        endpoint.close().await;
        assert!(endpoint.connection().is_none());

        // The socket file is removed once the accept task observes the close
        for _ in 0..100 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_failure_is_signalled() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing-dir").join("endpoint.sock");
        let endpoint = PipeEndpoint::new("importer", false);

        endpoint.setup(&path.to_string_lossy());

        let result = tokio::time::timeout(Duration::from_secs(2), endpoint.wait_for_connection())
            .await
            .unwrap();
        assert!(matches!(result, Err(BridgeError::EndpointSetup(_))));
        assert!(endpoint.setup_error().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("endpoint.sock");
        let endpoint = Arc::new(PipeEndpoint::new("importer", false));
        endpoint.setup(&path.to_string_lossy());

        let waiter = {
            let endpoint = Arc::clone(&endpoint);
            tokio::spawn(async move { endpoint.wait_for_connection().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        endpoint.close().await;

        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
    }

    #[cfg(unix)]
    async fn connect_with_retry(path: &Path) -> tokio::net::UnixStream {
        for _ in 0..100 {
            if let Ok(stream) = tokio::net::UnixStream::connect(path).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("could not connect to {:?}", path);
    }
}
