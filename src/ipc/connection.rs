//! Duplex JSON-RPC connection over one accepted stream
//!
//! A connection is created in a passive state: handlers can be registered
//! and messages can be sent, but nothing is read from the stream until
//! [`RpcConnection::listen`] is called. Bytes that arrive before that stay
//! buffered in the stream.

use crate::error::{BridgeError, Result};
use crate::ipc::protocol::{read_message, write_message, Message, RequestId, RpcError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type PendingMap = HashMap<RequestId, oneshot::Sender<std::result::Result<Value, RpcError>>>;

/// Handles requests arriving on a connection
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the result (or error object) for one request
    async fn handle_request(
        &self,
        method: String,
        params: Option<Value>,
    ) -> std::result::Result<Value, RpcError>;
}

/// Handles notifications arriving on a connection
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Consume one notification
    async fn handle_notification(&self, method: String, params: Option<Value>);
}

/// Callback for channel-level faults
pub type ErrorHandler = Arc<dyn Fn(&BridgeError) + Send + Sync>;

/// JSON-RPC connection bound to one stream
pub struct RpcConnection {
    /// Name used in logs
    label: String,
    /// Write half; `None` once ended
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    /// Read half until `listen` takes it
    reader: Mutex<Option<BoxedReader>>,
    /// Outstanding outgoing requests
    pending: Mutex<PendingMap>,
    request_handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    notification_handler: RwLock<Option<Arc<dyn NotificationHandler>>>,
    error_handler: RwLock<Option<ErrorHandler>>,
    next_id: AtomicI64,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// Set once the read loop has stopped
    stream_closed: AtomicBool,
    disposed: AtomicBool,
}

impl RpcConnection {
    /// Wrap a duplex stream
    pub fn new<S>(label: impl Into<String>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);

        Self {
            label: label.into(),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            reader: Mutex::new(Some(Box::new(reader))),
            pending: Mutex::new(HashMap::new()),
            request_handler: RwLock::new(None),
            notification_handler: RwLock::new(None),
            error_handler: RwLock::new(None),
            next_id: AtomicI64::new(1),
            reader_task: Mutex::new(None),
            stream_closed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Connection label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Register the request handler
    pub fn on_request(&self, handler: Arc<dyn RequestHandler>) {
        *write_lock(&self.request_handler) = Some(handler);
    }

    /// Register the notification handler
    pub fn on_notification(&self, handler: Arc<dyn NotificationHandler>) {
        *write_lock(&self.notification_handler) = Some(handler);
    }

    /// Register the error handler
    pub fn on_error(&self, handler: ErrorHandler) {
        *write_lock(&self.error_handler) = Some(handler);
    }

    /// Whether `listen` has started consuming the stream
    pub fn is_listening(&self) -> bool {
        lock(&self.reader).is_none() && !self.disposed.load(Ordering::SeqCst)
    }

    /// Start consuming incoming messages. Later calls are no-ops.
    pub fn listen(self: &Arc<Self>) {
        let Some(reader) = lock(&self.reader).take() else {
            debug!("{}: already listening", self.label);
            return;
        };

        let connection = Arc::clone(self);
        let task = tokio::spawn(async move {
            connection.read_loop(BufReader::new(reader)).await;
        });
        *lock(&self.reader_task) = Some(task);
    }

    /// Send a request and wait for its response
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);
        if self.stream_closed.load(Ordering::SeqCst) || self.disposed.load(Ordering::SeqCst) {
            lock(&self.pending).remove(&id);
            return Err(BridgeError::Connection(format!(
                "{}: connection is closed",
                self.label
            )));
        }

        let message = Message::Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        if let Err(e) = self.write(&message).await {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(BridgeError::Rpc(err)),
            Err(_) => Err(BridgeError::Connection(format!(
                "{}: connection closed before response to '{}'",
                self.label, method
            ))),
        }
    }

    /// Send a notification
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let message = Message::Notification {
            method: method.to_string(),
            params,
        };
        self.write(&message).await
    }

    /// Shut down the write half
    pub async fn end(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("{}: error while ending connection: {}", self.label, e);
            }
        }
    }

    /// Stop reading, drop handlers and fail outstanding requests
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
        lock(&self.reader).take();
        *write_lock(&self.request_handler) = None;
        *write_lock(&self.notification_handler) = None;
        *write_lock(&self.error_handler) = None;
        // Dropping the senders wakes every waiter with a closed-connection error
        lock(&self.pending).clear();
    }

    async fn write(&self, message: &Message) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            BridgeError::Connection(format!("{}: connection has ended", self.label))
        })?;
        write_message(writer, message).await
    }

    async fn read_loop(self: Arc<Self>, mut reader: BufReader<BoxedReader>) {
        loop {
            match read_message(&mut reader).await {
                Ok(Some(message)) => self.dispatch(message).await,
                Ok(None) => {
                    debug!("{}: peer closed the stream", self.label);
                    break;
                }
                Err(BridgeError::Serialization(msg)) => {
                    // One bad message does not poison the stream
                    self.report_error(&BridgeError::Serialization(msg));
                }
                Err(e) => {
                    self.report_error(&e);
                    break;
                }
            }
        }

        self.stream_closed.store(true, Ordering::SeqCst);
        lock(&self.pending).clear();
    }

    async fn dispatch(self: &Arc<Self>, message: Message) {
        match message {
            Message::Request { id, method, params } => {
                let handler = read_lock(&self.request_handler).clone();
                let connection = Arc::clone(self);
                // Requests run concurrently so a slow reply does not stall the stream
                tokio::spawn(async move {
                    let result = match handler {
                        Some(handler) => handler.handle_request(method, params).await,
                        None => {
                            debug!("{}: no request handler for '{}'", connection.label, method);
                            Err(RpcError::method_not_found(&method))
                        }
                    };
                    let response = Message::Response { id, result };
                    if let Err(e) = connection.write(&response).await {
                        connection.report_error(&e);
                    }
                });
            }
            Message::Notification { method, params } => {
                let handler = read_lock(&self.notification_handler).clone();
                match handler {
                    Some(handler) => handler.handle_notification(method, params).await,
                    None => debug!("{}: dropping notification '{}'", self.label, method),
                }
            }
            Message::Response { id, result } => {
                let waiter = lock(&self.pending).remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => warn!("{}: response for unknown request {}", self.label, id),
                }
            }
        }
    }

    fn report_error(&self, err: &BridgeError) {
        let handler = read_lock(&self.error_handler).clone();
        match handler {
            Some(handler) => handler(err),
            None => warn!("{}: unhandled connection error: {}", self.label, err),
        }
    }
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("label", &self.label)
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};
    use tokio::sync::mpsc;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle_request(
            &self,
            method: String,
            params: Option<Value>,
        ) -> std::result::Result<Value, RpcError> {
            Ok(json!({"method": method, "params": params}))
        }
    }

    struct Collect(mpsc::UnboundedSender<(String, Option<Value>)>);

    #[async_trait]
    impl NotificationHandler for Collect {
        async fn handle_notification(&self, method: String, params: Option<Value>) {
            let _ = self.0.send((method, params));
        }
    }

    fn pair() -> (Arc<RpcConnection>, Arc<RpcConnection>) {
        let (a, b): (DuplexStream, DuplexStream) = duplex(64 * 1024);
        (
            Arc::new(RpcConnection::new("a", a)),
            Arc::new(RpcConnection::new("b", b)),
        )
    }

    #[tokio::test]
    async fn test_request_response() {
        let (client, server) = pair();
        server.on_request(Arc::new(Echo));
        server.listen();
        client.listen();

        let result = client
            .send_request("build/initialize", Some(json!({"rootUri": "file:///p"})))
            .await
            .unwrap();
        assert_eq!(result["method"], "build/initialize");
        assert_eq!(result["params"]["rootUri"], "file:///p");

        let result = client.send_request("build/shutdown", None).await.unwrap();
        assert_eq!(result["params"], Value::Null);
    }

    #[tokio::test]
    async fn test_request_without_handler_is_method_not_found() {
        let (client, server) = pair();
        server.listen();
        client.listen();

        let err = client.send_request("unknown/method", None).await.unwrap_err();
        match err {
            BridgeError::Rpc(rpc) => assert_eq!(rpc.code, crate::ipc::protocol::codes::METHOD_NOT_FOUND),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nothing_consumed_before_listen() {
        let (client, server) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();

        client.send_notification("early", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The handler arrives after the message, but before listen
        server.on_notification(Arc::new(Collect(tx)));
        assert!(!server.is_listening());
        server.listen();
        assert!(server.is_listening());

        let (method, params) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(method, "early");
        assert!(params.is_none());
    }

    #[tokio::test]
    async fn test_dispose_fails_pending_requests() {
        let (client, _server) = pair();
        client.listen();

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.send_request("never/answered", None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.dispose();

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(BridgeError::Connection(_))));
    }

    #[tokio::test]
    async fn test_send_after_end_fails() {
        let (client, _server) = pair();
        client.end().await;
        client.end().await;
        assert!(client.send_notification("late", None).await.is_err());
    }
}
