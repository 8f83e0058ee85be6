//! Typed forwarders
//!
//! Requests only travel importer -> build server and notifications only
//! travel build server -> importer. Each direction has its own handler type,
//! so the opposite direction cannot be wired by accident.

use crate::ipc::{NotificationHandler, RequestHandler, RpcConnection, RpcError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Re-sends importer requests to the build server and relays the reply
pub struct RequestForwarder {
    build_server: Arc<RpcConnection>,
}

impl RequestForwarder {
    /// Forward to the given build-server connection
    pub fn new(build_server: Arc<RpcConnection>) -> Self {
        Self { build_server }
    }
}

#[async_trait]
impl RequestHandler for RequestForwarder {
    async fn handle_request(
        &self,
        method: String,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        debug!("Forwarding request '{}' to build server", method);
        self.build_server
            .send_request(&method, params)
            .await
            .map_err(RpcError::from)
    }
}

/// Re-sends build-server notifications to the importer
pub struct NotificationForwarder {
    importer: Arc<RpcConnection>,
}

impl NotificationForwarder {
    /// Forward to the given importer connection
    pub fn new(importer: Arc<RpcConnection>) -> Self {
        Self { importer }
    }
}

#[async_trait]
impl NotificationHandler for NotificationForwarder {
    async fn handle_notification(&self, method: String, params: Option<Value>) {
        debug!("Forwarding notification '{}' to importer", method);
        if let Err(e) = self.importer.send_notification(&method, params).await {
            warn!("Failed to forward notification '{}': {}", method, e);
        }
    }
}
