//! Local IPC plumbing
//!
//! This module provides endpoint naming, JSON-RPC framing, the duplex RPC
//! connection and the single-client listening endpoints used by the bridge.
//! Endpoints are Unix domain sockets on Linux/macOS and Named Pipes on Windows.

mod connection;
mod endpoint;
pub mod pipe_name;
pub mod protocol;

pub use connection::{ErrorHandler, NotificationHandler, RequestHandler, RpcConnection};
pub use endpoint::{ImporterEndpoint, PipeEndpoint};
pub use pipe_name::random_pipe_name;
pub use protocol::{Message, RequestId, RpcError};
