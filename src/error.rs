//! Error types for gradle-bridge
//!
//! This module defines the error types used throughout the library.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary.

use crate::ipc::RpcError;
use thiserror::Error;

/// Main error type for gradle-bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint address generation or listener bind failed
    #[error("Endpoint setup error: {0}")]
    EndpointSetup(String),

    /// Fault on an established RPC channel
    #[error("Connection error: {0}")]
    Connection(String),

    /// The peer answered a request with a JSON-RPC error object
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    /// Supervised process terminated unexpectedly
    #[error("Process exited with code {0:?}")]
    ProcessExit(Option<i32>),

    /// External tool could not be run or reported a failure
    #[error("Execution error: {0}")]
    Execution(String),

    /// No compatible Java runtime could be found
    #[error("Runtime not found: {0}")]
    RuntimeNotFound(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BridgeError = io.into();
        assert!(matches!(err, BridgeError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_rpc_error_display() {
        let err = BridgeError::Rpc(RpcError::new(-32601, "Method not found"));
        assert_eq!(err.to_string(), "RPC error -32601: Method not found");
    }
}
