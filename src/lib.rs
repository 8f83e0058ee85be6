//! gradle-bridge: supervisor and IPC bridge for a Gradle build-tool server
//!
//! This library starts and supervises the Gradle server process, relays
//! JSON-RPC traffic between that server and the Java project importer over
//! local IPC endpoints (Unix domain sockets or Windows named pipes), and
//! queries Gradle daemon status for the daemon view.
//!
//! # Architecture
//!
//! The importer cannot talk to the build server directly, so both connect as
//! clients to two endpoints owned by this process. The [`bridge`] forwards
//! importer requests to the server and server notifications to the importer.
//! The [`server`] supervisor prepares the bridge before spawning the server so
//! the server has an address to connect to.
//!
//! # Modules
//!
//! - `config`: Configuration parsing and validation
//! - `ipc`: Endpoint naming, JSON-RPC framing, connections and endpoints
//! - `bridge`: Message forwarding between importer and build server
//! - `server`: Gradle server process supervision
//! - `daemons`: Gradle daemon status queries and refresh coordination
//! - `host`: Seam to the embedding application (prompts, reinitialization)
//! - `telemetry`: Diagnostic reports
//! - `error`: Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod daemons;
pub mod error;
pub mod host;
pub mod ipc;
pub mod server;
pub mod telemetry;

// Re-export commonly used types
pub use error::{BridgeError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
