//! Diagnostic reports
//!
//! Reports are structured `tracing` events on the `telemetry` target. A
//! subscriber that ships them elsewhere can filter on that target.

use std::error::Error;
use tracing::info;

/// Tracing target used for every report
pub const TARGET: &str = "telemetry";

/// Report an event with no payload
pub fn send_info(kind: &str) {
    info!(target: TARGET, kind, "report");
}

/// Report an event carrying a single data value
pub fn send_data(kind: &str, data: &str) {
    info!(target: TARGET, kind, data, "report");
}

/// Report an error together with its source chain
pub fn send_error(kind: &str, err: &(dyn Error + 'static)) {
    let message = err.to_string();
    let stack = source_chain(err);
    info!(target: TARGET, kind, message = %message, stack = %stack, "report");
}

/// Render the `source()` chain of an error, outermost first
pub fn source_chain(err: &(dyn Error + 'static)) -> String {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain.join(" <- ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = BridgeError::from(io);
        // thiserror's #[from] also marks the field as the source
        assert_eq!(source_chain(&err), "pipe closed");
    }

    #[test]
    fn test_source_chain_empty() {
        let err = BridgeError::Connection("reset".to_string());
        assert_eq!(source_chain(&err), "");
    }
}
