//! Gradle server output routing
//!
//! The server prefixes its log lines with a `[LEVEL]` tag. Tagged lines are
//! re-emitted at that level under the `gradle_server` target with the tag
//! stripped; untagged lines are informational. A lone `.` is a download
//! progress tick and is dropped.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, error, info, warn, Level};

/// Target for re-emitted server output
pub const TARGET: &str = "gradle_server";

const DOWNLOAD_PROGRESS_CHAR: &str = ".";

fn level_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^\[([A-Z]+)\](.*)$").expect("valid level regex"))
}

/// Decide how a chunk of server output is logged.
///
/// Returns `None` for chunks that are dropped.
pub fn classify(chunk: &str) -> Option<(Level, String)> {
    let line = chunk.trim();
    if line.is_empty() || line == DOWNLOAD_PROGRESS_CHAR {
        return None;
    }

    match level_regex().captures(line) {
        Some(caps) => {
            let level = match &caps[1] {
                "DEBUG" => Level::DEBUG,
                "WARN" => Level::WARN,
                "ERROR" => Level::ERROR,
                _ => Level::INFO,
            };
            Some((level, caps[2].trim().to_string()))
        }
        None => Some((Level::INFO, line.to_string())),
    }
}

/// Log one chunk of server output
pub fn log_output(chunk: &str) {
    let Some((level, message)) = classify(chunk) else {
        return;
    };

    match level {
        Level::DEBUG | Level::TRACE => debug!(target: TARGET, "{}", message),
        Level::WARN => warn!(target: TARGET, "{}", message),
        Level::ERROR => error!(target: TARGET, "{}", message),
        _ => info!(target: TARGET, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_lines() {
        assert_eq!(
            classify("[ERROR] Could not resolve"),
            Some((Level::ERROR, "Could not resolve".to_string()))
        );
        assert_eq!(
            classify("  [DEBUG]listening on 51234  "),
            Some((Level::DEBUG, "listening on 51234".to_string()))
        );
        assert_eq!(
            classify("[WARN] slow"),
            Some((Level::WARN, "slow".to_string()))
        );
    }

    #[test]
    fn test_unknown_tag_is_info() {
        assert_eq!(
            classify("[TRACE] detail"),
            Some((Level::INFO, "detail".to_string()))
        );
    }

    #[test]
    fn test_untagged_and_dropped() {
        assert_eq!(
            classify("Gradle server started"),
            Some((Level::INFO, "Gradle server started".to_string()))
        );
        assert_eq!(classify("."), None);
        assert_eq!(classify(" .\n"), None);
        assert_eq!(classify("   "), None);
        // Lowercase tags are not tags
        assert_eq!(
            classify("[info] x"),
            Some((Level::INFO, "[info] x".to_string()))
        );
    }
}
