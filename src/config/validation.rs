//! Configuration validation functions

use crate::config::RuntimeEntry;
use crate::error::{BridgeError, Result};
use std::path::Path;

/// Validate a configured path (non-empty, no NUL bytes)
pub fn validate_path(field: &str, path: &Path) -> Result<()> {
    let raw = path.to_string_lossy();

    if raw.trim().is_empty() {
        return Err(BridgeError::Config(format!("{} cannot be empty", field)));
    }

    if raw.contains('\0') {
        return Err(BridgeError::Config(format!(
            "{} contains a NUL byte",
            field
        )));
    }

    Ok(())
}

/// Validate the configured runtimes list
pub fn validate_runtimes(runtimes: &[RuntimeEntry]) -> Result<()> {
    for runtime in runtimes {
        validate_path("path", &runtime.path)?;
    }

    let defaults = runtimes.iter().filter(|r| r.default).count();
    if defaults > 1 {
        return Err(BridgeError::Config(format!(
            "{} runtimes are marked as default, at most one is allowed",
            defaults
        )));
    }

    Ok(())
}

/// Validate a pinned Gradle version ("8", "8.5", "8.5-rc-1")
pub fn validate_gradle_version(version: &str) -> Result<()> {
    let starts_with_digit = version.chars().next().is_some_and(|c| c.is_ascii_digit());
    let allowed = version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');

    if !starts_with_digit || !allowed {
        return Err(BridgeError::Config(format!(
            "Invalid Gradle version: '{}'",
            version
        )));
    }

    Ok(())
}
