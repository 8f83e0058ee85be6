//! Gradle daemon status
//!
//! Daemons are queried with `gradle --status quiet` through either the
//! project's wrapper or a local installation, and the freeform output is
//! parsed into [`DaemonRecord`]s. [`RefreshController`] coordinates
//! overlapping refreshes of the daemon view.

pub mod executor;
pub mod refresh;
pub mod status;

pub use executor::{GradleExecution, GradleLocalInstallation, GradleWrapper};
pub use refresh::{DaemonQuery, RefreshController};
pub use status::{parse_status_text, StatusPoller};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Daemon state as reported by `gradle --status`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DaemonStatus {
    /// Running a build
    Busy,
    /// Waiting for work
    Idle,
    /// Stopped (by user or operating system)
    Stopped,
    /// Reported as unknown
    Unknown,
    /// Any other word Gradle printed, kept verbatim
    Other(String),
}

impl DaemonStatus {
    /// Map a status word; matching is case-sensitive
    pub fn from_word(word: &str) -> Self {
        match word {
            "BUSY" => DaemonStatus::Busy,
            "IDLE" => DaemonStatus::Idle,
            "STOPPED" => DaemonStatus::Stopped,
            "UNKNOWN" => DaemonStatus::Unknown,
            other => DaemonStatus::Other(other.to_string()),
        }
    }

    /// Status word as Gradle prints it
    pub fn as_str(&self) -> &str {
        match self {
            DaemonStatus::Busy => "BUSY",
            DaemonStatus::Idle => "IDLE",
            DaemonStatus::Stopped => "STOPPED",
            DaemonStatus::Unknown => "UNKNOWN",
            DaemonStatus::Other(word) => word,
        }
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One daemon line of `gradle --status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRecord {
    pid: String,
    /// Current status
    pub status: DaemonStatus,
    /// Remaining text of the line (version or stop reason)
    pub info: String,
}

impl DaemonRecord {
    pub(crate) fn new(pid: impl Into<String>, status: DaemonStatus, info: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            status,
            info: info.into(),
        }
    }

    /// Daemon process id
    pub fn pid(&self) -> &str {
        &self.pid
    }
}

impl fmt::Display for DaemonRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.pid, self.status, self.info)
    }
}

/// A Gradle project root as reported by the project store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    /// Project directory
    pub path: PathBuf,
    /// Gradle version the project runs on, if known
    pub gradle_version: Option<String>,
}

impl ProjectRoot {
    /// Root with an optional reported version
    pub fn new(path: impl Into<PathBuf>, gradle_version: Option<&str>) -> Self {
        Self {
            path: path.into(),
            gradle_version: gradle_version.map(str::to_string),
        }
    }
}

/// One root per Gradle version, first occurrence wins.
///
/// Roots without a reported version are all kept.
pub fn unique_versions(roots: &[ProjectRoot]) -> Vec<ProjectRoot> {
    let mut seen = HashSet::new();
    roots
        .iter()
        .filter(|root| match &root.gradle_version {
            Some(version) => seen.insert(version.clone()),
            None => true,
        })
        .cloned()
        .collect()
}

/// How Gradle is reached for daemon commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// The project's `gradlew`
    Wrapper,
    /// A local Gradle installation
    LocalInstallation,
    /// A pinned version fetched on demand; its daemons are not queryable
    SpecificVersion,
}
