//! Daemon status queries
//!
//! `gradle --status quiet` prints one line per daemon:
//!
//! ```text
//! 41716 BUSY 6.3
//! 41718 STOPPED (by user or operating system)
//! ```
//!
//! Anything that does not look like that is skipped.

use super::executor::{GradleExecution, GradleLocalInstallation, GradleWrapper};
use super::refresh::DaemonQuery;
use super::{ConnectionMode, DaemonRecord, DaemonStatus};
use crate::config::{Config, GradleConfig};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

/// Arguments of the status query
pub const STATUS_ARGS: [&str; 2] = ["--status", "quiet"];

/// Arguments stopping all daemons
pub const STOP_ARGS: [&str; 1] = ["--stop"];

fn status_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^\s*([0-9]+)\s+(\w+)\s+(.+)$").expect("valid status regex"))
}

/// Parse `gradle --status` output into records, in input order.
///
/// CRLF and LF line endings are equivalent. Never fails.
pub fn parse_status_text(text: &str) -> Vec<DaemonRecord> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| {
            let caps = status_regex().captures(line)?;
            Some(DaemonRecord::new(
                &caps[1],
                DaemonStatus::from_word(&caps[2]),
                &caps[3],
            ))
        })
        .collect()
}

/// Resolve how Gradle is reached
pub fn connection_mode(gradle: &GradleConfig) -> ConnectionMode {
    if gradle.wrapper_enabled {
        ConnectionMode::Wrapper
    } else if gradle.version.is_some() {
        ConnectionMode::SpecificVersion
    } else if gradle.home.is_some() {
        ConnectionMode::LocalInstallation
    } else {
        ConnectionMode::Wrapper
    }
}

/// Queries and stops daemons according to the configuration
#[derive(Debug, Clone)]
pub struct StatusPoller {
    config: Config,
}

impl StatusPoller {
    /// Poller over the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Executor for `project_root`, `None` when daemons cannot be reached
    fn executor(&self, project_root: &Path) -> Option<Box<dyn GradleExecution>> {
        let java_home = self.config.java.import_gradle_java_home.clone();
        let user_home = self.config.gradle.user_home.clone();
        match connection_mode(&self.config.gradle) {
            ConnectionMode::Wrapper => {
                if !GradleWrapper::has_valid_wrapper(project_root) {
                    return None;
                }
                Some(Box::new(
                    GradleWrapper::new(project_root)
                        .with_java_home(java_home)
                        .with_user_home(user_home),
                ))
            }
            ConnectionMode::LocalInstallation => {
                let home = self.config.gradle.home.as_ref()?;
                Some(Box::new(
                    GradleLocalInstallation::new(home)
                        .with_java_home(java_home)
                        .with_user_home(user_home),
                ))
            }
            ConnectionMode::SpecificVersion => None,
        }
    }

    /// Daemons visible from `project_root`
    pub async fn get_daemons_status_list(&self, project_root: &Path) -> Result<Vec<DaemonRecord>> {
        let Some(executor) = self.executor(project_root) else {
            return Ok(Vec::new());
        };
        let output = executor.execute(to_args(&STATUS_ARGS)).await?;
        Ok(parse_status_text(&output))
    }

    /// Stop every daemon reachable from `project_root`
    pub async fn stop_daemons(&self, project_root: &Path) -> Result<()> {
        match self.executor(project_root) {
            Some(executor) => {
                executor.execute(to_args(&STOP_ARGS)).await?;
                Ok(())
            }
            None => {
                info!("No daemons to stop.");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DaemonQuery for StatusPoller {
    async fn query(&self, project_root: &Path) -> Result<Vec<DaemonRecord>> {
        self.get_daemons_status_list(project_root).await
    }
}

/// Stop a single daemon by process id
pub async fn stop_daemon(pid: &str) -> Result<()> {
    if pid.is_empty() {
        return Err(BridgeError::Execution(
            "PID is required to stop the daemon.".to_string(),
        ));
    }

    let mut command = if cfg!(windows) {
        let mut command = tokio::process::Command::new("taskkill");
        command.args(["/PID", pid, "/F"]);
        command
    } else {
        let mut command = tokio::process::Command::new("kill");
        command.arg(pid);
        command
    };

    let output = command
        .output()
        .await
        .map_err(|e| BridgeError::Execution(format!("Failed to stop daemon {}: {}", pid, e)))?;
    if !output.status.success() {
        return Err(BridgeError::Execution(format!(
            "Failed to stop daemon {}: {}",
            pid,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    info!("Successfully stopped daemon with PID {}.", pid);
    Ok(())
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}
