//! Whole-tree process termination
//!
//! The Gradle server launcher is a shell script that forks the JVM, which may
//! fork workers of its own, so killing only the direct child leaves orphans.
//!
//! # Platform Support
//!
//! - **Linux**: descendants found by reading `/proc/<pid>/stat`
//! - **Other Unix**: descendants found with `pgrep -P`
//! - **Windows**: `taskkill /T /F` walks the tree itself

use crate::error::{BridgeError, Result};
use tracing::debug;

/// Force-terminate `pid` and every descendant
pub async fn terminate_tree(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let mut victims = descendants(pid).await;
        // Leaves first so nothing gets re-parented mid-walk
        victims.reverse();
        victims.push(pid);

        for victim in victims {
            debug!("Sending SIGKILL to PID {}", victim);
            // SAFETY: kill(2) has no memory-safety preconditions
            let rc = unsafe { libc::kill(victim as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    return Err(BridgeError::Io(err));
                }
            }
        }
        Ok(())
    }

    #[cfg(windows)]
    {
        let output = tokio::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output()
            .await?;
        if !output.status.success() {
            return Err(BridgeError::Execution(format!(
                "taskkill failed for PID {}: {}",
                pid,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// All descendants of `root`, parents before children
#[cfg(unix)]
async fn descendants(root: u32) -> Vec<u32> {
    let mut found = Vec::new();
    let mut frontier = vec![root];

    while let Some(parent) = frontier.pop() {
        for child in children_of(parent).await {
            if !found.contains(&child) {
                found.push(child);
                frontier.push(child);
            }
        }
    }
    found
}

#[cfg(target_os = "linux")]
async fn children_of(parent: u32) -> Vec<u32> {
    let mut children = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return children;
    };

    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            continue;
        };
        if parent_pid(&stat) == Some(parent) {
            children.push(pid);
        }
    }
    children
}

#[cfg(all(unix, not(target_os = "linux")))]
async fn children_of(parent: u32) -> Vec<u32> {
    let output = tokio::process::Command::new("pgrep")
        .arg("-P")
        .arg(parent.to_string())
        .output()
        .await;

    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect(),
        Err(e) => {
            debug!("pgrep failed for PID {}: {}", parent, e);
            Vec::new()
        }
    }
}

/// Parent PID field of a `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted after the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parent_pid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(1)?.parse().ok()
}
