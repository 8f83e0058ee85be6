//! Java runtime resolution for the Gradle server
//!
//! The server needs JDK 17 or newer. Candidates are consulted in order:
//!
//! 1. `java.import_gradle_java_home`, if new enough
//! 2. The JRE embedded in the Java extension (only when it is installed)
//! 3. The configured homes (`import_gradle_java_home`, `jdt_ls_java_home`,
//!    `home`) that are new enough
//! 4. Discovered installations: `JAVA_HOME`, `java` on `PATH`, SDKMAN
//!    candidates and the platform's JVM directories
//! 5. The configured runtimes list
//!
//! A home's major version is read from its `release` file.

use crate::config::{JavaConfig, RuntimeEntry};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Minimum Java major version the server runs on
pub const REQUIRED_JDK_VERSION: u32 = 17;

/// Java launcher file name
#[cfg(windows)]
pub const JAVA_FILENAME: &str = "java.exe";
/// Java launcher file name
#[cfg(not(windows))]
pub const JAVA_FILENAME: &str = "java";

/// Path of the Java launcher inside a home
pub fn java_executable(home: &Path) -> PathBuf {
    home.join("bin").join(JAVA_FILENAME)
}

/// Parse a `JAVA_VERSION` value into its major version.
///
/// Legacy `1.x` versions map to `x`.
pub fn parse_major_version(version: &str) -> Option<u32> {
    let version = version.trim().trim_matches('"');
    let mut parts = version.split(|c: char| c == '.' || c == '_' || c == '-' || c == '+');
    let first: u32 = parts.next()?.parse().ok()?;
    if first == 1 {
        parts.next()?.parse().ok()
    } else {
        Some(first)
    }
}

/// Major version of the runtime at `home`, 0 when unknown
pub fn major_version(home: &Path) -> u32 {
    let Ok(release) = std::fs::read_to_string(home.join("release")) else {
        return 0;
    };

    release
        .lines()
        .find_map(|line| line.strip_prefix("JAVA_VERSION="))
        .and_then(parse_major_version)
        .unwrap_or(0)
}

/// Whether `home` looks like a runtime home (it has a Java launcher)
pub fn is_runtime(home: &Path) -> bool {
    java_executable(home).is_file()
}

/// Whether `home` is a real Java home rather than a bare launcher directory
pub fn is_real_java_home(home: &Path) -> bool {
    home.join("lib").join("jrt-fs.jar").exists()
        || home.join("lib").join("rt.jar").exists()
        || home.join("jre").join("lib").join("rt.jar").exists()
}

fn meets_requirement(home: &Path) -> bool {
    major_version(home) >= REQUIRED_JDK_VERSION
}

/// First child of `jre_dir` containing a Java launcher
pub fn embedded_jre(jre_dir: &Path) -> Option<PathBuf> {
    if !jre_dir.is_dir() {
        return None;
    }

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(jre_dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .collect();
    candidates.sort();
    candidates.into_iter().find(|candidate| is_runtime(candidate))
}

/// Runtime picked from the configured list.
///
/// The last valid entry wins, except that scanning stops at the entry
/// marked default.
pub fn default_runtime_from_settings(runtimes: &[RuntimeEntry]) -> Option<PathBuf> {
    let mut candidate = None;
    for runtime in runtimes {
        if is_runtime(&runtime.path) {
            candidate = Some(runtime.path.clone());
        }
        if runtime.default {
            break;
        }
    }
    candidate
}

/// Installed runtimes found on this machine, deduplicated, in search order
pub fn discover_runtimes() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(java_home) = std::env::var_os("JAVA_HOME") {
        candidates.push(PathBuf::from(java_home));
    }

    if let Ok(java) = which::which(JAVA_FILENAME) {
        // bin/java may be a chain of symlinks (alternatives, shims)
        let java = std::fs::canonicalize(&java).unwrap_or(java);
        if let Some(home) = java.parent().and_then(Path::parent) {
            candidates.push(home.to_path_buf());
        }
    }

    let sdkman = std::env::var_os("SDKMAN_DIR")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".sdkman")));
    if let Some(sdkman) = sdkman {
        candidates.extend(children(&sdkman.join("candidates").join("java")));
    }

    for dir in platform_jvm_dirs() {
        candidates.extend(children(&dir).into_iter().map(platform_home));
    }

    let mut seen = Vec::new();
    for candidate in candidates {
        let resolved = std::fs::canonicalize(&candidate).unwrap_or(candidate);
        if is_runtime(&resolved) && !seen.contains(&resolved) {
            seen.push(resolved);
        }
    }
    seen
}

fn children(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    paths.sort();
    paths
}

#[cfg(target_os = "macos")]
fn platform_jvm_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/Library/Java/JavaVirtualMachines"),
        PathBuf::from("/System/Library/Java/JavaVirtualMachines"),
    ]
}

#[cfg(target_os = "macos")]
fn platform_home(bundle: PathBuf) -> PathBuf {
    bundle.join("Contents").join("Home")
}

#[cfg(windows)]
fn platform_jvm_dirs() -> Vec<PathBuf> {
    ["ProgramFiles", "ProgramW6432"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .flat_map(|root| {
            let root = PathBuf::from(root);
            ["Java", "Eclipse Adoptium", "Microsoft", "Zulu"]
                .iter()
                .map(move |vendor| root.join(vendor))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(not(any(target_os = "macos", windows)))]
fn platform_jvm_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("/usr/lib/jvm"), PathBuf::from("/opt/java")]
}

#[cfg(not(target_os = "macos"))]
fn platform_home(dir: PathBuf) -> PathBuf {
    dir
}

/// Find a Java home for the server.
///
/// `embedded_jre_allowed` gates step 2 on the Java extension being present.
/// `discovered` supplies step 4's candidates so callers can substitute the
/// machine scan.
pub fn resolve_java_home_with(
    config: &JavaConfig,
    embedded_jre_allowed: bool,
    discovered: impl FnOnce() -> Vec<PathBuf>,
) -> Option<PathBuf> {
    if let Some(home) = &config.import_gradle_java_home {
        if meets_requirement(home) {
            debug!("Using java.import.gradle.java.home {:?}", home);
            return Some(home.clone());
        }
    }

    if embedded_jre_allowed {
        if let Some(home) = config.embedded_jre_dir.as_deref().and_then(embedded_jre) {
            debug!("Using embedded JRE {:?}", home);
            return Some(home);
        }
    }

    let configured = [
        &config.import_gradle_java_home,
        &config.jdt_ls_java_home,
        &config.home,
    ];
    for home in configured.into_iter().flatten() {
        if meets_requirement(home) {
            debug!("Using configured Java home {:?}", home);
            return Some(home.clone());
        }
    }

    if let Some(home) = discovered()
        .into_iter()
        .find(|home| is_real_java_home(home) && meets_requirement(home))
    {
        debug!("Using discovered Java home {:?}", home);
        return Some(home);
    }

    let home = default_runtime_from_settings(&config.runtimes)?;
    if meets_requirement(&home) {
        debug!("Using configured runtime {:?}", home);
        Some(home)
    } else {
        None
    }
}

/// Find a Java home for the server, scanning this machine in step 4
pub fn resolve_java_home(config: &JavaConfig, embedded_jre_allowed: bool) -> Option<PathBuf> {
    resolve_java_home_with(config, embedded_jre_allowed, discover_runtimes)
}

/// Whether a `java` on `PATH` runs at all
pub async fn java_on_path() -> bool {
    tokio::process::Command::new("java")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
