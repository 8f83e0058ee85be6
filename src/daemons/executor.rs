//! Gradle command execution
//!
//! Two ways of running Gradle share one capability. The project wrapper is
//! trusted less than a user-pinned installation: any stderr output from the
//! wrapper is a failure, while stderr from a local installation is only
//! logged. Both fail on a non-zero exit or when the command cannot be run.

use crate::error::{BridgeError, Result};
use crate::server::command::{command_line, quote_arg, shell_command};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, warn};

/// Runs Gradle with arguments and returns its stdout
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GradleExecution: Send + Sync {
    /// Run with `args`; fails on empty `args`
    async fn execute(&self, args: Vec<String>) -> Result<String>;
}

/// Gradle run through the project's wrapper script
#[derive(Debug, Clone)]
pub struct GradleWrapper {
    project_root: PathBuf,
    wrapper_path: PathBuf,
    env: ToolEnv,
}

impl GradleWrapper {
    /// Wrapper of the project at `project_root`
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let wrapper_name = if cfg!(windows) { "gradlew.bat" } else { "gradlew" };
        let wrapper_path = project_root.join(wrapper_name);
        Self {
            project_root,
            wrapper_path,
            env: ToolEnv::default(),
        }
    }

    /// Inject `JAVA_HOME` into the spawned process
    pub fn with_java_home(mut self, java_home: Option<PathBuf>) -> Self {
        self.env.java_home = java_home;
        self
    }

    /// Inject `GRADLE_USER_HOME` into the spawned process
    pub fn with_user_home(mut self, user_home: Option<PathBuf>) -> Self {
        self.env.user_home = user_home;
        self
    }

    /// Path of the wrapper script
    pub fn wrapper_path(&self) -> &Path {
        &self.wrapper_path
    }

    /// Whether the project ships wrapper metadata
    pub fn has_valid_wrapper(project_root: &Path) -> bool {
        project_root
            .join("gradle")
            .join("wrapper")
            .join("gradle-wrapper.properties")
            .exists()
    }
}

#[async_trait]
impl GradleExecution for GradleWrapper {
    async fn execute(&self, args: Vec<String>) -> Result<String> {
        if args.is_empty() {
            return Err(BridgeError::Execution("No wrapper args supplied".to_string()));
        }

        let output = run(&self.wrapper_path, &args, Some(&self.project_root), &self.env)
            .await
            .map_err(|e| BridgeError::Execution(format!("Error running gradle wrapper: {}", e)))?;

        if !output.stderr.is_empty() {
            return Err(BridgeError::Execution(format!(
                "Error running gradle wrapper: {}",
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Gradle run from a local installation
#[derive(Debug, Clone)]
pub struct GradleLocalInstallation {
    executable: PathBuf,
    env: ToolEnv,
}

impl GradleLocalInstallation {
    /// Installation at `gradle_home`.
    ///
    /// A directory resolves to its `bin/gradle` launcher; anything else is
    /// taken as the launcher itself.
    pub fn new(gradle_home: impl Into<PathBuf>) -> Self {
        let gradle_home = gradle_home.into();
        let executable = if gradle_home.is_dir() {
            let launcher = if cfg!(windows) { "gradle.bat" } else { "gradle" };
            gradle_home.join("bin").join(launcher)
        } else {
            gradle_home
        };
        Self {
            executable,
            env: ToolEnv::default(),
        }
    }

    /// Inject `JAVA_HOME` into the spawned process
    pub fn with_java_home(mut self, java_home: Option<PathBuf>) -> Self {
        self.env.java_home = java_home;
        self
    }

    /// Inject `GRADLE_USER_HOME` into the spawned process
    pub fn with_user_home(mut self, user_home: Option<PathBuf>) -> Self {
        self.env.user_home = user_home;
        self
    }

    /// Launcher that gets executed
    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl GradleExecution for GradleLocalInstallation {
    async fn execute(&self, args: Vec<String>) -> Result<String> {
        if args.is_empty() {
            return Err(BridgeError::Execution("No gradle args supplied".to_string()));
        }

        let output = run(&self.executable, &args, None, &self.env)
            .await
            .map_err(|e| BridgeError::Execution(format!("Error running gradle: {}", e)))?;

        if !output.stderr.is_empty() {
            warn!("Gradle reported: {}", output.stderr.trim());
        }
        Ok(output.stdout)
    }
}

/// Environment overrides for a Gradle run
#[derive(Debug, Clone, Default)]
struct ToolEnv {
    java_home: Option<PathBuf>,
    /// Daemon registry location
    user_home: Option<PathBuf>,
}

/// Captured output of a successful run
struct Captured {
    stdout: String,
    stderr: String,
}

/// Run `program` through the shell with each argument quoted.
///
/// Fails when the process cannot be spawned or exits non-zero.
async fn run(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    env: &ToolEnv,
) -> std::result::Result<Captured, String> {
    let quoted: Vec<String> = args.iter().map(|arg| quote_arg(arg)).collect();
    let line = command_line(program, &quoted);
    debug!("Running {}", line);

    let mut command = shell_command(&line);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    if let Some(java_home) = &env.java_home {
        command.env("JAVA_HOME", java_home);
    }
    if let Some(user_home) = &env.user_home {
        command.env("GRADLE_USER_HOME", user_home);
    }

    let output = command.output().await.map_err(|e| e.to_string())?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let detail = if stderr.trim().is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr.trim().to_string()
        };
        return Err(detail);
    }
    Ok(Captured { stdout, stderr })
}
