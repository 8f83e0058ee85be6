//! Gradle server process supervision
//!
//! [`GradleServer`] spawns the Gradle server launcher, routes its output to
//! the log and reacts to its exit. When the Java extension is present it
//! prepares the [`MessageBridge`] before spawning so the server has an
//! endpoint to connect to, and closes the bridge whenever the process exits.
//!
//! On exit a requested restart respawns the server. Any other non-zero exit
//! asks the user whether to restart; accepting triggers a full host
//! reinitialization instead of a bare respawn.

pub mod command;
pub mod output;
pub mod process_tree;
pub mod runtime;

use crate::bridge::MessageBridge;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::host::Host;
use crate::ipc::random_pipe_name;
use crate::telemetry;
use command::LaunchArgs;
use futures::future::{BoxFuture, FutureExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Shown when no Java runtime can run the server
pub const NO_JAVA_EXECUTABLE: &str = "JDK 17 or higher is required. Please set a valid Java home path to 'java.jdt.ls.java.home' setting or JAVA_HOME environment variable. Or ensure a valid Java executable is in your PATH.";

/// Restart prompt after an unexpected exit
pub const RESTART_PROMPT: &str = "No connection to gradle server. Try restarting the server.";

/// Server lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// Process spawned
    Started,
    /// Process exited
    Stopped,
}

/// Supervised process bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessHandle {
    /// PID of the running launcher, `None` when not running
    pub pid: Option<u32>,
    /// Exit code of the last run; `None` if killed by a signal
    pub exit_code: Option<i32>,
    /// Set by `restart`, consumed by the next exit
    pub restart_requested: bool,
}

/// Supervisor for the Gradle server process
#[derive(Clone)]
pub struct GradleServer {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    host: Arc<dyn Host>,
    bridge: Arc<MessageBridge>,
    handle: Mutex<ProcessHandle>,
    ready: AtomicBool,
    port: Mutex<Option<u16>>,
    language_server_pipe_path: String,
    events: broadcast::Sender<ServerEvent>,
    disposed: AtomicBool,
}

impl GradleServer {
    /// Create a supervisor; nothing is spawned until `start`
    pub fn new(config: Config, host: Arc<dyn Host>, bridge: Arc<MessageBridge>) -> Self {
        let language_server_pipe_path = random_pipe_name();
        if language_server_pipe_path.is_empty() {
            error!("Gradle language server will not start due to pipe path generation failure");
        }
        let (events, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                config,
                host,
                bridge,
                handle: Mutex::new(ProcessHandle::default()),
                ready: AtomicBool::new(false),
                port: Mutex::new(None),
                language_server_pipe_path,
                events,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the server
    pub fn start(&self) -> BoxFuture<'static, Result<()>> {
        start(Arc::clone(&self.inner))
    }

    /// Kill the whole process tree; the exit handler starts it again
    pub async fn restart(&self) -> Result<()> {
        info!("Restarting gradle server");
        let pid = {
            let mut handle = lock(&self.inner.handle);
            handle.restart_requested = true;
            handle.pid
        };

        match pid {
            Some(pid) => process_tree::terminate_tree(pid).await,
            None => {
                lock(&self.inner.handle).restart_requested = false;
                self.start().await
            }
        }
    }

    /// Close the bridge, kill the process tree and clear readiness.
    ///
    /// Safe to call when never started and more than once.
    pub async fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.bridge.close().await;

        let pid = lock(&self.inner.handle).pid.take();
        if let Some(pid) = pid {
            if let Err(e) = process_tree::terminate_tree(pid).await {
                warn!("Failed to terminate gradle server tree {}: {}", pid, e);
            }
        }
        self.inner.ready.store(false, Ordering::SeqCst);
    }

    /// Whether the server process is running
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Task server port of the current or last launch
    pub fn port(&self) -> Option<u16> {
        *lock(&self.inner.port)
    }

    /// Language server endpoint address; empty if generation failed
    pub fn language_server_pipe_path(&self) -> &str {
        &self.inner.language_server_pipe_path
    }

    /// Snapshot of the process bookkeeping
    pub fn process(&self) -> ProcessHandle {
        lock(&self.inner.handle).clone()
    }

    /// Whether a restart is pending
    pub fn restart_requested(&self) -> bool {
        lock(&self.inner.handle).restart_requested
    }

    /// Bridge used when bridging is enabled
    pub fn bridge(&self) -> &Arc<MessageBridge> {
        &self.inner.bridge
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }
}

fn start(inner: Arc<Inner>) -> BoxFuture<'static, Result<()>> {
    async move { run_start(inner).await }.boxed()
}

async fn run_start(inner: Arc<Inner>) -> Result<()> {
    if inner.disposed.load(Ordering::SeqCst) {
        return Err(BridgeError::InvalidState("gradle server was disposed".to_string()));
    }

    let bridging = inner.host.java_extension_installed();
    if bridging && !inner.bridge.prepare_to_start().await {
        let message = "Gradle build server will not start due to pipe path generation failure";
        error!("{}", message);
        inner.host.show_error(message.to_string()).await;
        return Err(BridgeError::EndpointSetup(message.to_string()));
    }

    let port = command::free_port()?;
    *lock(&inner.port) = Some(port);

    let java_home = runtime::resolve_java_home(&inner.config.java, bridging);
    let java_available = java_home.is_some() || runtime::java_on_path().await;
    let Some(env) = launch_env(java_home.as_deref(), java_available, inner.config.debug_enabled())
    else {
        telemetry::send_info("GradleServerEnvMissing");
        inner.bridge.close().await;
        inner.host.show_error(NO_JAVA_EXECUTABLE.to_string()).await;
        return Err(BridgeError::RuntimeNotFound(NO_JAVA_EXECUTABLE.to_string()));
    };

    let lib_dir = &inner.config.server.lib_dir;
    let program = inner
        .config
        .server
        .command
        .clone()
        .unwrap_or_else(|| lib_dir.join(command::server_command_name()));
    let args = LaunchArgs {
        port,
        language_server_pipe_path: inner.language_server_pipe_path.clone(),
        build_server_pipe_name: if bridging {
            inner.bridge.build_server_pipe_name()
        } else {
            None
        },
        bundle_dir: absolute(&inner.config.server.bundle_dir),
    };
    let line = command::command_line(&program, &args.to_args());
    debug!("Gradle Server cmd: {}", line);

    let mut child = match command::shell_command(&line)
        .current_dir(lib_dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to spawn gradle server: {}", e);
            inner.bridge.close().await;
            return Err(BridgeError::Io(e));
        }
    };

    {
        let mut handle = lock(&inner.handle);
        handle.pid = child.id();
        handle.exit_code = None;
    }
    // Readiness is published before the exit watcher can observe an exit
    inner.ready.store(true, Ordering::SeqCst);
    let _ = inner.events.send(ServerEvent::Started);
    info!("Gradle server started on port {}", port);

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_output(stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_output(stderr));
    }
    tokio::spawn(watch_exit(Arc::clone(&inner), child));

    if args.build_server_pipe_name.is_some() {
        let bridge = Arc::clone(&inner.bridge);
        tokio::spawn(async move {
            if let Err(e) = bridge.start().await {
                error!("Gradle build server bridge failed to start: {}", e);
            }
        });
    }
    Ok(())
}

/// Environment additions for the launch, `None` when Java is unavailable.
///
/// Without a resolved home a working `java` on `PATH` still runs the server,
/// just without injected variables.
fn launch_env(
    java_home: Option<&Path>,
    java_available: bool,
    debug: bool,
) -> Option<Vec<(&'static str, String)>> {
    match java_home {
        Some(home) => Some(command::server_env(home, debug)),
        None if java_available => Some(Vec::new()),
        None => None,
    }
}

async fn pump_output<R: AsyncRead + Unpin>(stream: R) {
    pump_lines(stream, output::log_output).await;
}

/// Feed each output line to `on_line`; bytes that are not UTF-8 are replaced
async fn pump_lines<R, F>(stream: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => on_line(&String::from_utf8_lossy(&buf)),
            Err(e) => {
                debug!("Gradle server output closed: {}", e);
                break;
            }
        }
    }
}

async fn watch_exit(inner: Arc<Inner>, mut child: Child) {
    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            error!("Failed to wait for gradle server: {}", e);
            None
        }
    };

    warn!("Gradle server stopped");
    let restart = {
        let mut handle = lock(&inner.handle);
        handle.pid = None;
        handle.exit_code = code;
        std::mem::take(&mut handle.restart_requested)
    };
    inner.ready.store(false, Ordering::SeqCst);
    let _ = inner.events.send(ServerEvent::Stopped);
    inner.bridge.close().await;

    if inner.disposed.load(Ordering::SeqCst) {
        return;
    }

    if restart {
        if let Err(e) = start(Arc::clone(&inner)).await {
            error!("Failed to restart gradle server: {}", e);
        }
    } else if code != Some(0) {
        handle_unexpected_exit(&inner, code).await;
    }
}

async fn handle_unexpected_exit(inner: &Inner, code: Option<i32>) {
    error!("{}", BridgeError::ProcessExit(code));
    let code = code.map(|c| c.to_string()).unwrap_or_default();
    telemetry::send_data("serverProcessExit", &code);

    let accepted = inner.host.confirm_restart(RESTART_PROMPT.to_string()).await;
    telemetry::send_data("serverProcessExitRestart", if accepted { "true" } else { "false" });
    if accepted {
        inner.host.reinitialize().await;
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
