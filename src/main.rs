//! gradle-bridge main entry point
//!
//! This binary runs the Gradle server supervisor and bridge, and exposes the
//! daemon status commands. It handles CLI parsing and logging setup.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gradle_bridge::bridge::MessageBridge;
use gradle_bridge::config::Config;
use gradle_bridge::daemons::{self, status, ProjectRoot, RefreshController, StatusPoller};
use gradle_bridge::host::ConsoleHost;
use gradle_bridge::ipc::random_pipe_name;
use gradle_bridge::server::GradleServer;
use gradle_bridge::{APP_NAME, VERSION};

/// Supervisor and IPC bridge for the Gradle build server
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Gradle server until interrupted.
    ///
    /// Reads commands from stdin: `announce <path>` delivers the importer
    /// endpoint address, `restart` restarts the server.
    Serve,

    /// Print a fresh local IPC endpoint address
    PipeName,

    /// Gradle daemon commands
    Daemons {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
enum DaemonCommands {
    /// List daemons of the given project roots (`<path>[=<gradle-version>]`)
    Status {
        /// Project roots
        #[arg(required = true)]
        roots: Vec<String>,
    },

    /// Stop all daemons of the given project roots (`<path>[=<gradle-version>]`)
    Stop {
        /// Project roots
        #[arg(required = true)]
        roots: Vec<String>,
    },

    /// Stop one daemon by process id
    StopPid {
        /// Daemon process id
        pid: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            Ok(Config::from_file(path)?)
        }
        None => Ok(Config::new()),
    }
}

/// Parse `<path>[=<gradle-version>]`
fn parse_root(spec: &str) -> ProjectRoot {
    match spec.rsplit_once('=') {
        Some((path, version)) if !version.is_empty() => ProjectRoot::new(path, Some(version)),
        _ => ProjectRoot::new(spec, None),
    }
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve => {
            let config = load_config(cli.config.as_ref())?;
            info!("Starting {} v{}", APP_NAME, VERSION);
            serve(config).await
        }
        Commands::PipeName => {
            let name = random_pipe_name();
            if name.is_empty() {
                anyhow::bail!("could not generate an endpoint address");
            }
            println!("{}", name);
            Ok(())
        }
        Commands::Daemons { command } => {
            let config = load_config(cli.config.as_ref())?;
            run_daemons(config, command).await
        }
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
            Ok(())
        }
    }
}

async fn run_daemons(config: Config, command: DaemonCommands) -> anyhow::Result<()> {
    match command {
        DaemonCommands::Status { roots } => {
            let roots: Vec<ProjectRoot> = roots.iter().map(|spec| parse_root(spec)).collect();
            let show_stopped = config.daemons.show_stopped;
            let controller =
                RefreshController::new(Arc::new(StatusPoller::new(config)), show_stopped);

            let records = controller.refresh(&roots).await;
            if records.is_empty() {
                println!("No Gradle Daemons");
            }
            for record in records {
                println!("{}", record);
            }
            Ok(())
        }
        DaemonCommands::Stop { roots } => {
            let roots: Vec<ProjectRoot> = roots.iter().map(|spec| parse_root(spec)).collect();
            let poller = StatusPoller::new(config);
            let stops = daemons::refresh::batch_roots(&roots)
                .into_iter()
                .map(|root| {
                    let poller = poller.clone();
                    async move { poller.stop_daemons(&root).await }
                });

            for result in futures::future::join_all(stops).await {
                if let Err(e) = result {
                    anyhow::bail!("Failed to stop daemons: {}", e);
                }
            }
            info!("Successfully stopped all daemons.");
            Ok(())
        }
        DaemonCommands::StopPid { pid } => {
            status::stop_daemon(&pid).await?;
            Ok(())
        }
    }
}

/// Run the supervisor until a shutdown signal
async fn serve(config: Config) -> anyhow::Result<()> {
    let host = Arc::new(ConsoleHost::new(config.server.java_extension_installed));
    let mut server = GradleServer::new(
        config.clone(),
        host.clone(),
        Arc::new(MessageBridge::new()),
    );
    if let Err(e) = server.start().await {
        warn!("Gradle server did not start: {}", e);
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = host.reinitialize_requested() => {
                info!("Reinitializing");
                server.dispose().await;
                server = GradleServer::new(
                    config.clone(),
                    host.clone(),
                    Arc::new(MessageBridge::new()),
                );
                if let Err(e) = server.start().await {
                    warn!("Gradle server did not start: {}", e);
                }
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_command(&server, line.trim()).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    info!("Shutting down");
    server.dispose().await;
    Ok(())
}

async fn handle_command(server: &GradleServer, line: &str) {
    let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "announce" if !argument.trim().is_empty() => {
            server.bridge().announce_importer(argument.trim());
        }
        "restart" => {
            if let Err(e) = server.restart().await {
                error!("Failed to restart gradle server: {}", e);
            }
        }
        other => warn!("Unknown command: {}", other),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
