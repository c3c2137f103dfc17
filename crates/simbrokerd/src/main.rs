//! simbroker daemon - global broker and session hosts
//!
//! The broker listens on a well-known port and launches a dedicated
//! session host for each client that asks for one.
//!
//! # Usage
//!
//! ```bash
//! # Start the broker (foreground)
//! simbrokerd start
//!
//! # Start the broker (background/daemonized)
//! simbrokerd start -d
//!
//! # Stop the broker
//! simbrokerd stop
//!
//! # Check broker status
//! simbrokerd status
//!
//! # Override the broker port
//! SIMBROKER_PORT=18100 simbrokerd start
//!
//! # Enable debug logging
//! RUST_LOG=simbrokerd=debug simbrokerd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown, terminating process-hosted sessions

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use simbroker_core::{HostingMode, Platform};
use simbrokerd::config::BrokerConfig;
use simbrokerd::host::{HostLauncher, ProcessLauncher, ThreadLauncher};
use simbrokerd::registry::spawn_registry;
use simbrokerd::server::Server;
use simbrokerd::session::{DesktopFactory, SessionSettings};

/// simbroker daemon - remote simulation session broker
#[derive(Parser, Debug)]
#[command(name = "simbrokerd", version, about)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/simbroker/broker.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the broker
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Broker port
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Session hosting mode: process or thread
        #[arg(long, value_parser = parse_hosting)]
        hosting: Option<HostingMode>,
    },
    /// Stop the running broker
    Stop,
    /// Show broker status
    Status,
    /// Serve a single session host (launched by the broker)
    #[command(hide = true)]
    ServeSession {
        #[arg(long)]
        host: String,

        #[arg(long)]
        port: u16,

        #[arg(long)]
        install_root: Option<PathBuf>,
    },
}

fn parse_hosting(value: &str) -> Result<HostingMode, String> {
    match value {
        "process" => Ok(HostingMode::Process),
        "thread" => Ok(HostingMode::Thread),
        other => Err(format!("unknown hosting mode '{other}' (expected process or thread)")),
    }
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("simbroker")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("simbrokerd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("simbrokerd.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    false
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems (process {pid})");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        port: None,
        bind: None,
        hosting: None,
    });

    let mut config = BrokerConfig::load(args.config.as_deref())?;
    config.apply_env()?;

    // Session hosts re-read the same file; daemonizing changes the cwd.
    let config_path = args
        .config
        .as_deref()
        .map(|path| fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));

    match command {
        Command::Start {
            daemon,
            port,
            bind,
            hosting,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind_host = bind;
            }
            if let Some(hosting) = hosting {
                config.hosting = hosting;
            }
            config.validate()?;

            if let Some(pid) = is_daemon_running() {
                eprintln!("Broker is already running (PID {pid})");
                eprintln!("Use 'simbrokerd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_broker(config, config_path);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping broker (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Broker stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Broker did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Broker is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Broker is running (PID {pid})");
                println!("Address: {}:{}", config.bind_host, config.port);
                println!("Session ports: {}", config.port_range);
                println!("Hosting: {}", config.hosting);
                Ok(())
            } else {
                println!("Broker is not running.");
                process::exit(1);
            }
        }
        Command::ServeSession {
            host,
            port,
            install_root,
        } => {
            let install_root = install_root.or(config.install_root.clone());
            serve_session(host, port, install_root, config)
        }
    }
}

#[cfg(unix)]
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> Result<()> {
    bail!(
        "Daemon mode is only supported on Unix systems; run in the foreground (log: {})",
        log_file_path().display()
    )
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("simbrokerd=info".parse()?)
                .add_directive("simbroker_core=info".parse()?)
                .add_directive("simbroker_protocol=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Spawns a task cancelling `token` on SIGTERM/SIGINT.
fn spawn_signal_task(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        token.cancel();
    });
}

/// Runs the broker (async entry point).
#[tokio::main]
async fn run_broker(config: BrokerConfig, config_path: Option<PathBuf>) -> Result<()> {
    init_logging()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "simbroker daemon starting"
    );

    let cancel_token = CancellationToken::new();
    spawn_signal_task(cancel_token.clone());

    let launcher: Arc<dyn HostLauncher> = match config.hosting {
        HostingMode::Process => Arc::new(
            ProcessLauncher::current_exe(config.install_root.clone())?.with_config(config_path),
        ),
        HostingMode::Thread => {
            let factory = Arc::new(DesktopFactory::new(config.install_root.clone()));
            let settings = SessionSettings {
                platform: Platform::current(),
                install_root: config.install_root.clone(),
            };
            Arc::new(ThreadLauncher::new(factory, settings).with_idle_timeout(config.idle_timeout()))
        }
    };

    let registry = spawn_registry(launcher, config.port_range, config.max_allocation_attempts);
    info!(range = %config.port_range, hosting = %config.hosting, "Port registry started");

    let addr = format!("{}:{}", config.bind_host, config.port);
    let listener = Server::bind(&addr).await?;
    let server = Server::broker(listener, registry.clone(), cancel_token)
        .with_idle_timeout(config.idle_timeout());

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    match registry.shutdown().await {
        Ok(terminated) => info!(terminated, "Session hosts terminated"),
        Err(e) => error!(error = %e, "Failed to shut down session hosts"),
    }

    info!("simbroker daemon stopped");
    Ok(())
}

/// Runs one session host until signalled (async entry point).
#[tokio::main]
async fn serve_session(
    host: String,
    port: u16,
    install_root: Option<PathBuf>,
    config: BrokerConfig,
) -> Result<()> {
    init_logging()?;

    let cancel_token = CancellationToken::new();
    spawn_signal_task(cancel_token.clone());

    let addr = format!("{host}:{port}");
    let listener = Server::bind(&addr).await?;
    info!(%addr, pid = process::id(), "Session host starting");

    let factory = Arc::new(DesktopFactory::new(install_root.clone()));
    let settings = SessionSettings {
        platform: Platform::current(),
        install_root,
    };

    Server::session(listener, factory, settings, cancel_token)
        .with_idle_timeout(config.idle_timeout())
        .run()
        .await?;

    info!(%addr, "Session host stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
