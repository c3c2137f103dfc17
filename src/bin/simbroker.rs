//! simbroker - command line client for the session broker
//!
//! # Usage
//!
//! ```bash
//! # Ask the broker for a session host and print its port
//! simbroker start-session
//!
//! # List session hosts known to the broker
//! simbroker --host lab-node-3 list
//!
//! # Copy a local file to the broker machine
//! simbroker push ./design.proj /work/design.proj
//!
//! # Run a script on a fresh session host
//! simbroker run-script ./sweep.py --kind full_wave
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use simbroker_client::{connect, BrokerClient, ClientConfig, RemoteFiles};
use simbroker_core::{AppKind, ScriptConfig, DEFAULT_BROKER_PORT};

/// simbroker - remote simulation session client
#[derive(Parser, Debug)]
#[command(name = "simbroker", version, about)]
struct Args {
    /// Broker host
    #[arg(long, global = true, default_value = "localhost")]
    host: String,

    /// Broker port
    #[arg(long, global = true, default_value_t = DEFAULT_BROKER_PORT)]
    port: u16,

    /// Reply timeout in seconds (default: wait forever)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a session host and print its port
    StartSession,
    /// Stop the session host on PORT
    StopSession { session_port: u16 },
    /// List session hosts
    List,
    /// Copy a local file to a path on the broker machine
    Push { local: PathBuf, remote: PathBuf },
    /// List a directory on the broker machine
    Ls { path: PathBuf },
    /// Create a directory tree on the broker machine
    Mkdir { path: PathBuf },
    /// Run a script on a fresh session host
    RunScript {
        script: PathBuf,

        /// Launcher kind executing the script
        #[arg(long, value_parser = parse_kind, default_value = "full_wave")]
        kind: AppKind,

        /// Installation root holding the launcher
        #[arg(long)]
        install_root: Option<PathBuf>,
    },
}

fn parse_kind(value: &str) -> Result<AppKind, String> {
    AppKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == value)
        .ok_or_else(|| {
            let names: Vec<&str> = AppKind::ALL.iter().map(AppKind::as_str).collect();
            format!("unknown kind '{value}' (expected one of: {})", names.join(", "))
        })
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = ClientConfig {
        request_timeout: args.timeout.map(Duration::from_secs),
        ..Default::default()
    };

    match args.command {
        Command::RunScript {
            script,
            kind,
            install_root,
        } => run_script(&args.host, args.port, config, script, kind, install_root).await,
        command => {
            let broker = BrokerClient::connect(&args.host, args.port, &config)
                .await
                .with_context(|| format!("Failed to reach broker at {}:{}", args.host, args.port))?;
            let result = broker_command(&broker, &args.host, command).await;
            broker.disconnect().await?;
            result
        }
    }
}

async fn broker_command(broker: &BrokerClient, host: &str, command: Command) -> Result<()> {
    match command {
        Command::StartSession => {
            let port = broker.start_service(host).await?;
            println!("{port}");
        }
        Command::StopSession { session_port } => {
            broker.stop_service(session_port).await?;
            println!("Stopped session on port {session_port}");
        }
        Command::List => {
            let services = broker.list_services().await?;
            if services.is_empty() {
                println!("No session hosts running.");
            }
            for service in services {
                let pid = service
                    .pid
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<6} {:<20} {:<8} {:<8} {}",
                    service.port,
                    service.hostname,
                    service.hosting,
                    pid,
                    service.started_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Push { local, remote } => {
            let contents = fs::read_to_string(&local)
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let handle = broker.create(&remote).await?;
            let written = handle.write(&contents).await?;
            handle.close().await?;
            println!("Wrote {written} bytes to {}", remote.display());
        }
        Command::Ls { path } => {
            for name in broker.listdir(&path).await? {
                println!("{name}");
            }
        }
        Command::Mkdir { path } => {
            println!("{}", broker.makedirs(&path).await?);
        }
        Command::RunScript { .. } => bail!("run-script needs a session host"),
    }
    Ok(())
}

async fn run_script(
    host: &str,
    broker_port: u16,
    config: ClientConfig,
    script: PathBuf,
    kind: AppKind,
    install_root: Option<PathBuf>,
) -> Result<()> {
    let lines: Vec<String> = fs::read_to_string(&script)
        .with_context(|| format!("Failed to read {}", script.display()))?
        .lines()
        .map(str::to_string)
        .collect();

    let session = connect(host, broker_port, config.clone()).await?;
    let port = session.port();
    debug!(port, "Session host ready");

    let result = session
        .run_script(lines, ScriptConfig { kind, install_root })
        .await;
    session.disconnect().await?;

    // The session host has no further use once the script ran
    let broker = BrokerClient::connect(host, broker_port, &config).await?;
    broker.stop_service(port).await?;
    broker.disconnect().await?;

    println!("{}", result?);
    Ok(())
}
