//! `scanrelay` - MRZ document readers shared between terminals.
//!
//! # Usage
//!
//! ```bash
//! # Relay server
//! scanrelay broker --bind 0.0.0.0:5050
//!
//! # Next to a reader: run it and offer it to the relay
//! scanrelay --config scanrelay.toml agent --server 10.0.0.5:5050
//!
//! # At a desk: take a reader and print what it scans
//! scanrelay terminal --terminal-id DESK-1 --device <DEVICE_ID>
//!
//! # Parse MRZ text without hardware
//! scanrelay parse scan.txt
//! ```
//!
//! Logging honours `RUST_LOG`, falling back to `--log-level`. Logs go to
//! stderr; records go to stdout as JSON.

mod config;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use scanrelay_core::{DeviceId, MrzRecord, TerminalId};
use scanrelay_hardware::{ReaderDrivers, ReaderSupervisor};
use scanrelay_mrz::{MrzParser, RowSeparator, TemplateStore};
use scanrelay_network::{
    DeviceAgent, RelayClient, RelayClientConfig, RelayServer, ScanRequest,
};
use scanrelay_protocol::Event;
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "scanrelay")]
#[command(about = "Share MRZ document readers between terminals")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay server
    Broker {
        /// Listen address (overrides broker.bind_addr)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Run a reader and register it with the relay server
    Agent {
        /// Relay server (overrides agent.server_addr)
        #[arg(long)]
        server: Option<SocketAddr>,

        /// Name announced to terminals (overrides agent.device_name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Reserve a reader and print the records it relays
    Terminal {
        #[arg(long)]
        terminal_id: String,

        /// Device to reserve; without it only records for the terminal group
        /// are printed
        #[arg(long)]
        device: Option<DeviceId>,

        /// Ask the device for an active scan after reserving it
        #[arg(long, requires = "device")]
        wakeup: bool,

        /// Relay server (overrides agent.server_addr)
        #[arg(long)]
        server: Option<SocketAddr>,
    },

    /// List devices registered with the relay server
    Devices {
        /// Only devices nobody holds
        #[arg(long)]
        available: bool,

        /// Relay server (overrides agent.server_addr)
        #[arg(long)]
        server: Option<SocketAddr>,
    },

    /// Parse MRZ text and print the record as JSON
    Parse {
        /// Input file; stdin when omitted or "-"
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Broker { bind } => run_broker(config, bind).await,
        Commands::Agent { server, name } => run_agent(config, server, name).await,
        Commands::Terminal {
            terminal_id,
            device,
            wakeup,
            server,
        } => run_terminal(config, terminal_id, device, wakeup, server).await,
        Commands::Devices { available, server } => list_devices(config, available, server).await,
        Commands::Parse { input } => parse_input(config, input),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_broker(config: AppConfig, bind: Option<SocketAddr>) -> Result<()> {
    let mut settings = config.broker;
    if let Some(bind) = bind {
        settings.bind_addr = bind;
    }

    let server = RelayServer::bind(settings)
        .await
        .context("starting relay server")?;
    let cancel = CancellationToken::new();

    let stop = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutting down");
        stop.cancel();
    });

    server.run(cancel).await.context("relay server failed")
}

async fn run_agent(
    config: AppConfig,
    server: Option<SocketAddr>,
    name: Option<String>,
) -> Result<()> {
    let mut settings = config.agent;
    if let Some(server) = server {
        settings.server_addr = server;
    }
    if let Some(name) = name {
        settings.device_name = name;
    }

    let (agent, mut scans) = DeviceAgent::start(settings).context("invalid agent settings")?;
    let supervisor =
        ReaderSupervisor::from_settings(&config.reader, &ReaderDrivers::system(), agent.clone());
    let mut supervisor = match supervisor {
        Ok(supervisor) => supervisor.start(),
        Err(e) => {
            agent.shutdown().await;
            return Err(e).context("starting reader");
        }
    };
    info!(backend = %supervisor.backend(), "Reader supervisor started");

    let mut states = supervisor.subscribe_state();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutting down");
                break;
            }
            scan = scans.recv() => match scan {
                Some(ScanRequest) => {
                    if let Err(e) = supervisor.trigger_scan().await {
                        warn!(error = %e, "Active scan not possible");
                    }
                }
                None => break,
            },
            changed = states.changed() => {
                if changed.is_err() || supervisor.state().is_terminal() {
                    warn!(state = %supervisor.state(), "Reader supervisor stopped");
                    break;
                }
            }
        }
    }

    supervisor.shutdown().await?;
    agent.shutdown().await;
    Ok(())
}

fn client_config(config: &AppConfig, server: Option<SocketAddr>) -> RelayClientConfig {
    RelayClientConfig {
        server_addr: server.unwrap_or(config.agent.server_addr),
        timeout: config.agent.request_timeout,
    }
}

async fn run_terminal(
    config: AppConfig,
    terminal_id: String,
    device: Option<DeviceId>,
    wakeup: bool,
    server: Option<SocketAddr>,
) -> Result<()> {
    let terminal_id = TerminalId::new(terminal_id)?;
    let (client, mut events) = RelayClient::connect(client_config(&config, server))
        .await
        .context("connecting to relay server")?;

    client.join_terminal(&terminal_id).await?;
    if let Some(device_id) = device {
        if !client.reserve(device_id, &terminal_id).await? {
            client.close().await;
            bail!("device {device_id} is not available");
        }
        info!(%device_id, %terminal_id, "Device reserved");
        if wakeup {
            client.wakeup(device_id, &terminal_id).await?;
        }
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            event = events.recv() => match event {
                Some(Event::RecordReceived { record }) => {
                    println!("{}", serde_json::to_string(&record)?);
                }
                Some(Event::DeviceDisconnected { device_id }) => {
                    warn!(%device_id, "Device disconnected, reservation lost");
                }
                Some(_) => {}
                None => break Err(anyhow!("connection to relay server lost")),
            },
        }
    };

    if let Some(device_id) = device
        && client.is_connected()
    {
        match client.release(device_id, &terminal_id).await {
            Ok(true) => info!(%device_id, "Device released"),
            Ok(false) => warn!(%device_id, "Device was no longer held"),
            Err(e) => warn!(%device_id, error = %e, "Release failed"),
        }
    }
    client.close().await;
    outcome
}

async fn list_devices(
    config: AppConfig,
    available_only: bool,
    server: Option<SocketAddr>,
) -> Result<()> {
    let (client, _events) = RelayClient::connect(client_config(&config, server))
        .await
        .context("connecting to relay server")?;
    let devices = client.list_devices(available_only).await?;
    client.close().await;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

fn parse_input(config: AppConfig, input: Option<PathBuf>) -> Result<()> {
    let text = read_input(input)?;
    let record = parse_text(&config, &text)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display())),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("reading stdin")?;
            Ok(text)
        }
    }
}

fn parse_text(config: &AppConfig, text: &str) -> Result<MrzRecord> {
    let templates = match &config.reader.template_file {
        Some(path) => TemplateStore::load(path)?,
        None => TemplateStore::builtin()?,
    };
    let parser = MrzParser::new(Arc::new(templates));

    // Files and pipes may end lines with CRLF, CR or LF.
    let rows = text.replace("\r\n", "\n").replace('\r', "\n");
    parser
        .parse(rows.trim(), RowSeparator::Lf)
        .ok_or_else(|| anyhow!("no document template matches the input"))
}
