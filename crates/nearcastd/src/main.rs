//! nearcastd — the nearcast daemon.
//!
//! Loads (or creates) the config, binds the TCP listener and UDP discovery
//! socket, starts the connection manager, and drives a line-oriented
//! terminal REPL. There is no tray icon, IPC socket, or OS service
//! integration here — this binary is the whole program.

mod driver;

use clap::Parser;
use nearcast_core::config::AppConfig;
use nearcast_core::discovery::DiscoveryService;
use nearcast_core::identity;
use nearcast_core::manager::ConnectionManager;
use nearcast_core::store::FileChatStore;
use nearcast_core::types::DeviceId;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "nearcastd", about = "LAN peer-to-peer messenger daemon")]
struct Cli {
    /// Display name to advertise to peers (defaults to the saved config, or
    /// the hostname on first run).
    #[arg(long)]
    name: Option<String>,

    /// TCP port to listen on for peer connections.
    #[arg(long)]
    port: Option<u16>,

    /// Path to the config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the data directory (chat logs, group state, received files).
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => AppConfig::config_file_path()?,
    };

    let mut config = match AppConfig::load_from(&config_path)? {
        Some(config) => config,
        None => {
            let name = cli.name.clone().unwrap_or_else(prompt_display_name);
            let config = AppConfig::new_first_run(&name);
            config.save_to(&config_path)?;
            config
        }
    };

    if let Some(name) = &cli.name {
        config.display_name = name.clone();
    }
    if let Some(port) = cli.port {
        config.tcp_port = port;
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = Some(data_dir.clone());
    }

    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    init_logging();

    let device_id = DeviceId::new(config.device_id.clone());
    let device_name = config.display_name.clone();
    let platform = identity::platform_tag().to_string();

    tracing::info!(device_id = %device_id.as_str(), %device_name, tcp_port = config.tcp_port, "starting nearcastd");

    let store: Arc<dyn nearcast_core::store::ChatStore> = Arc::new(FileChatStore::open(&data_dir)?);
    let driver = Arc::new(driver::TerminalDriver::new());

    let manager = ConnectionManager::new(
        device_id.clone(),
        device_name.clone(),
        platform.clone(),
        data_dir.clone(),
        store.clone(),
        driver.clone(),
    );

    let listener = TcpListener::bind(("0.0.0.0", config.tcp_port)).await?;
    let bound_port = listener.local_addr()?.port();
    manager.spawn_acceptor(listener);

    let local_ip = identity::local_ipv4().unwrap_or(std::net::Ipv4Addr::LOCALHOST);
    let discovery = Arc::new(DiscoveryService::bind(
        device_id.clone(),
        device_name.clone(),
        platform,
        local_ip,
        bound_port,
    )?);
    discovery.spawn_broadcaster();
    discovery.spawn_listener(driver.clone());

    println!("nearcast");
    println!("Device: {device_name} ({})", device_id.as_str());
    println!("Listening on {local_ip}:{bound_port}. Type 'help' for commands.");

    driver.run(manager.clone(), store.clone()).await;

    tracing::info!("nearcastd shutting down");
    Ok(())
}

fn prompt_display_name() -> String {
    if std::io::stdin().is_terminal() {
        print!("Display name (blank for hostname): ");
        use std::io::Write;
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_ok() {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    identity::device_name()
}

/// Initializes tracing to stderr. Verbosity is controlled by the
/// `NEARCAST_LOG` environment variable (defaults to `info`).
fn init_logging() {
    let filter = EnvFilter::try_from_env("NEARCAST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(std::io::stderr)).init();
}
