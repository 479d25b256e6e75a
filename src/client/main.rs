use crate::client::client::VpnClient;
use crate::client::config::{self, ClientConfig};
use clap::Parser;

/// Tunnel client process
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Gateway address (overrides the config file)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Gateway UDP port (overrides the config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Username presented in the connect request
    #[arg(short, long)]
    pub username: Option<String>,

    /// Log level: ERROR, WARN, INFO, or DEBUG
    #[arg(long)]
    pub log_level: Option<String>,
}

pub async fn run_client() {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => match config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => ClientConfig::default(),
    };
    if let Some(server) = &args.server {
        cfg.server_address = server.clone();
    }
    if let Some(port) = args.port {
        cfg.server_port = port;
    }
    if let Some(username) = &args.username {
        cfg.username = username.clone();
    }
    if let Some(level) = &args.log_level {
        cfg.log_level = level.clone();
    }

    if let Err(e) = crate::utils::init_tracing(crate::utils::parse_log_level(&cfg.log_level)) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    tracing::info!(
        "starting client for {}:{} as {}",
        cfg.server_address,
        cfg.server_port,
        cfg.username
    );

    let mut client = VpnClient::new(cfg);
    if let Err(e) = client.run().await {
        tracing::error!("client terminated: {}", e);
        std::process::exit(1);
    }
}
