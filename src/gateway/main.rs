use crate::gateway::config::{self, GatewayConfig};
use crate::gateway::gateway::Gateway;
use clap::Parser;

/// Tunnel gateway process
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// UDP listen port (overrides the config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level: ERROR, WARN, INFO, or DEBUG
    #[arg(long)]
    pub log_level: Option<String>,
}

pub async fn run_gateway() {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => match config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => GatewayConfig::default(),
    };
    if let Some(port) = args.port {
        cfg.listen_port = port;
    }
    if let Some(level) = &args.log_level {
        cfg.log_level = level.clone();
    }

    if let Err(e) = crate::utils::init_tracing(crate::utils::parse_log_level(&cfg.log_level)) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let mut gateway = match Gateway::new(&cfg).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!("gateway startup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = gateway.run().await {
        // a dead enclave lands here; exit non-zero so the supervisor
        // restarts the pair
        tracing::error!("gateway terminated: {}", e);
        std::process::exit(1);
    }
}
