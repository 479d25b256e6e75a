use crate::enclave::hardening;
use crate::enclave::key_manager::KeyManager;
use crate::enclave::service::EnclaveService;
use crate::ipc::protocol::SOCKET_PATH;
use clap::Parser;
use std::path::PathBuf;

/// Key-custody process for the tunnel gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Filesystem path for the IPC listening socket
    #[arg(short, long, default_value = SOCKET_PATH)]
    pub socket: PathBuf,

    /// Log level: ERROR, WARN, INFO, or DEBUG
    #[arg(long, default_value = "INFO")]
    pub log_level: String,
}

pub async fn run_enclave() {
    let args = Args::parse();

    if let Err(e) = crate::utils::init_tracing(crate::utils::parse_log_level(&args.log_level)) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    // hardening first, before the identity keypair exists in memory
    hardening::apply();

    let keys = KeyManager::new();
    tracing::info!(
        "server identity ready, public key {:02x?}...",
        &keys.server_public()[..8]
    );

    let mut service = EnclaveService::new(args.socket, keys);
    if let Err(e) = service.run().await {
        tracing::error!("enclave error: {}", e);
        std::process::exit(1);
    }
}
