use crate::ipc::protocol::SOCKET_PATH;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    // UDP port clients connect to
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    // virtual interface name
    #[serde(default = "default_tun_name")]
    pub tun_name: String,

    // gateway's own tunnel address
    #[serde(default = "default_tun_address")]
    pub tun_address: String,

    #[serde(default = "default_netmask")]
    pub netmask: String,

    // path of the enclave's IPC socket
    #[serde(default = "default_enclave_socket")]
    pub enclave_socket: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_port() -> u16 {
    51820
}

fn default_tun_name() -> String {
    "tun0".to_string()
}

fn default_tun_address() -> String {
    "10.8.0.1".to_string()
}

fn default_netmask() -> String {
    "255.255.255.0".to_string()
}

fn default_enclave_socket() -> String {
    SOCKET_PATH.to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            tun_name: default_tun_name(),
            tun_address: default_tun_address(),
            netmask: default_netmask(),
            enclave_socket: default_enclave_socket(),
            log_level: default_log_level(),
        }
    }
}

pub fn load(path: &str) -> anyhow::Result<GatewayConfig> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;
    Ok(config)
}
