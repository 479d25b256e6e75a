use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    // gateway address: hostname or IP
    #[serde(default = "default_server_address")]
    pub server_address: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    // presented in the connect request, at most 31 bytes on the wire
    #[serde(default = "default_username")]
    pub username: String,

    // retry the handshake after a failure or a lost connection
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    // seconds between keepalive pings
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    // seconds without a pong before the connection counts as lost
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout: u64,

    #[serde(default = "default_tun_name")]
    pub tun_name: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_address() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    51820
}

fn default_username() -> String {
    "vpn_user".to_string()
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    60
}

fn default_tun_name() -> String {
    "tun1".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            server_port: default_server_port(),
            username: default_username(),
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            keepalive_interval: default_keepalive_interval(),
            pong_timeout: default_pong_timeout(),
            tun_name: default_tun_name(),
            log_level: default_log_level(),
        }
    }
}

pub fn load(path: &str) -> anyhow::Result<ClientConfig> {
    let content = fs::read_to_string(path)?;
    let config: ClientConfig = toml::from_str(&content)?;
    Ok(config)
}
