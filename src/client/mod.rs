//! The connecting peer
//!
//! Symmetric counterpart of the gateway: initiates the handshake, owns its
//! own TUN endpoint and session key (the client is not privilege-separated
//! — the key is its own), and runs keepalive and reconnection.

pub mod client;
pub mod config;
pub mod main;
