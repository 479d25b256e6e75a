pub mod client;
pub mod codec;
pub mod crypto;
pub mod enclave;
pub mod gateway;
pub mod ipc;
pub mod utils;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
