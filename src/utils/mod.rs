use std::time::{SystemTime, UNIX_EPOCH};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub mod device;

/// Initializes the global tracing subscriber
///
/// `default_level` comes from the process configuration (ERROR/WARN/INFO/
/// DEBUG); RUST_LOG still overrides it through the env filter.
pub fn init_tracing(default_level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(default_level.into())
                    .from_env_lossy(),
            )
            .with_line_number(true)
            .with_file(true)
            .finish(),
    )?;
    Ok(())
}

/// Parses a configured log level name, defaulting to INFO on junk
pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_ascii_uppercase().as_str() {
        "ERROR" => LevelFilter::ERROR,
        "WARN" => LevelFilter::WARN,
        "INFO" => LevelFilter::INFO,
        "DEBUG" => LevelFilter::DEBUG,
        _ => LevelFilter::INFO,
    }
}

/// Current Unix timestamp in milliseconds
#[inline]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Current Unix timestamp in seconds
#[inline]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}
