// Logging module for structured logging using the tracing crate

use std::error::Error;

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber for structured logging
///
/// The subscriber is configured with:
/// - Filtering via `RUST_LOG` (default level: info)
/// - Optional JSON formatting for log aggregation systems
/// - Output to stdout for container/cloud-native deployments
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_subscriber(json: bool) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| e as Box<dyn Error>)?;
    } else {
        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| e as Box<dyn Error>)?;
    }

    Ok(())
}
