//! Tracing setup for embedding applications.
//!
//! The core only emits `tracing` events; nothing here is called on the hot
//! path. Applications that want the core's structured logs on stderr can use
//! [`init`]; those with their own subscriber stack should skip this module.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output format for the stderr subscriber.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Json,
}

/// Install a stderr subscriber filtered by verbosity and the `LOG` env var.
///
/// Returns an error string if a global subscriber is already set (tests
/// commonly race on this; callers may ignore it).
pub fn init(verbosity: u8, format: LogFormat) -> Result<(), String> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var("LOG")
        .from_env_lossy();

    let result = match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true)
            .with_env_filter(filter)
            .try_init(),
    };
    result.map_err(|err| err.to_string())
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::ERROR,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_from_verbosity(0), tracing::metadata::LevelFilter::ERROR);
        assert_eq!(level_from_verbosity(1), tracing::metadata::LevelFilter::INFO);
        assert_eq!(level_from_verbosity(2), tracing::metadata::LevelFilter::DEBUG);
        assert_eq!(level_from_verbosity(9), tracing::metadata::LevelFilter::DEBUG);
    }
}
