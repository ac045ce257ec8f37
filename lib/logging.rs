// Process-wide tracing setup for the hio tools
use hio_core::{Error, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Filter used when neither `RUST_LOG` nor the config names one.
pub const DEFAULT_FILTER: &str = "info";

/// Resolve the filter directive: `RUST_LOG`, then the config, then [`DEFAULT_FILTER`].
pub fn filter(config: &LogConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = config.filter.as_deref().unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directive).map_err(|e| Error::Config(format!("Bad log filter '{}': {}", directive, e)))
}

/// Install the global fmt subscriber. A second call is an error.
pub fn init(config: &LogConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(config)?)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_filter_is_used() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LogConfig {
            filter: Some("hio=debug".into()),
            ..LogConfig::default()
        };
        assert_eq!(filter(&config).unwrap().to_string(), "hio=debug");
    }

    #[test]
    fn malformed_filter_is_config_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LogConfig {
            filter: Some("hio=loud".into()),
            ..LogConfig::default()
        };
        assert!(matches!(filter(&config), Err(Error::Config(_))));
    }
}
