//! Processor configuration loaded from environment variables.

use chrono::Duration;

/// Configuration governing how the outbox and inbox processors are driven.
///
/// Reads from environment variables:
/// - `BATCH_SIZE` — messages fetched per polling pass (default: `100`)
/// - `MAX_RETRIES` — failed attempts before a message stops being retried
///   (default: `3`)
/// - `RETENTION_DAYS` — how long terminal rows are kept before cleanup
///   (default: `30`)
/// - `PROCESSING_INTERVAL_SECS` — seconds between polling passes
///   (default: `30`)
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retention: Duration,
    pub processing_interval: std::time::Duration,
}

impl ProcessorConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: std::env::var("BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.batch_size),
            max_retries: std::env::var("MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retention: std::env::var("RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::days)
                .unwrap_or(defaults.retention),
            processing_interval: std::env::var("PROCESSING_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(std::time::Duration::from_secs)
                .unwrap_or(defaults.processing_interval),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retention: Duration::days(30),
            processing_interval: std::time::Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ProcessorConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retention, Duration::days(30));
        assert_eq!(
            config.processing_interval,
            std::time::Duration::from_secs(30)
        );
    }
}
