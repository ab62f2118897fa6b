use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::services::retry::Exponential;

/// Bounded exponential retry settings for a leaf operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total time budget across all attempts.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry unit; the wait after attempt `n` is `interval * 2^n`.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default, with = "humantime_serde")]
    pub jitter: Duration,
}

impl RetrySettings {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            jitter: Duration::ZERO,
        }
    }

    pub const fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Image pull: 20 minutes, 5 second units.
    pub const fn image_pull() -> Self {
        Self::new(Duration::from_secs(20 * 60), Duration::from_secs(5))
    }

    /// Image import: 5 minutes, 5 second units, 1 second jitter.
    pub const fn image_import() -> Self {
        Self::new(Duration::from_secs(5 * 60), Duration::from_secs(5))
            .with_jitter(Duration::from_secs(1))
    }

    pub fn policy(&self) -> Exponential {
        Exponential::new(self.timeout)
            .with_units(self.interval)
            .with_jitter(self.jitter)
            .with_error_logging(true)
    }
}

fn default_event_capacity() -> usize {
    events::DEFAULT_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "RetrySettings::image_pull")]
    pub pull: RetrySettings,
    #[serde(default = "RetrySettings::image_import")]
    pub import: RetrySettings,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            pull: RetrySettings::image_pull(),
            import: RetrySettings::image_import(),
        }
    }
}

impl SequencerConfig {
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_pull_retry(mut self, settings: RetrySettings) -> Self {
        self.pull = settings;
        self
    }

    pub fn with_import_retry(mut self, settings: RetrySettings) -> Self {
        self.import = settings;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SequencerConfig::default();
        assert_eq!(config.event_capacity, 1000);
        assert_eq!(config.pull.timeout, Duration::from_secs(1200));
        assert_eq!(config.pull.interval, Duration::from_secs(5));
        assert_eq!(config.pull.jitter, Duration::ZERO);
        assert_eq!(config.import.timeout, Duration::from_secs(300));
        assert_eq!(config.import.jitter, Duration::from_secs(1));
    }

    #[test]
    fn test_config_builder() {
        let config = SequencerConfig::default()
            .with_event_capacity(16)
            .with_pull_retry(RetrySettings::new(
                Duration::from_secs(1),
                Duration::from_millis(10),
            ));

        assert_eq!(config.event_capacity, 16);
        assert_eq!(config.pull.timeout, Duration::from_secs(1));
        assert_eq!(config.import, RetrySettings::image_import());
    }

    #[test]
    fn test_config_deserialization_with_humantime() {
        let json = r#"{"pull":{"timeout":"2m","interval":"500ms"}}"#;
        let config: SequencerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.event_capacity, 1000);
        assert_eq!(config.pull.timeout, Duration::from_secs(120));
        assert_eq!(config.pull.interval, Duration::from_millis(500));
        assert_eq!(config.pull.jitter, Duration::ZERO);
        assert_eq!(config.import, RetrySettings::image_import());
    }
}
