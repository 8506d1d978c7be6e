use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::validation::{ConfigValidator, ValidationUtils};

/// Time-windowed batching of independently submitted requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    #[serde(with = "crate::duration_ms")]
    pub batch_delay: Duration,
    pub show_toast: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_millis(100),
            show_toast: true,
        }
    }
}

impl ConfigValidator for BatchConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.batch_size, "batch_size")?;
        ValidationUtils::validate_duration(self.batch_delay, "batch_delay")?;
        Ok(())
    }
}

/// Key-based trailing deduplication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    #[serde(with = "crate::duration_ms")]
    pub dedupe_window: Duration,
    pub show_toast: bool,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            dedupe_window: Duration::from_millis(1000),
            show_toast: true,
        }
    }
}

impl ConfigValidator for DedupeConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_duration(self.dedupe_window, "dedupe_window")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub show_toast: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { show_toast: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub batch: BatchConfig,
    pub dedupe: DedupeConfig,
    pub audit: AuditConfig,
}

impl ConfigValidator for ResilienceConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.circuit_breaker.validate()?;
        self.batch.validate()?;
        self.dedupe.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resilience_config_default() {
        let config = ResilienceConfig::default();

        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.batch.batch_size, 10);
        assert_eq!(config.batch.batch_delay, Duration::from_millis(100));
        assert_eq!(config.dedupe.dedupe_window, Duration::from_millis(1000));
        assert!(config.audit.show_toast);
    }

    #[test]
    fn test_resilience_config_validation() {
        let config = ResilienceConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid_config = config.clone();
        invalid_config.batch.batch_size = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.batch.batch_delay = Duration::ZERO;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.dedupe.dedupe_window = Duration::ZERO;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config;
        invalid_config.circuit_breaker.failure_threshold = 0;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_resilience_config_serialization() {
        let config = ResilienceConfig::default();

        let serialized = serde_json::to_string(&config).expect("Failed to serialize");
        let deserialized: ResilienceConfig =
            serde_json::from_str(&serialized).expect("Failed to deserialize");

        assert_eq!(config.batch.batch_size, deserialized.batch.batch_size);
        assert_eq!(
            config.dedupe.dedupe_window,
            deserialized.dedupe.dedupe_window
        );
    }
}
