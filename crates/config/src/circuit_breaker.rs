use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time spent fully open before a probe is allowed
    #[serde(with = "crate::duration_ms")]
    pub reset_timeout: Duration,
    /// How long a single probe may hold the half-open slot
    #[serde(with = "crate::duration_ms")]
    pub half_open_timeout: Duration,
    pub show_toast: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(30_000),
            half_open_timeout: Duration::from_millis(5_000),
            show_toast: true,
        }
    }
}

impl ConfigValidator for CircuitBreakerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }

        ValidationUtils::validate_duration(self.reset_timeout, "reset_timeout")?;
        ValidationUtils::validate_duration(self.half_open_timeout, "half_open_timeout")?;

        Ok(())
    }
}
