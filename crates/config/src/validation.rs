use std::time::Duration;

use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a duration is non-zero and at most one hour
    pub fn validate_duration(value: Duration, field_name: &str) -> ConfigResult<()> {
        if value.is_zero() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if value > Duration::from_secs(3600) {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600s"
            )));
        }
        Ok(())
    }

    /// Validate that a count is reasonable
    pub fn validate_count(count: usize, field_name: &str) -> ConfigResult<()> {
        if count == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > 10000 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 10000"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("helpdesk", "name").is_ok());
        assert!(ValidationUtils::validate_not_empty("", "name").is_err());
        assert!(ValidationUtils::validate_not_empty("   ", "name").is_err());
    }

    #[test]
    fn test_validate_duration() {
        assert!(ValidationUtils::validate_duration(Duration::from_millis(1), "d").is_ok());
        assert!(ValidationUtils::validate_duration(Duration::from_secs(3600), "d").is_ok());
        assert!(ValidationUtils::validate_duration(Duration::ZERO, "d").is_err());
        assert!(ValidationUtils::validate_duration(Duration::from_secs(3601), "d").is_err());
    }

    #[test]
    fn test_validate_count() {
        assert!(ValidationUtils::validate_count(10, "batch_size").is_ok());
        assert!(ValidationUtils::validate_count(10000, "batch_size").is_ok());
        assert!(ValidationUtils::validate_count(0, "batch_size").is_err());
        assert!(ValidationUtils::validate_count(10001, "batch_size").is_err());
    }
}
