//! Configuration validation for hotswap settings.

use crate::error::{ConfigError, HotswapError, Result};
use tracing::debug;

use super::spec::{EcsHotswapProperties, HotswapConfig, WaitSettings};

/// Upper bound accepted for the minimum healthy percent.
const MAX_MINIMUM_HEALTHY_PERCENT: u32 = 100;
/// Upper bound accepted for the maximum percent.
const MAX_MAXIMUM_HEALTHY_PERCENT: u32 = 200;

/// Validator for hotswap configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a hotswap configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &HotswapConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_ecs(&config.ecs, &mut result);
        Self::validate_waits(&config.waits, &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(HotswapError::Config(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )))
        }
    }

    fn validate_ecs(ecs: &EcsHotswapProperties, result: &mut ValidationResult) {
        if let Some(min) = ecs.minimum_healthy_percent
            && min > MAX_MINIMUM_HEALTHY_PERCENT
        {
            result.errors.push(ValidationError {
                field: String::from("ecs.minimum_healthy_percent"),
                message: format!(
                    "Minimum healthy percent {min} must be between 0 and {MAX_MINIMUM_HEALTHY_PERCENT}"
                ),
            });
        }

        if let Some(max) = ecs.maximum_healthy_percent
            && max > MAX_MAXIMUM_HEALTHY_PERCENT
        {
            result.errors.push(ValidationError {
                field: String::from("ecs.maximum_healthy_percent"),
                message: format!(
                    "Maximum healthy percent {max} must be between 0 and {MAX_MAXIMUM_HEALTHY_PERCENT}"
                ),
            });
        }

        if let (Some(min), Some(max)) = (ecs.minimum_healthy_percent, ecs.maximum_healthy_percent)
            && min > max
        {
            result.errors.push(ValidationError {
                field: String::from("ecs"),
                message: format!(
                    "Minimum healthy percent {min} exceeds maximum healthy percent {max}"
                ),
            });
        }
    }

    fn validate_waits(waits: &WaitSettings, result: &mut ValidationResult) {
        let intervals = [
            ("waits.lambda_poll_interval_ms", waits.lambda_poll_interval_ms),
            ("waits.lambda_slow_poll_interval_ms", waits.lambda_slow_poll_interval_ms),
            ("waits.ecs_poll_interval_ms", waits.ecs_poll_interval_ms),
            ("waits.appsync_poll_interval_ms", waits.appsync_poll_interval_ms),
        ];

        for (field, value) in intervals {
            if value == 0 {
                result
                    .warnings
                    .push(format!("{field} is 0; status will be polled without pause"));
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let result = ConfigValidator::new().validate(&HotswapConfig::default()).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_percent_out_of_range() {
        let mut config = HotswapConfig::default();
        config.ecs.minimum_healthy_percent = Some(101);

        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(matches!(
            err,
            HotswapError::Config(ConfigError::ValidationError { field: Some(ref f), .. })
                if f == "ecs.minimum_healthy_percent"
        ));
    }

    #[test]
    fn test_minimum_exceeds_maximum() {
        let mut config = HotswapConfig::default();
        config.ecs.minimum_healthy_percent = Some(80);
        config.ecs.maximum_healthy_percent = Some(50);

        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_zero_interval_warns() {
        let mut config = HotswapConfig::default();
        config.waits.ecs_poll_interval_ms = 0;

        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].starts_with("waits.ecs_poll_interval_ms"));
    }
}
