use std::{collections::HashSet, time::Duration};

use crate::{config::models::KilnConfig, core::filter::BUILTIN_FILTERS};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid duration '{value}' for '{field}': {reason}")]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown built-in filter '{name}'")]
    UnknownFilter { name: String },

    #[error("Built-in filter '{name}' listed more than once")]
    DuplicateFilter { name: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Kiln configuration validator
pub struct KilnConfigValidator;

impl KilnConfigValidator {
    /// Validate the entire configuration, reporting every problem found
    pub fn validate(config: &KilnConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let poll = Self::validate_duration(
            "registry.active_poll_interval",
            &config.registry.active_poll_interval,
            false,
        );
        let timeout = Self::validate_duration(
            "registry.active_wait_timeout",
            &config.registry.active_wait_timeout,
            true,
        );
        match (poll, timeout) {
            (Ok(poll), Ok(timeout)) => {
                if timeout < poll {
                    errors.push(ValidationError::InvalidField {
                        field: "registry.active_wait_timeout".to_string(),
                        message: format!(
                            "must not be shorter than active_poll_interval ({})",
                            config.registry.active_poll_interval
                        ),
                    });
                }
            }
            (poll, timeout) => {
                errors.extend(poll.err());
                errors.extend(timeout.err());
            }
        }

        errors.extend(Self::validate_filters(&config.filters.builtin));

        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&config.logging.level) {
            errors.push(ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: e.to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_duration(field: &str, value: &str, allow_zero: bool) -> ValidationResult<Duration> {
        let duration =
            humantime::parse_duration(value).map_err(|e| ValidationError::InvalidDuration {
                field: field.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            })?;
        if !allow_zero && duration.is_zero() {
            return Err(ValidationError::InvalidDuration {
                field: field.to_string(),
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(duration)
    }

    fn validate_filters(names: &[String]) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for name in names {
            if !BUILTIN_FILTERS.contains(&name.as_str()) {
                errors.push(ValidationError::UnknownFilter { name: name.clone() });
            } else if !seen.insert(name.to_ascii_lowercase()) {
                errors.push(ValidationError::DuplicateFilter { name: name.clone() });
            }
        }
        errors
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(KilnConfigValidator::validate(&KilnConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = KilnConfig::default();
        config.registry.active_poll_interval = "0ms".to_string();
        let err = KilnConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("must be greater than zero"));
    }

    #[test]
    fn test_unparseable_duration_rejected() {
        let mut config = KilnConfig::default();
        config.registry.active_wait_timeout = "forever".to_string();
        let err = KilnConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("registry.active_wait_timeout"));
    }

    #[test]
    fn test_timeout_shorter_than_interval_rejected() {
        let mut config = KilnConfig::default();
        config.registry.active_poll_interval = "1s".to_string();
        config.registry.active_wait_timeout = "500ms".to_string();
        assert!(KilnConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_filter_list_checked() {
        let mut config = KilnConfig::default();
        config.filters.builtin = vec![
            "gzip".to_string(),
            "brotli".to_string(),
            "gzip".to_string(),
        ];
        let err = KilnConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Found 2 validation errors"));
        assert!(message.contains("Unknown built-in filter 'brotli'"));
        assert!(message.contains("'gzip' listed more than once"));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = KilnConfig::default();
        config.logging.level = "kiln=loud".to_string();
        assert!(KilnConfigValidator::validate(&config).is_err());
    }
}
