//! Custom validation functions for configuration.

use validator::ValidationError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate that a log level is one `tracing` understands.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_known_levels_in_any_case() {
        assert!(validate_log_level("info").is_ok());
        assert!(validate_log_level("TRACE").is_ok());
    }

    #[test]
    fn test_rejects_unknown_level() {
        let err = validate_log_level("verbose").unwrap_err();
        assert_eq!(err.code, "invalid_log_level");
    }
}
