//! Environment-variable configuration helpers.
//!
//! Service configuration is env-var driven. Durations are plain integer
//! seconds; booleans accept `1`/`true`/`yes`.

use chrono::Duration;
use std::str::FromStr;

/// Reads a string variable with a default.
pub fn string_var(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Reads a required, non-empty string variable.
pub fn required_var(key: &str) -> Result<String, String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        Ok(_) => Err(format!("{key} must not be empty")),
        Err(_) => Err(format!("{key} is required")),
    }
}

/// Reads and parses a variable, falling back to `default` when missing or
/// malformed.
pub fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Reads a boolean variable. `1`, `true` and `yes` (case-insensitive) are
/// truthy.
pub fn bool_var(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// Reads a duration variable expressed in whole seconds.
pub fn duration_secs_var(key: &str, default_secs: i64) -> Duration {
    Duration::seconds(parse_var(key, default_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_on_missing() {
        assert_eq!(parse_var("TEKSERVER_TEST_UNSET_VAR", 42usize), 42);
    }

    #[test]
    fn test_bool_var_parsing() {
        std::env::set_var("TEKSERVER_TEST_BOOL", "true");
        assert!(bool_var("TEKSERVER_TEST_BOOL", false));
        std::env::set_var("TEKSERVER_TEST_BOOL", "0");
        assert!(!bool_var("TEKSERVER_TEST_BOOL", true));
        std::env::remove_var("TEKSERVER_TEST_BOOL");
        assert!(bool_var("TEKSERVER_TEST_BOOL", true));
    }

    #[test]
    fn test_required_var() {
        std::env::remove_var("TEKSERVER_TEST_REQUIRED");
        assert!(required_var("TEKSERVER_TEST_REQUIRED").is_err());
        std::env::set_var("TEKSERVER_TEST_REQUIRED", "");
        assert!(required_var("TEKSERVER_TEST_REQUIRED").is_err());
        std::env::set_var("TEKSERVER_TEST_REQUIRED", "value");
        assert_eq!(required_var("TEKSERVER_TEST_REQUIRED").unwrap(), "value");
        std::env::remove_var("TEKSERVER_TEST_REQUIRED");
    }

    #[test]
    fn test_duration_secs_var() {
        std::env::set_var("TEKSERVER_TEST_DURATION", "3600");
        assert_eq!(
            duration_secs_var("TEKSERVER_TEST_DURATION", 60),
            Duration::hours(1)
        );
        std::env::remove_var("TEKSERVER_TEST_DURATION");
    }
}
