// ABOUTME: Environment variable parsing utilities
// ABOUTME: Typed readers for numbers, durations and paths with logged fallbacks

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Read a variable and parse it, returning `default` when unset or unparseable.
pub fn env_or<T>(var_name: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(var_name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Read a variable that must satisfy `validator`.
///
/// A set-but-rejected value is logged and replaced by `default`.
pub fn env_validated<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + Display,
    F: Fn(T) -> bool,
{
    let Ok(raw_value) = std::env::var(var_name) else {
        return default;
    };

    match raw_value.trim().parse::<T>() {
        Ok(parsed) if validator(parsed) => parsed,
        Ok(_) => {
            tracing::warn!(
                "Environment variable {} has out-of-range value '{}', using default: {}",
                var_name,
                raw_value,
                default
            );
            default
        }
        Err(_) => {
            tracing::warn!(
                "Environment variable {} has unparseable value '{}', using default: {}",
                var_name,
                raw_value,
                default
            );
            default
        }
    }
}

/// Positive number of seconds, as a `Duration`.
pub fn env_secs(var_name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_validated(var_name, default_secs, |v| v > 0))
}

/// Positive number of milliseconds, as a `Duration`.
pub fn env_millis(var_name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_validated(var_name, default_ms, |v| v > 0))
}

/// Non-empty string value, if set.
pub fn env_string(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Path value, falling back to `default` when unset or blank.
pub fn env_path_or(var_name: &str, default: PathBuf) -> PathBuf {
    env_string(var_name).map(PathBuf::from).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_or_not_set() {
        std::env::remove_var("LABRUN_TEST_NOT_SET");
        let result: u32 = env_or("LABRUN_TEST_NOT_SET", 42);
        assert_eq!(result, 42);
    }

    #[test]
    #[serial]
    fn test_env_or_trims_whitespace() {
        std::env::set_var("LABRUN_TEST_TRIM", " 17 ");
        let result: u32 = env_or("LABRUN_TEST_TRIM", 42);
        assert_eq!(result, 17);
        std::env::remove_var("LABRUN_TEST_TRIM");
    }

    #[test]
    #[serial]
    fn test_env_validated_rejects_out_of_range() {
        std::env::set_var("LABRUN_TEST_RANGE", "0");
        let result = env_validated("LABRUN_TEST_RANGE", 5u64, |v| v > 0);
        assert_eq!(result, 5);
        std::env::remove_var("LABRUN_TEST_RANGE");
    }

    #[test]
    #[serial]
    fn test_env_validated_rejects_garbage() {
        std::env::set_var("LABRUN_TEST_GARBAGE", "soon");
        let result = env_validated("LABRUN_TEST_GARBAGE", 5u64, |v| v > 0);
        assert_eq!(result, 5);
        std::env::remove_var("LABRUN_TEST_GARBAGE");
    }

    #[test]
    #[serial]
    fn test_env_durations() {
        std::env::set_var("LABRUN_TEST_SECS", "3");
        std::env::set_var("LABRUN_TEST_MS", "250");
        assert_eq!(env_secs("LABRUN_TEST_SECS", 10), Duration::from_secs(3));
        assert_eq!(env_millis("LABRUN_TEST_MS", 10), Duration::from_millis(250));
        std::env::remove_var("LABRUN_TEST_SECS");
        std::env::remove_var("LABRUN_TEST_MS");
    }

    #[test]
    #[serial]
    fn test_env_path_blank_uses_default() {
        std::env::set_var("LABRUN_TEST_PATH", "   ");
        let path = env_path_or("LABRUN_TEST_PATH", PathBuf::from("/tmp/labrun"));
        assert_eq!(path, PathBuf::from("/tmp/labrun"));
        std::env::remove_var("LABRUN_TEST_PATH");
    }
}
