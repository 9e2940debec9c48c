//! Environment-driven configuration helpers
//!
//! Configuration structs across the workspace read their overrides through
//! these helpers so that empty values, list splitting and parse errors are
//! treated the same way everywhere.

use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is present but cannot be parsed
    #[error("environment variable {name} is invalid: {reason}")]
    InvalidValue { name: String, reason: String },

    /// A required variable is absent
    #[error("environment variable {0} is required")]
    Missing(String),

    /// A combination of values is rejected by validation
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Read a variable, trimming whitespace. Empty values count as unset.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read a comma-separated list, dropping blank items.
pub fn env_list(name: &str) -> Vec<String> {
    env_string(name)
        .map(|value| split_list(&value))
        .unwrap_or_default()
}

/// Read and parse a variable. Unset yields `Ok(None)`.
pub fn env_parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    env_string(name)
        .map(|raw| parse_value(name, &raw))
        .transpose()
}

/// Parse a raw value, naming the variable it came from on failure.
pub fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

/// Split a comma-separated value. Full-width commas are accepted as well,
/// since watchlists are often typed with a CJK input method.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', '，'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_trims_and_drops_blanks() {
        assert_eq!(
            split_list(" 600519, 00700 ,,AAPL "),
            vec!["600519", "00700", "AAPL"]
        );
    }

    #[test]
    fn test_split_list_accepts_fullwidth_comma() {
        assert_eq!(split_list("600519，000001"), vec!["600519", "000001"]);
    }

    #[test]
    fn test_env_parse_reports_variable_name() {
        let err = parse_value::<usize>("MAX_WORKERS", "many").unwrap_err();
        assert!(err.to_string().contains("MAX_WORKERS"));
        assert_eq!(parse_value::<usize>("MAX_WORKERS", " 4 ").unwrap(), 4);
    }

    #[test]
    fn test_env_parse_unset_is_none() {
        let value = env_parse::<u64>("STOCK_UTILS_TEST_NEVER_SET").unwrap();
        assert!(value.is_none());
    }
}
