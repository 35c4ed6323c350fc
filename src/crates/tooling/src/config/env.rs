//! Environment variable loading utilities
//!
//! Helper functions for loading and parsing environment variables with proper error handling.

use crate::{Result, ToolingError};
use std::collections::BTreeMap;
use std::env;

/// Load an environment variable as a string
///
/// # Returns
///
/// * `Ok(Some(value))` if variable exists
/// * `Ok(None)` if variable doesn't exist
/// * `Err` if variable exists but has invalid UTF-8
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ToolingError::General(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Parse a boolean flag
///
/// Recognizes "true", "1", "yes", "on" and "false", "0", "no", "off"
/// (case-insensitive, surrounding whitespace ignored).
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Load a boolean environment variable
///
/// # Returns
///
/// * `Ok(Some(bool))` if variable exists and is a valid boolean
/// * `Ok(None)` if variable doesn't exist
/// * `Err` if variable exists but is not a valid boolean
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    match get_env(key)? {
        Some(val) => parse_bool(&val).map(Some).ok_or_else(|| {
            ToolingError::General(format!("Invalid boolean value for {}: {}", key, val))
        }),
        None => Ok(None),
    }
}

/// Build a prefixed environment variable name
///
/// # Example
///
/// ```rust,ignore
/// let key = build_env_key("CERT_MCP_", "port"); // Returns "CERT_MCP_PORT"
/// ```
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}

/// Snapshot every variable starting with `prefix`
///
/// Keys are returned with the prefix stripped and lowercased, so
/// `CERT_MCP_MAX_BYTES` becomes `max_bytes`. Variables whose value is not
/// valid UTF-8 are skipped. Empty values are treated as unset.
pub fn collect_prefixed(prefix: &str) -> BTreeMap<String, String> {
    collect_prefixed_from(prefix, env::vars_os().filter_map(|(k, v)| {
        Some((k.into_string().ok()?, v.into_string().ok()?))
    }))
}

/// Same as [`collect_prefixed`] over an explicit variable list
pub fn collect_prefixed_from<I>(prefix: &str, vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix(prefix)?;
            if name.is_empty() || value.trim().is_empty() {
                return None;
            }
            Some((name.to_lowercase(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_missing() {
        let result = get_env("CERTMCP_TEST_MISSING_VAR_12345");
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_parse_bool() {
        let test_cases = vec![
            ("true", Some(true)),
            ("TRUE", Some(true)),
            ("1", Some(true)),
            ("yes", Some(true)),
            (" on ", Some(true)),
            ("false", Some(false)),
            ("0", Some(false)),
            ("no", Some(false)),
            ("OFF", Some(false)),
            ("maybe", None),
        ];

        for (value, expected) in test_cases {
            assert_eq!(parse_bool(value), expected, "Failed for value: {}", value);
        }
    }

    #[test]
    fn test_get_env_bool_invalid() {
        env::set_var("CERTMCP_TEST_BOOL_INVALID", "maybe");
        assert!(get_env_bool("CERTMCP_TEST_BOOL_INVALID").is_err());
        env::remove_var("CERTMCP_TEST_BOOL_INVALID");
    }

    #[test]
    fn test_build_env_key() {
        assert_eq!(build_env_key("CERT_MCP_", "port"), "CERT_MCP_PORT");
        assert_eq!(build_env_key("", "debug"), "DEBUG");
        assert_eq!(build_env_key("MY_", "max_bytes"), "MY_MAX_BYTES");
    }

    #[test]
    fn test_collect_prefixed_from() {
        let vars = vec![
            ("CERT_MCP_PORT".to_string(), "9000".to_string()),
            ("CERT_MCP_HOST".to_string(), "   ".to_string()),
            ("CERT_MCP_".to_string(), "x".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ];
        let collected = collect_prefixed_from("CERT_MCP_", vars);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected.get("port").map(String::as_str), Some("9000"));
    }
}
