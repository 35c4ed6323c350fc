//! Logging utilities
//!
//! Provides helper functions for structured logging with tracing, log-line
//! sanitizing, and a size-rotated file sink.

mod rotating;

pub use rotating::{RotatingLog, DEFAULT_BACKUPS, DEFAULT_ROTATE_BYTES};

use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::debug;

/// Log execution time of a future at debug level
///
/// # Example
///
/// ```rust,ignore
/// use tooling::logging::timed;
///
/// let rows = timed("list_records", store.list_records(query)).await;
/// ```
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    debug!(operation = name, "Starting");

    let result = future.await;

    let elapsed = start.elapsed();
    debug!(
        operation = name,
        elapsed = %format_duration(elapsed),
        "Completed"
    );

    result
}

/// Format duration in human-readable form
///
/// # Example
///
/// ```rust
/// use certmcp_tooling::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
/// ```
pub fn format_duration(duration: std::time::Duration) -> String {
    let micros = duration.as_micros();

    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{}ms", micros / 1000)
    } else if micros < 60_000_000 {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    } else {
        let seconds = micros / 1_000_000;
        format!("{}m{}s", seconds / 60, seconds % 60)
    }
}

/// Format bytes in human-readable form
///
/// # Example
///
/// ```rust
/// use certmcp_tooling::logging::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(500), "500 B");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)(api[\s_-]?key|apikey)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(password|passwd|pwd)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(token)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (r"(?i)(secret)\s*[:=]\s*\S+", "$1: [REDACTED]"),
        (
            r"(?i)(authorization|auth)\s*:\s*(bearer|basic)\s+\S+",
            "$1: $2 [REDACTED]",
        ),
    ]
    .into_iter()
    .filter_map(|(p, r)| Regex::new(p).ok().map(|re| (re, r)))
    .collect()
});

// 18-digit resident identity numbers (last char may be X) and legacy 15-digit ones.
static IDENTITY_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(\d{6})\d{8}(\d{3}[\dXx])\b|\b(\d{6})\d{5}(\d{4})\b").ok());

static MOBILE_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b1[3-9]\d{5}(\d{4})\b").ok());

/// Sanitize string for logging (remove credentials)
///
/// # Example
///
/// ```rust
/// use certmcp_tooling::logging::sanitize_for_logging;
///
/// let sanitized = sanitize_for_logging("password=hunter2");
/// assert!(sanitized.contains("[REDACTED]"));
/// ```
pub fn sanitize_for_logging(input: &str) -> String {
    let mut result = input.to_string();
    for (re, replacement) in SECRET_PATTERNS.iter() {
        result = re.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Sanitize a log line, also masking identity and mobile numbers
///
/// Used for anything derived from tool arguments while redaction is enabled.
pub fn sanitize_pii_for_logging(input: &str) -> String {
    let mut result = sanitize_for_logging(input);

    if let Some(re) = IDENTITY_NUMBER.as_ref() {
        result = re
            .replace_all(&result, |caps: &regex::Captures<'_>| {
                match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
                    (Some(head), Some(tail), _, _) => {
                        format!("{}********{}", head.as_str(), tail.as_str())
                    }
                    (_, _, Some(head), Some(tail)) => {
                        format!("{}*****{}", head.as_str(), tail.as_str())
                    }
                    _ => "[REDACTED]".to_string(),
                }
            })
            .to_string();
    }

    if let Some(re) = MOBILE_NUMBER.as_ref() {
        result = re.replace_all(&result, "*******$1").to_string();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(500)), "500μs");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m5s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_sanitize_password() {
        let sanitized = sanitize_for_logging("password: secret123");
        assert!(sanitized.contains("[REDACTED]"));
        assert!(!sanitized.contains("secret123"));
    }

    #[test]
    fn test_sanitize_basic_auth() {
        let sanitized = sanitize_for_logging("Authorization: Basic bG9jYWw6cHc=");
        assert!(sanitized.contains("[REDACTED]"));
        assert!(!sanitized.contains("bG9jYWw6cHc="));
    }

    #[test]
    fn test_sanitize_preserves_safe_data() {
        let input = "tool=list_records limit=10";
        assert_eq!(sanitize_for_logging(input), input);
    }

    #[test]
    fn test_sanitize_identity_numbers() {
        let sanitized = sanitize_pii_for_logging(r#"{"query":"110101199001010011"}"#);
        assert!(sanitized.contains("110101********0011"));
        assert!(!sanitized.contains("110101199001010011"));

        let sanitized = sanitize_pii_for_logging("id 11010119001010x");
        assert!(sanitized.contains("id 11010119001010x"));
    }

    #[test]
    fn test_sanitize_mobile_numbers() {
        let sanitized = sanitize_pii_for_logging("call 13800138000 now");
        assert_eq!(sanitized, "call *******8000 now");
    }

    #[tokio::test]
    async fn test_timed() {
        let result = timed("test_operation", async { 42 }).await;
        assert_eq!(result, 42);
    }
}
