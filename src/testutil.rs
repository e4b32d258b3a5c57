//! Output redaction helpers for deterministic comparisons
//!
//! Reporter output carries wall-clock durations and dynamic addresses; these
//! helpers rewrite them to fixed values so tests can compare full output.

use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\.\d{2}s").expect("valid regex"));
static ELAPSED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"elapsed time: [0-9.]+ sec").expect("valid regex"));
static IPV4_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"127\.0\.0\.1:\d+").expect("valid regex"));
static IPV6_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[::1?\]:\d+").expect("valid regex"));

/// Apply every redaction
pub fn replace_output(s: &str) -> String {
    replace_addr(&reset_duration(s))
}

/// Rewrite durations and elapsed-time logs to fixed values
pub fn reset_duration(s: &str) -> String {
    let s = DURATION_PATTERN.replace_all(s, "0.00s");
    ELAPSED_PATTERN
        .replace_all(&s, "elapsed time: 0.000000 sec")
        .to_string()
}

/// Rewrite loopback addresses to fixed ports
pub fn replace_addr(s: &str) -> String {
    let s = IPV4_PATTERN.replace_all(s, "127.0.0.1:12345");
    IPV6_PATTERN.replace_all(&s, "[::]:12345").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_duration() {
        assert_eq!(
            reset_duration("--- PASS: t (1.42s)\n        elapsed time: 0.031337 sec"),
            "--- PASS: t (0.00s)\n        elapsed time: 0.000000 sec"
        );
    }

    #[test]
    fn test_replace_addr() {
        assert_eq!(
            replace_addr("listening on 127.0.0.1:54321 and [::]:54321"),
            "listening on 127.0.0.1:12345 and [::]:12345"
        );
    }
}
