//! Failure message normalization.
//!
//! Two failures that differ only in line numbers, file paths, addresses, or
//! whitespace normalize to the same signature.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum signature length in characters.
pub const SIGNATURE_PREFIX_LEN: usize = 100;

/// Signature of a test that ran out of wall-clock time.
pub const TIMEOUT_SIGNATURE: &str = "execution_timeout";

/// Normalize a failure message into a case-preserving signature prefix.
///
/// - `line 42` becomes `line XXX`
/// - `File "/any/path.py"` becomes `File "XXX"`
/// - `0x7ffd1234` becomes `0xXXX`
/// - whitespace runs collapse to one space
/// - the result is cut to [`SIGNATURE_PREFIX_LEN`] characters
#[must_use]
pub fn normalize_signature(text: &str) -> String {
    #[allow(clippy::expect_used)]
    static RE_WHITESPACE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
    #[allow(clippy::expect_used)]
    static RE_LINE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"line \d+").expect("valid regex"));
    #[allow(clippy::expect_used)]
    static RE_FILE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"File "[^"]*""#).expect("valid regex"));
    #[allow(clippy::expect_used)]
    static RE_HEX: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"0x[0-9A-Fa-f]+").expect("valid regex"));

    let normalized = RE_WHITESPACE.replace_all(text.trim(), " ");
    let normalized = RE_LINE.replace_all(&normalized, "line XXX");
    let normalized = RE_FILE.replace_all(&normalized, r#"File "XXX""#);
    let normalized = RE_HEX.replace_all(&normalized, "0xXXX");
    truncate_chars(&normalized, SIGNATURE_PREFIX_LEN)
        .trim_end()
        .to_string()
}

/// Cut `text` to at most `max` characters.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
