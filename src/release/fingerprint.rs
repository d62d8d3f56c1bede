//! Current-signer fingerprint validation
//!
//! The fingerprint file is the process-wide signer identity releases fall
//! back to when a signature cannot be verified. It must hold exactly 40 hex
//! characters once normalized.

use regex_lite::Regex;

/// Error raised for a malformed fingerprint file
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fingerprint must be exactly 40 hex chars (got: '{value}')")]
pub struct FingerprintError {
    /// The normalized value that failed validation
    pub value: String,
}

/// Normalize and validate raw fingerprint file content.
///
/// Strips a leading UTF-8 byte-order mark, trims surrounding whitespace, and
/// uppercases before matching. Pure function, no side effects.
pub fn validate_fingerprint(raw: &str) -> Result<String, FingerprintError> {
    let normalized = raw
        .trim()
        .trim_start_matches('\u{feff}')
        .trim()
        .to_uppercase();

    let pattern = Regex::new(r"^[0-9A-F]{40}$").unwrap();
    if !pattern.is_match(&normalized) {
        return Err(FingerprintError { value: normalized });
    }
    Ok(normalized)
}
