//! Detached-signature verification via the external GPG tool
//!
//! Verification is a capability: the manifest builder talks to a
//! [`SignatureVerifier`] and parses its machine-readable status stream, so
//! tests can substitute canned output without shelling out. Only a missing
//! tool is fatal; a signature the tool rejects simply yields no metadata.

use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

/// Error types for signature verification
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("gpg executable not found")]
    ToolUnavailable,

    #[error("failed to invoke verification tool: {0}")]
    Io(#[from] io::Error),
}

/// Signer metadata recovered from a verified detached signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMetadata {
    /// Signer fingerprint, uppercased
    pub fingerprint: String,

    /// Free-text signer identity, when the tool reported one
    pub uid: Option<String>,

    /// Signing time as epoch seconds, when the tool reported one
    pub timestamp: Option<i64>,
}

/// Capability interface over the external verification tool
pub trait SignatureVerifier {
    /// Make the public keys under `keys_dir` available to the tool.
    ///
    /// Best-effort: individual import failures are ignored, only a missing
    /// tool is an error.
    fn import_keys(&self, keys_dir: &Path) -> Result<(), SignatureError> {
        let _ = keys_dir;
        Ok(())
    }

    /// Verify the detached signature at `signature_path` and return the
    /// tool's machine-readable status stream.
    fn status_output(&self, signature_path: &Path) -> Result<String, SignatureError>;
}

/// Production implementation shelling out to `gpg`
#[derive(Debug, Default)]
pub struct GpgVerifier;

impl GpgVerifier {
    pub fn new() -> Self {
        Self
    }

    fn map_spawn_error(err: io::Error) -> SignatureError {
        if err.kind() == io::ErrorKind::NotFound {
            SignatureError::ToolUnavailable
        } else {
            SignatureError::Io(err)
        }
    }
}

impl SignatureVerifier for GpgVerifier {
    fn import_keys(&self, keys_dir: &Path) -> Result<(), SignatureError> {
        let mut key_files: Vec<_> = match fs::read_dir(keys_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|ext| ext == "asc").unwrap_or(false))
                .collect(),
            // A missing key directory means there is nothing to import.
            Err(_) => return Ok(()),
        };
        key_files.sort();

        for key_file in key_files {
            // Exit status deliberately ignored; already-imported keys and
            // malformed files are not our problem at this layer.
            Command::new("gpg")
                .args(["--batch", "--import"])
                .arg(&key_file)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(Self::map_spawn_error)?;
        }
        Ok(())
    }

    fn status_output(&self, signature_path: &Path) -> Result<String, SignatureError> {
        let output = Command::new("gpg")
            .args(["--status-fd=1", "--verify"])
            .arg(signature_path)
            .stderr(Stdio::null())
            .output()
            .map_err(Self::map_spawn_error)?;

        // A nonzero exit is how gpg reports an invalid signature; the status
        // stream still tells us everything we need.
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse a GPG status stream into signer metadata.
///
/// Scans `[GNUPG:]` lines: the first `VALIDSIG` marker supplies fingerprint
/// and signing timestamp (later markers are ignored), the first `GOODSIG`
/// marker supplies the free-text identity. Without a `VALIDSIG` marker there
/// is no metadata at all.
pub fn parse_status_output(output: &str) -> Option<SignatureMetadata> {
    let mut valid: Option<(String, Option<i64>)> = None;
    let mut uid: Option<String> = None;

    for line in output.lines() {
        if !line.starts_with("[GNUPG:]") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 3 && parts[1] == "VALIDSIG" {
            if valid.is_none() {
                let fingerprint = parts[2].to_uppercase();
                let timestamp = parts.get(4).and_then(|t| t.parse::<i64>().ok());
                valid = Some((fingerprint, timestamp));
            }
        } else if parts.len() >= 4 && parts[1] == "GOODSIG" && uid.is_none() {
            let joined = parts[3..].join(" ").trim().to_string();
            if !joined.is_empty() {
                uid = Some(joined);
            }
        }
    }

    valid.map(|(fingerprint, timestamp)| SignatureMetadata {
        fingerprint,
        uid,
        timestamp,
    })
}

/// Verify the signature at `signature_path`, if it exists.
///
/// A missing signature file is "no metadata", not an error; the tool is not
/// invoked at all in that case.
pub fn signature_metadata(
    verifier: &dyn SignatureVerifier,
    signature_path: &Path,
) -> Result<Option<SignatureMetadata>, SignatureError> {
    if !signature_path.exists() {
        return Ok(None);
    }
    let output = verifier.status_output(signature_path)?;
    Ok(parse_status_output(&output))
}
