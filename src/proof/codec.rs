//! Timestamp-proof artifact normalization
//!
//! A proof may be committed as the raw binary file or as a base64 text
//! sibling (`<proof>.base64`) for transports that mangle binary content.
//! Either way the manifest records the decoded bytes' size and hash; the
//! text-encoded case additionally records the encoded artifact itself.

use std::fs;
use std::io;
use std::path::Path;

use crate::release::manifest::{
    compute_sha256, file_record, relative_posix_path, ProofEncoding, ProofRecord,
};

/// Errors for proof artifact normalization
#[derive(Debug, thiserror::Error)]
pub enum ProofCodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid base64 data in {path}: {source}")]
    InvalidBase64 {
        path: String,
        source: base64::DecodeError,
    },
}

/// Strictly decode base64 text after stripping all whitespace.
///
/// `description` names the artifact in the error message.
pub fn decode_base64_text(contents: &str, description: &str) -> Result<Vec<u8>, ProofCodecError> {
    let normalized: String = contents.chars().filter(|c| !c.is_whitespace()).collect();
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, normalized).map_err(
        |source| ProofCodecError::InvalidBase64 {
            path: description.to_string(),
            source,
        },
    )
}

/// Resolve the proof artifact for the canonical path `proof_path`.
///
/// Resolution order: the binary file at `proof_path` is authoritative when it
/// exists; otherwise a `.base64` sibling is decoded; otherwise there is no
/// proof, which is not an error.
pub fn resolve_proof(proof_path: &Path, base: &Path) -> Result<Option<ProofRecord>, ProofCodecError> {
    if proof_path.exists() {
        let contents = fs::read(proof_path)?;
        return Ok(Some(ProofRecord {
            path: relative_posix_path(proof_path, base),
            decoded_path: None,
            encoding: ProofEncoding::Binary,
            size: contents.len() as u64,
            sha256: compute_sha256(&contents),
            encoded: None,
        }));
    }

    let encoded_name = match proof_path.file_name() {
        Some(name) => format!("{}.base64", name.to_string_lossy()),
        None => return Ok(None),
    };
    let encoded_path = proof_path.with_file_name(encoded_name);
    if !encoded_path.exists() {
        return Ok(None);
    }

    let Some(encoded) = file_record(&encoded_path, base)? else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&encoded_path)?;
    let raw_bytes = decode_base64_text(&contents, &encoded.path)?;

    Ok(Some(ProofRecord {
        path: encoded.path.clone(),
        decoded_path: Some(relative_posix_path(proof_path, base)),
        encoding: ProofEncoding::Base64,
        size: raw_bytes.len() as u64,
        sha256: compute_sha256(&raw_bytes),
        encoded: Some(encoded),
    }))
}
