//! Release manifest (RELEASES.json)
//!
//! The manifest is the sole persisted artifact: a schema-tagged JSON document
//! listing every discovered release with its signer and provenance file
//! records, newest first. Serialization is canonical (struct field order,
//! 2-space indent, trailing newline) so byte comparison is meaningful.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::config::SiteLayout;
use crate::proof::ProofCodecError;
use crate::release::fingerprint::{validate_fingerprint, FingerprintError};
use crate::release::scanner::scan_releases;
use crate::signature::{SignatureError, SignatureVerifier};

/// Schema identifier for RELEASES.json
pub const SCHEMA_TAG: &str = "letter/releases#2";

/// Errors for manifest generation and reconciliation
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing fingerprint file: {}", .0.display())]
    MissingFingerprint(PathBuf),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    ProofCodec(#[from] ProofCodecError),

    #[error("existing manifest is not a valid release manifest: {source}")]
    PreviousManifest { source: serde_json::Error },
}

/// A file participating in a release: relative path, byte size, content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// How the timestamp proof is stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofEncoding {
    Binary,
    Base64,
}

/// Record for a timestamp proof artifact.
///
/// For binary proofs `path` is the proof file itself. For text-encoded
/// proofs `path` is the encoded artifact, `decoded_path` the logical proof
/// path, `size`/`sha256` describe the decoded bytes, and `encoded` records
/// the on-disk text file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub decoded_path: Option<String>,

    pub encoding: ProofEncoding,

    pub size: u64,

    pub sha256: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded: Option<FileRecord>,
}

/// Signer identity attached to a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    /// Verified signer fingerprint, or the current fingerprint as fallback
    pub fingerprint: String,

    /// Free-text identity; null when the signature was not verified
    pub uid: Option<String>,
}

/// Named file slots of a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFiles {
    /// Primary document; always present (it is what triggered the match)
    pub md: FileRecord,

    /// Detached signature, when present
    pub asc: Option<FileRecord>,

    /// Timestamp proof, when present
    pub ots: Option<ProofRecord>,
}

/// One versioned release of the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Date-coded version, strictly `YYYY.MM.DD`
    pub version: String,

    pub signer: Signer,

    pub files: ReleaseFiles,
}

/// Current-signer block of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBlock {
    pub fingerprint_current: String,

    /// Relative path of the current public key
    pub path: String,
}

/// The release manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub schema: String,

    /// ISO-8601 UTC, second precision
    pub updated: String,

    pub key: KeyBlock,

    /// Sorted descending by version
    pub releases: Vec<Release>,
}

impl ReleaseManifest {
    /// Canonical manifest text: pretty JSON plus a trailing newline
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    /// Parse manifest text
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Load from file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path)?;
        Self::from_text(&text).map_err(ManifestError::Json)
    }

    /// Write canonical text to file
    pub fn write_to_file(&self, path: &Path) -> Result<(), ManifestError> {
        let text = self.to_text()?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Compare everything except the `updated` field
    pub fn content_matches(&self, other: &Self) -> bool {
        self.schema == other.schema && self.key == other.key && self.releases == other.releases
    }

    /// Newest release version, when any release exists.
    ///
    /// Lexical maximum; the zero-padded date components make this equal to
    /// the chronological maximum.
    pub fn latest_version(&self) -> Option<&str> {
        self.releases.iter().map(|r| r.version.as_str()).max()
    }
}

/// Compute SHA-256 of bytes and return hex string
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Render `path` relative to `base` with forward slashes.
///
/// Paths outside `base` keep their own components (minus any root), which
/// only happens for explicitly overridden output locations.
pub fn relative_posix_path(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Build a [`FileRecord`] for `path`, or `None` when the file is absent
pub fn file_record(path: &Path, base: &Path) -> io::Result<Option<FileRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read(path)?;
    Ok(Some(FileRecord {
        path: relative_posix_path(path, base),
        size: contents.len() as u64,
        sha256: compute_sha256(&contents),
    }))
}

/// Format a UTC instant as ISO-8601 with second precision and `Z` suffix
pub fn format_utc_seconds(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Build the manifest from the repository state.
///
/// `now` is the injected wall clock, used only when no release carries a
/// verified signing epoch; builds are otherwise fully deterministic over the
/// repository contents.
pub fn build_manifest(
    base: &Path,
    layout: &SiteLayout,
    verifier: &dyn SignatureVerifier,
    now: DateTime<Utc>,
) -> Result<ReleaseManifest, ManifestError> {
    let fingerprint_path = layout.fingerprint_file(base);
    let raw = fs::read_to_string(&fingerprint_path)
        .map_err(|_| ManifestError::MissingFingerprint(fingerprint_path.clone()))?;
    let current_fingerprint = validate_fingerprint(&raw)?;

    verifier.import_keys(&layout.keys_dir(base))?;

    let scan = scan_releases(base, layout, verifier, &current_fingerprint)?;

    let latest_signing = scan
        .signature_epochs
        .iter()
        .copied()
        .filter_map(|epoch| Utc.timestamp_opt(epoch, 0).single())
        .max();
    let updated = format_utc_seconds(latest_signing.unwrap_or(now));

    Ok(ReleaseManifest {
        schema: SCHEMA_TAG.to_string(),
        updated,
        key: KeyBlock {
            fingerprint_current: current_fingerprint,
            path: relative_posix_path(&layout.public_key_file(base), base),
        },
        releases: scan.releases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> ReleaseManifest {
        ReleaseManifest {
            schema: SCHEMA_TAG.to_string(),
            updated: "2024-06-15T12:00:00Z".to_string(),
            key: KeyBlock {
                fingerprint_current: "0123456789ABCDEF0123456789ABCDEF01234567".to_string(),
                path: "keys/publickey.asc".to_string(),
            },
            releases: vec![Release {
                version: "2024.06.15".to_string(),
                signer: Signer {
                    fingerprint: "0123456789ABCDEF0123456789ABCDEF01234567".to_string(),
                    uid: None,
                },
                files: ReleaseFiles {
                    md: FileRecord {
                        path: "letter/letter-v2024.06.15.md".to_string(),
                        size: 5,
                        sha256: compute_sha256(b"hello"),
                    },
                    asc: None,
                    ots: None,
                },
            }],
        }
    }

    #[test]
    fn test_compute_sha256_known_vector() {
        assert_eq!(
            compute_sha256(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_canonical_text_round_trip() {
        let manifest = sample_manifest();
        let text = manifest.to_text().unwrap();
        assert!(text.ends_with('\n'));
        let parsed = ReleaseManifest::from_text(&text).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_canonical_text_is_stable() {
        let manifest = sample_manifest();
        assert_eq!(manifest.to_text().unwrap(), manifest.to_text().unwrap());
    }

    #[test]
    fn test_null_slots_serialize_as_null() {
        let manifest = sample_manifest();
        let text = manifest.to_text().unwrap();
        assert!(text.contains("\"asc\": null"));
        assert!(text.contains("\"ots\": null"));
        assert!(text.contains("\"uid\": null"));
    }

    #[test]
    fn test_proof_record_omits_absent_fields() {
        let record = ProofRecord {
            path: "letter/x.md.asc.ots".to_string(),
            decoded_path: None,
            encoding: ProofEncoding::Binary,
            size: 3,
            sha256: compute_sha256(b"abc"),
            encoded: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("decoded_path"));
        assert!(!json.contains("encoded"));
        assert!(json.contains("\"encoding\":\"binary\""));
    }

    #[test]
    fn test_content_matches_ignores_updated() {
        let a = sample_manifest();
        let mut b = a.clone();
        b.updated = "2030-01-01T00:00:00Z".to_string();
        assert!(a.content_matches(&b));

        b.releases.clear();
        assert!(!a.content_matches(&b));
    }

    #[test]
    fn test_latest_version_is_lexical_maximum() {
        let mut manifest = sample_manifest();
        let mut older = manifest.releases[0].clone();
        older.version = "2023.12.31".to_string();
        manifest.releases.push(older);
        assert_eq!(manifest.latest_version(), Some("2024.06.15"));
    }

    #[test]
    fn test_relative_posix_path() {
        let base = Path::new("/repo");
        assert_eq!(
            relative_posix_path(Path::new("/repo/letter/doc.md"), base),
            "letter/doc.md"
        );
        assert_eq!(relative_posix_path(Path::new("/elsewhere/doc.md"), base), "elsewhere/doc.md");
    }

    #[test]
    fn test_format_utc_seconds() {
        let instant = Utc.timestamp_opt(1_718_451_045, 0).single().unwrap();
        assert_eq!(format_utc_seconds(instant), "2024-06-15T11:30:45Z");
    }
}
