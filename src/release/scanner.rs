//! Release discovery
//!
//! Walks the release directory for version-coded primary documents and binds
//! each to its companion signature and proof artifacts by suffix convention:
//! `<stem>-v<YYYY.MM.DD>.md`, `<md>.asc`, `<md>.asc.ots` (with a `.base64`
//! text fallback handled by the proof codec). Files that do not match the
//! pattern are ignored, not errors.

use regex_lite::Regex;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::SiteLayout;
use crate::proof::resolve_proof;
use crate::release::manifest::{file_record, ManifestError, Release, ReleaseFiles, Signer};
use crate::signature::{signature_metadata, SignatureVerifier};

/// Result of scanning the release directory
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Releases sorted descending by version
    pub releases: Vec<Release>,

    /// Signing epochs of every verified signature, for the `updated` field
    pub signature_epochs: Vec<i64>,
}

/// Extract the `YYYY.MM.DD` version from a release document filename.
///
/// Returns `None` for any name not matching `<stem>-v<version>.md` exactly.
pub fn parse_version(file_name: &str, stem: &str) -> Option<String> {
    let rest = file_name.strip_prefix(stem)?.strip_prefix("-v")?;
    let version = rest.strip_suffix(".md")?;
    let pattern = Regex::new(r"^\d{4}\.\d{2}\.\d{2}$").unwrap();
    if pattern.is_match(version) {
        Some(version.to_string())
    } else {
        None
    }
}

/// Scan the release directory into manifest entries.
///
/// Every matching document yields a release even when companions are absent;
/// a release whose signature cannot be verified falls back to
/// `current_fingerprint` with no identity string.
pub fn scan_releases(
    base: &Path,
    layout: &SiteLayout,
    verifier: &dyn SignatureVerifier,
    current_fingerprint: &str,
) -> Result<ScanOutcome, ManifestError> {
    let letter_dir = layout.letter_dir(base);

    let mut releases = Vec::new();
    let mut signature_epochs = Vec::new();

    for entry in WalkDir::new(&letter_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some(version) = parse_version(&file_name, &layout.document_stem) else {
            continue;
        };

        let md_path = entry.path().to_path_buf();
        let asc_path = md_path.with_file_name(format!("{}.asc", file_name));
        let ots_path = md_path.with_file_name(format!("{}.asc.ots", file_name));

        let sig_meta = signature_metadata(verifier, &asc_path)?;
        let signer = match &sig_meta {
            Some(meta) => Signer {
                fingerprint: meta.fingerprint.clone(),
                uid: meta.uid.clone(),
            },
            None => Signer {
                fingerprint: current_fingerprint.to_string(),
                uid: None,
            },
        };
        if let Some(epoch) = sig_meta.as_ref().and_then(|m| m.timestamp) {
            signature_epochs.push(epoch);
        }

        // The document triggered the match, so its record always exists.
        let md = file_record(&md_path, base)?.ok_or_else(|| {
            ManifestError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("release document vanished: {}", md_path.display()),
            ))
        })?;
        let asc = file_record(&asc_path, base)?;
        let ots = resolve_proof(&ots_path, base)?;

        releases.push(Release {
            version,
            signer,
            files: ReleaseFiles { md, asc, ots },
        });
    }

    releases.sort_by(|a, b| b.version.cmp(&a.version));

    Ok(ScanOutcome {
        releases,
        signature_epochs,
    })
}
