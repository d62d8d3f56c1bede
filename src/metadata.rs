//! Version-marker patching in rendered assets
//!
//! Rewrites known placeholders (title, data attributes, comment markers) in
//! already-rendered files so they always name the newest release from the
//! published manifest. A target without markers is simply left alone; a run
//! where no target had any marker is a misconfiguration and fails.

use regex_lite::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::release::ReleaseManifest;

/// Errors for version-metadata patching
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Manifest not found: {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("Manifest is not valid JSON: {}: {source}", .path.display())]
    ManifestInvalid {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("No releases listed in manifest")]
    NoReleases,

    #[error("Target not found: {}", .0.display())]
    TargetMissing(PathBuf),

    #[error("No version markers found in any target")]
    NoMarkers,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The latest release version in display form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub raw: String,
}

impl VersionInfo {
    /// Display form, prefixed with `v`
    pub fn tagged(&self) -> String {
        if self.raw.starts_with('v') {
            self.raw.clone()
        } else {
            format!("v{}", self.raw)
        }
    }
}

/// Read the manifest and pick its newest release version
pub fn latest_version(manifest_path: &Path) -> Result<VersionInfo, MetadataError> {
    let text = fs::read_to_string(manifest_path)
        .map_err(|_| MetadataError::ManifestMissing(manifest_path.to_path_buf()))?;
    let manifest = ReleaseManifest::from_text(&text).map_err(|source| {
        MetadataError::ManifestInvalid {
            path: manifest_path.to_path_buf(),
            source,
        }
    })?;
    let version = manifest.latest_version().ok_or(MetadataError::NoReleases)?;
    Ok(VersionInfo {
        raw: version.to_string(),
    })
}

const VERSION_PATTERN: &str = r"\d{4}\.\d{2}\.\d{2}";

/// Replace known version placeholders with the latest version.
///
/// Returns the updated text and the number of markers matched.
pub fn substitute_version_markers(text: &str, version: &VersionInfo) -> (String, usize) {
    let tagged = version.tagged();
    let replacements: Vec<(Regex, String)> = vec![
        // Attributes whose value is the tagged version (double quotes).
        (
            Regex::new(&format!(
                r#"(data-release-version\s*=\s*")v?{}(")"#,
                VERSION_PATTERN
            ))
            .unwrap(),
            format!("${{1}}{}${{2}}", tagged),
        ),
        // Attributes whose value is the tagged version (single quotes).
        (
            Regex::new(&format!(
                r"(data-release-version\s*=\s*')v?{}(')",
                VERSION_PATTERN
            ))
            .unwrap(),
            format!("${{1}}{}${{2}}", tagged),
        ),
        // Elements whose text node stores the version.
        (
            Regex::new(&format!(r"(data-release-version[^>]*>)v?{}", VERSION_PATTERN)).unwrap(),
            format!("${{1}}{}", tagged),
        ),
        // Comment marker for downstream tooling.
        (
            Regex::new(&format!(
                r"(?i)(<!--\s*release-version\s*:\s*)v?{}(\s*-->)",
                VERSION_PATTERN
            ))
            .unwrap(),
            format!("${{1}}{}${{2}}", tagged),
        ),
        // Page title ending in the tagged version.
        (
            Regex::new(&format!(r"(<title>[^<]*?)v?{}(\s*</title>)", VERSION_PATTERN)).unwrap(),
            format!("${{1}}{}${{2}}", tagged),
        ),
    ];

    let mut updated = text.to_string();
    let mut total = 0;
    for (pattern, replacement) in &replacements {
        let count = pattern.captures_iter(&updated).count();
        if count > 0 {
            updated = pattern.replace_all(&updated, replacement.as_str()).into_owned();
            total += count;
        }
    }
    (updated, total)
}

/// Per-target patch outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub path: PathBuf,

    /// Markers found in the target
    pub markers: usize,

    /// Whether the target was (or in check mode, would be) rewritten
    pub changed: bool,
}

/// Patch every target with the manifest's newest version.
///
/// Targets must exist. A marker-free target is "nothing to update"; zero
/// markers across every target fails the run.
pub fn patch_targets(
    manifest_path: &Path,
    targets: &[PathBuf],
    check_only: bool,
) -> Result<Vec<TargetOutcome>, MetadataError> {
    let version = latest_version(manifest_path)?;

    let mut outcomes = Vec::with_capacity(targets.len());
    let mut total_markers = 0;

    for target in targets {
        if !target.exists() {
            return Err(MetadataError::TargetMissing(target.clone()));
        }
        let text = fs::read_to_string(target)?;
        let (updated, markers) = substitute_version_markers(&text, &version);
        total_markers += markers;

        let changed = markers > 0 && updated != text;
        if changed && !check_only {
            fs::write(target, updated)?;
        }
        outcomes.push(TargetOutcome {
            path: target.clone(),
            markers,
            changed,
        });
    }

    if total_markers == 0 {
        return Err(MetadataError::NoMarkers);
    }
    Ok(outcomes)
}
