//! Publish-directory synchronization
//!
//! Copies the newest signed release document into the publish directory so
//! the rendered site always serves the latest letter. Only releases carrying
//! a detached signature qualify.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::release::parse_version;

/// Filename of the synchronized document inside the publish directory
const PUBLISHED_DOCUMENT: &str = "letter.md";

/// Errors for publish-directory synchronization
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Release directory not found: {}", .0.display())]
    LetterDirMissing(PathBuf),

    #[error("Docs directory not found: {}", .0.display())]
    DocsDirMissing(PathBuf),

    #[error("No release documents found in {}", .0.display())]
    NoReleases(PathBuf),

    #[error("Missing signature for {document}: {} not found", .signature.display())]
    MissingSignature {
        document: String,
        signature: PathBuf,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The newest signed release document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestDocument {
    pub version: String,
    pub path: PathBuf,
}

/// Find the newest release document in `letter_dir`.
///
/// Every matching document must carry its detached signature; a signed
/// release with a missing `.asc` is a broken checkout, not something to
/// publish around.
pub fn discover_latest(letter_dir: &Path, stem: &str) -> Result<LatestDocument, SyncError> {
    if !letter_dir.is_dir() {
        return Err(SyncError::LetterDirMissing(letter_dir.to_path_buf()));
    }

    let mut latest: Option<LatestDocument> = None;
    for entry in WalkDir::new(letter_dir)
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
        let Some(version) = parse_version(&file_name, stem) else {
            continue;
        };

        let signature = entry.path().with_file_name(format!("{}.asc", file_name));
        if !signature.exists() {
            return Err(SyncError::MissingSignature {
                document: file_name,
                signature,
            });
        }

        let candidate = LatestDocument {
            version,
            path: entry.path().to_path_buf(),
        };
        let newer = match &latest {
            Some(current) => candidate.version > current.version,
            None => true,
        };
        if newer {
            latest = Some(candidate);
        }
    }

    latest.ok_or_else(|| SyncError::NoReleases(letter_dir.to_path_buf()))
}

fn needs_update(source: &Path, dest: &Path) -> Result<bool, SyncError> {
    if !dest.exists() {
        return Ok(true);
    }
    Ok(fs::read(source)? != fs::read(dest)?)
}

/// Synchronize the publish directory with the newest signed release.
///
/// Returns whether an update was (or in check mode, would be) performed.
pub fn sync_latest(
    letter_dir: &Path,
    docs_dir: &Path,
    stem: &str,
    check_only: bool,
) -> Result<bool, SyncError> {
    if !docs_dir.exists() {
        return Err(SyncError::DocsDirMissing(docs_dir.to_path_buf()));
    }

    let release = discover_latest(letter_dir, stem)?;
    let dest = docs_dir.join(PUBLISHED_DOCUMENT);

    let changed = needs_update(&release.path, &dest)?;
    if changed && !check_only {
        fs::write(&dest, fs::read(&release.path)?)?;
    }
    Ok(changed)
}
