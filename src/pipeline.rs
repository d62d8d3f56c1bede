//! Release stage orchestration
//!
//! Runs the publish stages in fixed order: sync the newest document, rebuild
//! the manifest, patch version metadata. Each stage can run standalone
//! through its CLI subcommand; the composing `release` command chains them,
//! stopping at the first failure and propagating its exit code.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{ConfigError, SiteLayout};
use crate::metadata::{patch_targets, MetadataError};
use crate::release::{build_manifest, plan_update, relative_posix_path, ManifestError};
use crate::signature::SignatureVerifier;
use crate::sync::{sync_latest, SyncError};

/// Errors from running a release stage
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

fn resolve_override(base: &Path, default: PathBuf, value: Option<&Path>) -> PathBuf {
    match value {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => base.join(path),
        None => default,
    }
}

/// Synchronize the publish directory with the newest signed release.
///
/// Returns whether an update was (or in check mode, would be) needed.
pub fn run_sync_stage(
    base: &Path,
    layout: &SiteLayout,
    check: bool,
    letter_override: Option<&Path>,
    docs_override: Option<&Path>,
) -> PipelineResult<bool> {
    let letter_dir = resolve_override(base, layout.letter_dir(base), letter_override);
    let docs_dir = resolve_override(base, layout.docs_dir(base), docs_override);
    let changed = sync_latest(&letter_dir, &docs_dir, &layout.document_stem, check)?;
    if changed {
        let display = relative_posix_path(&docs_dir, base);
        if check {
            eprintln!("{} requires syncing from the latest release.", display);
        } else {
            println!("Synchronized {}/letter.md from the latest release.", display);
        }
    }
    Ok(changed)
}

/// Rebuild the manifest, or in check mode verify the published copy.
///
/// Returns whether the published manifest was (or would need to be) updated.
pub fn run_manifest_stage(
    base: &Path,
    layout: &SiteLayout,
    verifier: &dyn SignatureVerifier,
    now: DateTime<Utc>,
    check: bool,
    output: Option<&Path>,
) -> PipelineResult<bool> {
    let manifest = build_manifest(base, layout, verifier, now)?;

    let output_path = resolve_override(base, layout.manifest_path(base), output);
    let display = relative_posix_path(&output_path, base);

    let previous = match fs::read_to_string(&output_path) {
        Ok(text) => Some(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(PipelineError::Io(err)),
    };

    if check {
        let Some(previous) = previous else {
            eprintln!("Manifest not found at {}. Run the generator to create it.", display);
            return Ok(true);
        };
        let plan = plan_update(manifest, Some(&previous))?;
        if plan.changed {
            eprintln!(
                "{} is out of date. Run 'letter-release manifest' and commit the updated file.",
                display
            );
        } else {
            println!("{} is up to date.", display);
        }
        return Ok(plan.changed);
    }

    let plan = plan_update(manifest, previous.as_deref())?;
    if plan.changed {
        fs::write(&output_path, plan.text)?;
        println!("Wrote {}", display);
    } else {
        println!("{} is up to date.", display);
    }
    Ok(plan.changed)
}

/// Patch version markers in the given targets (default: the rendered page).
///
/// Returns whether any target was (or would need to be) rewritten.
pub fn run_metadata_stage(
    base: &Path,
    layout: &SiteLayout,
    check: bool,
    manifest_override: Option<&Path>,
    targets: &[PathBuf],
) -> PipelineResult<bool> {
    let manifest_path = resolve_override(base, layout.manifest_path(base), manifest_override);

    let resolved: Vec<PathBuf> = if targets.is_empty() {
        vec![layout.docs_dir(base).join("index.html")]
    } else {
        targets
            .iter()
            .map(|t| if t.is_absolute() { t.clone() } else { base.join(t) })
            .collect()
    };

    let outcomes = patch_targets(&manifest_path, &resolved, check)?;

    let mut any_changed = false;
    for outcome in &outcomes {
        if outcome.changed {
            any_changed = true;
            let display = relative_posix_path(&outcome.path, base);
            if check {
                eprintln!("{} requires a version update.", display);
            } else {
                println!("Updated version markers in {}", display);
            }
        }
    }
    Ok(any_changed)
}

/// A release stage orchestrated by the composing command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKey {
    Sync,
    Manifest,
    Metadata,
}

impl StageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::Sync => "sync",
            StageKey::Manifest => "manifest",
            StageKey::Metadata => "metadata",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StageKey::Sync => "Synchronize the publish directory with the latest release",
            StageKey::Manifest => "Regenerate the release manifest",
            StageKey::Metadata => "Update version metadata in rendered assets",
        }
    }
}

/// The fixed stage order
pub const STAGE_ORDER: [StageKey; 3] = [StageKey::Sync, StageKey::Manifest, StageKey::Metadata];

/// Options for the composing release command
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseOptions {
    pub check: bool,
    pub skip_sync: bool,
    pub skip_manifest: bool,
    pub skip_metadata: bool,
}

impl ReleaseOptions {
    fn skipped(&self, stage: StageKey) -> bool {
        match stage {
            StageKey::Sync => self.skip_sync,
            StageKey::Manifest => self.skip_manifest,
            StageKey::Metadata => self.skip_metadata,
        }
    }
}

/// Run all stages in order, stopping at the first failure.
///
/// Returns the process exit code: 0 when every stage passed, 1 when a stage
/// failed or, in check mode, reported pending changes.
pub fn run_release(
    base: &Path,
    layout: &SiteLayout,
    verifier: &dyn SignatureVerifier,
    now: DateTime<Utc>,
    options: &ReleaseOptions,
) -> i32 {
    for stage in STAGE_ORDER {
        if options.skipped(stage) {
            eprintln!(
                "[release] Skipping {} (--skip-{}).",
                stage.description(),
                stage.as_str()
            );
            continue;
        }

        let mode_note = if options.check { " (check mode)" } else { "" };
        eprintln!("\n[release] {}{}", stage.description(), mode_note);

        let result = match stage {
            StageKey::Sync => run_sync_stage(base, layout, options.check, None, None),
            StageKey::Manifest => {
                run_manifest_stage(base, layout, verifier, now, options.check, None)
            }
            StageKey::Metadata => run_metadata_stage(base, layout, options.check, None, &[]),
        };

        match result {
            Ok(changed) => {
                if options.check && changed {
                    eprintln!("[release] Stage '{}' reports pending changes.", stage.as_str());
                    return 1;
                }
            }
            Err(err) => {
                eprintln!("[release] Stage '{}' failed: {}", stage.as_str(), err);
                return 1;
            }
        }
    }

    eprintln!("\n[release] All stages completed successfully.");
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_fixed() {
        assert_eq!(
            STAGE_ORDER.map(|s| s.as_str()),
            ["sync", "manifest", "metadata"]
        );
    }

    #[test]
    fn test_skip_flags_map_to_stages() {
        let options = ReleaseOptions {
            skip_manifest: true,
            ..Default::default()
        };
        assert!(!options.skipped(StageKey::Sync));
        assert!(options.skipped(StageKey::Manifest));
        assert!(!options.skipped(StageKey::Metadata));
    }
}
