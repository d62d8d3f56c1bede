//! Repository layout configuration (letter-release.toml)
//!
//! Describes where releases, keys, and publish assets live relative to the
//! repo root. Every field has a default matching the canonical layout, so the
//! config file is optional.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Error types for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

fn default_letter_dir() -> String {
    "letter".to_string()
}

fn default_docs_dir() -> String {
    "docs".to_string()
}

fn default_keys_dir() -> String {
    "keys".to_string()
}

fn default_document_stem() -> String {
    "letter".to_string()
}

fn default_manifest_path() -> String {
    "letter/RELEASES.json".to_string()
}

fn default_fingerprint_file() -> String {
    "keys/FINGERPRINT".to_string()
}

fn default_public_key_file() -> String {
    "keys/publickey.asc".to_string()
}

/// Repository layout from letter-release.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteLayout {
    /// Directory containing the versioned release documents
    #[serde(default = "default_letter_dir")]
    pub letter_dir: String,

    /// Publish directory for the rendered site
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,

    /// Directory containing public keys and the fingerprint file
    #[serde(default = "default_keys_dir")]
    pub keys_dir: String,

    /// Filename stem of release documents (`<stem>-vYYYY.MM.DD.md`)
    #[serde(default = "default_document_stem")]
    pub document_stem: String,

    /// Path of the generated manifest
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    /// Path of the current-signer fingerprint file
    #[serde(default = "default_fingerprint_file")]
    pub fingerprint_file: String,

    /// Path of the current public key, recorded in the manifest
    #[serde(default = "default_public_key_file")]
    pub public_key_file: String,
}

impl Default for SiteLayout {
    fn default() -> Self {
        Self {
            letter_dir: default_letter_dir(),
            docs_dir: default_docs_dir(),
            keys_dir: default_keys_dir(),
            document_stem: default_document_stem(),
            manifest_path: default_manifest_path(),
            fingerprint_file: default_fingerprint_file(),
            public_key_file: default_public_key_file(),
        }
    }
}

impl SiteLayout {
    /// Load and parse the layout from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse the layout from a TOML string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let layout: SiteLayout = toml::from_str(s)?;
        layout.validate()?;
        Ok(layout)
    }

    /// Load `letter-release.toml` from the repo root if present, else defaults
    pub fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = base.join("letter-release.toml");
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the layout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.document_stem.is_empty() {
            return Err(ConfigError::ValidationError(
                "'document_stem' must be non-empty".to_string(),
            ));
        }
        // The stem participates in filename matching; path separators would
        // silently break companion-suffix derivation.
        if self.document_stem.contains('/') || self.document_stem.contains('\\') {
            return Err(ConfigError::ValidationError(format!(
                "'document_stem' must not contain path separators (got '{}')",
                self.document_stem
            )));
        }
        Ok(())
    }

    pub fn letter_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.letter_dir)
    }

    pub fn docs_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.docs_dir)
    }

    pub fn keys_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.keys_dir)
    }

    pub fn manifest_path(&self, base: &Path) -> PathBuf {
        base.join(&self.manifest_path)
    }

    pub fn fingerprint_file(&self, base: &Path) -> PathBuf {
        base.join(&self.fingerprint_file)
    }

    pub fn public_key_file(&self, base: &Path) -> PathBuf {
        base.join(&self.public_key_file)
    }
}

/// Resolve the repository root.
///
/// Uses `git rev-parse --show-toplevel` when available so the tool works from
/// any subdirectory; falls back to the starting directory when git is missing
/// or the directory is not a work tree.
pub fn repo_root(start: &Path) -> PathBuf {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(start)
        .output();

    if let Ok(output) = output {
        if output.status.success() {
            let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !top.is_empty() {
                return PathBuf::from(top);
            }
        }
    }
    start.to_path_buf()
}
