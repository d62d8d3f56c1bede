//! Release discovery and manifest generation
//!
//! Everything between the release directory on disk and the published
//! RELEASES.json: fingerprint validation, scanning, manifest assembly, and
//! reconciliation with the previously published copy.

mod differ;
mod fingerprint;
pub(crate) mod manifest;
mod scanner;

pub use differ::{plan_update, UpdatePlan};
pub use fingerprint::{validate_fingerprint, FingerprintError};
pub use manifest::{
    build_manifest, compute_sha256, file_record, format_utc_seconds, relative_posix_path,
    FileRecord, KeyBlock, ManifestError, ProofEncoding, ProofRecord, Release, ReleaseFiles,
    ReleaseManifest, Signer, SCHEMA_TAG,
};
pub use scanner::{parse_version, scan_releases, ScanOutcome};
