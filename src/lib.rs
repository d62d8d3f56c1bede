//! letter-release - provenance tooling for the signed letter
//!
//! This crate maintains the release manifest of a GPG-signed, versioned
//! document: it discovers releases and their signature/timestamp-proof
//! artifacts, emits a deterministic RELEASES.json, keeps the rendered site's
//! version metadata current, and gates recurring CI verification on the
//! proof's blockchain finality.

pub mod config;
pub mod finalize;
pub mod metadata;
pub mod pipeline;
pub mod proof;
pub mod release;
pub mod signature;
pub mod sync;

pub use config::{repo_root, SiteLayout};
pub use finalize::{
    determine_branch, evaluate, CronSignal, GateDecision, HttpFetcher, RemoteResourceFetcher,
    RemoteSite, TriggerEvent,
};
pub use proof::{parse_detached_proof, Attestation, TimestampProof};
pub use release::{build_manifest, plan_update, ManifestError, Release, ReleaseManifest};
pub use signature::{GpgVerifier, SignatureMetadata, SignatureVerifier};
