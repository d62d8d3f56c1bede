//! Timestamp-proof handling
//!
//! Normalizes proof artifacts from disk (binary or base64 text) and parses
//! the binary proof format to recover block-height attestations.

mod codec;
mod ots;

pub use codec::{decode_base64_text, resolve_proof, ProofCodecError};
pub use ots::{parse_detached_proof, Attestation, ProofParseError, TimestampProof};
