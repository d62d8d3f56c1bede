//! Finalization gate tests
//!
//! Drive the gate against a canned remote site: rendered page, published
//! manifest, and proof bytes are all injected, including failure modes, so
//! every decision rule is exercised without network access.

use std::cell::Cell;
use std::collections::HashMap;

use base64::Engine as _;
use letter_release::finalize::{
    evaluate, CronSignal, FetchError, RemoteResourceFetcher, RemoteSite, TriggerEvent,
};
use letter_release::release::{
    compute_sha256, FileRecord, KeyBlock, ProofEncoding, ProofRecord, Release, ReleaseFiles,
    ReleaseManifest, Signer, SCHEMA_TAG,
};

const FPR: &str = "0123456789ABCDEF0123456789ABCDEF01234567";

// ============================================================================
// Proof serialization helpers (wire format, test-side only)
// ============================================================================

const HEADER_MAGIC: &[u8] = b"\x00OpenTimestamps\x00\x00Proof\x00\xbf\x89\xe2\xe8\x84\xe8\x92\x94";
const OP_SHA256: u8 = 0x08;
const TAG_ATTESTATION: u8 = 0x00;
const TAG_FORK: u8 = 0xff;
const TAG_BITCOIN_BLOCK: [u8; 8] = [0x05, 0x88, 0x96, 0x0d, 0x73, 0xd7, 0x19, 0x01];

fn write_varuint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn bitcoin_attestation(height: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    write_varuint(&mut payload, height);
    let mut out = vec![TAG_ATTESTATION];
    out.extend_from_slice(&TAG_BITCOIN_BLOCK);
    write_varuint(&mut out, payload.len() as u64);
    out.extend_from_slice(&payload);
    out
}

/// A minimal proof anchoring at the given Bitcoin heights
fn proof_bytes(heights: &[u64]) -> Vec<u8> {
    assert!(!heights.is_empty());
    let mut out = Vec::new();
    out.extend_from_slice(HEADER_MAGIC);
    write_varuint(&mut out, 1);
    out.push(OP_SHA256);
    out.extend_from_slice(&[0u8; 32]);
    for height in &heights[..heights.len() - 1] {
        out.push(TAG_FORK);
        out.extend_from_slice(&bitcoin_attestation(*height));
    }
    out.extend_from_slice(&bitcoin_attestation(heights[heights.len() - 1]));
    out
}

// ============================================================================
// Canned remote site
// ============================================================================

enum Canned {
    Body(Vec<u8>),
    Unreachable,
}

#[derive(Default)]
struct CannedFetcher {
    responses: HashMap<String, Canned>,
    requests: Cell<usize>,
}

impl CannedFetcher {
    fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.to_string(), Canned::Body(body.into()));
        self
    }

    fn with_failure(mut self, url: &str) -> Self {
        self.responses.insert(url.to_string(), Canned::Unreachable);
        self
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requests.set(self.requests.get() + 1);
        match self.responses.get(url) {
            Some(Canned::Body(body)) => Ok(body.clone()),
            Some(Canned::Unreachable) => {
                Err(FetchError::Transport("connection refused".to_string()))
            }
            None => Err(FetchError::Status(404)),
        }
    }
}

impl RemoteResourceFetcher for CannedFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.fetch(url)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch(url)
    }
}

fn site() -> RemoteSite {
    RemoteSite::for_repository("alice/letter", "main")
}

fn page_html(version: &str, height: u64) -> String {
    format!(
        "<html><head><title>The Letter v{version}</title></head>\n\
         <!-- release-version: v{version} -->\n\
         <body>Anchored at Bitcoin block <strong>{height}</strong>.</body></html>"
    )
}

fn release(version: &str, ots: Option<ProofRecord>) -> Release {
    Release {
        version: version.to_string(),
        signer: Signer {
            fingerprint: FPR.to_string(),
            uid: Some("Alice Example <alice@example.org>".to_string()),
        },
        files: ReleaseFiles {
            md: FileRecord {
                path: format!("letter/letter-v{}.md", version),
                size: 4,
                sha256: compute_sha256(b"body"),
            },
            asc: Some(FileRecord {
                path: format!("letter/letter-v{}.md.asc", version),
                size: 8,
                sha256: compute_sha256(b"sig body"),
            }),
            ots,
        },
    }
}

fn binary_proof_record(version: &str, bytes: &[u8]) -> ProofRecord {
    ProofRecord {
        path: format!("letter/letter-v{}.md.asc.ots", version),
        decoded_path: None,
        encoding: ProofEncoding::Binary,
        size: bytes.len() as u64,
        sha256: compute_sha256(bytes),
        encoded: None,
    }
}

fn manifest_text(releases: Vec<Release>) -> String {
    ReleaseManifest {
        schema: SCHEMA_TAG.to_string(),
        updated: "2024-06-15T11:30:45Z".to_string(),
        key: KeyBlock {
            fingerprint_current: FPR.to_string(),
            path: "keys/publickey.asc".to_string(),
        },
        releases,
    }
    .to_text()
    .unwrap()
}

/// Standard single-release remote: page renders `version` at `page_height`,
/// the proof anchors at `proof_heights`.
fn remote(version: &str, page_height: u64, proof_heights: &[u64]) -> CannedFetcher {
    let bytes = proof_bytes(proof_heights);
    let record = binary_proof_record(version, &bytes);
    let proof_url = site().artifact_url(&record.path);
    CannedFetcher::default()
        .with(&site().page_url(), page_html(version, page_height))
        .with(&site().manifest_url(), manifest_text(vec![release(version, Some(record))]))
        .with(&proof_url, bytes)
}

// ============================================================================
// Decision rules
// ============================================================================

#[test]
fn test_force_proceeds_without_fetching_or_touching_schedule() {
    let fetcher = CannedFetcher::default();
    let decision = evaluate(TriggerEvent::Schedule, &site(), &fetcher, true);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::None);
    assert_eq!(decision.index_height, None);
    assert_eq!(decision.proof_height, None);
    assert_eq!(fetcher.requests.get(), 0);
}

#[test]
fn test_schedule_with_equal_heights_stops_and_disables() {
    let fetcher = remote("2024.06.15", 800_000, &[800_000]);
    let decision = evaluate(TriggerEvent::Schedule, &site(), &fetcher, false);

    assert!(!decision.should_run);
    assert_eq!(decision.index_height, Some(800_000));
    assert_eq!(decision.proof_height, Some(800_000));
    assert_eq!(decision.cron, CronSignal::Disable);
}

#[test]
fn test_push_with_equal_heights_stops_without_schedule_signal() {
    let fetcher = remote("2024.06.15", 800_000, &[800_000]);
    let decision = evaluate(TriggerEvent::Push, &site(), &fetcher, false);

    assert!(!decision.should_run);
    assert_eq!(decision.cron, CronSignal::None);
}

#[test]
fn test_push_with_differing_heights_proceeds_and_enables() {
    let fetcher = remote("2024.06.15", 800_000, &[799_990]);
    let decision = evaluate(TriggerEvent::Push, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.index_height, Some(800_000));
    assert_eq!(decision.proof_height, Some(799_990));
    assert_eq!(decision.cron, CronSignal::Enable);
}

#[test]
fn test_upstream_run_with_differing_heights_enables() {
    let fetcher = remote("2024.06.15", 800_000, &[799_990]);
    let decision = evaluate(TriggerEvent::UpstreamRun, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::Enable);
}

#[test]
fn test_schedule_with_differing_heights_proceeds_without_enable() {
    let fetcher = remote("2024.06.15", 800_000, &[799_990]);
    let decision = evaluate(TriggerEvent::Schedule, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::None);
}

#[test]
fn test_manual_dispatch_with_differing_heights_proceeds_without_enable() {
    let fetcher = remote("2024.06.15", 800_000, &[799_990]);
    let decision = evaluate(TriggerEvent::ManualDispatch, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::None);
}

#[test]
fn test_proof_maximum_height_is_compared() {
    // Two commitments; only the maximum counts.
    let fetcher = remote("2024.06.15", 800_000, &[799_000, 800_000]);
    let decision = evaluate(TriggerEvent::Schedule, &site(), &fetcher, false);

    assert!(!decision.should_run);
    assert_eq!(decision.proof_height, Some(800_000));
}

// ============================================================================
// Fail-open paths
// ============================================================================

#[test]
fn test_unreachable_page_proceeds_fail_open() {
    let fetcher = CannedFetcher::default().with_failure(&site().page_url());
    let decision = evaluate(TriggerEvent::Push, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::None);
    assert_eq!(decision.index_height, None);
}

#[test]
fn test_unreachable_manifest_proceeds_fail_open() {
    let fetcher = CannedFetcher::default()
        .with(&site().page_url(), page_html("2024.06.15", 800_000))
        .with_failure(&site().manifest_url());
    let decision = evaluate(TriggerEvent::Push, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::None);
    assert_eq!(decision.index_height, Some(800_000));
    assert_eq!(decision.proof_height, None);
}

#[test]
fn test_unparseable_manifest_proceeds_fail_open() {
    let fetcher = CannedFetcher::default()
        .with(&site().page_url(), page_html("2024.06.15", 800_000))
        .with(&site().manifest_url(), "{ not json");
    let decision = evaluate(TriggerEvent::Push, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::None);
}

#[test]
fn test_unreachable_proof_proceeds_without_schedule_signal() {
    let bytes = proof_bytes(&[800_000]);
    let record = binary_proof_record("2024.06.15", &bytes);
    let proof_url = site().artifact_url(&record.path);
    let fetcher = CannedFetcher::default()
        .with(&site().page_url(), page_html("2024.06.15", 800_000))
        .with(
            &site().manifest_url(),
            manifest_text(vec![release("2024.06.15", Some(record))]),
        )
        .with_failure(&proof_url);

    let decision = evaluate(TriggerEvent::Push, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::None);
    assert_eq!(decision.index_height, Some(800_000));
    assert_eq!(decision.proof_height, None);
}

// ============================================================================
// Release-state paths (not yet final)
// ============================================================================

#[test]
fn test_empty_release_list_proceeds_and_enables_on_push() {
    let fetcher = CannedFetcher::default()
        .with(&site().page_url(), page_html("2024.06.15", 800_000))
        .with(&site().manifest_url(), manifest_text(Vec::new()));
    let decision = evaluate(TriggerEvent::Push, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::Enable);
}

#[test]
fn test_release_without_proof_proceeds_and_enables_on_push() {
    let fetcher = CannedFetcher::default()
        .with(&site().page_url(), page_html("2024.06.15", 800_000))
        .with(
            &site().manifest_url(),
            manifest_text(vec![release("2024.06.15", None)]),
        );
    let decision = evaluate(TriggerEvent::Push, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.cron, CronSignal::Enable);
    assert_eq!(decision.proof_height, None);
}

#[test]
fn test_unparseable_proof_means_height_unknown() {
    let garbage = b"definitely not a proof".to_vec();
    let record = binary_proof_record("2024.06.15", &garbage);
    let proof_url = site().artifact_url(&record.path);
    let fetcher = CannedFetcher::default()
        .with(&site().page_url(), page_html("2024.06.15", 800_000))
        .with(
            &site().manifest_url(),
            manifest_text(vec![release("2024.06.15", Some(record))]),
        )
        .with(&proof_url, garbage);

    let decision = evaluate(TriggerEvent::Push, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.proof_height, None);
    assert_eq!(decision.cron, CronSignal::Enable);
}

#[test]
fn test_page_version_selects_matching_release() {
    // The page still renders the older release; the newest release has no
    // proof at all, so matching by version is what lets the gate stop.
    let bytes = proof_bytes(&[790_000]);
    let record = binary_proof_record("2023.12.31", &bytes);
    let proof_url = site().artifact_url(&record.path);
    let fetcher = CannedFetcher::default()
        .with(&site().page_url(), page_html("2023.12.31", 790_000))
        .with(
            &site().manifest_url(),
            manifest_text(vec![
                release("2024.06.15", None),
                release("2023.12.31", Some(record)),
            ]),
        )
        .with(&proof_url, bytes);

    let decision = evaluate(TriggerEvent::Schedule, &site(), &fetcher, false);

    assert!(!decision.should_run);
    assert_eq!(decision.index_height, Some(790_000));
    assert_eq!(decision.proof_height, Some(790_000));
    assert_eq!(decision.cron, CronSignal::Disable);
}

#[test]
fn test_base64_encoded_remote_proof_is_decoded() {
    let bytes = proof_bytes(&[800_000]);
    let encoded_text = base64::engine::general_purpose::STANDARD.encode(&bytes);
    let record = ProofRecord {
        path: "letter/letter-v2024.06.15.md.asc.ots.base64".to_string(),
        decoded_path: Some("letter/letter-v2024.06.15.md.asc.ots".to_string()),
        encoding: ProofEncoding::Base64,
        size: bytes.len() as u64,
        sha256: compute_sha256(&bytes),
        encoded: Some(FileRecord {
            path: "letter/letter-v2024.06.15.md.asc.ots.base64".to_string(),
            size: encoded_text.len() as u64,
            sha256: compute_sha256(encoded_text.as_bytes()),
        }),
    };
    let proof_url = site().artifact_url(&record.path);
    let fetcher = CannedFetcher::default()
        .with(&site().page_url(), page_html("2024.06.15", 800_000))
        .with(
            &site().manifest_url(),
            manifest_text(vec![release("2024.06.15", Some(record))]),
        )
        .with(&proof_url, encoded_text);

    let decision = evaluate(TriggerEvent::Schedule, &site(), &fetcher, false);

    assert!(!decision.should_run);
    assert_eq!(decision.proof_height, Some(800_000));
    assert_eq!(decision.cron, CronSignal::Disable);
}

#[test]
fn test_page_without_height_marker_proceeds() {
    let bytes = proof_bytes(&[800_000]);
    let record = binary_proof_record("2024.06.15", &bytes);
    let proof_url = site().artifact_url(&record.path);
    let fetcher = CannedFetcher::default()
        .with(
            &site().page_url(),
            "<html><!-- release-version: v2024.06.15 --></html>",
        )
        .with(
            &site().manifest_url(),
            manifest_text(vec![release("2024.06.15", Some(record))]),
        )
        .with(&proof_url, bytes);

    let decision = evaluate(TriggerEvent::Schedule, &site(), &fetcher, false);

    assert!(decision.should_run);
    assert_eq!(decision.index_height, None);
    assert_eq!(decision.proof_height, Some(800_000));
    assert_eq!(decision.cron, CronSignal::None);
}

#[test]
fn test_repeated_evaluation_is_idempotent() {
    let fetcher = remote("2024.06.15", 800_000, &[799_990]);
    let first = evaluate(TriggerEvent::Push, &site(), &fetcher, false);
    let second = evaluate(TriggerEvent::Push, &site(), &fetcher, false);
    assert_eq!(first, second);
}
