//! Finalization gate for recurring proof verification
//!
//! Decides whether the verification workflow should run again by comparing
//! the block height published in the rendered site against the height inside
//! the current release's timestamp proof. Remote state is reached through a
//! [`RemoteResourceFetcher`] capability so tests can inject canned responses;
//! every infrastructure failure is fail-open: the gate never blocks the
//! pipeline on ambiguity, and it always exits zero.

use regex_lite::Regex;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::proof::{decode_base64_text, parse_detached_proof};
use crate::release::{ProofEncoding, ReleaseManifest};

/// Relative location of the rendered page on the published site
const PAGE_PATH: &str = "docs/index.html";

/// Relative location of the published manifest
const MANIFEST_PATH: &str = "letter/RELEASES.json";

/// What triggered the verification workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    /// A push to the repository
    Push,

    /// Completion of the upstream build workflow
    UpstreamRun,

    /// The recurring schedule
    Schedule,

    /// Manual dispatch
    ManualDispatch,

    /// Anything else
    Other,
}

impl TriggerEvent {
    /// Map a CI event name onto a trigger kind
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "push" => TriggerEvent::Push,
            "workflow_run" => TriggerEvent::UpstreamRun,
            "schedule" => TriggerEvent::Schedule,
            "workflow_dispatch" => TriggerEvent::ManualDispatch,
            _ => TriggerEvent::Other,
        }
    }
}

/// Requested change to the recurring schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronSignal {
    Enable,
    Disable,
    None,
}

impl CronSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            CronSignal::Enable => "enable",
            CronSignal::Disable => "disable",
            CronSignal::None => "none",
        }
    }
}

/// The gate's decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// Whether the verification workflow should run
    pub should_run: bool,

    /// Height published in the rendered page, when recovered
    pub index_height: Option<u64>,

    /// Height recovered from the current release's proof, when recovered
    pub proof_height: Option<u64>,

    /// Requested recurring-schedule change
    pub cron: CronSignal,
}

/// Error from a remote fetch
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("fetch failed: {0}")]
    Transport(String),
}

/// Capability interface over remote site access
pub trait RemoteResourceFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, FetchError>;

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Production fetcher over HTTP with bounded timeouts.
///
/// A timeout surfaces as a transport error, which the gate treats like any
/// other fetch failure.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .redirects(5)
            .build();
        Self { agent }
    }

    fn get(&self, url: &str) -> Result<ureq::Response, FetchError> {
        match self.agent.get(url).call() {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(code, _)) => Err(FetchError::Status(code)),
            Err(err) => Err(FetchError::Transport(err.to_string())),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteResourceFetcher for HttpFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.get(url)?
            .into_string()
            .map_err(|err| FetchError::Transport(err.to_string()))
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get(url)?;
        let mut buf = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut buf)
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(buf)
    }
}

/// The published site a gate run inspects
#[derive(Debug, Clone)]
pub struct RemoteSite {
    base_url: String,
}

impl RemoteSite {
    /// Raw-content view of `owner/repo` at `branch`
    pub fn for_repository(repository: &str, branch: &str) -> Self {
        Self {
            base_url: format!("https://raw.githubusercontent.com/{}/{}", repository, branch),
        }
    }

    /// Site rooted at an arbitrary base URL
    pub fn from_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn page_url(&self) -> String {
        format!("{}/{}", self.base_url, PAGE_PATH)
    }

    pub fn manifest_url(&self) -> String {
        format!("{}/{}", self.base_url, MANIFEST_PATH)
    }

    pub fn artifact_url(&self, relative_path: &str) -> String {
        format!("{}/{}", self.base_url, relative_path)
    }
}

/// Resolve the branch to inspect from CI ref inputs
pub fn determine_branch(ref_name: &str, full_ref: &str, default_branch: &str) -> String {
    let mut branch = ref_name.trim().to_string();
    if branch.is_empty() {
        if let Some(stripped) = full_ref.trim().strip_prefix("refs/heads/") {
            branch = stripped.to_string();
        }
    }
    if branch.is_empty() {
        branch = default_branch.trim().to_string();
    }
    if branch.is_empty() {
        branch = "main".to_string();
    }
    branch
}

/// Version and height markers recovered from the rendered page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPage {
    pub version: Option<String>,
    pub height: Option<u64>,
}

/// Extract the release-version comment and the anchored block height
pub fn probe_page(html: &str) -> PublishedPage {
    let version_rx = Regex::new(r"<!--\s*release-version:\s*v?([0-9][0-9.]+)\s*-->").unwrap();
    let height_rx = Regex::new(r"Bitcoin block <strong>([0-9]+)</strong>").unwrap();

    let version = version_rx
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let height = height_rx
        .captures(html)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok());

    PublishedPage { version, height }
}

fn proceed(index_height: Option<u64>, proof_height: Option<u64>) -> GateDecision {
    GateDecision {
        should_run: true,
        index_height,
        proof_height,
        cron: CronSignal::None,
    }
}

fn not_yet_final(
    trigger: TriggerEvent,
    index_height: Option<u64>,
    proof_height: Option<u64>,
) -> GateDecision {
    let cron = match trigger {
        TriggerEvent::Push | TriggerEvent::UpstreamRun => CronSignal::Enable,
        _ => CronSignal::None,
    };
    GateDecision {
        should_run: true,
        index_height,
        proof_height,
        cron,
    }
}

/// Evaluate the gate.
///
/// Rules, in order: a force override proceeds without touching the schedule;
/// any fetch or manifest-parse failure proceeds fail-open with no schedule
/// signal; equal published and proof heights stop the workflow (disabling
/// the schedule when the schedule itself fired); anything else proceeds,
/// bootstrapping the schedule on push and upstream-run triggers.
pub fn evaluate(
    trigger: TriggerEvent,
    site: &RemoteSite,
    fetcher: &dyn RemoteResourceFetcher,
    force: bool,
) -> GateDecision {
    if force {
        eprintln!("Force flag supplied; proceeding regardless of finalization status.");
        return proceed(None, None);
    }

    let page_url = site.page_url();
    let html = match fetcher.fetch_text(&page_url) {
        Ok(html) => html,
        Err(err) => {
            eprintln!("Failed to fetch {}: {}; proceeding.", page_url, err);
            return proceed(None, None);
        }
    };
    let page = probe_page(&html);
    let index_height = page.height;

    let manifest_url = site.manifest_url();
    let manifest_text = match fetcher.fetch_text(&manifest_url) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("Failed to fetch {}: {}; proceeding.", manifest_url, err);
            return proceed(index_height, None);
        }
    };
    let manifest = match ReleaseManifest::from_text(&manifest_text) {
        Ok(manifest) => manifest,
        Err(err) => {
            eprintln!("Failed to parse published manifest: {}; proceeding.", err);
            return proceed(index_height, None);
        }
    };

    // The release the page claims to render, else the newest one.
    let release = page
        .version
        .as_deref()
        .and_then(|v| manifest.releases.iter().find(|r| r.version == v))
        .or_else(|| manifest.releases.first());
    let Some(release) = release else {
        eprintln!("No releases listed in published manifest; proceeding.");
        return not_yet_final(trigger, index_height, None);
    };

    let Some(ots) = &release.files.ots else {
        eprintln!(
            "Release {} has no timestamp proof yet; proceeding.",
            release.version
        );
        return not_yet_final(trigger, index_height, None);
    };

    let proof_url = site.artifact_url(&ots.path);
    let raw = match fetcher.fetch_bytes(&proof_url) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("Failed to fetch {}: {}; proceeding.", proof_url, err);
            return proceed(index_height, None);
        }
    };

    let proof_bytes = match ots.encoding {
        ProofEncoding::Binary => raw,
        ProofEncoding::Base64 => {
            match decode_base64_text(&String::from_utf8_lossy(&raw), &ots.path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    eprintln!("Failed to decode proof text: {}; height unknown.", err);
                    return not_yet_final(trigger, index_height, None);
                }
            }
        }
    };

    let proof_height = match parse_detached_proof(&proof_bytes) {
        Ok(proof) => proof.best_height(),
        Err(err) => {
            eprintln!("Failed to parse timestamp proof: {}; height unknown.", err);
            None
        }
    };

    match (index_height, proof_height) {
        (Some(published), Some(proven)) if published == proven => {
            eprintln!(
                "Block {} already reflected by the published page; no further runs needed.",
                published
            );
            let cron = if trigger == TriggerEvent::Schedule {
                CronSignal::Disable
            } else {
                CronSignal::None
            };
            GateDecision {
                should_run: false,
                index_height,
                proof_height,
                cron,
            }
        }
        _ => {
            eprintln!(
                "Proof not yet finalized (published height: {}, proof height: {}); proceeding.",
                index_height.map_or_else(|| "n/a".to_string(), |h| h.to_string()),
                proof_height.map_or_else(|| "n/a".to_string(), |h| h.to_string()),
            );
            not_yet_final(trigger, index_height, proof_height)
        }
    }
}

/// Render the decision as `key=value` lines
pub fn render_outputs(decision: &GateDecision) -> String {
    let mut out = format!("should_run={}\n", decision.should_run);
    if let Some(height) = decision.index_height {
        out.push_str(&format!("index_height={}\n", height));
    }
    if let Some(height) = decision.proof_height {
        out.push_str(&format!("proof_height={}\n", height));
    }
    out.push_str(&format!("cron_state={}\n", decision.cron.as_str()));
    out
}

/// Append the decision to a CI output file
pub fn append_outputs(path: &Path, decision: &GateDecision) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(render_outputs(decision).as_bytes())
}
