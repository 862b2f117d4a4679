//! Core data models used throughout Echodex.
//!
//! These types represent the chunks, repositories, session context, and
//! results that flow through the indexing, retrieval, and advisor pipelines.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How a repository's files are selected for indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Only the files explicitly listed in the request.
    Manual,
    /// Files matching a set of glob patterns.
    Guided,
    /// Every supported file under the repository root.
    Full,
}

impl IndexMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMode::Manual => "manual",
            IndexMode::Guided => "guided",
            IndexMode::Full => "full",
        }
    }
}

impl std::str::FromStr for IndexMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(IndexMode::Manual),
            "guided" => Ok(IndexMode::Guided),
            "full" => Ok(IndexMode::Full),
            other => Err(format!("unknown index mode: {other}")),
        }
    }
}

/// An indexed span of a source file, tagged with its owning tenant.
///
/// `chunk_id` is derived deterministically from
/// `(repo_id, file_path, start_line, end_line)`, so re-indexing the same
/// range overwrites rather than duplicates. Immutable once written except
/// for `indexed_at`, which is refreshed on every re-index.
#[derive(Debug, Clone, Serialize)]
pub struct CodeChunk {
    pub chunk_id: String,
    pub user_id: String,
    pub repo_id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub text: String,
    pub content_hash: String,
    pub indexed_at: i64,
}

/// A registered repository for one user.
///
/// One live record per (user, root_path). Removal flips `active` to false;
/// the chunks written under this `repo_id` persist physically and are
/// excluded at query time.
#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    pub repo_id: String,
    pub user_id: String,
    pub root_path: String,
    pub mode: IndexMode,
    pub last_indexed_at: Option<i64>,
    pub active: bool,
}

/// Why a file was skipped during an index run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unreadable,
    Binary,
    OverSizeLimit,
    Excluded,
    OutsideRoot,
    EmbedFailed,
    StoreFailed,
}

/// A file the indexer passed over, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

/// Outcome of one index run. Per-file failures land in `skipped`; they do
/// not abort the run, so partial indexing is a normal result.
#[derive(Debug, Clone, Serialize, Default)]
pub struct IndexReport {
    pub files_indexed: u64,
    pub chunks_written: u64,
    pub skipped: Vec<SkippedFile>,
}

/// One ranked search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub repo_id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub snippet: String,
    pub score: f64,
}

/// A screenshot captured for a recording session.
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Base64-encoded image payload, kept ready for the advisor prompt.
    pub image_base64: String,
    pub media_type: String,
    pub size_bytes: usize,
}

/// The live context for one recording session.
///
/// Exactly one instance per (user, session). The transcript and screenshot
/// fields are overwritten independently, last writer wins; their versions
/// advance separately so readers can tell which input moved.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub transcript_segment: Option<String>,
    pub transcript_version: u64,
    pub screenshot: Option<Screenshot>,
    pub screenshot_version: u64,
    pub updated_at: i64,
}

/// Which generator produced a talking point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceSource {
    Ai,
    RuleBased,
}

/// A generated talking point. Produced fresh per advisor call, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct AdviceResult {
    pub talking_point: String,
    pub confidence: f64,
    pub source: AdviceSource,
}

/// Result of one transcription call.
///
/// `model_available = false` with empty text is a degraded success, not an
/// error: callers keep functioning without a speech model.
#[derive(Debug, Clone, Serialize)]
pub struct TranscribeResult {
    pub text: String,
    pub confidence: f64,
    pub model_available: bool,
    pub latency_ms: f64,
}
