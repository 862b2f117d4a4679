//! Repository indexing pipeline.
//!
//! Orchestrates file discovery, chunking, embedding, tenant tagging, and
//! upsert into the vector index for one (user, repository) pair. The
//! sandbox check runs before any file I/O. Per-file failures are collected
//! into the report rather than raised, so partial indexing is a normal
//! outcome for the caller.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunker::{chunk_file, FileKind};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{ApiError, ApiResult};
use crate::models::{CodeChunk, IndexMode, IndexReport, SkipReason, SkippedFile};
use crate::registry::RepoRegistry;
use crate::sandbox::Sandbox;
use crate::store::{ChunkRecord, VectorIndex};

/// Result of one index run: the repository it targeted plus the report.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub repo_id: String,
    pub report: IndexReport,
}

/// Directories never worth indexing, applied in guided and full modes.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/.*/**",
    "**/.*",
    "**/node_modules/**",
    "**/target/**",
    "**/build/**",
    "**/dist/**",
    "**/venv/**",
    "**/__pycache__/**",
    "**/Pods/**",
];

#[allow(clippy::too_many_arguments)]
pub async fn index_repository(
    config: &Config,
    sandbox: &Sandbox,
    registry: &RepoRegistry,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    user_id: &str,
    root_path: &str,
    mode: IndexMode,
    selection: &[String],
) -> ApiResult<IndexOutcome> {
    // Sandbox boundary first, before any directory I/O.
    let root = sandbox.resolve(Path::new(root_path))?;
    if !root.is_dir() {
        return Err(ApiError::InvalidInput(format!(
            "root_path is not a directory: {}",
            root.display()
        )));
    }
    if !embedder.is_ready() {
        return Err(ApiError::Unavailable(
            "embedding provider is disabled; indexing requires an embedding model".to_string(),
        ));
    }

    let repo = registry
        .ensure(user_id, &root.display().to_string(), mode)
        .await
        .map_err(ApiError::Internal)?;

    let mut report = IndexReport::default();
    let files = discover_files(config, &root, mode, selection, &mut report)
        .map_err(ApiError::Internal)?;

    let now = chrono::Utc::now().timestamp();

    for file in &files {
        match index_one_file(config, index, embedder, user_id, &repo.repo_id, file, now).await {
            Ok(chunks_written) => {
                report.files_indexed += 1;
                report.chunks_written += chunks_written;
            }
            Err(reason) => {
                report.skipped.push(SkippedFile {
                    path: file.relative.clone(),
                    reason,
                });
            }
        }
    }

    // The run completed; partial failure is still success for the registry.
    registry
        .touch_last_indexed(&repo.repo_id, now)
        .await
        .map_err(ApiError::Internal)?;

    tracing::info!(
        user_id,
        repo_id = %repo.repo_id,
        files = report.files_indexed,
        chunks = report.chunks_written,
        skipped = report.skipped.len(),
        "index run finished"
    );

    Ok(IndexOutcome {
        repo_id: repo.repo_id,
        report,
    })
}

struct CandidateFile {
    absolute: PathBuf,
    relative: String,
}

fn discover_files(
    config: &Config,
    root: &Path,
    mode: IndexMode,
    selection: &[String],
    report: &mut IndexReport,
) -> Result<Vec<CandidateFile>> {
    let mut files = match mode {
        IndexMode::Manual => discover_manual(root, selection, report),
        IndexMode::Guided => {
            let patterns: &[String] = if selection.is_empty() {
                &config.indexing.default_guided_patterns
            } else {
                selection
            };
            discover_walk(root, Some(build_globset(patterns)?), None, report)?
        }
        IndexMode::Full => discover_walk(
            root,
            None,
            Some(&config.indexing.supported_extensions),
            report,
        )?,
    };

    // Deterministic processing order.
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Manual mode: exactly the listed files, each resolved against the root.
/// Entries resolving outside the root are reported, not fatal.
fn discover_manual(
    root: &Path,
    selection: &[String],
    report: &mut IndexReport,
) -> Vec<CandidateFile> {
    let mut files = Vec::new();

    for entry in selection {
        let requested = Path::new(entry);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            root.join(requested)
        };

        let Ok(resolved) = joined.canonicalize() else {
            report.skipped.push(SkippedFile {
                path: entry.clone(),
                reason: SkipReason::Unreadable,
            });
            continue;
        };

        if !resolved.starts_with(root) {
            report.skipped.push(SkippedFile {
                path: entry.clone(),
                reason: SkipReason::OutsideRoot,
            });
            continue;
        }

        if !resolved.is_file() {
            report.skipped.push(SkippedFile {
                path: entry.clone(),
                reason: SkipReason::Unreadable,
            });
            continue;
        }

        let relative = resolved
            .strip_prefix(root)
            .unwrap_or(&resolved)
            .to_string_lossy()
            .to_string();
        files.push(CandidateFile {
            absolute: resolved,
            relative,
        });
    }

    files
}

fn discover_walk(
    root: &Path,
    include: Option<GlobSet>,
    extensions: Option<&[String]>,
    report: &mut IndexReport,
) -> Result<Vec<CandidateFile>> {
    let exclude = build_globset(
        &DEFAULT_EXCLUDES
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>(),
    )?;

    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() || entry.path_is_symlink() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        // Does this file match the mode's selection criteria?
        let selected = match (&include, extensions) {
            (Some(set), _) => set.is_match(&rel_str),
            (None, Some(exts)) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| exts.iter().any(|s| s.eq_ignore_ascii_case(e)))
                .unwrap_or(false),
            (None, None) => true,
        };
        if !selected {
            continue;
        }

        if exclude.is_match(&rel_str) {
            report.skipped.push(SkippedFile {
                path: rel_str,
                reason: SkipReason::Excluded,
            });
            continue;
        }

        files.push(CandidateFile {
            absolute: path.to_path_buf(),
            relative: rel_str,
        });
    }

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Index a single file. Returns the chunk count on success, or the skip
/// reason on any per-file failure.
async fn index_one_file(
    config: &Config,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    user_id: &str,
    repo_id: &str,
    file: &CandidateFile,
    now: i64,
) -> std::result::Result<u64, SkipReason> {
    let metadata = std::fs::metadata(&file.absolute).map_err(|_| SkipReason::Unreadable)?;
    if metadata.len() > config.indexing.max_file_bytes {
        return Err(SkipReason::OverSizeLimit);
    }

    let bytes = std::fs::read(&file.absolute).map_err(|_| SkipReason::Unreadable)?;
    if bytes[..bytes.len().min(8192)].contains(&0) {
        return Err(SkipReason::Binary);
    }

    let text = String::from_utf8_lossy(&bytes);
    let kind = FileKind::from_path(&file.absolute);
    let spans = chunk_file(repo_id, &file.relative, &text, kind, &config.chunking);
    if spans.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
    let vectors = match embedder.embed(&texts).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %file.relative, error = %e, "embedding failed for file");
            return Err(SkipReason::EmbedFailed);
        }
    };

    let records: Vec<ChunkRecord> = spans
        .into_iter()
        .zip(vectors)
        .map(|(span, vector)| ChunkRecord {
            chunk: CodeChunk {
                chunk_id: span.chunk_id,
                user_id: user_id.to_string(),
                repo_id: repo_id.to_string(),
                file_path: span.file_path,
                start_line: span.start_line,
                end_line: span.end_line,
                text: span.text,
                content_hash: span.content_hash,
                indexed_at: now,
            },
            vector,
        })
        .collect();

    index.upsert_chunks(&records).await.map_err(|e| {
        tracing::warn!(path = %file.relative, error = %e, "upsert failed for file");
        SkipReason::StoreFailed
    })
}
