//! Boundary-aware source file chunker.
//!
//! Splits file text into spans that respect a configurable character budget.
//! Recognized code files split preferentially where a new function, type, or
//! class begins; other files fall back to fixed-size line windows.
//! Consecutive chunks share a small line overlap so a logical unit cut by a
//! split still appears whole in one of its neighbors.
//!
//! Chunking is deterministic: identical input always yields the identical
//! span sequence, which keeps the derived `chunk_id`s stable across
//! re-indexing runs.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::config::ChunkingConfig;

/// A chunk of one file, with its stable identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub text: String,
    pub content_hash: String,
}

/// File-type hint controlling the split policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Code,
    Text,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Self {
        const CODE_EXTENSIONS: &[&str] = &[
            "py", "rs", "js", "ts", "tsx", "jsx", "go", "java", "kt", "swift", "c", "h", "cpp",
            "cc", "hpp", "cs", "rb", "php",
        ];
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if CODE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => {
                FileKind::Code
            }
            _ => FileKind::Text,
        }
    }
}

/// Declaration prefixes treated as structural boundaries.
///
/// Covers the languages in the default supported-extension set well enough
/// to bias splits toward function/class starts; anything unmatched still
/// splits at the hard size limit.
const BOUNDARY_PREFIXES: &[&str] = &[
    "def ",
    "async def ",
    "class ",
    "fn ",
    "pub fn ",
    "pub async fn ",
    "async fn ",
    "impl ",
    "struct ",
    "enum ",
    "trait ",
    "func ",
    "function ",
    "export ",
    "import ",
    "public ",
    "private ",
    "protected ",
];

fn is_boundary_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    BOUNDARY_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Split `text` into chunk spans for `(repo_id, file_path)`.
///
/// Empty (or whitespace-only) files yield no chunks. Files within the budget
/// become a single chunk. Larger code files split at a structural boundary
/// once the accumulated chunk passes ~70% of the budget, with a forced split
/// at twice the budget; non-code files split on plain size windows.
pub fn chunk_file(
    repo_id: &str,
    file_path: &str,
    text: &str,
    kind: FileKind,
    config: &ChunkingConfig,
) -> Vec<ChunkSpan> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let max_chars = config.max_chars;
    let lines: Vec<&str> = text.lines().collect();

    if text.len() <= max_chars {
        return make_span(repo_id, file_path, &lines, 0, lines.len() - 1)
            .into_iter()
            .collect();
    }

    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut cur_len = 0usize;

    for i in 0..lines.len() {
        let line_len = lines[i].len() + 1;

        let soft_split = kind == FileKind::Code
            && is_boundary_line(lines[i])
            && cur_len >= max_chars * 7 / 10;
        let hard_split = cur_len + line_len > max_chars * 2;
        let window_split = kind == FileKind::Text && cur_len + line_len > max_chars;

        if i > start && (soft_split || hard_split || window_split) {
            spans.extend(make_span(repo_id, file_path, &lines, start, i - 1));

            // Back up by the overlap, but always make forward progress.
            start = i.saturating_sub(config.overlap_lines).max(start + 1);
            cur_len = lines[start..i].iter().map(|l| l.len() + 1).sum();
        }

        cur_len += line_len;
    }

    spans.extend(make_span(repo_id, file_path, &lines, start, lines.len() - 1));
    spans
}

fn make_span(
    repo_id: &str,
    file_path: &str,
    lines: &[&str],
    start: usize,
    end: usize,
) -> Option<ChunkSpan> {
    let text = lines[start..=end].join("\n");
    if text.trim().is_empty() {
        return None;
    }

    let start_line = (start + 1) as i64;
    let end_line = (end + 1) as i64;

    Some(ChunkSpan {
        chunk_id: derive_chunk_id(repo_id, file_path, start_line, end_line),
        file_path: file_path.to_string(),
        start_line,
        end_line,
        content_hash: sha256_hex(text.as_bytes()),
        text,
    })
}

/// Stable chunk identity: re-indexing the same range overwrites in place.
pub fn derive_chunk_id(repo_id: &str, file_path: &str, start_line: i64, end_line: i64) -> String {
    sha256_hex(format!("{repo_id}\n{file_path}\n{start_line}\n{end_line}").as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize, overlap_lines: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars,
            overlap_lines,
        }
    }

    fn python_file(functions: usize) -> String {
        (0..functions)
            .map(|i| {
                format!(
                    "def handler_{i}(request):\n    value = compute_{i}(request)\n    return value\n"
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_small_file_single_chunk() {
        let text = "def greet():\n    return 'hi'";
        let chunks = chunk_file("r1", "a.py", text, FileKind::Code, &config(1000, 4));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_empty_file_no_chunks() {
        assert!(chunk_file("r1", "a.py", "", FileKind::Code, &config(1000, 4)).is_empty());
        assert!(chunk_file("r1", "a.py", "  \n\n ", FileKind::Code, &config(1000, 4)).is_empty());
    }

    #[test]
    fn test_large_code_file_splits_on_boundaries() {
        let text = python_file(20);
        let chunks = chunk_file("r1", "big.py", &text, FileKind::Code, &config(200, 0));
        assert!(chunks.len() > 1);
        // Every chunk after the first begins at a function boundary.
        for chunk in &chunks[1..] {
            assert!(
                chunk.text.lines().next().unwrap().starts_with("def "),
                "chunk did not start at a boundary: {:?}",
                chunk.text.lines().next()
            );
        }
    }

    #[test]
    fn test_overlap_between_consecutive_chunks() {
        let text = python_file(20);
        let chunks = chunk_file("r1", "big.py", &text, FileKind::Code, &config(200, 2));
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(
                pair[1].start_line <= pair[0].end_line,
                "chunks {} and {} do not overlap",
                pair[0].start_line,
                pair[1].start_line
            );
        }
    }

    #[test]
    fn test_text_file_fixed_windows() {
        let text = (0..100)
            .map(|i| format!("note line number {i} with some filler words"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_file("r1", "notes.txt", &text, FileKind::Text, &config(300, 0));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 300 + 50, "window exceeded budget");
        }
    }

    #[test]
    fn test_deterministic() {
        let text = python_file(15);
        let a = chunk_file("r1", "x.py", &text, FileKind::Code, &config(250, 3));
        let b = chunk_file("r1", "x.py", &text, FileKind::Code, &config(250, 3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_id_depends_on_range_and_repo() {
        let id_a = derive_chunk_id("r1", "a.py", 1, 40);
        assert_eq!(id_a, derive_chunk_id("r1", "a.py", 1, 40));
        assert_ne!(id_a, derive_chunk_id("r1", "a.py", 2, 40));
        assert_ne!(id_a, derive_chunk_id("r2", "a.py", 1, 40));
        assert_ne!(id_a, derive_chunk_id("r1", "b.py", 1, 40));
    }

    #[test]
    fn test_file_kind_detection() {
        assert_eq!(FileKind::from_path(Path::new("src/lib.rs")), FileKind::Code);
        assert_eq!(FileKind::from_path(Path::new("app.swift")), FileKind::Code);
        assert_eq!(FileKind::from_path(Path::new("README.md")), FileKind::Text);
        assert_eq!(FileKind::from_path(Path::new("Makefile")), FileKind::Text);
    }

    #[test]
    fn test_hard_split_without_boundaries() {
        // One long "paragraph" of unrecognizable lines still gets split.
        let text = (0..80)
            .map(|i| format!("x{i} = x{i} + 1"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_file("r1", "calc.py", &text, FileKind::Code, &config(100, 0));
        assert!(chunks.len() > 1);
    }
}
