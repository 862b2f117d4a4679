//! Query pipeline: validate, embed, filtered nearest-neighbor lookup,
//! re-rank, truncate.
//!
//! The index is over-fetched by a configurable factor before the tenancy
//! and soft-delete filters run, so dropped candidates do not starve the
//! final result set. Ranking is a deterministic function of the index
//! contents and the query at a given point in time: score descending, then
//! shorter `file_path`, then lexical `file_path`, then lower `start_line`.

use crate::config::Config;
use crate::embedding::{embed_query, Embedder};
use crate::error::{ApiError, ApiResult};
use crate::models::SearchHit;
use crate::registry::RepoRegistry;
use crate::store::VectorIndex;

pub async fn search_chunks(
    config: &Config,
    registry: &RepoRegistry,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    user_id: &str,
    query: &str,
    top_k: Option<i64>,
    repo_id: Option<&str>,
) -> ApiResult<Vec<SearchHit>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::InvalidInput("query must not be empty".to_string()));
    }
    if query.len() > config.retrieval.max_query_chars {
        return Err(ApiError::InvalidInput(format!(
            "query exceeds maximum length of {} characters",
            config.retrieval.max_query_chars
        )));
    }
    if !embedder.is_ready() {
        return Err(ApiError::Unavailable(
            "embedding provider is disabled; search requires an embedding model".to_string(),
        ));
    }

    let top_k = top_k
        .unwrap_or(config.retrieval.default_top_k)
        .clamp(1, config.retrieval.max_top_k);

    // Deletion is an authorization-time filter: the active set is
    // re-fetched on every query, never cached.
    let active = registry.active_set(user_id).await.map_err(ApiError::Internal)?;

    // A repo filter naming a removed (or foreign) repository yields an
    // empty result, exactly as if its chunks were gone.
    if let Some(repo) = repo_id {
        if !active.contains(repo) {
            return Ok(Vec::new());
        }
    }

    let query_vec = embed_query(embedder, query).await.map_err(ApiError::Internal)?;

    let fetch_limit = top_k.saturating_mul(config.retrieval.overfetch_factor);
    let candidates = index
        .query(user_id, repo_id, &query_vec, fetch_limit)
        .await
        .map_err(ApiError::Internal)?;

    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|c| active.contains(&c.chunk.repo_id))
        .map(|c| SearchHit {
            repo_id: c.chunk.repo_id,
            file_path: c.chunk.file_path,
            start_line: c.chunk.start_line,
            end_line: c.chunk.end_line,
            snippet: c.chunk.text,
            score: c.score,
        })
        .collect();

    rank_hits(&mut hits);
    hits.truncate(top_k as usize);

    Ok(hits)
}

/// Deterministic ordering: score desc, then shorter path, then lexical
/// path, then lower start line.
fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.file_path.len().cmp(&b.file_path.len()))
            .then(a.file_path.cmp(&b.file_path))
            .then(a.start_line.cmp(&b.start_line))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(file_path: &str, start_line: i64, score: f64) -> SearchHit {
        SearchHit {
            repo_id: "r1".to_string(),
            file_path: file_path.to_string(),
            start_line,
            end_line: start_line + 10,
            snippet: String::new(),
            score,
        }
    }

    #[test]
    fn test_rank_by_score_desc() {
        let mut hits = vec![hit("a.py", 1, 0.2), hit("b.py", 1, 0.9)];
        rank_hits(&mut hits);
        assert_eq!(hits[0].file_path, "b.py");
    }

    #[test]
    fn test_tie_break_shorter_path_first() {
        let mut hits = vec![hit("deep/nested/module.py", 1, 0.5), hit("auth.py", 1, 0.5)];
        rank_hits(&mut hits);
        assert_eq!(hits[0].file_path, "auth.py");
    }

    #[test]
    fn test_tie_break_lexical_then_line() {
        let mut hits = vec![
            hit("b.py", 1, 0.5),
            hit("a.py", 40, 0.5),
            hit("a.py", 1, 0.5),
        ];
        rank_hits(&mut hits);
        assert_eq!(
            hits.iter()
                .map(|h| (h.file_path.as_str(), h.start_line))
                .collect::<Vec<_>>(),
            vec![("a.py", 1), ("a.py", 40), ("b.py", 1)]
        );
    }

    #[test]
    fn test_ranking_is_stable_across_calls() {
        let make = || {
            vec![
                hit("x.py", 5, 0.7),
                hit("y.py", 2, 0.7),
                hit("z.py", 9, 0.1),
            ]
        };
        let mut a = make();
        let mut b = make();
        rank_hits(&mut a);
        rank_hits(&mut b);
        let order = |hs: &[SearchHit]| hs.iter().map(|h| h.file_path.clone()).collect::<Vec<_>>();
        assert_eq!(order(&a), order(&b));
    }
}
