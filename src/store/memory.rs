//! In-memory [`VectorIndex`] for tests.
//!
//! A `HashMap` keyed by `chunk_id` behind `std::sync::RwLock`, with
//! brute-force cosine scoring. Mirrors the SQLite backend's semantics,
//! including the absence of any delete operation.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;

use super::{ChunkRecord, ScoredChunk, VectorIndex};

#[derive(Default)]
pub struct MemoryIndex {
    chunks: RwLock<HashMap<String, ChunkRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<u64> {
        let mut chunks = self.chunks.write().unwrap();
        for record in records {
            chunks.insert(record.chunk.chunk_id.clone(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn query(
        &self,
        user_id: &str,
        repo_id: Option<&str>,
        query_vec: &[f32],
        limit: i64,
    ) -> Result<Vec<ScoredChunk>> {
        let chunks = self.chunks.read().unwrap();
        let mut candidates: Vec<ScoredChunk> = chunks
            .values()
            .filter(|r| r.chunk.user_id == user_id)
            .filter(|r| repo_id.is_none_or(|id| r.chunk.repo_id == id))
            .map(|r| ScoredChunk {
                chunk: r.chunk.clone(),
                score: cosine_similarity(query_vec, &r.vector) as f64,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit.max(0) as usize);

        Ok(candidates)
    }

    async fn chunk_count(&self, user_id: &str) -> Result<i64> {
        let chunks = self.chunks.read().unwrap();
        Ok(chunks.values().filter(|r| r.chunk.user_id == user_id).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CodeChunk;

    fn record(chunk_id: &str, user_id: &str, repo_id: &str, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            chunk: CodeChunk {
                chunk_id: chunk_id.to_string(),
                user_id: user_id.to_string(),
                repo_id: repo_id.to_string(),
                file_path: "a.py".to_string(),
                start_line: 1,
                end_line: 10,
                text: "def a(): pass".to_string(),
                content_hash: "h".to_string(),
                indexed_at: 0,
            },
            vector,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = MemoryIndex::new();
        index
            .upsert_chunks(&[record("c1", "u1", "r1", vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .upsert_chunks(&[record("c1", "u1", "r1", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(index.chunk_count("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_never_crosses_users() {
        let index = MemoryIndex::new();
        index
            .upsert_chunks(&[
                record("c1", "u1", "r1", vec![1.0, 0.0]),
                record("c2", "u2", "r2", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.query("u1", None, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.user_id, "u1");
    }

    #[tokio::test]
    async fn test_repo_filter() {
        let index = MemoryIndex::new();
        index
            .upsert_chunks(&[
                record("c1", "u1", "r1", vec![1.0, 0.0]),
                record("c2", "u1", "r2", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.query("u1", Some("r2"), &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.repo_id, "r2");
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let index = MemoryIndex::new();
        index
            .upsert_chunks(&[
                record("far", "u1", "r1", vec![0.0, 1.0]),
                record("near", "u1", "r1", vec![1.0, 0.1]),
            ])
            .await
            .unwrap();

        let hits = index.query("u1", None, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits[0].chunk.chunk_id, "near");
        assert!(hits[0].score > hits[1].score);
    }
}
