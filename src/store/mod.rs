//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only shared mutable resource across
//! requests. All mutation is upsert-by-`chunk_id`, which is commutative and
//! idempotent, so concurrent index and search runs need no coordination
//! beyond what the backend guarantees for a single key. A search running
//! concurrently with an index may observe a mix of old and new chunks for
//! files still being processed; that staleness window is accepted.
//!
//! There is deliberately no delete operation: removing a repository is an
//! authorization-time filter applied by the query pipeline, not a
//! storage-time erasure.
//!
//! Every read and write is parameterized by `user_id`. Backends must never
//! return a chunk owned by a different user, regardless of any other filter.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CodeChunk;

/// A chunk plus its embedding vector, ready for storage.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk: CodeChunk,
    pub vector: Vec<f32>,
}

/// A candidate returned from a nearest-neighbor query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: CodeChunk,
    /// Cosine similarity against the query vector.
    pub score: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite chunks by `chunk_id`. Atomic per key.
    async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<u64>;

    /// Nearest-neighbor lookup scoped to one user, optionally narrowed to
    /// one repository, returning up to `limit` candidates by similarity.
    async fn query(
        &self,
        user_id: &str,
        repo_id: Option<&str>,
        query_vec: &[f32],
        limit: i64,
    ) -> Result<Vec<ScoredChunk>>;

    /// Number of chunks physically stored for one user (soft-deleted
    /// repositories included).
    async fn chunk_count(&self, user_id: &str) -> Result<i64>;
}
