//! Durable SQLite-backed [`VectorIndex`].
//!
//! Vectors are stored as little-endian `f32` BLOBs alongside the chunk
//! payload. Queries pull the user's (optionally repo-scoped) vectors and
//! score them with brute-force cosine similarity in Rust; at the scale of
//! personal repositories this stays comfortably within the latency budget
//! and keeps the storage layer free of extension dependencies.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::CodeChunk;

use super::{ChunkRecord, ScoredChunk, VectorIndex};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> CodeChunk {
    CodeChunk {
        chunk_id: row.get("chunk_id"),
        user_id: row.get("user_id"),
        repo_id: row.get("repo_id"),
        file_path: row.get("file_path"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        text: row.get("text"),
        content_hash: row.get("content_hash"),
        indexed_at: row.get("indexed_at"),
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<u64> {
        let mut written = 0u64;

        for record in records {
            let c = &record.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (chunk_id, user_id, repo_id, file_path, start_line, end_line,
                     text, vector, content_hash, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    text = excluded.text,
                    vector = excluded.vector,
                    content_hash = excluded.content_hash,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(&c.chunk_id)
            .bind(&c.user_id)
            .bind(&c.repo_id)
            .bind(&c.file_path)
            .bind(c.start_line)
            .bind(c.end_line)
            .bind(&c.text)
            .bind(vec_to_blob(&record.vector))
            .bind(&c.content_hash)
            .bind(c.indexed_at)
            .execute(&self.pool)
            .await?;
            written += 1;
        }

        Ok(written)
    }

    async fn query(
        &self,
        user_id: &str,
        repo_id: Option<&str>,
        query_vec: &[f32],
        limit: i64,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = match repo_id {
            Some(repo) => {
                sqlx::query(
                    r#"
                    SELECT chunk_id, user_id, repo_id, file_path, start_line, end_line,
                           text, vector, content_hash, indexed_at
                    FROM chunks
                    WHERE user_id = ? AND repo_id = ?
                    "#,
                )
                .bind(user_id)
                .bind(repo)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT chunk_id, user_id, repo_id, file_path, start_line, end_line,
                           text, vector, content_hash, indexed_at
                    FROM chunks
                    WHERE user_id = ?
                    "#,
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut candidates: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let vec = blob_to_vec(&blob);
                let score = cosine_similarity(query_vec, &vec) as f64;
                ScoredChunk {
                    chunk: row_to_chunk(row),
                    score,
                }
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
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
