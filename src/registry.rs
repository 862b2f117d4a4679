//! Per-user repository registry.
//!
//! Tracks which repositories each user has indexed and which are still
//! active. Removal is a soft delete: the row flips to inactive, the chunks
//! written under its `repo_id` stay in the vector index, and the query
//! pipeline re-checks the active set on every search. A later index request
//! for the same root registers a fresh `repo_id`, so chunks from a removed
//! generation can never resurface.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{IndexMode, Repository};

pub struct RepoRegistry {
    pool: SqlitePool,
}

fn row_to_repo(row: &sqlx::sqlite::SqliteRow) -> Repository {
    let mode: String = row.get("mode");
    Repository {
        repo_id: row.get("repo_id"),
        user_id: row.get("user_id"),
        root_path: row.get("root_path"),
        mode: IndexMode::from_str(&mode).unwrap_or(IndexMode::Full),
        last_indexed_at: row.get("last_indexed_at"),
        active: row.get::<i64, _>("active") != 0,
    }
}

impl RepoRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Find the active registration for (user, root), creating one if
    /// missing. The mode is updated to match the latest request.
    pub async fn ensure(
        &self,
        user_id: &str,
        root_path: &str,
        mode: IndexMode,
    ) -> Result<Repository> {
        let existing = sqlx::query(
            "SELECT repo_id, user_id, root_path, mode, last_indexed_at, active \
             FROM repositories WHERE user_id = ? AND root_path = ? AND active = 1",
        )
        .bind(user_id)
        .bind(root_path)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            let repo = row_to_repo(&row);
            if repo.mode != mode {
                sqlx::query("UPDATE repositories SET mode = ? WHERE repo_id = ?")
                    .bind(mode.as_str())
                    .bind(&repo.repo_id)
                    .execute(&self.pool)
                    .await?;
            }
            return Ok(Repository { mode, ..repo });
        }

        let repo = Repository {
            repo_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            root_path: root_path.to_string(),
            mode,
            last_indexed_at: None,
            active: true,
        };

        sqlx::query(
            "INSERT INTO repositories (repo_id, user_id, root_path, mode, last_indexed_at, active) \
             VALUES (?, ?, ?, ?, NULL, 1)",
        )
        .bind(&repo.repo_id)
        .bind(&repo.user_id)
        .bind(&repo.root_path)
        .bind(mode.as_str())
        .execute(&self.pool)
        .await?;

        Ok(repo)
    }

    pub async fn touch_last_indexed(&self, repo_id: &str, timestamp: i64) -> Result<()> {
        sqlx::query("UPDATE repositories SET last_indexed_at = ? WHERE repo_id = ?")
            .bind(timestamp)
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The caller's current active repository ids. Re-fetched on every
    /// search so a removal takes effect immediately.
    pub async fn active_set(&self, user_id: &str) -> Result<HashSet<String>> {
        let rows =
            sqlx::query("SELECT repo_id FROM repositories WHERE user_id = ? AND active = 1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(|r| r.get("repo_id")).collect())
    }

    pub async fn list_active(&self, user_id: &str) -> Result<Vec<Repository>> {
        let rows = sqlx::query(
            "SELECT repo_id, user_id, root_path, mode, last_indexed_at, active \
             FROM repositories WHERE user_id = ? AND active = 1 ORDER BY root_path",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_repo).collect())
    }

    /// Soft-delete a repository. Returns false when the caller owns no
    /// active repository with that id.
    pub async fn deactivate(&self, user_id: &str, repo_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE repositories SET active = 0 \
             WHERE user_id = ? AND repo_id = ? AND active = 1",
        )
        .bind(user_id)
        .bind(repo_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
