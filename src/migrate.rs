use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Chunk payloads plus their embedding vectors. chunk_id is derived from
    // (repo_id, file_path, start_line, end_line), so upserts by primary key
    // give idempotent re-indexing. Rows are never deleted; repository
    // removal is an authorization-time filter in the query pipeline.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            repo_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            text TEXT NOT NULL,
            vector BLOB NOT NULL,
            content_hash TEXT NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            repo_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            root_path TEXT NOT NULL,
            mode TEXT NOT NULL,
            last_indexed_at INTEGER,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_user ON chunks(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_user_repo ON chunks(user_id, repo_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_repos_user ON repositories(user_id)")
        .execute(pool)
        .await?;
    // At most one live registration per (user, root); removed generations
    // stay behind as inactive rows.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_repos_user_root_active \
         ON repositories(user_id, root_path) WHERE active = 1",
    )
    .execute(pool)
    .await?;

    Ok(())
}
