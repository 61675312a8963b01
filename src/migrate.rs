//! Idempotent schema setup for `bkb init`.
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `kb_chunks` | Chunk rows with embedding BLOB, owner, and visibility |
//! | `kb_chunks_fts` | FTS5 index over chunk title and text |
//! | `kb_tokens` | Gateway tokens (hash only) |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kb_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'post',
            embedding BLOB,
            embedding_model TEXT,
            owner_id INTEGER NOT NULL DEFAULT 0,
            is_public INTEGER NOT NULL DEFAULT 1,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            UNIQUE(content_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kb_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token_name TEXT NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            token_type TEXT NOT NULL CHECK (token_type IN ('public', 'private')),
            permission TEXT NOT NULL CHECK (permission IN ('read_kb', 'read_write_kb')),
            expires_at INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_by INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='kb_chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE kb_chunks_fts USING fts5(
                chunk_id UNINDEXED,
                content_id UNINDEXED,
                title,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_chunks_content_id ON kb_chunks(content_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_kb_chunks_scope ON kb_chunks(owner_id, is_public)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_chunks_created ON kb_chunks(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
