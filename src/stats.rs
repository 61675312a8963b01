//! Knowledge-base statistics for `bkb stats`.
//!
//! Entry, chunk, and embedding counts, a per-content-type breakdown, and
//! token totals. Gives confidence that ingestion is landing where expected.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Serialize)]
pub struct TypeStats {
    pub content_type: String,
    pub entries: i64,
    pub chunks: i64,
    pub public_chunks: i64,
    pub last_added: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct KbStats {
    pub db_bytes: u64,
    pub entries: i64,
    pub chunks: i64,
    pub embedded: i64,
    pub shared_chunks: i64,
    pub public_chunks: i64,
    pub models: Vec<(String, i64)>,
    pub by_type: Vec<TypeStats>,
    pub tokens: i64,
    pub active_tokens: i64,
}

pub async fn collect(pool: &SqlitePool) -> Result<KbStats> {
    let totals = sqlx::query(
        r#"
        SELECT
            COUNT(DISTINCT content_id) AS entries,
            COUNT(*) AS chunks,
            COALESCE(SUM(embedding IS NOT NULL), 0) AS embedded,
            COALESCE(SUM(owner_id = 0), 0) AS shared_chunks,
            COALESCE(SUM(is_public = 1), 0) AS public_chunks
        FROM kb_chunks
        "#,
    )
    .fetch_one(pool)
    .await?;

    let model_rows = sqlx::query(
        "SELECT embedding_model, COUNT(*) AS n FROM kb_chunks \
         WHERE embedding_model IS NOT NULL GROUP BY embedding_model ORDER BY n DESC",
    )
    .fetch_all(pool)
    .await?;

    let type_rows = sqlx::query(
        r#"
        SELECT
            content_type,
            COUNT(DISTINCT content_id) AS entries,
            COUNT(*) AS chunks,
            COALESCE(SUM(is_public = 1), 0) AS public_chunks,
            MAX(created_at) AS last_added
        FROM kb_chunks
        GROUP BY content_type
        ORDER BY entries DESC, content_type ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let tokens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kb_tokens")
        .fetch_one(pool)
        .await?;
    let now = chrono::Utc::now().timestamp();
    let active_tokens: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM kb_tokens \
         WHERE is_active = 1 AND (expires_at IS NULL OR expires_at > ?)",
    )
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(KbStats {
        db_bytes: 0,
        entries: totals.get("entries"),
        chunks: totals.get("chunks"),
        embedded: totals.get("embedded"),
        shared_chunks: totals.get("shared_chunks"),
        public_chunks: totals.get("public_chunks"),
        models: model_rows
            .iter()
            .map(|r| (r.get("embedding_model"), r.get("n")))
            .collect(),
        by_type: type_rows
            .iter()
            .map(|r| TypeStats {
                content_type: r.get("content_type"),
                entries: r.get("entries"),
                chunks: r.get("chunks"),
                public_chunks: r.get("public_chunks"),
                last_added: r.get("last_added"),
            })
            .collect(),
        tokens,
        active_tokens,
    })
}

pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut stats = collect(&pool).await?;
    stats.db_bytes = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Brand Knowledge Base Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(stats.db_bytes));
    println!();
    println!("  Entries:     {}", stats.entries);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.chunks,
        percent(stats.embedded, stats.chunks)
    );
    println!(
        "  Shared:      {} chunks, {} public",
        stats.shared_chunks, stats.public_chunks
    );
    for (model, n) in &stats.models {
        println!("  Model:       {} ({} chunks)", model, n);
    }
    println!(
        "  Tokens:      {} ({} usable)",
        stats.tokens, stats.active_tokens
    );

    if !stats.by_type.is_empty() {
        println!();
        println!("  By content type:");
        println!(
            "  {:<24} {:>7} {:>8} {:>8}   {}",
            "TYPE", "ENTRIES", "CHUNKS", "PUBLIC", "LAST ADDED"
        );
        println!("  {}", "-".repeat(72));
        for t in &stats.by_type {
            println!(
                "  {:<24} {:>7} {:>8} {:>8}   {}",
                t.content_type,
                t.entries,
                t.chunks,
                t.public_chunks,
                t.last_added
                    .map(format_ts_relative)
                    .unwrap_or_else(|| "never".to_string())
            );
        }
    }
    println!();
    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
pub fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandkb_core::models::DocumentInput;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
    }

    #[tokio::test]
    async fn test_collect_counts() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::migrate_pool(&pool).await.unwrap();

        let kb = brandkb_core::kb::KnowledgeBase::new(
            Arc::new(crate::sqlite_store::SqliteStore::new(pool.clone())),
            Arc::new(brandkb_core::embedding::HashingEmbedder::new(32)),
            brandkb_core::kb::KbSettings::default(),
        );
        kb.put_document(&DocumentInput::new("About", "We roast coffee.").with_content_type("page"))
            .await
            .unwrap();
        kb.put_document(
            &DocumentInput::new("Notes", "Member notes.")
                .with_content_type("note")
                .with_owner(3)
                .with_visibility(false),
        )
        .await
        .unwrap();

        let stats = collect(&pool).await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.embedded, 2);
        assert_eq!(stats.shared_chunks, 1);
        assert_eq!(stats.public_chunks, 1);
        assert_eq!(stats.models, vec![("hashing-32".to_string(), 2)]);
        assert_eq!(stats.by_type.len(), 2);
        assert_eq!(stats.tokens, 0);
    }
}
