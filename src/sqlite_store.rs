//! SQLite-backed [`ChunkStore`] and [`TokenStore`].
//!
//! Chunk vectors live in `kb_chunks.embedding` as little-endian f32 BLOBs;
//! keyword matching goes through the `kb_chunks_fts` FTS5 table, which is
//! maintained inside the same transaction as the chunk rows.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use brandkb_core::embedding::{blob_to_vec, vec_to_blob};
use brandkb_core::models::{
    Chunk, EntryQuery, EntrySummary, NewChunk, NewToken, OwnerScope, Scope, TokenRecord,
    TokenStatus,
};
use brandkb_core::store::{keyword_terms, ChunkStore, ReplaceOutcome, TokenStore};

const CHUNK_COLUMNS: &str = "c.id, c.content_id, c.chunk_index, c.title, c.content, \
    c.content_type, c.embedding, c.embedding_model, c.owner_id, c.is_public, \
    c.metadata_json, c.created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// SQL predicate for `scope` over table alias `c`, plus the owner id to
/// bind when the predicate has a placeholder.
fn scope_sql(scope: &Scope) -> (String, Option<i64>) {
    let (mut sql, bind) = match scope.owners {
        OwnerScope::Shared => ("c.owner_id = 0".to_string(), None),
        OwnerScope::SharedAnd(user) => ("(c.owner_id = 0 OR c.owner_id = ?)".to_string(), Some(user)),
        OwnerScope::All => ("1 = 1".to_string(), None),
    };
    if scope.public_only {
        sql.push_str(" AND c.is_public = 1");
    }
    (sql, bind)
}

/// FTS5 MATCH expression: OR of prefix-matched keywords.
fn fts_query(query: &str) -> Option<String> {
    let terms = keyword_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"*", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn ts(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn parse_metadata(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let blob: Option<Vec<u8>> = row.try_get("embedding")?;
    let metadata: String = row.try_get("metadata_json")?;
    Ok(Chunk {
        id: row.try_get("id")?,
        content_id: row.try_get("content_id")?,
        chunk_index: row.try_get("chunk_index")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        content_type: row.try_get("content_type")?,
        embedding: blob.as_deref().and_then(blob_to_vec),
        embedding_model: row.try_get("embedding_model")?,
        owner_id: row.try_get("owner_id")?,
        is_public: row.try_get::<i64, _>("is_public")? != 0,
        metadata: parse_metadata(&metadata),
        created_at: from_ts(row.try_get("created_at")?),
    })
}

fn row_to_token(row: &SqliteRow) -> Result<TokenRecord> {
    let token_type: String = row.try_get("token_type")?;
    let permission: String = row.try_get("permission")?;
    let expires_at: Option<i64> = row.try_get("expires_at")?;
    let last_used_at: Option<i64> = row.try_get("last_used_at")?;
    Ok(TokenRecord {
        id: row.try_get("id")?,
        name: row.try_get("token_name")?,
        token_hash: row.try_get("token_hash")?,
        token_type: token_type.parse()?,
        permission: permission.parse()?,
        expires_at: expires_at.map(from_ts),
        status: if row.try_get::<i64, _>("is_active")? != 0 {
            TokenStatus::Active
        } else {
            TokenStatus::Revoked
        },
        created_by: row.try_get("created_by")?,
        created_at: from_ts(row.try_get("created_at")?),
        last_used_at: last_used_at.map(from_ts),
    })
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn replace_document(
        &self,
        content_id: &str,
        chunks: &[NewChunk],
    ) -> Result<ReplaceOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM kb_chunks_fts WHERE content_id = ?")
            .bind(content_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM kb_chunks WHERE content_id = ?")
            .bind(content_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for chunk in chunks {
            let id = sqlx::query(
                r#"
                INSERT INTO kb_chunks (content_id, chunk_index, title, content, content_type,
                                       embedding, embedding_model, owner_id, is_public,
                                       metadata_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(content_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.title)
            .bind(&chunk.content)
            .bind(&chunk.content_type)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(&chunk.embedding_model)
            .bind(chunk.owner_id)
            .bind(chunk.is_public as i64)
            .bind(chunk.metadata.to_string())
            .bind(ts(chunk.created_at))
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            sqlx::query(
                "INSERT INTO kb_chunks_fts (chunk_id, content_id, title, content) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(content_id)
            .bind(&chunk.title)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ReplaceOutcome {
            deleted,
            inserted: chunks.len() as u64,
        })
    }

    async fn delete_document(&self, content_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM kb_chunks_fts WHERE content_id = ?")
            .bind(content_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM kb_chunks WHERE content_id = ?")
            .bind(content_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted)
    }

    async fn set_visibility(&self, content_id: &str, is_public: bool) -> Result<u64> {
        let result = sqlx::query("UPDATE kb_chunks SET is_public = ? WHERE content_id = ?")
            .bind(is_public as i64)
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_owner(&self, content_id: &str, owner_id: i64) -> Result<u64> {
        let result = sqlx::query("UPDATE kb_chunks SET owner_id = ? WHERE content_id = ?")
            .bind(owner_id)
            .bind(content_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn keyword_candidates(
        &self,
        query: &str,
        scope: &Scope,
        limit: i64,
    ) -> Result<Vec<Chunk>> {
        let Some(matcher) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let (predicate, owner) = scope_sql(scope);
        let sql = format!(
            r#"
            SELECT {CHUNK_COLUMNS}
            FROM kb_chunks_fts
            JOIN kb_chunks c ON c.id = kb_chunks_fts.chunk_id
            WHERE kb_chunks_fts MATCH ? AND {predicate}
            ORDER BY bm25(kb_chunks_fts), c.id
            LIMIT ?
            "#
        );

        let mut q = sqlx::query(&sql).bind(matcher);
        if let Some(user) = owner {
            q = q.bind(user);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn scope_candidates(&self, scope: &Scope, limit: i64) -> Result<Vec<Chunk>> {
        let (predicate, owner) = scope_sql(scope);
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM kb_chunks c WHERE {predicate} ORDER BY c.id LIMIT ?"
        );
        let mut q = sqlx::query(&sql);
        if let Some(user) = owner {
            q = q.bind(user);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn random_candidates(&self, scope: &Scope, limit: i64) -> Result<Vec<Chunk>> {
        let (predicate, owner) = scope_sql(scope);
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM kb_chunks c WHERE {predicate} ORDER BY RANDOM() LIMIT ?"
        );
        let mut q = sqlx::query(&sql);
        if let Some(user) = owner {
            q = q.bind(user);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn document_chunks(&self, content_id: &str) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM kb_chunks c WHERE c.content_id = ? ORDER BY c.chunk_index"
        );
        let rows = sqlx::query(&sql)
            .bind(content_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn list_entries(&self, query: &EntryQuery) -> Result<Vec<EntrySummary>> {
        let (predicate, owner) = scope_sql(&query.scope);
        let mut sql = format!(
            r#"
            SELECT c.content_id, c.title, c.content_type, c.owner_id, c.is_public,
                   c.metadata_json, c.created_at,
                   (SELECT COUNT(*) FROM kb_chunks x WHERE x.content_id = c.content_id) AS chunk_count
            FROM kb_chunks c
            WHERE c.chunk_index = 0 AND {predicate}
            "#
        );
        if query.content_type.is_some() {
            sql.push_str(" AND c.content_type = ?");
        }
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);
        if needle.is_some() {
            sql.push_str(
                " AND (c.title LIKE ? ESCAPE '\\' OR EXISTS (SELECT 1 FROM kb_chunks y \
                 WHERE y.content_id = c.content_id AND y.content LIKE ? ESCAPE '\\'))",
            );
        }
        sql.push_str(" ORDER BY c.created_at DESC, c.id DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql);
        if let Some(user) = owner {
            q = q.bind(user);
        }
        if let Some(ct) = &query.content_type {
            q = q.bind(ct);
        }
        if let Some(pattern) = &needle {
            q = q.bind(pattern).bind(pattern);
        }
        let rows = q
            .bind(query.limit.max(0))
            .bind(query.offset.max(0))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let metadata: String = row.try_get("metadata_json")?;
                Ok(EntrySummary {
                    content_id: row.try_get("content_id")?,
                    title: row.try_get("title")?,
                    content_type: row.try_get("content_type")?,
                    owner_id: row.try_get("owner_id")?,
                    is_public: row.try_get::<i64, _>("is_public")? != 0,
                    chunk_count: row.try_get("chunk_count")?,
                    metadata: parse_metadata(&metadata),
                    created_at: from_ts(row.try_get("created_at")?),
                })
            })
            .collect()
    }
}

#[async_trait]
impl TokenStore for SqliteStore {
    async fn insert_token(&self, token: &NewToken) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO kb_tokens (token_name, token_hash, token_type, permission,
                                   expires_at, is_active, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&token.name)
        .bind(&token.token_hash)
        .bind(token.token_type.as_str())
        .bind(token.permission.as_str())
        .bind(token.expires_at.map(ts))
        .bind(token.created_by)
        .bind(ts(token.created_at))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn token_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>> {
        let row = sqlx::query("SELECT * FROM kb_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_token).transpose()
    }

    async fn token_by_id(&self, id: i64) -> Result<Option<TokenRecord>> {
        let row = sqlx::query("SELECT * FROM kb_tokens WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_token).transpose()
    }

    async fn list_tokens(&self) -> Result<Vec<TokenRecord>> {
        let rows = sqlx::query("SELECT * FROM kb_tokens ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_token).collect()
    }

    async fn set_token_status(&self, id: i64, status: TokenStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE kb_tokens SET is_active = ? WHERE id = ?")
            .bind((status == TokenStatus::Active) as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_token(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kb_tokens WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_token(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE kb_tokens SET last_used_at = ? WHERE id = ?")
            .bind(ts(at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
