//! In-memory [`ChunkStore`] and [`TokenStore`] for tests and embedding.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Keyword matching is a plain
//! case-insensitive substring test per keyword; the SQLite store uses FTS5
//! for the same contract.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;

use crate::models::{
    Chunk, EntryQuery, EntrySummary, NewChunk, NewToken, Scope, TokenRecord, TokenStatus,
};

use super::{keyword_terms, ChunkStore, ReplaceOutcome, TokenStore};

#[derive(Default)]
struct Chunks {
    rows: Vec<Chunk>,
    next_id: i64,
}

#[derive(Default)]
struct Tokens {
    rows: Vec<TokenRecord>,
    next_id: i64,
}

/// In-memory store. Row ids start at 1 and are never reused.
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Chunks>,
    tokens: RwLock<Tokens>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total chunk rows held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.read().map(|c| c.rows.len()).unwrap_or(0)
    }

    fn read_chunks(&self) -> Result<RwLockReadGuard<'_, Chunks>> {
        self.chunks.read().map_err(|_| anyhow!("chunk store lock poisoned"))
    }

    fn write_chunks(&self) -> Result<RwLockWriteGuard<'_, Chunks>> {
        self.chunks.write().map_err(|_| anyhow!("chunk store lock poisoned"))
    }

    fn read_tokens(&self) -> Result<RwLockReadGuard<'_, Tokens>> {
        self.tokens.read().map_err(|_| anyhow!("token store lock poisoned"))
    }

    fn write_tokens(&self) -> Result<RwLockWriteGuard<'_, Tokens>> {
        self.tokens.write().map_err(|_| anyhow!("token store lock poisoned"))
    }
}

fn in_scope<'a>(rows: &'a [Chunk], scope: &'a Scope) -> impl Iterator<Item = &'a Chunk> + 'a {
    rows.iter().filter(move |c| scope.admits(c.owner_id, c.is_public))
}

fn bound(limit: i64) -> usize {
    limit.max(0) as usize
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn replace_document(
        &self,
        content_id: &str,
        chunks: &[NewChunk],
    ) -> Result<ReplaceOutcome> {
        let mut guard = self.write_chunks()?;
        let before = guard.rows.len();
        guard.rows.retain(|c| c.content_id != content_id);
        let deleted = (before - guard.rows.len()) as u64;

        for new in chunks {
            guard.next_id += 1;
            let id = guard.next_id;
            guard.rows.push(Chunk {
                id,
                content_id: content_id.to_string(),
                chunk_index: new.chunk_index,
                title: new.title.clone(),
                content: new.content.clone(),
                content_type: new.content_type.clone(),
                embedding: Some(new.embedding.clone()),
                embedding_model: Some(new.embedding_model.clone()),
                owner_id: new.owner_id,
                is_public: new.is_public,
                metadata: new.metadata.clone(),
                created_at: new.created_at,
            });
        }

        Ok(ReplaceOutcome {
            deleted,
            inserted: chunks.len() as u64,
        })
    }

    async fn delete_document(&self, content_id: &str) -> Result<u64> {
        let mut guard = self.write_chunks()?;
        let before = guard.rows.len();
        guard.rows.retain(|c| c.content_id != content_id);
        Ok((before - guard.rows.len()) as u64)
    }

    async fn set_visibility(&self, content_id: &str, is_public: bool) -> Result<u64> {
        let mut guard = self.write_chunks()?;
        let mut touched = 0;
        for c in guard.rows.iter_mut().filter(|c| c.content_id == content_id) {
            c.is_public = is_public;
            touched += 1;
        }
        Ok(touched)
    }

    async fn set_owner(&self, content_id: &str, owner_id: i64) -> Result<u64> {
        let mut guard = self.write_chunks()?;
        let mut touched = 0;
        for c in guard.rows.iter_mut().filter(|c| c.content_id == content_id) {
            c.owner_id = owner_id;
            touched += 1;
        }
        Ok(touched)
    }

    async fn keyword_candidates(
        &self,
        query: &str,
        scope: &Scope,
        limit: i64,
    ) -> Result<Vec<Chunk>> {
        let terms = keyword_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let guard = self.read_chunks()?;
        let mut hits: Vec<(usize, &Chunk)> = in_scope(&guard.rows, scope)
            .filter_map(|c| {
                let haystack = format!("{}\n{}", c.title, c.content).to_lowercase();
                let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (matched > 0).then_some((matched, c))
            })
            .collect();
        // Stable: equal match counts keep insertion order.
        hits.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(hits
            .into_iter()
            .take(bound(limit))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn scope_candidates(&self, scope: &Scope, limit: i64) -> Result<Vec<Chunk>> {
        let guard = self.read_chunks()?;
        Ok(in_scope(&guard.rows, scope)
            .take(bound(limit))
            .cloned()
            .collect())
    }

    async fn random_candidates(&self, scope: &Scope, limit: i64) -> Result<Vec<Chunk>> {
        let guard = self.read_chunks()?;
        let pool: Vec<&Chunk> = in_scope(&guard.rows, scope).collect();
        let mut rng = rand::thread_rng();
        Ok(pool
            .choose_multiple(&mut rng, bound(limit))
            .map(|c| (*c).clone())
            .collect())
    }

    async fn document_chunks(&self, content_id: &str) -> Result<Vec<Chunk>> {
        let guard = self.read_chunks()?;
        let mut rows: Vec<Chunk> = guard
            .rows
            .iter()
            .filter(|c| c.content_id == content_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.chunk_index);
        Ok(rows)
    }

    async fn list_entries(&self, query: &EntryQuery) -> Result<Vec<EntrySummary>> {
        let guard = self.read_chunks()?;
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        // content_id -> (lowest row id, summary, search hit)
        let mut groups: BTreeMap<&str, (i64, EntrySummary, bool)> = BTreeMap::new();
        for c in in_scope(&guard.rows, &query.scope) {
            if let Some(ct) = &query.content_type {
                if &c.content_type != ct {
                    continue;
                }
            }
            let hit = match &needle {
                Some(n) => {
                    c.title.to_lowercase().contains(n) || c.content.to_lowercase().contains(n)
                }
                None => true,
            };
            let entry = groups.entry(c.content_id.as_str()).or_insert_with(|| {
                (
                    c.id,
                    EntrySummary {
                        content_id: c.content_id.clone(),
                        title: c.title.clone(),
                        content_type: c.content_type.clone(),
                        owner_id: c.owner_id,
                        is_public: c.is_public,
                        chunk_count: 0,
                        metadata: c.metadata.clone(),
                        created_at: c.created_at,
                    },
                    false,
                )
            });
            entry.0 = entry.0.min(c.id);
            entry.1.chunk_count += 1;
            entry.2 |= hit;
        }

        let mut entries: Vec<(i64, EntrySummary)> = groups
            .into_values()
            .filter(|(_, _, hit)| *hit)
            .map(|(id, summary, _)| (id, summary))
            .collect();
        entries.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| b.0.cmp(&a.0))
        });

        Ok(entries
            .into_iter()
            .skip(bound(query.offset))
            .take(bound(query.limit))
            .map(|(_, s)| s)
            .collect())
    }
}

#[async_trait]
impl TokenStore for InMemoryStore {
    async fn insert_token(&self, token: &NewToken) -> Result<i64> {
        let mut guard = self.write_tokens()?;
        if guard.rows.iter().any(|t| t.token_hash == token.token_hash) {
            return Err(anyhow!("duplicate token hash"));
        }
        guard.next_id += 1;
        let id = guard.next_id;
        guard.rows.push(TokenRecord {
            id,
            name: token.name.clone(),
            token_hash: token.token_hash.clone(),
            token_type: token.token_type,
            permission: token.permission,
            expires_at: token.expires_at,
            status: TokenStatus::Active,
            created_by: token.created_by,
            created_at: token.created_at,
            last_used_at: None,
        });
        Ok(id)
    }

    async fn token_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>> {
        let guard = self.read_tokens()?;
        Ok(guard
            .rows
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn token_by_id(&self, id: i64) -> Result<Option<TokenRecord>> {
        let guard = self.read_tokens()?;
        Ok(guard.rows.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tokens(&self) -> Result<Vec<TokenRecord>> {
        let guard = self.read_tokens()?;
        Ok(guard.rows.clone())
    }

    async fn set_token_status(&self, id: i64, status: TokenStatus) -> Result<bool> {
        let mut guard = self.write_tokens()?;
        match guard.rows.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                t.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_token(&self, id: i64) -> Result<bool> {
        let mut guard = self.write_tokens()?;
        let before = guard.rows.len();
        guard.rows.retain(|t| t.id != id);
        Ok(guard.rows.len() != before)
    }

    async fn touch_token(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut guard = self.write_tokens()?;
        if let Some(t) = guard.rows.iter_mut().find(|t| t.id == id) {
            t.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OwnerScope, SHARED_OWNER};

    fn new_chunk(content_id: &str, index: i64, text: &str, owner: i64, public: bool) -> NewChunk {
        NewChunk {
            content_id: content_id.to_string(),
            chunk_index: index,
            title: format!("Doc {}", content_id),
            content: text.to_string(),
            content_type: "post".to_string(),
            embedding: vec![1.0, 0.0],
            embedding_model: "test".to_string(),
            owner_id: owner,
            is_public: public,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let store = InMemoryStore::new();
        let chunks = vec![
            new_chunk("a", 0, "first", SHARED_OWNER, true),
            new_chunk("a", 1, "second", SHARED_OWNER, true),
        ];
        let first = store.replace_document("a", &chunks).await.unwrap();
        assert_eq!(first.deleted, 0);
        let second = store.replace_document("a", &chunks).await.unwrap();
        assert_eq!(second.deleted, 2);
        assert_eq!(store.chunk_count(), 2);
    }

    #[tokio::test]
    async fn test_keyword_candidates_respect_scope() {
        let store = InMemoryStore::new();
        store
            .replace_document("s", &[new_chunk("s", 0, "espresso blend", 0, true)])
            .await
            .unwrap();
        store
            .replace_document("u7", &[new_chunk("u7", 0, "espresso notes", 7, false)])
            .await
            .unwrap();
        store
            .replace_document("u8", &[new_chunk("u8", 0, "espresso secrets", 8, false)])
            .await
            .unwrap();

        let scope = Scope::for_owner(Some(7));
        let hits = store.keyword_candidates("espresso", &scope, 10).await.unwrap();
        let owners: Vec<i64> = hits.iter().map(|c| c.owner_id).collect();
        assert_eq!(owners, vec![0, 7]);

        let public = Scope {
            owners: OwnerScope::All,
            public_only: true,
        };
        let hits = store.keyword_candidates("espresso", &public, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_list_entries_groups_and_searches() {
        let store = InMemoryStore::new();
        store
            .replace_document(
                "a",
                &[
                    new_chunk("a", 0, "alpha text", 0, true),
                    new_chunk("a", 1, "more about roasting", 0, true),
                ],
            )
            .await
            .unwrap();
        store
            .replace_document("b", &[new_chunk("b", 0, "beta text", 0, true)])
            .await
            .unwrap();

        let all = store
            .list_entries(&EntryQuery::new(Scope::shared()))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        let a = all.iter().find(|e| e.content_id == "a").unwrap();
        assert_eq!(a.chunk_count, 2);

        let mut q = EntryQuery::new(Scope::shared());
        q.search = Some("ROASTING".into());
        let found = store.list_entries(&q).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content_id, "a");
    }

    #[tokio::test]
    async fn test_token_status_roundtrip() {
        let store = InMemoryStore::new();
        let id = store
            .insert_token(&NewToken {
                name: "ci".into(),
                token_hash: "abc".into(),
                token_type: crate::models::TokenType::Public,
                permission: crate::models::Permission::ReadKb,
                expires_at: None,
                created_by: 1,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(store.set_token_status(id, TokenStatus::Revoked).await.unwrap());
        let t = store.token_by_hash("abc").await.unwrap().unwrap();
        assert_eq!(t.status, TokenStatus::Revoked);
        assert!(store.delete_token(id).await.unwrap());
        assert!(!store.delete_token(id).await.unwrap());
    }
}
