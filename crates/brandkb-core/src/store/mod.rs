//! Storage abstraction for Brand KB.
//!
//! [`ChunkStore`] holds the knowledge chunks and [`TokenStore`] holds the
//! gateway credentials. The core receives both as injected trait objects,
//! so backends (SQLite in the app crate, [`memory::InMemoryStore`] for
//! tests) are interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Chunk, EntryQuery, EntrySummary, NewChunk, NewToken, Scope, TokenRecord, TokenStatus,
};

/// Row counts from [`ChunkStore::replace_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub deleted: u64,
    pub inserted: u64,
}

/// Persistent chunk storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_document`](ChunkStore::replace_document) | Delete-then-insert a document's chunks in one transaction |
/// | [`delete_document`](ChunkStore::delete_document) | Remove every chunk of a document |
/// | [`set_visibility`](ChunkStore::set_visibility) / [`set_owner`](ChunkStore::set_owner) | Bulk updates across a document |
/// | [`keyword_candidates`](ChunkStore::keyword_candidates) | Keyword pre-filter within a scope |
/// | [`scope_candidates`](ChunkStore::scope_candidates) | Every chunk within a scope, bounded |
/// | [`random_candidates`](ChunkStore::random_candidates) | Bounded random sample within a scope |
/// | [`document_chunks`](ChunkStore::document_chunks) | Ordered chunks of one document |
/// | [`list_entries`](ChunkStore::list_entries) | Document summaries with paging |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Replace all chunks for `content_id` atomically.
    ///
    /// Readers observe either the old generation or the new one, never a
    /// mix or a partial set.
    async fn replace_document(&self, content_id: &str, chunks: &[NewChunk])
        -> Result<ReplaceOutcome>;

    /// Delete every chunk sharing `content_id`; returns the count deleted.
    async fn delete_document(&self, content_id: &str) -> Result<u64>;

    /// Set `is_public` on every chunk of a document; returns rows touched.
    async fn set_visibility(&self, content_id: &str, is_public: bool) -> Result<u64>;

    /// Set `owner_id` on every chunk of a document; returns rows touched.
    async fn set_owner(&self, content_id: &str, owner_id: i64) -> Result<u64>;

    /// Chunks within `scope` whose title or text matches any of the
    /// query's keywords (see [`keyword_terms`]), best matches first.
    async fn keyword_candidates(&self, query: &str, scope: &Scope, limit: i64)
        -> Result<Vec<Chunk>>;

    /// Chunks within `scope` in insertion order, at most `limit`.
    async fn scope_candidates(&self, scope: &Scope, limit: i64) -> Result<Vec<Chunk>>;

    /// Up to `limit` chunks within `scope`, sampled at random.
    async fn random_candidates(&self, scope: &Scope, limit: i64) -> Result<Vec<Chunk>>;

    /// All chunks of a document ordered by `chunk_index`.
    async fn document_chunks(&self, content_id: &str) -> Result<Vec<Chunk>>;

    /// Document summaries matching `query`, newest first.
    async fn list_entries(&self, query: &EntryQuery) -> Result<Vec<EntrySummary>>;
}

/// Persistent token storage.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert a token row and return its id.
    async fn insert_token(&self, token: &NewToken) -> Result<i64>;

    async fn token_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>>;

    async fn token_by_id(&self, id: i64) -> Result<Option<TokenRecord>>;

    /// All tokens, oldest first.
    async fn list_tokens(&self) -> Result<Vec<TokenRecord>>;

    /// Returns `false` when no token has this id.
    async fn set_token_status(&self, id: i64, status: TokenStatus) -> Result<bool>;

    /// Hard delete. Returns `false` when no token has this id.
    async fn delete_token(&self, id: i64) -> Result<bool>;

    async fn touch_token(&self, id: i64, at: DateTime<Utc>) -> Result<()>;
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "how", "what", "when", "where", "which", "who", "why",
    "with", "this", "that", "from", "they", "will", "would", "there", "their", "about", "into",
    "your", "does", "did", "been", "tell",
];

/// Maximum number of keywords taken from a query.
pub const MAX_KEYWORDS: usize = 16;

/// Extract the keywords used for candidate pre-filtering.
///
/// Lowercases the query, splits on non-alphanumeric characters, and keeps
/// distinct words of at least three characters that are not stopwords.
pub fn keyword_terms(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut terms: Vec<String> = Vec::new();
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() < 3 || STOPWORDS.contains(&word) {
            continue;
        }
        if !terms.iter().any(|t| t == word) {
            terms.push(word.to_string());
        }
        if terms.len() == MAX_KEYWORDS {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_terms_filters_noise() {
        let terms = keyword_terms("What is the return policy for ORDERS, orders?");
        assert_eq!(terms, vec!["return", "policy", "orders"]);
    }

    #[test]
    fn test_keyword_terms_empty() {
        assert!(keyword_terms("").is_empty());
        assert!(keyword_terms("a an of to").is_empty());
    }

    #[test]
    fn test_keyword_terms_capped() {
        let q = (0..40)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(keyword_terms(&q).len(), MAX_KEYWORDS);
    }
}
