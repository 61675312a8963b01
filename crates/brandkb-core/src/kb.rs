//! Document-level operations over a [`ChunkStore`].
//!
//! [`KnowledgeBase`] is the write path (chunk → embed → replace) and the
//! candidate pre-filter used by the retriever.
//!
//! # Candidate Cascade
//!
//! ```text
//! query ──▶ keyword match in scope ──(empty)──▶ shared chunks in scope
//!                 │                                   │
//!                 ▼                               (empty)
//!             Keyword                                 ▼
//!                                          random sample over scope
//! ```
//!
//! Each stage is bounded by [`KbSettings`]. The random sample trades recall
//! for bounded scoring cost when no textual signal narrows the corpus.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::chunk::chunk_text;
use crate::embedding::Embedder;
use crate::error::{KbError, KbResult};
use crate::models::{
    Chunk, DocumentInput, EntryChunk, EntryDetail, EntryQuery, EntrySummary, NewChunk, Scope,
};
use crate::store::ChunkStore;

/// Chunking and candidate bounds.
#[derive(Debug, Clone)]
pub struct KbSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    pub keyword_candidates: i64,
    pub scan_limit: i64,
    pub random_sample: i64,
}

impl Default for KbSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            keyword_candidates: 200,
            scan_limit: 5000,
            random_sample: 100,
        }
    }
}

/// Result of a successful [`KnowledgeBase::put_document`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestReport {
    pub content_id: String,
    pub title: String,
    pub chunks: usize,
    /// Chunks of the previous generation that were replaced.
    pub replaced: u64,
}

/// Which cascade stage produced a candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Keyword,
    SharedScan,
    RandomSample,
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateSource::Keyword => "keyword",
            CandidateSource::SharedScan => "shared_scan",
            CandidateSource::RandomSample => "random_sample",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candidates {
    pub source: CandidateSource,
    pub chunks: Vec<Chunk>,
}

/// Optional field overrides for [`KnowledgeBase::update_entry`].
///
/// Fields left `None` keep the stored value.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub title: Option<String>,
    pub content: String,
    pub content_type: Option<String>,
    pub is_public: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

pub struct KnowledgeBase {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    settings: KbSettings,
}

impl KnowledgeBase {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        settings: KbSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn settings(&self) -> &KbSettings {
        &self.settings
    }

    /// Chunk, embed, and atomically replace a document.
    ///
    /// Every chunk is embedded before the store is touched, so an embedding
    /// failure leaves the previous generation intact.
    pub async fn put_document(&self, doc: &DocumentInput) -> KbResult<IngestReport> {
        let content_id = doc.resolved_content_id();
        let fail = |reason: String| {
            error!(title = %doc.title, content_id = %content_id, %reason, "ingestion failed");
            KbError::IngestionFailed {
                title: doc.title.clone(),
                reason,
            }
        };

        if doc.title.trim().is_empty() {
            return Err(fail("title is empty".to_string()));
        }

        let pieces = chunk_text(&doc.content, self.settings.chunk_size, self.settings.overlap)
            .map_err(|e| fail(e.to_string()))?;
        if pieces.is_empty() {
            return Err(fail("content is empty".to_string()));
        }

        let created_at = Utc::now();
        let model = self.embedder.model_name().to_string();
        let mut rows = Vec::with_capacity(pieces.len());
        for (i, text) in pieces.into_iter().enumerate() {
            let embedding = self
                .embedder
                .embed(&text)
                .await
                .map_err(|e| fail(format!("embedding chunk {}: {:#}", i, e)))?;
            if embedding.is_empty() {
                return Err(fail(format!("embedding chunk {} returned no values", i)));
            }
            rows.push(NewChunk {
                content_id: content_id.clone(),
                chunk_index: i as i64,
                title: doc.title.clone(),
                content: text,
                content_type: doc.content_type.clone(),
                embedding,
                embedding_model: model.clone(),
                owner_id: doc.owner_id,
                is_public: doc.is_public,
                metadata: doc.metadata.clone(),
                created_at,
            });
        }

        let outcome = self
            .store
            .replace_document(&content_id, &rows)
            .await
            .map_err(|e| {
                error!(title = %doc.title, content_id = %content_id, error = %format!("{:#}", e), "chunk write failed");
                KbError::Storage(e)
            })?;

        info!(
            content_id = %content_id,
            chunks = outcome.inserted,
            replaced = outcome.deleted,
            "document ingested"
        );

        Ok(IngestReport {
            content_id,
            title: doc.title.clone(),
            chunks: rows.len(),
            replaced: outcome.deleted,
        })
    }

    /// Remove every chunk of a document. Returns the number deleted.
    pub async fn delete_document(&self, content_id: &str) -> KbResult<u64> {
        let deleted = self.store.delete_document(content_id).await?;
        info!(content_id, deleted, "document deleted");
        Ok(deleted)
    }

    pub async fn set_visibility(&self, content_id: &str, is_public: bool) -> KbResult<u64> {
        let n = self.store.set_visibility(content_id, is_public).await?;
        if n == 0 {
            return Err(KbError::not_found(format!("no entry '{}'", content_id)));
        }
        Ok(n)
    }

    pub async fn set_owner(&self, content_id: &str, owner_id: i64) -> KbResult<u64> {
        let n = self.store.set_owner(content_id, owner_id).await?;
        if n == 0 {
            return Err(KbError::not_found(format!("no entry '{}'", content_id)));
        }
        Ok(n)
    }

    /// Bounded candidate set for `query` within `scope`.
    pub async fn candidates(&self, scope: &Scope, query: &str) -> KbResult<Candidates> {
        if !query.trim().is_empty() {
            let chunks = self
                .store
                .keyword_candidates(query, scope, self.settings.keyword_candidates)
                .await?;
            if !chunks.is_empty() {
                debug!(count = chunks.len(), "keyword candidates");
                return Ok(Candidates {
                    source: CandidateSource::Keyword,
                    chunks,
                });
            }
        }

        let chunks = self
            .store
            .scope_candidates(&scope.shared_subset(), self.settings.scan_limit)
            .await?;
        if !chunks.is_empty() {
            debug!(count = chunks.len(), "shared scan candidates");
            return Ok(Candidates {
                source: CandidateSource::SharedScan,
                chunks,
            });
        }

        let chunks = self
            .store
            .random_candidates(scope, self.settings.random_sample)
            .await?;
        debug!(count = chunks.len(), "random sample candidates");
        Ok(Candidates {
            source: CandidateSource::RandomSample,
            chunks,
        })
    }

    /// Full view of one document, or `NotFound` when it is absent or
    /// outside `scope`.
    pub async fn get_entry(&self, content_id: &str, scope: &Scope) -> KbResult<EntryDetail> {
        let chunks = self.store.document_chunks(content_id).await?;
        let first = match chunks.first() {
            Some(c) if scope.admits(c.owner_id, c.is_public) => c,
            _ => return Err(KbError::not_found(format!("no entry '{}'", content_id))),
        };

        let summary = EntrySummary {
            content_id: first.content_id.clone(),
            title: first.title.clone(),
            content_type: first.content_type.clone(),
            owner_id: first.owner_id,
            is_public: first.is_public,
            chunk_count: chunks.len() as i64,
            metadata: first.metadata.clone(),
            created_at: first.created_at,
        };
        let chunks = chunks
            .into_iter()
            .map(|c| EntryChunk {
                id: c.id,
                index: c.chunk_index,
                content: c.content,
            })
            .collect();

        Ok(EntryDetail { summary, chunks })
    }

    pub async fn list_entries(&self, query: &EntryQuery) -> KbResult<Vec<EntrySummary>> {
        Ok(self.store.list_entries(query).await?)
    }

    /// Ingest a new entry; the `content_id` derives from title + content.
    ///
    /// An existing document with the same id is only replaced when the
    /// caller's `scope` can see it. Otherwise the call is `NotFound`, the
    /// same answer a lookup of that id would give.
    pub async fn add_entry(&self, doc: DocumentInput, scope: &Scope) -> KbResult<IngestReport> {
        let doc = DocumentInput {
            content_id: None,
            ..doc
        };
        if !scope.admits(doc.owner_id, doc.is_public) {
            return Err(KbError::invalid_input(
                "entry owner or visibility is outside the caller's scope",
            ));
        }
        let content_id = doc.resolved_content_id();
        let existing = self.store.document_chunks(&content_id).await?;
        if existing.iter().any(|c| !scope.admits(c.owner_id, c.is_public)) {
            warn!(content_id = %content_id, "add would replace an entry outside the caller's scope");
            return Err(KbError::not_found(format!("no entry '{}'", content_id)));
        }
        self.put_document(&doc).await
    }

    /// Re-ingest an existing entry under its current `content_id`.
    pub async fn update_entry(
        &self,
        content_id: &str,
        update: EntryUpdate,
        scope: &Scope,
    ) -> KbResult<IngestReport> {
        let existing = self.get_entry(content_id, scope).await?.summary;
        let doc = DocumentInput {
            content_id: Some(existing.content_id),
            title: update.title.unwrap_or(existing.title),
            content: update.content,
            content_type: update.content_type.unwrap_or(existing.content_type),
            owner_id: existing.owner_id,
            is_public: update.is_public.unwrap_or(existing.is_public),
            metadata: update.metadata.unwrap_or(existing.metadata),
        };
        self.put_document(&doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::store::memory::InMemoryStore;
    use anyhow::anyhow;
    use async_trait::async_trait;

    fn small_kb(store: Arc<InMemoryStore>) -> KnowledgeBase {
        KnowledgeBase::new(
            store,
            Arc::new(HashingEmbedder::new(64)),
            KbSettings {
                chunk_size: 40,
                overlap: 10,
                ..KbSettings::default()
            },
        )
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Err(anyhow!("provider returned 500"))
        }
    }

    #[tokio::test]
    async fn test_reingest_keeps_single_generation() {
        let store = Arc::new(InMemoryStore::new());
        let kb = small_kb(store.clone());
        let doc = DocumentInput::new("Story", "x".repeat(100));

        let first = kb.put_document(&doc).await.unwrap();
        let second = kb.put_document(&doc).await.unwrap();
        assert_eq!(first.content_id, second.content_id);
        assert_eq!(second.replaced as usize, first.chunks);
        assert_eq!(store.chunk_count(), first.chunks);
    }

    #[tokio::test]
    async fn test_empty_content_is_ingestion_failure() {
        let kb = small_kb(Arc::new(InMemoryStore::new()));
        let err = kb
            .put_document(&DocumentInput::new("Blank", "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::IngestionFailed { ref title, .. } if title == "Blank"));
    }

    #[tokio::test]
    async fn test_embed_failure_names_title_and_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let kb = KnowledgeBase::new(
            store.clone(),
            Arc::new(FailingEmbedder),
            KbSettings::default(),
        );
        let err = kb
            .put_document(&DocumentInput::new("Pricing", "Plans start at ten dollars."))
            .await
            .unwrap_err();
        match err {
            KbError::IngestionFailed { title, reason } => {
                assert_eq!(title, "Pricing");
                assert!(reason.contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn test_candidate_cascade() {
        let store = Arc::new(InMemoryStore::new());
        let kb = small_kb(store);

        // Only private knowledge for user 5: the shared scan is empty, so
        // a non-matching query falls through to the random sample.
        kb.put_document(&DocumentInput::new("Notes", "grinder settings").with_owner(5))
            .await
            .unwrap();
        let scope = Scope::for_owner(Some(5));
        let c = kb.candidates(&scope, "zzzz").await.unwrap();
        assert_eq!(c.source, CandidateSource::RandomSample);
        assert_eq!(c.chunks.len(), 1);

        let c = kb.candidates(&scope, "grinder").await.unwrap();
        assert_eq!(c.source, CandidateSource::Keyword);

        kb.put_document(&DocumentInput::new("About", "family roastery"))
            .await
            .unwrap();
        let c = kb.candidates(&scope, "").await.unwrap();
        assert_eq!(c.source, CandidateSource::SharedScan);
        assert!(c.chunks.iter().all(|ch| ch.owner_id == 0));
    }

    #[tokio::test]
    async fn test_visibility_and_owner_updates() {
        let kb = small_kb(Arc::new(InMemoryStore::new()));
        let report = kb
            .put_document(&DocumentInput::new("Hours", "Open daily from eight until six"))
            .await
            .unwrap();

        kb.set_visibility(&report.content_id, false).await.unwrap();
        let hidden = kb
            .get_entry(&report.content_id, &Scope::shared().public_only())
            .await;
        assert!(matches!(hidden, Err(KbError::NotFound(_))));

        kb.set_owner(&report.content_id, 9).await.unwrap();
        let entry = kb
            .get_entry(&report.content_id, &Scope::for_owner(Some(9)))
            .await
            .unwrap();
        assert_eq!(entry.summary.owner_id, 9);

        assert!(matches!(
            kb.set_owner("missing", 1).await,
            Err(KbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_entry_keeps_content_id() {
        let kb = small_kb(Arc::new(InMemoryStore::new()));
        let added = kb
            .add_entry(
                DocumentInput::new("FAQ", "Shipping takes three days"),
                &Scope::shared(),
            )
            .await
            .unwrap();

        let updated = kb
            .update_entry(
                &added.content_id,
                EntryUpdate {
                    content: "Shipping takes two days".into(),
                    ..EntryUpdate::default()
                },
                &Scope::shared(),
            )
            .await
            .unwrap();
        assert_eq!(updated.content_id, added.content_id);

        let entry = kb
            .get_entry(&added.content_id, &Scope::shared())
            .await
            .unwrap();
        assert_eq!(entry.summary.title, "FAQ");
        assert_eq!(entry.chunks[0].content, "Shipping takes two days");
    }

    #[tokio::test]
    async fn test_add_entry_cannot_replace_hidden_entry() {
        let kb = small_kb(Arc::new(InMemoryStore::new()));
        let private = kb
            .put_document(
                &DocumentInput::new("Notes", "secret roadmap")
                    .with_owner(5)
                    .with_visibility(false),
            )
            .await
            .unwrap();

        let err = kb
            .add_entry(
                DocumentInput::new("Notes", "secret roadmap"),
                &Scope::shared().public_only(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::NotFound(_)));

        let hidden = kb
            .put_document(&DocumentInput::new("Plan", "launch date").with_visibility(false))
            .await
            .unwrap();
        let err = kb
            .add_entry(
                DocumentInput::new("Plan", "launch date"),
                &Scope::shared().public_only(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::NotFound(_)));

        let entry = kb.get_entry(&private.content_id, &Scope::unrestricted()).await.unwrap();
        assert_eq!(entry.summary.owner_id, 5);
        assert!(!entry.summary.is_public);
        let entry = kb.get_entry(&hidden.content_id, &Scope::unrestricted()).await.unwrap();
        assert!(!entry.summary.is_public);
    }

    #[tokio::test]
    async fn test_add_entry_rejects_owner_outside_scope() {
        let kb = small_kb(Arc::new(InMemoryStore::new()));
        let err = kb
            .add_entry(
                DocumentInput::new("Mine", "member text").with_owner(3),
                &Scope::shared(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::InvalidInput(_)));
    }
}
