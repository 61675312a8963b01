//! Query-time retrieval: embed, pre-filter, score, rank.
//!
//! ```text
//! query ──▶ embed ──▶ KnowledgeBase::candidates ──▶ cosine ──▶ top-K
//! ```
//!
//! Candidates without a usable vector (missing, other model, dimension
//! mismatch, zero magnitude) are skipped rather than scored as zero.
//! Ranking uses a stable sort, so equal scores keep candidate order and
//! repeated calls over identical data return identical results.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, error};

use crate::embedding::cosine_similarity;
use crate::error::{KbError, KbResult};
use crate::kb::{CandidateSource, KnowledgeBase};
use crate::models::{Chunk, Scope, ScoredChunk};

/// Default number of results.
pub const DEFAULT_LIMIT: usize = 5;
/// Upper bound for external callers.
pub const MAX_LIMIT: usize = 50;

/// Clamp an external limit into `1..=MAX_LIMIT`, defaulting when absent.
pub fn clamp_limit(limit: Option<i64>) -> usize {
    LimitBounds::default().clamp(limit)
}

/// Configured default and ceiling for caller-supplied result limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitBounds {
    pub default: usize,
    pub max: usize,
}

impl LimitBounds {
    pub fn new(default: usize, max: usize) -> Self {
        let max = max.clamp(1, MAX_LIMIT);
        Self {
            default: default.clamp(1, max),
            max,
        }
    }

    pub fn clamp(&self, limit: Option<i64>) -> usize {
        match limit {
            None => self.default,
            Some(n) => n.clamp(1, self.max as i64) as usize,
        }
    }
}

impl Default for LimitBounds {
    fn default() -> Self {
        Self {
            default: DEFAULT_LIMIT,
            max: MAX_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub source: CandidateSource,
    /// Candidates considered before scoring.
    pub considered: usize,
    pub results: Vec<ScoredChunk>,
}

#[derive(Clone)]
pub struct Retriever {
    kb: Arc<KnowledgeBase>,
}

impl Retriever {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    /// Retrieve with the owner scoping used by the site assistant:
    /// shared knowledge plus `owner_id`'s own, when given.
    pub async fn retrieve_for_owner(
        &self,
        query: &str,
        owner_id: Option<i64>,
        limit: usize,
    ) -> KbResult<Retrieval> {
        self.retrieve(query, &Scope::for_owner(owner_id), limit).await
    }

    /// Top `limit` chunks within `scope` by similarity to `query`.
    pub async fn retrieve(&self, query: &str, scope: &Scope, limit: usize) -> KbResult<Retrieval> {
        let embedder = self.kb.embedder();
        let query_vec = embedder.embed(query).await.map_err(|e| {
            error!(error = %format!("{:#}", e), "query embedding failed");
            KbError::RetrievalFailed(format!("query embedding: {:#}", e))
        })?;

        let candidates = self.kb.candidates(scope, query).await.map_err(|e| {
            error!(error = %e, "candidate lookup failed");
            KbError::RetrievalFailed(e.to_string())
        })?;

        let considered = candidates.chunks.len();
        let results = rank(
            &query_vec,
            Some(embedder.model_name()),
            candidates.chunks,
            limit,
        );
        debug!(
            source = candidates.source.as_str(),
            considered,
            returned = results.len(),
            "retrieval complete"
        );

        Ok(Retrieval {
            source: candidates.source,
            considered,
            results,
        })
    }
}

/// Score `candidates` against `query` and keep the best `limit`.
///
/// When `model` is given, candidates embedded by a different model are
/// skipped.
pub fn rank(
    query: &[f32],
    model: Option<&str>,
    candidates: Vec<Chunk>,
    limit: usize,
) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .filter_map(|chunk| {
            if let (Some(want), Some(have)) = (model, chunk.embedding_model.as_deref()) {
                if want != have {
                    return None;
                }
            }
            let score = cosine_similarity(query, chunk.embedding.as_deref()?)?;
            Some(ScoredChunk { chunk, score })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::kb::KbSettings;
    use crate::models::DocumentInput;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;

    fn chunk(id: i64, embedding: Option<Vec<f32>>, model: &str) -> Chunk {
        Chunk {
            id,
            content_id: format!("doc{}", id),
            chunk_index: 0,
            title: "t".into(),
            content: format!("chunk {}", id),
            content_type: "post".into(),
            embedding,
            embedding_model: Some(model.into()),
            owner_id: 0,
            is_public: true,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_rank_orders_and_truncates() {
        let q = vec![1.0, 0.0];
        let out = rank(
            &q,
            None,
            vec![
                chunk(1, Some(vec![0.0, 1.0]), "m"),
                chunk(2, Some(vec![1.0, 0.0]), "m"),
                chunk(3, Some(vec![1.0, 1.0]), "m"),
            ],
            2,
        );
        let ids: Vec<i64> = out.iter().map(|s| s.chunk.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_rank_skips_unusable_vectors() {
        let q = vec![1.0, 0.0];
        let out = rank(
            &q,
            Some("m"),
            vec![
                chunk(1, None, "m"),
                chunk(2, Some(vec![0.0, 0.0]), "m"),
                chunk(3, Some(vec![1.0, 0.0, 0.0]), "m"),
                chunk(4, Some(vec![1.0, 0.0]), "other"),
                chunk(5, Some(vec![0.5, 0.5]), "m"),
            ],
            10,
        );
        let ids: Vec<i64> = out.iter().map(|s| s.chunk.id).collect();
        assert_eq!(ids, vec![5]);
    }

    #[test]
    fn test_rank_ties_keep_candidate_order() {
        let q = vec![1.0, 0.0];
        let out = rank(
            &q,
            None,
            (1..=4).map(|i| chunk(i, Some(vec![1.0, 0.0]), "m")).collect(),
            4,
        );
        let ids: Vec<i64> = out.iter().map(|s| s.chunk.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), 5);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(500)), 50);
        assert_eq!(clamp_limit(Some(12)), 12);
    }

    #[test]
    fn test_configured_limit_bounds() {
        let bounds = LimitBounds::new(3, 10);
        assert_eq!(bounds.clamp(None), 3);
        assert_eq!(bounds.clamp(Some(40)), 10);
        assert_eq!(bounds.clamp(Some(-2)), 1);

        let odd = LimitBounds::new(80, 500);
        assert_eq!(odd, LimitBounds { default: 50, max: 50 });
    }

    #[tokio::test]
    async fn test_scope_isolation() {
        let store = Arc::new(InMemoryStore::new());
        let kb = Arc::new(KnowledgeBase::new(
            store,
            Arc::new(HashingEmbedder::new(128)),
            KbSettings::default(),
        ));
        for (owner, text) in [
            (0, "espresso menu and pricing"),
            (3, "espresso tasting notes for user three"),
            (4, "espresso tasting notes for user four"),
        ] {
            kb.put_document(
                &DocumentInput::new(format!("Owner {}", owner), text).with_owner(owner),
            )
            .await
            .unwrap();
        }

        let retriever = Retriever::new(kb);
        let got = retriever
            .retrieve_for_owner("espresso tasting notes", Some(3), 10)
            .await
            .unwrap();
        assert!(!got.results.is_empty());
        assert!(got
            .results
            .iter()
            .all(|s| s.chunk.owner_id == 0 || s.chunk.owner_id == 3));

        let shared = retriever
            .retrieve_for_owner("espresso tasting notes", None, 10)
            .await
            .unwrap();
        assert!(shared.results.iter().all(|s| s.chunk.owner_id == 0));
    }
}
