//! Grounded answer composition.
//!
//! [`Composer`] retrieves context, renders it into a prompt, and makes one
//! call to a [`ChatModel`]. Queries that start with [`RESEARCH_PREFIX`]
//! skip retrieval: the URL is fetched through a [`Researcher`], ingested,
//! and the composer then answers a summary request for the new document.
//!
//! There are no retries here. A failed embed, retrieval, or chat call is
//! reported as [`KbError::AnswerFailed`], never as a partial answer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{KbError, KbResult};
use crate::kb::IngestReport;
use crate::models::{DocumentInput, ScoredChunk, Scope};
use crate::retrieve::{Retriever, DEFAULT_LIMIT};

/// Case-insensitive prefix that turns a query into a research request.
pub const RESEARCH_PREFIX: &str = "please research this url";

/// `chat(system, user, temperature, model) -> text`.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        model: &str,
    ) -> anyhow::Result<String>;
}

/// Fetches a URL and extracts it into an ingestible document.
#[async_trait]
pub trait Researcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<DocumentInput>;
}

/// System prompt plus model settings for one assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantProfile {
    pub system_prompt: String,
    pub model: String,
    pub temperature: f32,
}

/// Which assistant profile answers, and which knowledge it may cite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantScope {
    /// Site visitors: shared profile, public chunks only.
    Public,
    /// Members: member profile, no visibility filter.
    Private,
}

#[derive(Debug, Clone)]
pub struct AssistantProfiles {
    pub public: AssistantProfile,
    pub private: AssistantProfile,
}

impl AssistantProfiles {
    pub fn for_scope(&self, scope: AssistantScope) -> &AssistantProfile {
        match scope {
            AssistantScope::Public => &self.public,
            AssistantScope::Private => &self.private,
        }
    }
}

/// A chunk the answer was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub content_id: String,
    pub title: String,
    pub chunk_index: i64,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    /// Set when the query was a research request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub researched: Option<IngestReport>,
}

/// Render retrieved chunks as the context block.
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|s| format!("Title: {}\nContent: {}", s.chunk.title, s.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_user_prompt(context: &str, query: &str) -> String {
    format!(
        "Use the following context to answer the question:\n\n{}\n\nQuestion: {}",
        context, query
    )
}

/// Split a research request into its URL.
///
/// Returns `Ok(None)` for ordinary queries and `InvalidInput` when the
/// prefix is present without an http(s) URL after it.
pub fn research_target(query: &str) -> KbResult<Option<&str>> {
    let trimmed = query.trim_start();
    let head = match trimmed.get(..RESEARCH_PREFIX.len()) {
        Some(h) if h.eq_ignore_ascii_case(RESEARCH_PREFIX) => h,
        _ => return Ok(None),
    };
    let rest = trimmed[head.len()..].trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    let url = rest.split_whitespace().next().unwrap_or("");
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Some(url))
    } else {
        Err(KbError::invalid_input(
            "research request needs an http(s) URL",
        ))
    }
}

pub struct Composer {
    retriever: Retriever,
    chat: Arc<dyn ChatModel>,
    researcher: Option<Arc<dyn Researcher>>,
    profiles: AssistantProfiles,
    limit: usize,
}

impl Composer {
    pub fn new(retriever: Retriever, chat: Arc<dyn ChatModel>, profiles: AssistantProfiles) -> Self {
        Self {
            retriever,
            chat,
            researcher: None,
            profiles,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_researcher(mut self, researcher: Arc<dyn Researcher>) -> Self {
        self.researcher = Some(researcher);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Answer `query` for the given assistant scope and optional member.
    pub async fn answer(
        &self,
        query: &str,
        scope: AssistantScope,
        owner_id: Option<i64>,
    ) -> KbResult<Answer> {
        if query.trim().is_empty() {
            return Err(KbError::invalid_input("query is empty"));
        }

        if let Some(url) = research_target(query)? {
            return self.research(url, scope, owner_id).await;
        }
        self.answer_grounded(query, scope, owner_id).await
    }

    /// Retrieval plus one chat call. Never dispatches research.
    async fn answer_grounded(
        &self,
        query: &str,
        scope: AssistantScope,
        owner_id: Option<i64>,
    ) -> KbResult<Answer> {
        let mut retrieval_scope = Scope::for_owner(owner_id);
        if scope == AssistantScope::Public {
            retrieval_scope = retrieval_scope.public_only();
        }

        let retrieval = self
            .retriever
            .retrieve(query, &retrieval_scope, self.limit)
            .await
            .map_err(|e| KbError::AnswerFailed(format!("retrieval: {}", e)))?;

        let profile = self.profiles.for_scope(scope);
        let prompt = build_user_prompt(&build_context(&retrieval.results), query);
        let text = self
            .chat
            .chat(&profile.system_prompt, &prompt, profile.temperature, &profile.model)
            .await
            .map_err(|e| {
                error!(model = %profile.model, error = %format!("{:#}", e), "chat call failed");
                KbError::AnswerFailed(format!("chat model '{}': {:#}", profile.model, e))
            })?;

        let sources = retrieval
            .results
            .iter()
            .map(|s| SourceRef {
                content_id: s.chunk.content_id.clone(),
                title: s.chunk.title.clone(),
                chunk_index: s.chunk.chunk_index,
                score: s.score,
            })
            .collect();

        Ok(Answer {
            text,
            sources,
            researched: None,
        })
    }

    async fn research(
        &self,
        url: &str,
        scope: AssistantScope,
        owner_id: Option<i64>,
    ) -> KbResult<Answer> {
        let researcher = self
            .researcher
            .as_ref()
            .ok_or_else(|| KbError::AnswerFailed("URL research is not configured".into()))?;

        let mut doc = researcher.fetch(url).await.map_err(|e| {
            error!(url, error = %format!("{:#}", e), "research fetch failed");
            KbError::AnswerFailed(format!("could not fetch {}: {:#}", url, e))
        })?;
        if let Some(id) = owner_id {
            doc.owner_id = id;
        }

        let report = self
            .retriever
            .knowledge_base()
            .put_document(&doc)
            .await
            .map_err(|e| KbError::AnswerFailed(format!("research ingestion: {}", e)))?;
        info!(url, content_id = %report.content_id, chunks = report.chunks, "researched url ingested");

        let follow_up = format!(
            "Summarize the key points of \"{}\" ({}).",
            report.title, url
        );
        let mut answer = self.answer_grounded(&follow_up, scope, owner_id).await?;
        answer.researched = Some(report);
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::kb::{KbSettings, KnowledgeBase};
    use crate::store::memory::InMemoryStore;
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// Records prompts and echoes the user prompt back.
    #[derive(Default)]
    struct EchoChat {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ChatModel for EchoChat {
        async fn chat(
            &self,
            system: &str,
            user: &str,
            _temperature: f32,
            model: &str,
        ) -> anyhow::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string(), model.to_string()));
            Ok(user.to_string())
        }
    }

    struct BrokenChat;

    #[async_trait]
    impl ChatModel for BrokenChat {
        async fn chat(&self, _: &str, _: &str, _: f32, _: &str) -> anyhow::Result<String> {
            Err(anyhow!("upstream timeout"))
        }
    }

    struct FixedResearcher;

    #[async_trait]
    impl Researcher for FixedResearcher {
        async fn fetch(&self, url: &str) -> anyhow::Result<DocumentInput> {
            Ok(DocumentInput::new(
                "Harvest Report",
                "The harvest report covers Ethiopian yields this season.",
            )
            .with_content_type("external_url")
            .with_metadata(serde_json::json!({ "url": url })))
        }
    }

    fn profiles() -> AssistantProfiles {
        AssistantProfiles {
            public: AssistantProfile {
                system_prompt: "public assistant".into(),
                model: "pub-model".into(),
                temperature: 0.7,
            },
            private: AssistantProfile {
                system_prompt: "member assistant".into(),
                model: "member-model".into(),
                temperature: 0.2,
            },
        }
    }

    async fn seeded_retriever() -> Retriever {
        let kb = Arc::new(KnowledgeBase::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(HashingEmbedder::new(128)),
            KbSettings::default(),
        ));
        kb.put_document(&DocumentInput::new(
            "Origins",
            "Our beans come from Yirgacheffe in Ethiopia.",
        ))
        .await
        .unwrap();
        kb.put_document(
            &DocumentInput::new("Margins", "Internal margin targets are forty percent.")
                .with_visibility(false),
        )
        .await
        .unwrap();
        Retriever::new(kb)
    }

    #[test]
    fn test_prompt_shape() {
        let prompt = build_user_prompt("Title: A\nContent: B", "what?");
        assert!(prompt.starts_with("Use the following context to answer the question:"));
        assert!(prompt.ends_with("Question: what?"));
    }

    #[test]
    fn test_research_target() {
        assert_eq!(research_target("where are you?").unwrap(), None);
        assert_eq!(
            research_target("Please Research This URL: https://example.com/a now").unwrap(),
            Some("https://example.com/a")
        );
        assert!(research_target("please research this url").is_err());
        assert!(research_target("please research this url ftp://x").is_err());
    }

    #[tokio::test]
    async fn test_answer_uses_scope_profile_and_context() {
        let chat = Arc::new(EchoChat::default());
        let composer = Composer::new(seeded_retriever().await, chat.clone(), profiles());

        let answer = composer
            .answer("Where do the beans come from?", AssistantScope::Private, None)
            .await
            .unwrap();
        assert!(answer.text.contains("Yirgacheffe"));
        assert_eq!(answer.sources[0].title, "Origins");

        let calls = chat.calls.lock().unwrap();
        assert_eq!(calls[0].0, "member assistant");
        assert_eq!(calls[0].2, "member-model");
    }

    #[tokio::test]
    async fn test_public_assistant_hides_private_chunks() {
        let chat = Arc::new(EchoChat::default());
        let composer = Composer::new(seeded_retriever().await, chat, profiles());

        let answer = composer
            .answer("margin targets", AssistantScope::Public, None)
            .await
            .unwrap();
        assert!(!answer.text.contains("forty percent"));
        assert!(answer.sources.iter().all(|s| s.title != "Margins"));
    }

    #[tokio::test]
    async fn test_chat_failure_is_answer_failed() {
        let composer = Composer::new(seeded_retriever().await, Arc::new(BrokenChat), profiles());
        let err = composer
            .answer("beans", AssistantScope::Public, None)
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::AnswerFailed(ref m) if m.contains("upstream timeout")));
    }

    #[tokio::test]
    async fn test_research_ingests_then_summarizes() {
        let chat = Arc::new(EchoChat::default());
        let composer = Composer::new(seeded_retriever().await, chat.clone(), profiles())
            .with_researcher(Arc::new(FixedResearcher));

        let answer = composer
            .answer(
                "please research this url https://example.com/harvest",
                AssistantScope::Public,
                None,
            )
            .await
            .unwrap();

        let report = answer.researched.expect("research report");
        assert_eq!(report.title, "Harvest Report");
        assert!(answer.text.contains("Summarize the key points of \"Harvest Report\""));
        assert!(answer.sources.iter().any(|s| s.title == "Harvest Report"));
        assert_eq!(chat.calls.lock().unwrap().len(), 1);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_answer_future_is_send() {
        let composer = Composer::new(
            seeded_retriever().await,
            Arc::new(EchoChat::default()),
            profiles(),
        )
        .with_researcher(Arc::new(FixedResearcher));
        let fut = composer.answer(
            "please research this url https://example.com/harvest",
            AssistantScope::Public,
            None,
        );
        assert_send(&fut);
        drop(fut);
        let answer = tokio::spawn(async move {
            let composer = composer;
            composer
                .answer("where are the beans from", AssistantScope::Public, None)
                .await
        })
        .await
        .unwrap()
        .unwrap();
        assert!(answer.researched.is_none());
    }

    #[tokio::test]
    async fn test_research_without_researcher_fails() {
        let composer = Composer::new(
            seeded_retriever().await,
            Arc::new(EchoChat::default()),
            profiles(),
        );
        let err = composer
            .answer(
                "please research this url https://example.com",
                AssistantScope::Private,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::AnswerFailed(_)));
    }
}
