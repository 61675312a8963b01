//! Chat-completion backends behind the core [`ChatModel`] trait.
//!
//! The model name comes from the assistant profile on every call, so one
//! backend serves both the public and the member assistant.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use brandkb_core::answer::ChatModel;

use crate::config::ChatConfig;
use crate::http;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub fn create_chat_model(config: &ChatConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "echo" => Ok(Arc::new(EchoChat)),
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    async fn chat(&self, _: &str, _: &str, _: f32, _: &str) -> Result<String> {
        bail!("Chat provider is disabled")
    }
}

/// Returns the user prompt unchanged. Offline runs and tests.
pub struct EchoChat;

#[async_trait]
impl ChatModel for EchoChat {
    async fn chat(&self, _system: &str, user: &str, _: f32, _: &str) -> Result<String> {
        Ok(user.to_string())
    }
}

fn messages(system: &str, user: &str) -> serde_json::Value {
    serde_json::json!([
        { "role": "system", "content": system },
        { "role": "user", "content": user },
    ])
}

pub struct OpenAiChat {
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            api_key,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn chat(&self, system: &str, user: &str, temperature: f32, model: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages(system, user),
            "temperature": temperature,
        });
        let json = http::post_json(
            &self.client,
            OPENAI_CHAT_URL,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_reply(&json)
    }
}

pub struct OllamaChat {
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        Ok(Self {
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat(&self, system: &str, user: &str, temperature: f32, model: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages(system, user),
            "stream": false,
            "options": { "temperature": temperature },
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/chat", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_reply(&json)
    }
}

fn parse_openai_reply(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

fn parse_ollama_reply(json: &serde_json::Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replies() {
        let openai = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": " Hello. " } }]
        });
        assert_eq!(parse_openai_reply(&openai).unwrap(), "Hello.");
        assert!(parse_openai_reply(&serde_json::json!({ "choices": [] })).is_err());

        let ollama = serde_json::json!({ "message": { "content": "Hi" }, "done": true });
        assert_eq!(parse_ollama_reply(&ollama).unwrap(), "Hi");
    }

    #[tokio::test]
    async fn test_echo_and_disabled() {
        let echo = create_chat_model(&ChatConfig {
            provider: "echo".into(),
            ..ChatConfig::default()
        })
        .unwrap();
        assert_eq!(echo.chat("sys", "question", 0.2, "m").await.unwrap(), "question");

        let disabled = create_chat_model(&ChatConfig::default()).unwrap();
        assert!(disabled.chat("sys", "q", 0.2, "m").await.is_err());
    }

    #[tokio::test]
    async fn test_default_chat_makes_one_attempt() {
        use axum::{extract::State, http::StatusCode, routing::post, Router};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/api/chat",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::SERVICE_UNAVAILABLE
                }),
            )
            .with_state(Arc::clone(&hits));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let chat = create_chat_model(&ChatConfig {
            provider: "ollama".into(),
            url: Some(format!("http://{}", addr)),
            ..ChatConfig::default()
        })
        .unwrap();
        let err = chat.chat("sys", "q", 0.2, "m").await.unwrap_err();
        assert!(err.to_string().contains("503"), "{:#}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
