//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal config is:
//!
//! ```toml
//! [db]
//! path = "./data/bkb.sqlite"
//! ```
//!
//! [`load_config`] parses and validates; invalid combinations fail early
//! with a message naming the offending key.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use brandkb_core::answer::{AssistantProfile, AssistantProfiles};
use brandkb_core::kb::KbSettings;
use brandkb_core::retrieve::LimitBounds;

/// Environment variable that overrides `gateway.token_salt`.
pub const TOKEN_SALT_ENV: &str = "BKB_TOKEN_SALT";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub assistants: AssistantsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_keyword_candidates")]
    pub keyword_candidates: i64,
    #[serde(default = "default_scan_limit")]
    pub scan_limit: i64,
    #[serde(default = "default_random_sample")]
    pub random_sample: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            keyword_candidates: default_keyword_candidates(),
            scan_limit: default_scan_limit(),
            random_sample: default_random_sample(),
        }
    }
}

impl RetrievalConfig {
    pub fn limits(&self) -> LimitBounds {
        LimitBounds::new(self.default_limit, self.max_limit)
    }
}

fn default_limit() -> usize {
    5
}
fn default_max_limit() -> usize {
    50
}
fn default_keyword_candidates() -> i64 {
    200
}
fn default_scan_limit() -> i64 {
    5000
}
fn default_random_sample() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Retries after a failed chat call. Off by default: an answer is a
    /// single attempt unless the operator opts in.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            max_retries: 0,
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_chat_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantsConfig {
    #[serde(default = "default_public_profile")]
    pub public: AssistantProfile,
    #[serde(default = "default_private_profile")]
    pub private: AssistantProfile,
}

impl Default for AssistantsConfig {
    fn default() -> Self {
        Self {
            public: default_public_profile(),
            private: default_private_profile(),
        }
    }
}

impl AssistantsConfig {
    pub fn profiles(&self) -> AssistantProfiles {
        AssistantProfiles {
            public: self.public.clone(),
            private: self.private.clone(),
        }
    }
}

fn default_public_profile() -> AssistantProfile {
    AssistantProfile {
        system_prompt: "You are the brand's website assistant. Answer visitors' questions \
                        using only the provided context. If the context does not cover the \
                        question, say so."
            .to_string(),
        model: "gpt-4o-mini".to_string(),
        temperature: 0.7,
    }
}

fn default_private_profile() -> AssistantProfile {
    AssistantProfile {
        system_prompt: "You are a knowledgeable assistant for members. Answer using the \
                        provided context, including member-only material."
            .to_string(),
        model: "gpt-4o-mini".to_string(),
        temperature: 0.5,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_hour: u64,
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,
    #[serde(default)]
    pub token_salt: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_hour: default_rate_limit(),
            rate_limit_enabled: true,
            token_salt: None,
        }
    }
}

impl GatewayConfig {
    /// Salt for token hashing; `BKB_TOKEN_SALT` wins over the file.
    pub fn resolved_salt(&self) -> Option<String> {
        std::env::var(TOKEN_SALT_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.token_salt.clone())
    }
}

fn default_rate_limit() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResearchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_research_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_research_timeout(),
            max_bytes: default_max_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_research_timeout() -> u64 {
    20
}
fn default_max_bytes() -> usize {
    2_000_000
}
fn default_user_agent() -> String {
    format!("brandkb/{}", env!("CARGO_PKG_VERSION"))
}

/// File selection for `bkb ingest <path>`.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.html".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    pub fn kb_settings(&self) -> KbSettings {
        KbSettings {
            chunk_size: self.chunking.chunk_size,
            overlap: self.chunking.overlap,
            keyword_candidates: self.retrieval.keyword_candidates,
            scan_limit: self.retrieval.scan_limit,
            random_sample: self.retrieval.random_sample,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    // Retrieval
    let r = &config.retrieval;
    if !(1..=50).contains(&r.max_limit) {
        bail!("retrieval.max_limit must be in [1, 50]");
    }
    if r.default_limit < 1 || r.default_limit > r.max_limit {
        bail!("retrieval.default_limit must be in [1, retrieval.max_limit]");
    }
    if r.keyword_candidates < 1 || r.scan_limit < 1 || r.random_sample < 1 {
        bail!("retrieval candidate bounds must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hashing, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    // Chat
    match config.chat.provider.as_str() {
        "disabled" | "openai" | "ollama" | "echo" => {}
        other => bail!(
            "Unknown chat provider: '{}'. Must be disabled, openai, ollama, or echo.",
            other
        ),
    }
    for (name, profile) in [
        ("public", &config.assistants.public),
        ("private", &config.assistants.private),
    ] {
        if !(0.0..=2.0).contains(&profile.temperature) {
            bail!("assistants.{}.temperature must be in [0.0, 2.0]", name);
        }
        if profile.model.trim().is_empty() {
            bail!("assistants.{}.model must not be empty", name);
        }
    }

    // Gateway
    if config.gateway.rate_limit_enabled && config.gateway.rate_limit_per_hour == 0 {
        bail!("gateway.rate_limit_per_hour must be > 0 when rate limiting is enabled");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./kb.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.default_limit, 5);
        assert_eq!(config.gateway.rate_limit_per_hour, 1000);
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\noverlap = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("chunking.overlap"));
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_chat_provider_rejected() {
        let err = parse("[db]\npath = \"x\"\n[chat]\nprovider = \"bard\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown chat provider"));
    }

    #[test]
    fn test_assistant_profiles_parse() {
        let config = parse(
            r#"
[db]
path = "x"

[assistants.public]
system_prompt = "Be brief."
model = "small"
temperature = 0.1
"#,
        )
        .unwrap();
        assert_eq!(config.assistants.public.model, "small");
        assert_eq!(config.assistants.private.model, "gpt-4o-mini");
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = parse(include_str!("../config/bkb.example.toml")).unwrap();
        assert_eq!(config.ingest.include_globs.len(), 3);
        assert!(config.research.enabled);
    }
}
