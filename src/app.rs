//! Wiring of the SQLite store, providers, and services from a [`Config`].

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use brandkb_core::answer::Composer;
use brandkb_core::kb::KnowledgeBase;
use brandkb_core::retrieve::Retriever;
use brandkb_core::tokens::TokenService;

use crate::chat::create_chat_model;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::gateway::Gateway;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::research::HttpResearcher;
use crate::sqlite_store::SqliteStore;

pub struct Services {
    pub pool: SqlitePool,
    pub kb: Arc<KnowledgeBase>,
    pub retriever: Retriever,
    pub composer: Composer,
    pub tokens: Arc<TokenService>,
    pub gateway: Arc<Gateway>,
}

impl Services {
    /// Connect to the database and build every service. The schema must
    /// already exist (`bkb init`).
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Self::from_pool(config, pool)
    }

    pub fn from_pool(config: &Config, pool: SqlitePool) -> Result<Self> {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let embedder = create_embedder(&config.embedding)?;
        let kb = Arc::new(KnowledgeBase::new(
            store.clone(),
            embedder,
            config.kb_settings(),
        ));
        let retriever = Retriever::new(Arc::clone(&kb));

        let mut composer = Composer::new(
            retriever.clone(),
            create_chat_model(&config.chat)?,
            config.assistants.profiles(),
        )
        .with_limit(config.retrieval.default_limit);
        if config.research.enabled {
            composer = composer.with_researcher(Arc::new(HttpResearcher::new(&config.research)?));
        }

        let tokens = Arc::new(TokenService::new(store, config.gateway.resolved_salt()));
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::from_gateway(
            &config.gateway,
        )));
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&tokens),
            limiter,
            Arc::clone(&kb),
            retriever.clone(),
        )
        .with_limits(config.retrieval.limits()));

        Ok(Self {
            pool,
            kb,
            retriever,
            composer,
            tokens,
            gateway,
        })
    }
}
