//! Token-scoped capability gateway.
//!
//! Every invocation runs the same pipeline:
//!
//! 1. authenticate the bearer secret
//! 2. charge the per-token and per-IP rate limits
//! 3. resolve the action name
//! 4. check the token's permission against the capability
//! 5. execute within the token's visibility scope
//! 6. record `last_used_at`
//!
//! The manifest is computed from the token's permission alone.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use brandkb_core::error::{KbError, KbResult};
use brandkb_core::kb::KnowledgeBase;
use brandkb_core::models::{Permission, TokenRecord, TokenType};
use brandkb_core::retrieve::{LimitBounds, Retriever};
use brandkb_core::tokens::TokenService;

use crate::capabilities::{CapabilityContext, CapabilityRegistry};
use crate::rate_limit::RateLimiter;

pub const SERVER_NAME: &str = "brandkb";

#[derive(Debug, Clone, Serialize)]
pub struct TokenSummary {
    pub name: String,
    pub token_type: TokenType,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub required_permission: Permission,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub token: TokenSummary,
    pub capabilities: Vec<CapabilityDescriptor>,
}

pub struct Gateway {
    tokens: Arc<TokenService>,
    limiter: Arc<RateLimiter>,
    registry: CapabilityRegistry,
    kb: Arc<KnowledgeBase>,
    retriever: Retriever,
    limits: LimitBounds,
}

impl Gateway {
    pub fn new(
        tokens: Arc<TokenService>,
        limiter: Arc<RateLimiter>,
        kb: Arc<KnowledgeBase>,
        retriever: Retriever,
    ) -> Self {
        Self {
            tokens,
            limiter,
            registry: CapabilityRegistry::with_builtins(),
            kb,
            retriever,
            limits: LimitBounds::default(),
        }
    }

    pub fn with_limits(mut self, limits: LimitBounds) -> Self {
        self.limits = limits;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Manifest for the holder of `secret`. Unusable tokens get
    /// [`KbError::InvalidToken`].
    pub async fn manifest(&self, secret: &str) -> KbResult<Manifest> {
        let token = self.tokens.authenticate(secret).await?;
        Ok(self.manifest_for(&token))
    }

    pub fn manifest_for(&self, token: &TokenRecord) -> Manifest {
        let capabilities = self
            .registry
            .permitted(token.permission)
            .map(|c| CapabilityDescriptor {
                name: c.name().to_string(),
                description: c.description().to_string(),
                required_permission: c.required_permission(),
                parameters: c.parameters_schema(),
            })
            .collect();

        Manifest {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            token: TokenSummary {
                name: token.name.clone(),
                token_type: token.token_type,
                permissions: token.permission.implied(),
            },
            capabilities,
        }
    }

    /// Run `action` with `parameters` on behalf of the holder of `secret`.
    pub async fn invoke(
        &self,
        secret: &str,
        client_ip: &str,
        action: &str,
        parameters: Value,
    ) -> KbResult<Value> {
        let started = Instant::now();
        let token = self.tokens.authenticate(secret).await?;
        self.limiter.check(token.id, client_ip)?;

        let capability = self.registry.find(action).ok_or_else(|| {
            tracing::warn!(token_id = token.id, action, "unknown gateway action");
            KbError::invalid_input(format!("invalid action '{}'", action))
        })?;

        let required = capability.required_permission();
        if !token.permission.satisfies(required) {
            tracing::warn!(token_id = token.id, action, %required, "gateway call forbidden");
            return Err(KbError::Forbidden(format!(
                "'{}' requires the {} permission",
                action, required
            )));
        }

        let ctx = CapabilityContext {
            kb: &self.kb,
            retriever: &self.retriever,
            token: &token,
            limits: self.limits,
        };
        let result = capability.execute(parameters, &ctx).await;

        match &result {
            Ok(_) => {
                if let Err(e) = self.tokens.touch(token.id).await {
                    tracing::warn!(token_id = token.id, error = %e, "failed to record token use");
                }
                tracing::info!(
                    token_id = token.id,
                    action,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "gateway call"
                );
            }
            Err(e) => {
                tracing::warn!(token_id = token.id, action, error = %e, "gateway call failed");
            }
        }
        result
    }
}
