//! The six knowledge-base capabilities exposed through the gateway.
//!
//! Each capability declares its name, description, JSON parameter schema,
//! and the permission it requires. The [`CapabilityRegistry`] holds them in
//! manifest order; the gateway looks them up by name and checks the
//! permission before calling [`Capability::execute`].

use async_trait::async_trait;
use serde_json::{Map, Value};

use brandkb_core::error::{KbError, KbResult};
use brandkb_core::kb::{EntryUpdate, KnowledgeBase};
use brandkb_core::models::{DocumentInput, EntryQuery, Permission, Scope, TokenRecord, TokenType};
use brandkb_core::retrieve::{LimitBounds, Retriever};

/// Content type for entries created through the gateway.
pub const GATEWAY_CONTENT_TYPE: &str = "mcp_external";

const LIST_DEFAULT_LIMIT: i64 = 20;
const LIST_MAX_LIMIT: i64 = 100;

/// What a capability may touch during one call.
pub struct CapabilityContext<'a> {
    pub kb: &'a KnowledgeBase,
    pub retriever: &'a Retriever,
    pub token: &'a TokenRecord,
    /// Bounds for `queryKB` result limits.
    pub limits: LimitBounds,
}

impl CapabilityContext<'_> {
    /// Gateway callers see shared knowledge; public tokens only its public part.
    pub fn scope(&self) -> Scope {
        match self.token.token_type {
            TokenType::Public => Scope::shared().public_only(),
            TokenType::Private => Scope::shared(),
        }
    }

    fn public_token(&self) -> bool {
        self.token.token_type == TokenType::Public
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    /// Action name callers pass in `{action, parameters}`.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn required_permission(&self) -> Permission;

    /// JSON Schema for `parameters`.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &CapabilityContext<'_>) -> KbResult<Value>;
}

pub struct CapabilityRegistry {
    capabilities: Vec<Box<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(QueryKb));
        registry.register(Box::new(GetKbEntry));
        registry.register(Box::new(ListKbEntries));
        registry.register(Box::new(AddKbEntry));
        registry.register(Box::new(UpdateKbEntry));
        registry.register(Box::new(DeleteKbEntry));
        registry
    }

    pub fn register(&mut self, capability: Box<dyn Capability>) {
        self.capabilities.push(capability);
    }

    pub fn capabilities(&self) -> &[Box<dyn Capability>] {
        &self.capabilities
    }

    pub fn find(&self, name: &str) -> Option<&dyn Capability> {
        self.capabilities
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Capabilities a holder of `permission` may call, in registry order.
    pub fn permitted(&self, permission: Permission) -> impl Iterator<Item = &dyn Capability> {
        self.capabilities
            .iter()
            .filter(move |c| permission.satisfies(c.required_permission()))
            .map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Parameter helpers ───────────────────────────────────────────────

/// `parameters` as an object; missing or null counts as empty.
fn object(params: &Value) -> KbResult<Map<String, Value>> {
    match params {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        _ => Err(KbError::invalid_input("parameters must be an object")),
    }
}

fn required_str(params: &Map<String, Value>, key: &str) -> KbResult<String> {
    match params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(KbError::invalid_input(format!("'{}' is required", key)))
        }
        Some(_) => Err(KbError::invalid_input(format!("'{}' must be a string", key))),
    }
}

fn optional_str(params: &Map<String, Value>, key: &str) -> KbResult<Option<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(KbError::invalid_input(format!("'{}' must be a string", key))),
    }
}

fn optional_i64(params: &Map<String, Value>, key: &str) -> KbResult<Option<i64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| KbError::invalid_input(format!("'{}' must be an integer", key))),
    }
}

fn optional_bool(params: &Map<String, Value>, key: &str) -> KbResult<Option<bool>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(KbError::invalid_input(format!("'{}' must be a boolean", key))),
    }
}

fn optional_object(params: &Map<String, Value>, key: &str) -> KbResult<Option<Value>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Object(_)) => Ok(Some(v.clone())),
        Some(_) => Err(KbError::invalid_input(format!("'{}' must be an object", key))),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> KbResult<Value> {
    serde_json::to_value(value).map_err(|e| KbError::Storage(e.into()))
}

// ─── Read capabilities ───────────────────────────────────────────────

pub struct QueryKb;

#[async_trait]
impl Capability for QueryKb {
    fn name(&self) -> &'static str {
        "queryKB"
    }

    fn description(&self) -> &'static str {
        "Semantic search over the knowledge base; returns the most relevant chunks"
    }

    fn required_permission(&self) -> Permission {
        Permission::ReadKb
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language query" },
                "limit": { "type": "integer", "minimum": 1, "description": "Capped by the server's configured maximum" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &CapabilityContext<'_>) -> KbResult<Value> {
        let params = object(&params)?;
        let query = required_str(&params, "query")?;
        let limit = ctx.limits.clamp(optional_i64(&params, "limit")?);

        let retrieval = ctx.retriever.retrieve(&query, &ctx.scope(), limit).await?;
        Ok(serde_json::json!({
            "query": query,
            "candidate_source": retrieval.source.as_str(),
            "count": retrieval.results.len(),
            "results": to_json(&retrieval.results)?,
        }))
    }
}

pub struct GetKbEntry;

#[async_trait]
impl Capability for GetKbEntry {
    fn name(&self) -> &'static str {
        "getKBEntry"
    }

    fn description(&self) -> &'static str {
        "Fetch one knowledge-base entry with all of its chunks"
    }

    fn required_permission(&self) -> Permission {
        Permission::ReadKb
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content_id": { "type": "string", "description": "Entry identity hash" }
            },
            "required": ["content_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &CapabilityContext<'_>) -> KbResult<Value> {
        let params = object(&params)?;
        let content_id = required_str(&params, "content_id")?;
        let entry = ctx.kb.get_entry(&content_id, &ctx.scope()).await?;
        to_json(&entry)
    }
}

pub struct ListKbEntries;

#[async_trait]
impl Capability for ListKbEntries {
    fn name(&self) -> &'static str {
        "listKBEntries"
    }

    fn description(&self) -> &'static str {
        "List knowledge-base entries, newest first"
    }

    fn required_permission(&self) -> Permission {
        Permission::ReadKb
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 1, "maximum": 100, "default": 20 },
                "offset": { "type": "integer", "minimum": 0, "default": 0 },
                "content_type": { "type": "string", "description": "Only entries of this type" },
                "search": { "type": "string", "description": "Substring of title or content" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &CapabilityContext<'_>) -> KbResult<Value> {
        let params = object(&params)?;
        let limit = optional_i64(&params, "limit")?
            .unwrap_or(LIST_DEFAULT_LIMIT)
            .clamp(1, LIST_MAX_LIMIT);
        let offset = optional_i64(&params, "offset")?.unwrap_or(0);
        if offset < 0 {
            return Err(KbError::invalid_input("'offset' must be >= 0"));
        }

        let mut query = EntryQuery::new(ctx.scope());
        query.limit = limit;
        query.offset = offset;
        query.content_type = optional_str(&params, "content_type")?;
        query.search = optional_str(&params, "search")?;

        let entries = ctx.kb.list_entries(&query).await?;
        Ok(serde_json::json!({
            "count": entries.len(),
            "limit": limit,
            "offset": offset,
            "entries": to_json(&entries)?,
        }))
    }
}

// ─── Write capabilities ──────────────────────────────────────────────

pub struct AddKbEntry;

#[async_trait]
impl Capability for AddKbEntry {
    fn name(&self) -> &'static str {
        "addKBEntry"
    }

    fn description(&self) -> &'static str {
        "Add a new entry to the knowledge base"
    }

    fn required_permission(&self) -> Permission {
        Permission::ReadWriteKb
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "content": { "type": "string" },
                "content_type": { "type": "string", "default": GATEWAY_CONTENT_TYPE },
                "is_public": { "type": "boolean", "default": true },
                "metadata": { "type": "object" }
            },
            "required": ["title", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &CapabilityContext<'_>) -> KbResult<Value> {
        let params = object(&params)?;
        let title = required_str(&params, "title")?;
        let content = required_str(&params, "content")?;
        let content_type = optional_str(&params, "content_type")?
            .unwrap_or_else(|| GATEWAY_CONTENT_TYPE.to_string());
        let is_public = ctx.public_token() || optional_bool(&params, "is_public")?.unwrap_or(true);
        let metadata = optional_object(&params, "metadata")?.unwrap_or_else(|| serde_json::json!({}));

        let doc = DocumentInput::new(title, content)
            .with_content_type(content_type)
            .with_visibility(is_public)
            .with_metadata(metadata);
        let report = ctx.kb.add_entry(doc, &ctx.scope()).await?;

        tracing::info!(token_id = ctx.token.id, content_id = %report.content_id, "entry added via gateway");
        Ok(serde_json::json!({
            "content_id": report.content_id,
            "title": report.title,
            "chunks": report.chunks,
            "is_public": is_public,
        }))
    }
}

pub struct UpdateKbEntry;

#[async_trait]
impl Capability for UpdateKbEntry {
    fn name(&self) -> &'static str {
        "updateKBEntry"
    }

    fn description(&self) -> &'static str {
        "Replace the content of an existing entry, keeping its identity"
    }

    fn required_permission(&self) -> Permission {
        Permission::ReadWriteKb
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content_id": { "type": "string" },
                "content": { "type": "string" },
                "title": { "type": "string" },
                "content_type": { "type": "string" },
                "is_public": { "type": "boolean" },
                "metadata": { "type": "object" }
            },
            "required": ["content_id", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &CapabilityContext<'_>) -> KbResult<Value> {
        let params = object(&params)?;
        let content_id = required_str(&params, "content_id")?;
        let mut is_public = optional_bool(&params, "is_public")?;
        if ctx.public_token() {
            is_public = Some(true);
        }

        let update = EntryUpdate {
            title: optional_str(&params, "title")?,
            content: required_str(&params, "content")?,
            content_type: optional_str(&params, "content_type")?,
            is_public,
            metadata: optional_object(&params, "metadata")?,
        };
        let report = ctx.kb.update_entry(&content_id, update, &ctx.scope()).await?;

        tracing::info!(token_id = ctx.token.id, content_id = %report.content_id, chunks = report.chunks, "entry updated via gateway");
        Ok(serde_json::json!({
            "content_id": report.content_id,
            "title": report.title,
            "chunks": report.chunks,
            "replaced": report.replaced,
        }))
    }
}

pub struct DeleteKbEntry;

#[async_trait]
impl Capability for DeleteKbEntry {
    fn name(&self) -> &'static str {
        "deleteKBEntry"
    }

    fn description(&self) -> &'static str {
        "Delete an entry and all of its chunks"
    }

    fn required_permission(&self) -> Permission {
        Permission::ReadWriteKb
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content_id": { "type": "string" }
            },
            "required": ["content_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &CapabilityContext<'_>) -> KbResult<Value> {
        let params = object(&params)?;
        let content_id = required_str(&params, "content_id")?;

        // Only entries visible to the token can be deleted.
        ctx.kb.get_entry(&content_id, &ctx.scope()).await?;
        let deleted = ctx.kb.delete_document(&content_id).await?;

        tracing::info!(token_id = ctx.token.id, content_id = %content_id, deleted, "entry deleted via gateway");
        Ok(serde_json::json!({
            "content_id": content_id,
            "deleted_chunks": deleted,
        }))
    }
}
