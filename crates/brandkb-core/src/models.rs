//! Core data models used throughout Brand KB.
//!
//! Knowledge is stored as [`Chunk`]s grouped by `content_id`; external
//! access is granted through [`TokenRecord`]s. [`Scope`] describes which
//! chunks a caller may see.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::content_id;
use crate::error::KbError;

/// Owner id of site-shared knowledge.
pub const SHARED_OWNER: i64 = 0;

/// A raw document supplied by a crawler, the CLI, or the gateway.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Identity of the document; derived from title + content when `None`.
    pub content_id: Option<String>,
    pub title: String,
    pub content: String,
    pub content_type: String,
    pub owner_id: i64,
    pub is_public: bool,
    pub metadata: serde_json::Value,
}

impl DocumentInput {
    /// A shared, public document of type `post` with empty metadata.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content_id: None,
            title: title.into(),
            content: content.into(),
            content_type: "post".to_string(),
            owner_id: SHARED_OWNER,
            is_public: true,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn with_visibility(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_content_id(mut self, id: impl Into<String>) -> Self {
        self.content_id = Some(id.into());
        self
    }

    /// The explicit `content_id`, or the hash of title + content.
    pub fn resolved_content_id(&self) -> String {
        match &self.content_id {
            Some(id) => id.clone(),
            None => content_id(&self.title, &self.content),
        }
    }
}

/// A chunk ready to be persisted, embedding already computed.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content_id: String,
    pub chunk_index: i64,
    pub title: String,
    pub content: String,
    pub content_type: String,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub owner_id: i64,
    pub is_public: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A stored unit of retrievable knowledge.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: i64,
    pub content_id: String,
    pub chunk_index: i64,
    pub title: String,
    pub content: String,
    pub content_type: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip)]
    pub embedding_model: Option<String>,
    pub owner_id: i64,
    pub is_public: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A chunk paired with its similarity to a query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
}

/// Owner dimension of a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerScope {
    /// Only `owner_id = 0`.
    Shared,
    /// Shared chunks plus this user's own.
    SharedAnd(i64),
    /// Every owner. Used by operator tooling only.
    All,
}

/// Which chunks a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub owners: OwnerScope,
    /// Restrict to `is_public = true` chunks.
    pub public_only: bool,
}

impl Scope {
    pub fn shared() -> Self {
        Self {
            owners: OwnerScope::Shared,
            public_only: false,
        }
    }

    /// Shared knowledge plus the given user's private knowledge.
    ///
    /// `None` or the shared owner id collapse to [`Scope::shared`].
    pub fn for_owner(owner_id: Option<i64>) -> Self {
        let owners = match owner_id {
            Some(id) if id != SHARED_OWNER => OwnerScope::SharedAnd(id),
            _ => OwnerScope::Shared,
        };
        Self {
            owners,
            public_only: false,
        }
    }

    pub fn unrestricted() -> Self {
        Self {
            owners: OwnerScope::All,
            public_only: false,
        }
    }

    pub fn public_only(mut self) -> Self {
        self.public_only = true;
        self
    }

    /// Same visibility filter, owner dimension narrowed to shared only.
    pub fn shared_subset(&self) -> Self {
        Self {
            owners: OwnerScope::Shared,
            public_only: self.public_only,
        }
    }

    pub fn admits_owner(&self, owner_id: i64) -> bool {
        match self.owners {
            OwnerScope::Shared => owner_id == SHARED_OWNER,
            OwnerScope::SharedAnd(user) => owner_id == SHARED_OWNER || owner_id == user,
            OwnerScope::All => true,
        }
    }

    pub fn admits(&self, owner_id: i64, is_public: bool) -> bool {
        self.admits_owner(owner_id) && (!self.public_only || is_public)
    }
}

/// Document-level view of a group of chunks sharing a `content_id`.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub content_id: String,
    pub title: String,
    pub content_type: String,
    pub owner_id: i64,
    pub is_public: bool,
    pub chunk_count: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A single chunk within an [`EntryDetail`].
#[derive(Debug, Clone, Serialize)]
pub struct EntryChunk {
    pub id: i64,
    pub index: i64,
    pub content: String,
}

/// Full document view: summary plus ordered chunk texts.
#[derive(Debug, Clone, Serialize)]
pub struct EntryDetail {
    #[serde(flatten)]
    pub summary: EntrySummary,
    pub chunks: Vec<EntryChunk>,
}

/// Filter and paging for entry listings.
#[derive(Debug, Clone)]
pub struct EntryQuery {
    pub scope: Scope,
    pub limit: i64,
    pub offset: i64,
    pub content_type: Option<String>,
    /// Case-insensitive substring over title and chunk text.
    pub search: Option<String>,
}

impl EntryQuery {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            limit: 20,
            offset: 0,
            content_type: None,
            search: None,
        }
    }
}

// ─── Tokens ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Sees only `is_public` knowledge.
    Public,
    /// Bypasses the visibility filter.
    Private,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Public => "public",
            TokenType::Private => "private",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(TokenType::Public),
            "private" => Ok(TokenType::Private),
            other => Err(KbError::invalid_input(format!(
                "unknown token type '{}': expected public or private",
                other
            ))),
        }
    }
}

/// Knowledge-base permission granted to a token.
///
/// Ordered so that a higher level implies every lower one:
/// `ReadWriteKb` satisfies a `ReadKb` requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadKb,
    ReadWriteKb,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadKb => "read_kb",
            Permission::ReadWriteKb => "read_write_kb",
        }
    }

    pub fn satisfies(self, required: Permission) -> bool {
        self >= required
    }

    /// Collapse a list of grants into the strongest one.
    pub fn from_grants<I>(grants: I) -> Option<Permission>
    where
        I: IntoIterator<Item = Permission>,
    {
        grants.into_iter().max()
    }

    /// Every permission this one implies, weakest first.
    pub fn implied(self) -> Vec<Permission> {
        [Permission::ReadKb, Permission::ReadWriteKb]
            .into_iter()
            .filter(|p| self.satisfies(*p))
            .collect()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_kb" => Ok(Permission::ReadKb),
            "read_write_kb" => Ok(Permission::ReadWriteKb),
            other => Err(KbError::invalid_input(format!(
                "unknown permission '{}': expected read_kb or read_write_kb",
                other
            ))),
        }
    }
}

/// Soft lifecycle state of a token. Hard removal deletes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Active,
    Revoked,
}

/// A persisted token. Holds the hash, never the raw secret.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub id: i64,
    pub name: String,
    pub token_hash: String,
    pub token_type: TokenType,
    pub permission: Permission,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: TokenStatus,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Active && !self.is_expired(now)
    }
}

/// A token row to insert.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub name: String,
    pub token_hash: String,
    pub token_type: TokenType,
    pub permission: Permission,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

/// Operator-facing token metadata with the hash reduced to a preview.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub id: i64,
    pub name: String,
    pub hash_preview: String,
    pub token_type: TokenType,
    pub permissions: Vec<Permission>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Result of issuing a token. The secret is not recoverable afterwards.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub id: i64,
    pub secret: String,
}
