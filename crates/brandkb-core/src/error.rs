//! Typed error kinds shared by the retrieval engine and the gateway.
//!
//! Every failure path in the core returns a [`KbError`]. The gateway maps
//! each error to an [`ErrorKind`], which carries the machine-readable code
//! and HTTP-style status sent to external callers. Internal details stay in
//! the logs; [`KbError::public_message`] is what callers see.

use thiserror::Error;

pub type KbResult<T> = Result<T, KbError>;

#[derive(Debug, Error)]
pub enum KbError {
    /// Chunking, embedding, or storage failed while ingesting a document.
    #[error("ingestion failed for '{title}': {reason}")]
    IngestionFailed { title: String, reason: String },

    /// Query embedding or candidate lookup failed.
    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),

    /// The chat model (or the retrieval feeding it) failed.
    #[error("answer failed: {0}")]
    AnswerFailed(String),

    /// Unknown, revoked, or expired token. Intentionally undifferentiated.
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Outward classification of a [`KbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    RateLimited,
    InvalidInput,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// Machine-readable error code used in JSON error bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status equivalent.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::RateLimited => 429,
            ErrorKind::InvalidInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
        }
    }
}

impl KbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KbError::InvalidToken => ErrorKind::Unauthorized,
            KbError::Forbidden(_) => ErrorKind::Forbidden,
            KbError::RateLimited => ErrorKind::RateLimited,
            KbError::InvalidInput(_) => ErrorKind::InvalidInput,
            KbError::NotFound(_) => ErrorKind::NotFound,
            KbError::IngestionFailed { .. }
            | KbError::RetrievalFailed(_)
            | KbError::AnswerFailed(_)
            | KbError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Short message safe to hand to an external caller.
    ///
    /// Client errors keep their message; internal failures are reduced to
    /// a generic description (the full error is logged where it occurs).
    pub fn public_message(&self) -> String {
        match self {
            KbError::IngestionFailed { title, .. } => {
                format!("failed to ingest '{}'", title)
            }
            KbError::RetrievalFailed(_) => "knowledge base search failed".to_string(),
            KbError::AnswerFailed(_) => "could not generate an answer".to_string(),
            KbError::Storage(_) => "internal storage error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        KbError::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        KbError::NotFound(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(KbError::InvalidToken.kind().status(), 401);
        assert_eq!(KbError::Forbidden("x".into()).kind().status(), 403);
        assert_eq!(KbError::RateLimited.kind().status(), 429);
        assert_eq!(KbError::invalid_input("x").kind().status(), 400);
        assert_eq!(KbError::not_found("x").kind().status(), 404);
        assert_eq!(
            KbError::RetrievalFailed("db down".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = KbError::Storage(anyhow::anyhow!("disk I/O error at /var/lib/x"));
        assert!(!err.public_message().contains("/var/lib"));

        let err = KbError::IngestionFailed {
            title: "About us".into(),
            reason: "401 from provider: key sk-abc".into(),
        };
        let msg = err.public_message();
        assert!(msg.contains("About us"));
        assert!(!msg.contains("sk-abc"));
    }

    #[test]
    fn test_invalid_token_message_is_undifferentiated() {
        assert_eq!(
            KbError::InvalidToken.public_message(),
            "invalid or expired token"
        );
    }
}
