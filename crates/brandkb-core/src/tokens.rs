//! Bearer-token issuance and authentication for the gateway.
//!
//! Secrets are 256 random bits rendered as `bkb_<64 hex>`. Only a one-way
//! hash is stored: HMAC-SHA256 keyed by the configured salt, or plain
//! SHA-256 when no salt is set. The raw secret is returned once by
//! [`TokenService::issue`] and cannot be recovered.
//!
//! # Lifecycle
//!
//! ```text
//!   issue ──▶ Active ──revoke──▶ Revoked
//!               ▲                   │
//!               └─────activate──────┘
//!   Active | Revoked ──remove──▶ (row deleted)
//! ```
//!
//! [`TokenService::authenticate`] rejects unknown, revoked, and expired
//! tokens with the same [`KbError::InvalidToken`]; the reason is logged.

use std::sync::Arc;

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{KbError, KbResult};
use crate::models::{
    IssuedToken, NewToken, Permission, TokenInfo, TokenRecord, TokenStatus, TokenType,
};
use crate::store::TokenStore;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of every issued secret.
pub const SECRET_PREFIX: &str = "bkb_";
const SECRET_BYTES: usize = 32;
const PREVIEW_CHARS: usize = 8;

/// Parameters for [`TokenService::issue`].
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub name: String,
    pub token_type: TokenType,
    pub permissions: Vec<Permission>,
    pub expires_in_days: Option<i64>,
    pub created_by: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    /// The token was already inactive; nothing changed.
    AlreadyInactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivateOutcome {
    Activated,
    AlreadyActive,
}

pub struct TokenService {
    store: Arc<dyn TokenStore>,
    salt: Option<Vec<u8>>,
}

impl TokenService {
    /// `salt` keys the token hash; `None` or empty falls back to SHA-256.
    pub fn new(store: Arc<dyn TokenStore>, salt: Option<String>) -> Self {
        Self {
            store,
            salt: salt.filter(|s| !s.is_empty()).map(String::into_bytes),
        }
    }

    /// One-way hash of a presented secret, as stored.
    pub fn hash_secret(&self, secret: &str) -> KbResult<String> {
        match &self.salt {
            Some(key) => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .map_err(|e| KbError::Storage(anyhow::anyhow!("hmac key: {}", e)))?;
                mac.update(secret.as_bytes());
                Ok(hex::encode(mac.finalize().into_bytes()))
            }
            None => Ok(hex::encode(Sha256::digest(secret.as_bytes()))),
        }
    }

    pub async fn issue(&self, req: TokenRequest) -> KbResult<IssuedToken> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(KbError::invalid_input("token name is required"));
        }
        let permission = Permission::from_grants(req.permissions)
            .ok_or_else(|| KbError::invalid_input("at least one permission is required"))?;
        let now = Utc::now();
        let expires_at = match req.expires_in_days {
            None => None,
            Some(days) if days > 0 => Some(
                Duration::try_days(days)
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or_else(|| {
                        KbError::invalid_input(format!("expires_in_days {} is out of range", days))
                    })?,
            ),
            Some(days) => {
                return Err(KbError::invalid_input(format!(
                    "expires_in_days must be positive, got {}",
                    days
                )))
            }
        };

        let secret = generate_secret();
        let token = NewToken {
            name: name.to_string(),
            token_hash: self.hash_secret(&secret)?,
            token_type: req.token_type,
            permission,
            expires_at,
            created_by: req.created_by,
            created_at: now,
        };
        let id = self.store.insert_token(&token).await?;
        info!(
            token_id = id,
            name = %token.name,
            token_type = %token.token_type,
            permission = %token.permission,
            "token issued"
        );

        Ok(IssuedToken { id, secret })
    }

    /// Resolve a presented secret to a usable token.
    pub async fn authenticate(&self, secret: &str) -> KbResult<TokenRecord> {
        let secret = secret.trim();
        if secret.is_empty() {
            warn!(reason = "empty", "token rejected");
            return Err(KbError::InvalidToken);
        }

        let hash = self.hash_secret(secret)?;
        let record = match self.store.token_by_hash(&hash).await? {
            Some(r) => r,
            None => {
                warn!(reason = "unknown", "token rejected");
                return Err(KbError::InvalidToken);
            }
        };

        if record.status == TokenStatus::Revoked {
            warn!(token_id = record.id, reason = "revoked", "token rejected");
            return Err(KbError::InvalidToken);
        }
        if record.is_expired(Utc::now()) {
            warn!(token_id = record.id, reason = "expired", "token rejected");
            return Err(KbError::InvalidToken);
        }

        Ok(record)
    }

    pub async fn revoke(&self, id: i64) -> KbResult<RevokeOutcome> {
        let record = self.require(id).await?;
        if record.status == TokenStatus::Revoked {
            return Ok(RevokeOutcome::AlreadyInactive);
        }
        self.store.set_token_status(id, TokenStatus::Revoked).await?;
        info!(token_id = id, "token revoked");
        Ok(RevokeOutcome::Revoked)
    }

    pub async fn activate(&self, id: i64) -> KbResult<ActivateOutcome> {
        let record = self.require(id).await?;
        if record.status == TokenStatus::Active {
            return Ok(ActivateOutcome::AlreadyActive);
        }
        self.store.set_token_status(id, TokenStatus::Active).await?;
        info!(token_id = id, "token re-activated");
        Ok(ActivateOutcome::Activated)
    }

    /// Hard delete.
    pub async fn remove(&self, id: i64) -> KbResult<()> {
        if !self.store.delete_token(id).await? {
            return Err(KbError::not_found(format!("no token with id {}", id)));
        }
        info!(token_id = id, "token removed");
        Ok(())
    }

    pub async fn list(&self) -> KbResult<Vec<TokenInfo>> {
        let now = Utc::now();
        Ok(self
            .store
            .list_tokens()
            .await?
            .iter()
            .map(|r| token_info(r, now))
            .collect())
    }

    pub async fn get(&self, id: i64) -> KbResult<TokenInfo> {
        let record = self.require(id).await?;
        Ok(token_info(&record, Utc::now()))
    }

    /// Record a successful gateway call.
    pub async fn touch(&self, id: i64) -> KbResult<()> {
        self.store.touch_token(id, Utc::now()).await?;
        Ok(())
    }

    async fn require(&self, id: i64) -> KbResult<TokenRecord> {
        self.store
            .token_by_id(id)
            .await?
            .ok_or_else(|| KbError::not_found(format!("no token with id {}", id)))
    }
}

/// A fresh `bkb_`-prefixed secret from the OS RNG.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", SECRET_PREFIX, hex::encode(bytes))
}

/// Short, non-reversible preview of a stored hash.
pub fn hash_preview(hash: &str) -> String {
    let head: String = hash.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", head)
}

/// Operator view of a token. `is_active` reflects status and expiry at `now`.
pub fn token_info(record: &TokenRecord, now: chrono::DateTime<Utc>) -> TokenInfo {
    TokenInfo {
        id: record.id,
        name: record.name.clone(),
        hash_preview: hash_preview(&record.token_hash),
        token_type: record.token_type,
        permissions: record.permission.implied(),
        expires_at: record.expires_at,
        is_active: record.is_usable(now),
        created_by: record.created_by,
        created_at: record.created_at,
        last_used_at: record.last_used_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn service(salt: Option<&str>) -> (TokenService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (
            TokenService::new(store.clone(), salt.map(str::to_string)),
            store,
        )
    }

    fn request(perms: Vec<Permission>, days: Option<i64>) -> TokenRequest {
        TokenRequest {
            name: "zapier".into(),
            token_type: TokenType::Public,
            permissions: perms,
            expires_in_days: days,
            created_by: 1,
        }
    }

    #[test]
    fn test_secret_shape() {
        let a = generate_secret();
        let b = generate_secret();
        assert!(a.starts_with(SECRET_PREFIX));
        assert_eq!(a.len(), SECRET_PREFIX.len() + 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_salt_changes_hash() {
        let (plain, _) = service(None);
        let (salted, _) = service(Some("pepper"));
        let h1 = plain.hash_secret("bkb_x").unwrap();
        let h2 = salted.hash_secret("bkb_x").unwrap();
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, h2);
        assert_eq!(h2, salted.hash_secret("bkb_x").unwrap());
    }

    #[tokio::test]
    async fn test_issue_then_authenticate() {
        let (svc, store) = service(Some("pepper"));
        let issued = svc
            .issue(request(vec![Permission::ReadKb], None))
            .await
            .unwrap();

        let record = svc.authenticate(&issued.secret).await.unwrap();
        assert_eq!(record.id, issued.id);
        assert_eq!(record.permission, Permission::ReadKb);

        // The secret itself is never stored.
        let stored = store.token_by_id(issued.id).await.unwrap().unwrap();
        assert_ne!(stored.token_hash, issued.secret);
        assert!(!stored.token_hash.contains(&issued.secret[4..]));
    }

    #[tokio::test]
    async fn test_unknown_revoked_expired_are_indistinguishable() {
        let (svc, store) = service(None);

        let unknown = svc.authenticate("bkb_nope").await.unwrap_err();

        let revoked = svc
            .issue(request(vec![Permission::ReadKb], Some(30)))
            .await
            .unwrap();
        svc.revoke(revoked.id).await.unwrap();
        let revoked_err = svc.authenticate(&revoked.secret).await.unwrap_err();

        let expired_secret = generate_secret();
        store
            .insert_token(&NewToken {
                name: "old".into(),
                token_hash: svc.hash_secret(&expired_secret).unwrap(),
                token_type: TokenType::Private,
                permission: Permission::ReadWriteKb,
                expires_at: Some(Utc::now() - Duration::hours(1)),
                created_by: 1,
                created_at: Utc::now() - Duration::days(2),
            })
            .await
            .unwrap();
        let expired_err = svc.authenticate(&expired_secret).await.unwrap_err();

        for err in [unknown, revoked_err, expired_err] {
            assert!(matches!(err, KbError::InvalidToken));
            assert_eq!(err.public_message(), "invalid or expired token");
        }
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent_and_activate_reverses() {
        let (svc, _) = service(None);
        let issued = svc
            .issue(request(vec![Permission::ReadWriteKb], None))
            .await
            .unwrap();

        assert_eq!(svc.revoke(issued.id).await.unwrap(), RevokeOutcome::Revoked);
        assert_eq!(
            svc.revoke(issued.id).await.unwrap(),
            RevokeOutcome::AlreadyInactive
        );
        assert_eq!(
            svc.activate(issued.id).await.unwrap(),
            ActivateOutcome::Activated
        );
        assert!(svc.authenticate(&issued.secret).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_missing_fails() {
        let (svc, _) = service(None);
        assert!(matches!(svc.remove(42).await, Err(KbError::NotFound(_))));
        assert!(matches!(svc.revoke(42).await, Err(KbError::NotFound(_))));

        let issued = svc
            .issue(request(vec![Permission::ReadKb], None))
            .await
            .unwrap();
        svc.remove(issued.id).await.unwrap();
        assert!(svc.authenticate(&issued.secret).await.is_err());
    }

    #[tokio::test]
    async fn test_list_shows_preview_only() {
        let (svc, store) = service(None);
        let issued = svc
            .issue(request(vec![Permission::ReadKb, Permission::ReadWriteKb], None))
            .await
            .unwrap();
        let full_hash = store
            .token_by_id(issued.id)
            .await
            .unwrap()
            .unwrap()
            .token_hash;

        let infos = svc.list().await.unwrap();
        assert_eq!(infos.len(), 1);
        let info = &infos[0];
        assert_eq!(info.hash_preview, format!("{}…", &full_hash[..8]));
        assert_eq!(
            info.permissions,
            vec![Permission::ReadKb, Permission::ReadWriteKb]
        );
        let json = serde_json::to_string(info).unwrap();
        assert!(!json.contains(&full_hash));
        assert!(!json.contains(&issued.secret));
    }

    #[tokio::test]
    async fn test_issue_validation() {
        let (svc, _) = service(None);
        assert!(svc.issue(request(vec![], None)).await.is_err());
        assert!(svc
            .issue(request(vec![Permission::ReadKb], Some(0)))
            .await
            .is_err());
        let mut r = request(vec![Permission::ReadKb], None);
        r.name = "  ".into();
        assert!(svc.issue(r).await.is_err());
    }

    #[tokio::test]
    async fn test_issue_rejects_unrepresentable_expiry() {
        let (svc, store) = service(None);
        for days in [100_000_000, i64::MAX] {
            let err = svc
                .issue(request(vec![Permission::ReadKb], Some(days)))
                .await
                .unwrap_err();
            assert!(matches!(err, KbError::InvalidInput(ref m) if m.contains("out of range")));
        }
        assert!(store.list_tokens().await.unwrap().is_empty());

        let issued = svc
            .issue(request(vec![Permission::ReadKb], Some(36_500)))
            .await
            .unwrap();
        let stored = store.token_by_id(issued.id).await.unwrap().unwrap();
        assert!(stored.expires_at.is_some());
    }
}
