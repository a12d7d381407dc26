//! Credential matching strategies, tried in order on a cache miss

use crate::storage::{Store, StoreError, User};

use super::credential::{canonical_hash, is_salted_hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPath {
    Cache,
    Plaintext,
    CanonicalHash,
    SaltedScan,
}

impl ResolutionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Plaintext => "plaintext",
            Self::CanonicalHash => "canonical_hash",
            Self::SaltedScan => "salted_scan",
        }
    }
}

/// One way of matching a presented credential to a stored user
pub trait CredentialStrategy: Send + Sync {
    fn path(&self) -> ResolutionPath;

    fn resolve(&self, store: &dyn Store, credential: &str) -> Result<Option<User>, StoreError>;
}

/// Exact match on the legacy plaintext field
pub struct PlaintextMatch;

impl CredentialStrategy for PlaintextMatch {
    fn path(&self) -> ResolutionPath {
        ResolutionPath::Plaintext
    }

    fn resolve(&self, store: &dyn Store, credential: &str) -> Result<Option<User>, StoreError> {
        store.find_user_by_plaintext(credential)
    }
}

/// Exact match of the SHA-256 digest against the hash index
pub struct CanonicalHashMatch;

impl CredentialStrategy for CanonicalHashMatch {
    fn path(&self) -> ResolutionPath {
        ResolutionPath::CanonicalHash
    }

    fn resolve(&self, store: &dyn Store, credential: &str) -> Result<Option<User>, StoreError> {
        store.find_user_by_hash(&canonical_hash(credential))
    }
}

/// Bounded bcrypt verification over users holding salted hashes
///
/// Only the first `limit` hashed users are considered. A matched user has
/// its hash rewritten to the canonical form so the next lookup is indexed.
pub struct SaltedHashScan {
    limit: usize,
}

impl SaltedHashScan {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// Rewrite the matched salted hash to canonical form. If the credential
    /// was regenerated while we were verifying, the stored row is newer than
    /// our snapshot and the presented credential no longer counts.
    fn migrate(
        &self,
        store: &dyn Store,
        user: User,
        salted: &str,
        credential: &str,
    ) -> Result<Option<User>, StoreError> {
        match store.rehash_credential(
            &user.id,
            salted,
            user.credential_version,
            canonical_hash(credential),
        ) {
            Ok(Some(updated)) => {
                tracing::info!(user_id = %user.id, "Rehashed salted credential to canonical form");
                Ok(Some(updated))
            }
            Ok(None) => {
                tracing::info!(user_id = %user.id, "Credential changed during salted scan");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Failed to rehash salted credential");
                self.confirm_unchanged(store, user, salted)
            }
        }
    }

    /// Fallback when the rehash write fails: accept only if the row is unchanged
    fn confirm_unchanged(
        &self,
        store: &dyn Store,
        user: User,
        salted: &str,
    ) -> Result<Option<User>, StoreError> {
        let current = store.find_user(&user.id)?;
        Ok(current.filter(|c| {
            c.api_key_hash.as_deref() == Some(salted)
                && c.credential_version == user.credential_version
        }))
    }
}

impl CredentialStrategy for SaltedHashScan {
    fn path(&self) -> ResolutionPath {
        ResolutionPath::SaltedScan
    }

    fn resolve(&self, store: &dyn Store, credential: &str) -> Result<Option<User>, StoreError> {
        let candidates = store.find_users_with_hash(self.limit)?;

        for user in candidates {
            let Some(hash) = user.api_key_hash.clone().filter(|h| is_salted_hash(h)) else {
                continue;
            };
            match bcrypt::verify(credential, &hash) {
                Ok(true) => return self.migrate(store, user, &hash, credential),
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(user_id = %user.id, error = %e, "Unverifiable salted hash");
                }
            }
        }
        Ok(None)
    }
}

/// The resolution order used in production
pub fn default_chain(salted_scan_limit: usize) -> Vec<std::sync::Arc<dyn CredentialStrategy>> {
    vec![
        std::sync::Arc::new(PlaintextMatch),
        std::sync::Arc::new(CanonicalHashMatch),
        std::sync::Arc::new(SaltedHashScan::new(salted_scan_limit)),
    ]
}
