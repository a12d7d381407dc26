//! Credential → identity cache
//!
//! Keys are `memoryhub:apikey:{canonical hash}`; the raw credential never
//! becomes a key. Every operation may fail, and the resolver treats a
//! failure as a miss.

use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

use crate::storage::UserId;

/// Value stored per credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedIdentity {
    pub user_id: UserId,
    /// Credential version the mapping was written for
    pub credential_version: u64,
}

pub trait CredentialCache: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<CachedIdentity>>;

    fn set_with_ttl(&self, key: &str, value: CachedIdentity, ttl: Duration) -> anyhow::Result<()>;

    fn delete(&self, key: &str) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct Entry {
    identity: CachedIdentity,
    ttl: Duration,
}

/// Each entry expires after the TTL it was written with; re-writing resets it
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache backed by moka, bounded by entry count
pub struct MokaCredentialCache {
    entries: Cache<String, Entry>,
}

impl MokaCredentialCache {
    pub fn new(capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }
}

impl CredentialCache for MokaCredentialCache {
    fn get(&self, key: &str) -> anyhow::Result<Option<CachedIdentity>> {
        Ok(self.entries.get(key).map(|entry| entry.identity))
    }

    fn set_with_ttl(&self, key: &str, value: CachedIdentity, ttl: Duration) -> anyhow::Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                identity: value,
                ttl,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.invalidate(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "moka"
    }
}

/// Cache that never holds anything
pub struct NoopCredentialCache;

impl CredentialCache for NoopCredentialCache {
    fn get(&self, _key: &str) -> anyhow::Result<Option<CachedIdentity>> {
        Ok(None)
    }

    fn set_with_ttl(&self, _key: &str, _value: CachedIdentity, _ttl: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
