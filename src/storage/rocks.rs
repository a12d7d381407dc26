//! RocksDB implementation of [`Store`]
//!
//! Key layout (single keyspace, string prefixes):
//!
//! ```text
//! user:{user_id}                                  -> User
//! user_email:{email}                              -> user id (16 bytes)
//! cred_plain:{credential}                         -> user id (16 bytes)
//! cred_hash:{hash}                                -> user id (16 bytes)
//! memory:{memory_id}                              -> StoredMemory
//! vector:{memory_id}                              -> Vec<f32>
//! user_memory:{user_id}:{recency:020}:{memory_id} -> IndexEntry
//! ```
//!
//! `recency` is `u64::MAX - created_at_nanos`, so a forward scan of a
//! user's index prefix yields memories newest-first.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{
    CredentialMaterial, Memory, MemoryId, MemoryPage, MemoryStats, NewMemory, ProjectCount,
    ScoredMemory, Store, StoreError, User, UserId,
};
use crate::constants::{EMBEDDING_BYTES, EMBEDDING_DIMENSION};
use crate::similarity;

const USER_PREFIX: &str = "user:";
const EMAIL_PREFIX: &str = "user_email:";
const PLAINTEXT_PREFIX: &str = "cred_plain:";
const HASH_PREFIX: &str = "cred_hash:";
const MEMORY_PREFIX: &str = "memory:";
const VECTOR_PREFIX: &str = "vector:";
const USER_MEMORY_PREFIX: &str = "user_memory:";

/// Write mode for storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// fsync on every write. Survives power loss.
    Sync,
    /// No fsync, data sits in the OS page cache until the next flush.
    /// Survives process crashes but not power loss.
    #[default]
    Async,
}

impl WriteMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "async" => Some(Self::Async),
            _ => None,
        }
    }
}

/// Memory row as persisted. Metadata is kept as a JSON string because the
/// binary codec cannot round-trip arbitrary JSON values.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMemory {
    id: MemoryId,
    user_id: UserId,
    project: Option<String>,
    content: String,
    metadata_json: Option<String>,
    has_embedding: bool,
    created_at: DateTime<Utc>,
}

impl StoredMemory {
    fn into_memory(self) -> Result<Memory, StoreError> {
        let metadata = self
            .metadata_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::Decode(format!("metadata of memory {}: {e}", self.id)))?;
        Ok(Memory {
            id: self.id,
            user_id: self.user_id,
            project: self.project,
            content: self.content,
            metadata,
            has_embedding: self.has_embedding,
            created_at: self.created_at,
        })
    }
}

/// Per-user index value, enough to filter and count without loading rows
#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    project: Option<String>,
    has_embedding: bool,
    /// Content plus metadata JSON, in bytes
    payload_bytes: u64,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn user_key(id: &UserId) -> String {
    format!("{USER_PREFIX}{}", id.0)
}

fn email_key(email: &str) -> String {
    format!("{EMAIL_PREFIX}{email}")
}

fn plaintext_key(credential: &str) -> String {
    format!("{PLAINTEXT_PREFIX}{credential}")
}

fn hash_key(hash: &str) -> String {
    format!("{HASH_PREFIX}{hash}")
}

fn memory_key(id: &MemoryId) -> String {
    format!("{MEMORY_PREFIX}{}", id.0)
}

fn vector_key(id: &MemoryId) -> String {
    format!("{VECTOR_PREFIX}{}", id.0)
}

fn user_memory_prefix(user_id: &UserId) -> String {
    format!("{USER_MEMORY_PREFIX}{}:", user_id.0)
}

fn recency_rank(created_at: &DateTime<Utc>) -> u64 {
    let nanos = created_at.timestamp_nanos_opt().unwrap_or(i64::MAX).max(0) as u64;
    u64::MAX - nanos
}

fn rank_to_timestamp(rank: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos((u64::MAX - rank) as i64)
}

fn user_memory_key(user_id: &UserId, created_at: &DateTime<Utc>, id: &MemoryId) -> String {
    format!(
        "{}{:020}:{}",
        user_memory_prefix(user_id),
        recency_rank(created_at),
        id.0
    )
}

/// Split `...:{recency}:{memory_id}` into its two trailing components
fn parse_user_memory_key(key: &[u8]) -> Result<(u64, MemoryId), StoreError> {
    let text = std::str::from_utf8(key)
        .map_err(|_| StoreError::Corrupt("non-utf8 index key".to_string()))?;
    let mut parts = text.rsplitn(3, ':');
    let (Some(id), Some(rank)) = (parts.next(), parts.next()) else {
        return Err(StoreError::Corrupt(format!("malformed index key {text}")));
    };
    let id = Uuid::parse_str(id)
        .map_err(|_| StoreError::Corrupt(format!("malformed memory id in {text}")))?;
    let rank = rank
        .parse::<u64>()
        .map_err(|_| StoreError::Corrupt(format!("malformed recency in {text}")))?;
    Ok((rank, MemoryId(id)))
}

fn parse_user_ref(bytes: &[u8]) -> Result<UserId, StoreError> {
    Uuid::from_slice(bytes)
        .map(UserId)
        .map_err(|_| StoreError::Corrupt("malformed user reference".to_string()))
}

/// Storage engine for users, memories and their embeddings
pub struct RocksStore {
    db: DB,
    storage_path: PathBuf,
    write_mode: WriteMode,
    /// Serializes writes that must check unique indices first
    write_lock: Mutex<()>,
    /// Last issued creation timestamp, keeps `created_at` strictly increasing
    last_created_nanos: Mutex<i64>,
}

impl RocksStore {
    pub fn open(path: &Path, write_mode: WriteMode) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path)
            .map_err(|e| StoreError::Task(format!("cannot create {}: {e}", path.display())))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_manual_wal_flush(false);
        opts.set_max_write_buffer_number(4);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_background_jobs(4);
        opts.set_level_compaction_dynamic_level_bytes(true);

        use rocksdb::{BlockBasedOptions, Cache};
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&Cache::new_lru_cache(128 * 1024 * 1024));
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, path.join("memoryhub"))?;

        tracing::info!(
            path = %path.display(),
            "Storage initialized with {:?} write mode",
            write_mode
        );

        Ok(Self {
            db,
            storage_path: path.to_path_buf(),
            write_mode,
            write_lock: Mutex::new(()),
            last_created_nanos: Mutex::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.write_mode == WriteMode::Sync);
        opts
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    fn next_created_at(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut last = self.last_created_nanos.lock();
        let nanos = now.max(*last + 1);
        *last = nanos;
        DateTime::from_timestamp_nanos(nanos)
    }

    /// Visit every entry under `prefix` in key order until the visitor breaks
    fn scan_prefix<F>(&self, prefix: &str, mut visit: F) -> Result<(), StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>, StoreError>,
    {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            if visit(&key, &value)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Follow a secondary index entry to the user it references
    fn find_user_via(&self, index_key: &str) -> Result<Option<User>, StoreError> {
        let Some(raw) = self.db.get(index_key.as_bytes())? else {
            return Ok(None);
        };
        let id = parse_user_ref(&raw)?;
        let user = self.find_user(&id)?;
        if user.is_none() {
            tracing::warn!(index = %index_key, user_id = %id, "Dangling user index entry");
        }
        Ok(user)
    }

    /// Fail if any credential field is already indexed for a different user
    fn ensure_unclaimed(
        &self,
        credential: &CredentialMaterial,
        owner: Option<&UserId>,
    ) -> Result<(), StoreError> {
        let keys = credential
            .plaintext
            .as_deref()
            .map(plaintext_key)
            .into_iter()
            .chain(credential.hash.as_deref().map(hash_key));

        for key in keys {
            if let Some(raw) = self.db.get(key.as_bytes())? {
                let existing = parse_user_ref(&raw)?;
                if Some(&existing) != owner {
                    return Err(StoreError::Conflict("credential already in use".to_string()));
                }
            }
        }
        Ok(())
    }

    fn load_memory(&self, id: &MemoryId) -> Result<Option<StoredMemory>, StoreError> {
        match self.db.get(memory_key(id).as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn load_vector(&self, id: &MemoryId) -> Result<Vec<f32>, StoreError> {
        let raw = self
            .db
            .get(vector_key(id).as_bytes())?
            .ok_or_else(|| StoreError::Corrupt(format!("missing embedding for memory {id}")))?;
        let vector: Vec<f32> = decode(&raw)?;
        if vector.len() != EMBEDDING_DIMENSION {
            return Err(StoreError::Corrupt(format!(
                "embedding for memory {id} has {} dimensions",
                vector.len()
            )));
        }
        Ok(vector)
    }
}

impl Store for RocksStore {
    fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        match self.db.get(user_key(id).as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_user_via(&email_key(email))
    }

    fn find_user_by_plaintext(&self, credential: &str) -> Result<Option<User>, StoreError> {
        self.find_user_via(&plaintext_key(credential))
    }

    fn find_user_by_hash(&self, hash: &str) -> Result<Option<User>, StoreError> {
        self.find_user_via(&hash_key(hash))
    }

    fn find_users_with_hash(&self, limit: usize) -> Result<Vec<User>, StoreError> {
        let mut users = Vec::new();
        if limit == 0 {
            return Ok(users);
        }
        self.scan_prefix(USER_PREFIX, |_, value| {
            let user: User = decode(value)?;
            if user.api_key_hash.is_some() {
                users.push(user);
            }
            Ok(if users.len() >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })?;
        Ok(users)
    }

    fn create_user(&self, email: &str, credential: CredentialMaterial) -> Result<User, StoreError> {
        let _guard = self.write_lock.lock();

        if self.db.get(email_key(email).as_bytes())?.is_some() {
            return Err(StoreError::Conflict("User with this email already exists".to_string()));
        }
        self.ensure_unclaimed(&credential, None)?;

        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            api_key: credential.plaintext,
            api_key_hash: credential.hash,
            credential_version: credential.version,
            created_at: Utc::now(),
        };
        let id_bytes = user.id.0.as_bytes();

        let mut batch = WriteBatch::default();
        batch.put(user_key(&user.id).as_bytes(), encode(&user)?);
        batch.put(email_key(email).as_bytes(), id_bytes);
        if let Some(plaintext) = &user.api_key {
            batch.put(plaintext_key(plaintext).as_bytes(), id_bytes);
        }
        if let Some(hash) = &user.api_key_hash {
            batch.put(hash_key(hash).as_bytes(), id_bytes);
        }
        self.write(batch)?;

        Ok(user)
    }

    fn update_user_credential(
        &self,
        id: &UserId,
        credential: CredentialMaterial,
    ) -> Result<User, StoreError> {
        let _guard = self.write_lock.lock();

        let mut user = self
            .find_user(id)?
            .ok_or_else(|| StoreError::UserNotFound(id.to_string()))?;
        self.ensure_unclaimed(&credential, Some(id))?;

        let mut batch = WriteBatch::default();
        if let Some(old) = &user.api_key {
            batch.delete(plaintext_key(old).as_bytes());
        }
        if let Some(old) = &user.api_key_hash {
            batch.delete(hash_key(old).as_bytes());
        }

        user.api_key = credential.plaintext;
        user.api_key_hash = credential.hash;
        user.credential_version = credential.version;

        let id_bytes = id.0.as_bytes();
        if let Some(plaintext) = &user.api_key {
            batch.put(plaintext_key(plaintext).as_bytes(), id_bytes);
        }
        if let Some(hash) = &user.api_key_hash {
            batch.put(hash_key(hash).as_bytes(), id_bytes);
        }
        batch.put(user_key(id).as_bytes(), encode(&user)?);
        self.write(batch)?;

        Ok(user)
    }

    fn rehash_credential(
        &self,
        id: &UserId,
        expected_hash: &str,
        expected_version: u64,
        new_hash: String,
    ) -> Result<Option<User>, StoreError> {
        let _guard = self.write_lock.lock();

        let Some(mut user) = self.find_user(id)? else {
            return Ok(None);
        };
        if user.api_key_hash.as_deref() != Some(expected_hash)
            || user.credential_version != expected_version
        {
            return Ok(None);
        }
        let material = CredentialMaterial {
            plaintext: None,
            hash: Some(new_hash.clone()),
            version: expected_version,
        };
        self.ensure_unclaimed(&material, Some(id))?;

        let mut batch = WriteBatch::default();
        batch.delete(hash_key(expected_hash).as_bytes());
        batch.put(hash_key(&new_hash).as_bytes(), id.0.as_bytes());
        user.api_key_hash = Some(new_hash);
        batch.put(user_key(id).as_bytes(), encode(&user)?);
        self.write(batch)?;

        Ok(Some(user))
    }

    fn create_memory(
        &self,
        memory: NewMemory,
        embedding: Option<Vec<f32>>,
    ) -> Result<Memory, StoreError> {
        if let Some(vector) = &embedding {
            if vector.len() != EMBEDDING_DIMENSION {
                return Err(StoreError::InvalidVector {
                    expected: EMBEDDING_DIMENSION,
                    actual: vector.len(),
                });
            }
        }

        let metadata_json = memory
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Encode(e.to_string()))?;

        let stored = StoredMemory {
            id: MemoryId::new(),
            user_id: memory.user_id,
            project: memory.project,
            content: memory.content,
            metadata_json,
            has_embedding: embedding.is_some(),
            created_at: self.next_created_at(),
        };
        let index = IndexEntry {
            project: stored.project.clone(),
            has_embedding: stored.has_embedding,
            payload_bytes: (stored.content.len()
                + stored.metadata_json.as_ref().map_or(0, String::len))
                as u64,
        };

        let mut batch = WriteBatch::default();
        batch.put(memory_key(&stored.id).as_bytes(), encode(&stored)?);
        if let Some(vector) = &embedding {
            batch.put(vector_key(&stored.id).as_bytes(), encode(vector)?);
        }
        batch.put(
            user_memory_key(&stored.user_id, &stored.created_at, &stored.id).as_bytes(),
            encode(&index)?,
        );
        self.write(batch)?;

        stored.into_memory()
    }

    fn find_memory(&self, id: &MemoryId) -> Result<Option<Memory>, StoreError> {
        self.load_memory(id)?.map(StoredMemory::into_memory).transpose()
    }

    fn delete_memory(&self, id: &MemoryId) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let Some(stored) = self.load_memory(id)? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        batch.delete(memory_key(id).as_bytes());
        batch.delete(vector_key(id).as_bytes());
        batch.delete(user_memory_key(&stored.user_id, &stored.created_at, id).as_bytes());
        self.write(batch)?;

        Ok(true)
    }

    fn list_memories(
        &self,
        user_id: &UserId,
        project: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<MemoryPage, StoreError> {
        let mut total = 0usize;
        let mut page_ids = Vec::with_capacity(limit);

        self.scan_prefix(&user_memory_prefix(user_id), |key, value| {
            if let Some(wanted) = project {
                let entry: IndexEntry = decode(value)?;
                if entry.project.as_deref() != Some(wanted) {
                    return Ok(ControlFlow::Continue(()));
                }
            }
            if total >= offset && page_ids.len() < limit {
                page_ids.push(parse_user_memory_key(key)?.1);
            }
            total += 1;
            Ok(ControlFlow::Continue(()))
        })?;

        let mut memories = Vec::with_capacity(page_ids.len());
        for id in page_ids {
            match self.find_memory(&id)? {
                Some(memory) => memories.push(memory),
                None => tracing::warn!(memory_id = %id, "Index entry without memory row (skipping)"),
            }
        }

        Ok(MemoryPage { memories, total })
    }

    fn vector_search(
        &self,
        user_id: &UserId,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredMemory>, StoreError> {
        if query.len() != EMBEDDING_DIMENSION {
            return Err(StoreError::InvalidVector {
                expected: EMBEDDING_DIMENSION,
                actual: query.len(),
            });
        }

        // Candidates arrive newest-first; the stable top-k keeps that order on ties
        let mut candidates = Vec::new();
        self.scan_prefix(&user_memory_prefix(user_id), |key, value| {
            let entry: IndexEntry = decode(value)?;
            if entry.has_embedding {
                let (_, id) = parse_user_memory_key(key)?;
                let vector = self.load_vector(&id)?;
                candidates.push((similarity::cosine_similarity(query, &vector), id));
            }
            Ok(ControlFlow::Continue(()))
        })?;

        let ranked = similarity::top_k(candidates, limit);

        let mut results = Vec::with_capacity(ranked.len());
        for (score, id) in ranked {
            let memory = self
                .find_memory(&id)?
                .ok_or_else(|| StoreError::Corrupt(format!("embedding without memory row {id}")))?;
            results.push(ScoredMemory { memory, score });
        }
        Ok(results)
    }

    fn memory_stats(&self, user_id: &UserId) -> Result<MemoryStats, StoreError> {
        let mut stats = MemoryStats::default();
        let mut projects: BTreeMap<Option<String>, usize> = BTreeMap::new();
        let mut newest_rank = None;
        let mut oldest_rank = None;

        self.scan_prefix(&user_memory_prefix(user_id), |key, value| {
            let entry: IndexEntry = decode(value)?;
            let (rank, _) = parse_user_memory_key(key)?;
            newest_rank.get_or_insert(rank);
            oldest_rank = Some(rank);

            stats.total += 1;
            stats.estimated_storage_bytes += entry.payload_bytes;
            if entry.has_embedding {
                stats.embedded += 1;
                stats.estimated_storage_bytes += EMBEDDING_BYTES;
            }
            *projects.entry(entry.project).or_default() += 1;
            Ok(ControlFlow::Continue(()))
        })?;

        stats.projects = projects
            .into_iter()
            .map(|(project, count)| ProjectCount { project, count })
            .collect();
        stats.newest = newest_rank.map(rank_to_timestamp);
        stats.oldest = oldest_rank.map(rank_to_timestamp);
        Ok(stats)
    }

    fn health_check(&self) -> Result<(), StoreError> {
        self.db.get(b"health:probe")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path(), WriteMode::Async).unwrap();
        (store, dir)
    }

    fn unit_vector(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIMENSION];
        v[axis] = 1.0;
        v
    }

    fn hashed(hash: &str) -> CredentialMaterial {
        CredentialMaterial {
            plaintext: None,
            hash: Some(hash.to_string()),
            version: 1,
        }
    }

    fn new_memory(user: &UserId, content: &str, project: Option<&str>) -> NewMemory {
        NewMemory {
            user_id: *user,
            project: project.map(str::to_string),
            content: content.to_string(),
            metadata: None,
        }
    }

    #[test]
    fn test_user_indices_and_conflicts() {
        let (store, _dir) = open_store();
        let user = store.create_user("a@example.com", hashed("h1")).unwrap();

        assert_eq!(store.find_user_by_email("a@example.com").unwrap().unwrap().id, user.id);
        assert_eq!(store.find_user_by_hash("h1").unwrap().unwrap().id, user.id);
        assert!(store.find_user_by_plaintext("h1").unwrap().is_none());

        assert!(matches!(
            store.create_user("a@example.com", hashed("h2")),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.create_user("b@example.com", hashed("h1")),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_credential_update_moves_indices() {
        let (store, _dir) = open_store();
        let user = store
            .create_user(
                "a@example.com",
                CredentialMaterial {
                    plaintext: Some("mh_old".to_string()),
                    hash: Some("old".to_string()),
                    version: 1,
                },
            )
            .unwrap();

        let updated = store
            .update_user_credential(
                &user.id,
                CredentialMaterial {
                    plaintext: None,
                    hash: Some("new".to_string()),
                    version: 2,
                },
            )
            .unwrap();

        assert_eq!(updated.credential_version, 2);
        assert!(store.find_user_by_plaintext("mh_old").unwrap().is_none());
        assert!(store.find_user_by_hash("old").unwrap().is_none());
        assert_eq!(store.find_user_by_hash("new").unwrap().unwrap().id, user.id);
    }

    #[test]
    fn test_find_users_with_hash_is_bounded() {
        let (store, _dir) = open_store();
        for i in 0..5 {
            store
                .create_user(&format!("u{i}@example.com"), hashed(&format!("h{i}")))
                .unwrap();
        }
        store
            .create_user(
                "plain@example.com",
                CredentialMaterial {
                    plaintext: Some("mh_plain".to_string()),
                    hash: None,
                    version: 1,
                },
            )
            .unwrap();

        assert_eq!(store.find_users_with_hash(3).unwrap().len(), 3);
        assert_eq!(store.find_users_with_hash(100).unwrap().len(), 5);
        assert!(store.find_users_with_hash(0).unwrap().is_empty());
    }

    #[test]
    fn test_list_is_newest_first_with_total() {
        let (store, _dir) = open_store();
        let user = UserId::new();
        let ids: Vec<MemoryId> = (0..5)
            .map(|i| {
                store
                    .create_memory(new_memory(&user, &format!("m{i}"), None), None)
                    .unwrap()
                    .id
            })
            .collect();

        let page = store.list_memories(&user, None, 2, 1).unwrap();
        assert_eq!(page.total, 5);
        let listed: Vec<MemoryId> = page.memories.iter().map(|m| m.id).collect();
        assert_eq!(listed, vec![ids[3], ids[2]]);

        let beyond = store.list_memories(&user, None, 10, 50).unwrap();
        assert_eq!(beyond.total, 5);
        assert!(beyond.memories.is_empty());
    }

    #[test]
    fn test_list_filters_by_project() {
        let (store, _dir) = open_store();
        let user = UserId::new();
        store.create_memory(new_memory(&user, "a", Some("work")), None).unwrap();
        store.create_memory(new_memory(&user, "b", None), None).unwrap();
        store.create_memory(new_memory(&user, "c", Some("work")), None).unwrap();

        let page = store.list_memories(&user, Some("work"), 10, 0).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.memories[0].content, "c");
    }

    #[test]
    fn test_metadata_round_trips() {
        let (store, _dir) = open_store();
        let user = UserId::new();
        let mut input = new_memory(&user, "with metadata", None);
        input.metadata = Some(serde_json::json!({"source": "cli", "tags": ["x"]}));

        let created = store.create_memory(input, None).unwrap();
        let loaded = store.find_memory(&created.id).unwrap().unwrap();
        assert_eq!(loaded.metadata.unwrap()["source"], "cli");
    }

    #[test]
    fn test_delete_removes_row_vector_and_index() {
        let (store, _dir) = open_store();
        let user = UserId::new();
        let memory = store
            .create_memory(new_memory(&user, "gone", None), Some(unit_vector(0)))
            .unwrap();

        assert!(store.delete_memory(&memory.id).unwrap());
        assert!(store.find_memory(&memory.id).unwrap().is_none());
        assert!(store.vector_search(&user, &unit_vector(0), 10).unwrap().is_empty());
        assert_eq!(store.list_memories(&user, None, 10, 0).unwrap().total, 0);
        assert!(!store.delete_memory(&memory.id).unwrap());
    }

    #[test]
    fn test_vector_search_ranks_within_user_only() {
        let (store, _dir) = open_store();
        let alice = UserId::new();
        let bob = UserId::new();

        let near = store
            .create_memory(new_memory(&alice, "near", None), Some(unit_vector(0)))
            .unwrap();
        let mut mixed = unit_vector(0);
        mixed[1] = 1.0;
        store
            .create_memory(new_memory(&alice, "mixed", None), Some(mixed))
            .unwrap();
        store
            .create_memory(new_memory(&alice, "unembedded", None), None)
            .unwrap();
        store
            .create_memory(new_memory(&bob, "bob", None), Some(unit_vector(0)))
            .unwrap();

        let results = store.vector_search(&alice, &unit_vector(0), 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.id, near.id);
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert!(results.iter().all(|r| r.memory.user_id == alice));
    }

    #[test]
    fn test_vector_search_ties_prefer_newest() {
        let (store, _dir) = open_store();
        let user = UserId::new();
        let older = store
            .create_memory(new_memory(&user, "older", None), Some(unit_vector(3)))
            .unwrap();
        let newer = store
            .create_memory(new_memory(&user, "newer", None), Some(unit_vector(3)))
            .unwrap();

        let results = store.vector_search(&user, &unit_vector(3), 10).unwrap();
        assert_eq!(results[0].memory.id, newer.id);
        assert_eq!(results[1].memory.id, older.id);
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let (store, _dir) = open_store();
        let user = UserId::new();
        assert!(matches!(
            store.create_memory(new_memory(&user, "x", None), Some(vec![1.0; 3])),
            Err(StoreError::InvalidVector { .. })
        ));
        assert!(store.vector_search(&user, &[1.0; 3], 5).is_err());
    }

    #[test]
    fn test_stats() {
        let (store, _dir) = open_store();
        let user = UserId::new();
        let first = store
            .create_memory(new_memory(&user, "a", Some("p")), Some(unit_vector(0)))
            .unwrap();
        let last = store.create_memory(new_memory(&user, "b", None), None).unwrap();

        let stats = store.memory_stats(&user).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.projects.len(), 2);
        assert_eq!(stats.oldest, Some(first.created_at));
        assert_eq!(stats.newest, Some(last.created_at));
        assert_eq!(stats.estimated_storage_bytes, 2 + EMBEDDING_BYTES);
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new();
        let id = {
            let store = RocksStore::open(dir.path(), WriteMode::Sync).unwrap();
            let id = store
                .create_memory(new_memory(&user, "durable", None), Some(unit_vector(1)))
                .unwrap()
                .id;
            store.flush().unwrap();
            id
        };

        let store = RocksStore::open(dir.path(), WriteMode::Sync).unwrap();
        assert_eq!(store.find_memory(&id).unwrap().unwrap().content, "durable");
        assert_eq!(store.vector_search(&user, &unit_vector(1), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_deletes_have_one_winner() {
        let (store, _dir) = open_store();
        let user = store.create_user("a@example.com", hashed("h1")).unwrap().id;

        for _ in 0..50 {
            let id = store
                .create_memory(new_memory(&user, "contested", None), Some(unit_vector(0)))
                .unwrap()
                .id;
            let barrier = std::sync::Barrier::new(2);

            let wins = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            store.delete_memory(&id).unwrap()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap())
                    .filter(|&won| won)
                    .count()
            });
            assert_eq!(wins, 1);
        }
        assert_eq!(store.list_memories(&user, None, 100, 0).unwrap().total, 0);
    }
}
