//! Thread-Safe Storage Engine with Expiry Support
//!
//! The storage engine is a concurrent map from keys to string values with an
//! optional expiration instant per key.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Keys are spread across independent shards, each with
//!    its own `RwLock`, so unrelated keys do not contend.
//! 2. **Lazy Expiry**: An entry past its expiration instant is treated as absent
//!    and removed the next time it is touched.
//! 3. **Active Expiry**: `cleanup_expired` removes all expired entries; the
//!    sweeper in `expiry.rs` calls it on a fixed interval.
//! 4. **Generations**: Every write stamps the entry with a fresh generation
//!    number. A delayed deletion scheduled for one write carries that write's
//!    generation and leaves later writes alone.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation touches exactly one key under one shard lock, so each
//! is atomic per key. There are no cross-key transactions.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// A stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
    /// Generation of the write that produced this entry
    pub generation: u64,
}

impl Entry {
    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[inline]
    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// Precondition for a conditional SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    /// Write unconditionally
    #[default]
    Always,
    /// Write only if the key is absent (NX)
    IfAbsent,
    /// Write only if the key is present (XX)
    IfPresent,
}

/// Absolute expiration for a TTL. A TTL too large to represent never expires.
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

type ShardMap = HashMap<Bytes, Entry>;

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<ShardMap>,
}

impl Shard {
    // A panic while holding a shard lock cannot leave a half-written entry,
    // so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, ShardMap> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ShardMap> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The main storage engine.
///
/// Wrap it in an `Arc` and share it between every client session, the
/// expiry sweeper and scheduled deletions. All operations are thread-safe.
///
/// # Example
///
/// ```
/// use emberkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(engine.get(&Bytes::from("name")), Some(Bytes::from("Ariz")));
///
/// engine.set_with_ttl(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// assert!(engine.exists(&Bytes::from("session")));
/// ```
pub struct StorageEngine {
    /// Sharded storage for reduced lock contention
    shards: Vec<Shard>,

    /// Number of physically stored keys, expired ones included until removed
    key_count: AtomicU64,

    /// Source of write generations
    next_generation: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    fn new_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Inserts an entry into a locked shard, keeping the key count in sync.
    fn insert_locked(
        &self,
        data: &mut ShardMap,
        key: Bytes,
        value: Bytes,
        expires_at: Option<Instant>,
    ) -> u64 {
        let generation = self.new_generation();
        let entry = Entry {
            value,
            expires_at,
            generation,
        };
        if data.insert(key, entry).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        generation
    }

    /// Returns the live entry for `key`, dropping it first if it has expired.
    fn live_entry_mut<'a>(&self, data: &'a mut ShardMap, key: &Bytes) -> Option<&'a mut Entry> {
        if data.get(key).is_some_and(Entry::is_expired) {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        data.get_mut(key)
    }

    /// Sets a key-value pair without expiry, replacing any previous expiry.
    ///
    /// Returns the generation of this write.
    pub fn set(&self, key: Bytes, value: Bytes) -> u64 {
        let mut data = self.get_shard(&key).write();
        self.insert_locked(&mut data, key, value, None)
    }

    /// Sets a key-value pair that expires after `ttl`.
    ///
    /// Returns the generation of this write.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> u64 {
        let mut data = self.get_shard(&key).write();
        self.insert_locked(&mut data, key, value, deadline(ttl))
    }

    /// Sets a key if `condition` holds, checking and writing under one lock.
    ///
    /// Returns the generation of the write, or `None` if the condition failed
    /// and nothing was changed.
    pub fn set_if(
        &self,
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> Option<u64> {
        let mut data = self.get_shard(&key).write();
        let present = self.live_entry_mut(&mut data, &key).is_some();

        let allowed = match condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => !present,
            SetCondition::IfPresent => present,
        };
        if !allowed {
            return None;
        }

        let expires_at = ttl.and_then(deadline);
        Some(self.insert_locked(&mut data, key, value, expires_at))
    }

    /// Stores `value` without expiry and returns the previous live value.
    pub fn get_set(&self, key: Bytes, value: Bytes) -> Option<Bytes> {
        let mut data = self.get_shard(&key).write();
        let old = self
            .live_entry_mut(&mut data, &key)
            .map(|entry| entry.value.clone());
        self.insert_locked(&mut data, key, value, None);
        old
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. Expired keys
    /// are removed on access.
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        let shard = self.get_shard(key);

        // Fast path under the read lock
        {
            let data = shard.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: retake as writer. Another thread may have rewritten the key
        // in between, which live_entry_mut accounts for.
        let mut data = shard.write();
        self.live_entry_mut(&mut data, key)
            .map(|entry| entry.value.clone())
    }

    /// Gets the full entry for a key, or `None` if absent or expired.
    pub fn get_entry(&self, key: &Bytes) -> Option<Entry> {
        let data = self.get_shard(key).read();
        data.get(key).filter(|e| !e.is_expired()).cloned()
    }

    /// Deletes a key.
    ///
    /// Returns `true` if a live key was removed. Deleting an absent key is a
    /// no-op.
    pub fn delete(&self, key: &Bytes) -> bool {
        let mut data = self.get_shard(key).write();

        match data.remove(key) {
            Some(entry) => {
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                !entry.is_expired()
            }
            None => false,
        }
    }

    /// Deletes multiple keys and returns how many live keys were removed.
    pub fn delete_many(&self, keys: &[Bytes]) -> u64 {
        keys.iter().filter(|key| self.delete(key)).count() as u64
    }

    /// Deletes `key` only if it still holds the entry written with
    /// `generation`.
    ///
    /// Used by scheduled deletions: once the key has been rewritten, the
    /// older deletion does nothing.
    pub fn delete_generation(&self, key: &Bytes, generation: u64) -> bool {
        let mut data = self.get_shard(key).write();

        if data.get(key).is_some_and(|e| e.generation == generation) {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Checks if a key exists and is not expired.
    pub fn exists(&self, key: &Bytes) -> bool {
        let data = self.get_shard(key).read();
        data.get(key).map(|e| !e.is_expired()).unwrap_or(false)
    }

    /// Returns the type name of the value at `key`: `"string"` or `"none"`.
    pub fn key_type(&self, key: &Bytes) -> &'static str {
        if self.exists(key) {
            "string"
        } else {
            "none"
        }
    }

    /// Records an absolute expiration instant for an existing key.
    ///
    /// Returns `false` if the key doesn't exist.
    pub fn set_expire_at(&self, key: &Bytes, at: Instant) -> bool {
        let mut data = self.get_shard(key).write();

        match self.live_entry_mut(&mut data, key) {
            Some(entry) => {
                entry.expires_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Removes the expiration instant from a key.
    ///
    /// Returns `true` if the key existed and had an expiry.
    pub fn clear_expire(&self, key: &Bytes) -> bool {
        let mut data = self.get_shard(key).write();

        match self.live_entry_mut(&mut data, key) {
            Some(entry) => entry.expires_at.take().is_some(),
            None => false,
        }
    }

    /// Returns the expiration instant of a live key, if it has one.
    pub fn expires_at(&self, key: &Bytes) -> Option<Instant> {
        self.get_entry(key).and_then(|entry| entry.expires_at)
    }

    /// Removes every entry whose expiration instant is at or before now.
    ///
    /// Called by the background expiry sweeper. Returns the number of keys
    /// removed.
    pub fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut data = shard.write();
            let before = data.len();

            data.retain(|_, entry| !entry.is_expired_at(now));

            cleaned += (before - data.len()) as u64;
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
        }

        cleaned
    }

    /// Returns the number of stored keys.
    ///
    /// Expired keys that have not been removed yet are still counted.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();

        engine.set(key("key"), key("value"));
        assert_eq!(engine.get(&key("key")), Some(key("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        assert_eq!(engine.get(&key("nonexistent")), None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let engine = StorageEngine::new();

        engine.set(key("key"), key("value"));
        assert!(engine.delete(&key("key")));
        assert_eq!(engine.get(&key("key")), None);
        assert!(!engine.delete(&key("key")));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_delete_many_counts_removed() {
        let engine = StorageEngine::new();

        engine.set(key("a"), key("1"));
        engine.set(key("b"), key("2"));

        assert_eq!(engine.delete_many(&[key("a"), key("missing"), key("b")]), 2);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_expiry_is_lazy_on_read() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(key("key"), key("value"), Duration::from_millis(50));
        assert!(engine.exists(&key("key")));

        thread::sleep(Duration::from_millis(100));

        assert!(!engine.exists(&key("key")));
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.get(&key("key")), None);
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn test_set_clears_previous_expiry() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(key("key"), key("v1"), Duration::from_secs(60));
        assert!(engine.expires_at(&key("key")).is_some());

        engine.set(key("key"), key("v2"));
        assert_eq!(engine.expires_at(&key("key")), None);
    }

    #[test]
    fn test_set_if_absent() {
        let engine = StorageEngine::new();

        assert!(engine
            .set_if(key("k"), key("v1"), None, SetCondition::IfAbsent)
            .is_some());
        assert!(engine
            .set_if(key("k"), key("v2"), None, SetCondition::IfAbsent)
            .is_none());
        assert_eq!(engine.get(&key("k")), Some(key("v1")));
    }

    #[test]
    fn test_set_if_present() {
        let engine = StorageEngine::new();

        assert!(engine
            .set_if(key("k"), key("v1"), None, SetCondition::IfPresent)
            .is_none());
        assert_eq!(engine.get(&key("k")), None);

        engine.set(key("k"), key("v1"));
        assert!(engine
            .set_if(key("k"), key("v2"), None, SetCondition::IfPresent)
            .is_some());
        assert_eq!(engine.get(&key("k")), Some(key("v2")));
    }

    #[test]
    fn test_set_if_treats_expired_key_as_absent() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(key("k"), key("old"), Duration::from_millis(10));
        thread::sleep(Duration::from_millis(30));

        assert!(engine
            .set_if(key("k"), key("new"), None, SetCondition::IfAbsent)
            .is_some());
        assert_eq!(engine.get(&key("k")), Some(key("new")));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_get_set() {
        let engine = StorageEngine::new();

        assert_eq!(engine.get_set(key("k"), key("v1")), None);
        assert_eq!(engine.get_set(key("k"), key("v2")), Some(key("v1")));
        assert_eq!(engine.get(&key("k")), Some(key("v2")));
    }

    #[test]
    fn test_delete_generation_skips_newer_writes() {
        let engine = StorageEngine::new();

        let first = engine.set_with_ttl(key("k"), key("v1"), Duration::from_secs(60));
        let second = engine.set(key("k"), key("v2"));
        assert_ne!(first, second);

        assert!(!engine.delete_generation(&key("k"), first));
        assert_eq!(engine.get(&key("k")), Some(key("v2")));

        assert!(engine.delete_generation(&key("k"), second));
        assert_eq!(engine.get(&key("k")), None);
        assert!(!engine.delete_generation(&key("k"), second));
    }

    #[test]
    fn test_set_expire_at_and_clear_expire() {
        let engine = StorageEngine::new();

        assert!(!engine.set_expire_at(&key("k"), Instant::now()));

        engine.set(key("k"), key("v"));
        let at = Instant::now() + Duration::from_secs(30);
        assert!(engine.set_expire_at(&key("k"), at));
        assert_eq!(engine.expires_at(&key("k")), Some(at));

        assert!(engine.clear_expire(&key("k")));
        assert_eq!(engine.expires_at(&key("k")), None);
        assert!(!engine.clear_expire(&key("k")));
    }

    #[test]
    fn test_expire_at_in_past_hides_key() {
        let engine = StorageEngine::new();

        engine.set(key("k"), key("v"));
        engine.set_expire_at(&key("k"), Instant::now());

        assert!(!engine.exists(&key("k")));
        assert_eq!(engine.key_type(&key("k")), "none");
    }

    #[test]
    fn test_key_type() {
        let engine = StorageEngine::new();

        assert_eq!(engine.key_type(&key("k")), "none");
        engine.set(key("k"), key("v"));
        assert_eq!(engine.key_type(&key("k")), "string");
    }

    #[test]
    fn test_cleanup_expired() {
        let engine = StorageEngine::new();

        engine.set_with_ttl(key("key1"), key("value1"), Duration::from_millis(10));
        engine.set_with_ttl(key("key2"), key("value2"), Duration::from_millis(10));
        engine.set(key("key3"), key("value3"));

        thread::sleep(Duration::from_millis(50));

        assert_eq!(engine.cleanup_expired(), 2);
        assert_eq!(engine.len(), 1);
        assert!(engine.exists(&key("key3")));
    }

    #[test]
    fn test_concurrent_access() {
        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let k = key(&format!("key-{}-{}", i, j));
                    engine.set(k.clone(), key("value"));
                    engine.get(&k);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1000);
    }

    #[test]
    fn test_concurrent_writes_same_key_leave_one_value() {
        let engine = Arc::new(StorageEngine::new());
        let a = key(&"a".repeat(4096));
        let b = key(&"b".repeat(4096));

        let writers: Vec<_> = [a.clone(), b.clone()]
            .into_iter()
            .map(|value| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..500 {
                        engine.set(key("shared"), value.clone());
                    }
                })
            })
            .collect();

        let reader = {
            let engine = Arc::clone(&engine);
            let (a, b) = (a.clone(), b.clone());
            thread::spawn(move || {
                for _ in 0..500 {
                    if let Some(v) = engine.get(&key("shared")) {
                        assert!(v == a || v == b);
                    }
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();

        let value = engine.get(&key("shared")).unwrap();
        assert!(value == a || value == b);
        assert_eq!(engine.len(), 1);
    }
}
