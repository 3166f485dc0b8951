// In-process FastCache backed by an LRU map with per-entry TTLs

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::AppResult;
use crate::infrastructure::fast_cache::FastCache;

/// What one key holds. A key stores exactly one kind at a time; writing a
/// different kind replaces the entry.
#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Counter(i64),
    /// Members folded to 64-bit hashes, so the count is approximate
    /// (collisions under-count).
    Distinct(HashSet<u64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    inserted_at: Instant,
    ttl: Option<Duration>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.inserted_at.elapsed() > ttl,
            None => false,
        }
    }
}

/// Capacity-bounded in-memory cache. Expired entries are dropped lazily on
/// access; eviction beyond that is LRU.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        MemoryCache {
            entries: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap())),
        }
    }

    /// Look up a key, discarding it first if its TTL has lapsed.
    fn live<'a>(entries: &'a mut LruCache<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        if let Some(entry) = entries.peek(key) {
            if entry.is_expired() {
                entries.pop(key);
                return None;
            }
        }
        entries.get_mut(key)
    }

    fn member_hash(member: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        member.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl FastCache for MemoryCache {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(entry) => match &entry.value {
                Value::Bytes(bytes) => Ok(Some(bytes.clone())),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        entries.put(key.to_string(), Entry::new(Value::Bytes(value), ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> AppResult<bool> {
        let mut entries = self.entries.lock().await;
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.put(key.to_string(), Entry::new(Value::Bytes(value), ttl));
        Ok(true)
    }

    async fn get_counter(&self, key: &str) -> AppResult<Option<i64>> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(entry) => match entry.value {
                Value::Counter(n) => Ok(Some(n)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn incr_by(&self, key: &str, delta: i64) -> AppResult<i64> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = Self::live(&mut entries, key) {
            if let Value::Counter(ref mut n) = entry.value {
                *n += delta;
                return Ok(*n);
            }
        }
        entries.put(key.to_string(), Entry::new(Value::Counter(delta), None));
        Ok(delta)
    }

    async fn set_counter(&self, key: &str, value: i64, ttl: Option<Duration>) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        entries.put(key.to_string(), Entry::new(Value::Counter(value), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut entries = self.entries.lock().await;
        entries.pop(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        let mut entries = self.entries.lock().await;
        let matching: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        let removed = matching.len() as u64;
        for key in matching {
            entries.pop(&key);
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let mut entries = self.entries.lock().await;
        Ok(Self::live(&mut entries, key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(entry) => {
                entry.inserted_at = Instant::now();
                entry.ttl = Some(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn distinct_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> AppResult<bool> {
        let hash = Self::member_hash(member);
        let mut entries = self.entries.lock().await;
        if let Some(entry) = Self::live(&mut entries, key) {
            if let Value::Distinct(ref mut members) = entry.value {
                return Ok(members.insert(hash));
            }
        }
        let mut members = HashSet::new();
        members.insert(hash);
        entries.put(key.to_string(), Entry::new(Value::Distinct(members), ttl));
        Ok(true)
    }

    async fn distinct_count(&self, key: &str) -> AppResult<i64> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(entry) => match &entry.value {
                Value::Distinct(members) => Ok(members.len() as i64),
                _ => Ok(0),
            },
            None => Ok(0),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bytes_round_trip_and_overwrite() {
        let cache = MemoryCache::new(16);
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set("k", b"first".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"first".to_vec()));

        cache.set("k", b"second".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let cache = MemoryCache::new(16);
        cache
            .set("k", b"v".to_vec(), Some(Duration::from_millis(5)))
            .await
            .unwrap();
        assert!(cache.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn set_nx_claims_exactly_once() {
        let cache = MemoryCache::new(16);
        assert!(cache.set_nx("guard", vec![1], None).await.unwrap());
        assert!(!cache.set_nx("guard", vec![2], None).await.unwrap());
        assert_eq!(cache.get("guard").await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn set_nx_reclaims_after_expiry() {
        let cache = MemoryCache::new(16);
        assert!(cache
            .set_nx("guard", vec![1], Some(Duration::from_millis(5)))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.set_nx("guard", vec![2], None).await.unwrap());
    }

    #[tokio::test]
    async fn counters_create_on_first_increment() {
        let cache = MemoryCache::new(16);
        assert_eq!(cache.get_counter("n").await.unwrap(), None);
        assert_eq!(cache.incr_by("n", 1).await.unwrap(), 1);
        assert_eq!(cache.incr_by("n", 4).await.unwrap(), 5);
        assert_eq!(cache.incr_by("n", -2).await.unwrap(), 3);
        assert_eq!(cache.get_counter("n").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn increment_leaves_ttl_in_place() {
        let cache = MemoryCache::new(16);
        cache
            .set_counter("n", 10, Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(cache.incr_by("n", 1).await.unwrap(), 11);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get_counter("n").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expire_rearms_only_existing_keys() {
        let cache = MemoryCache::new(16);
        assert!(!cache.expire("k", Duration::from_secs(1)).await.unwrap());

        cache.set("k", vec![1], None).await.unwrap();
        assert!(cache.expire("k", Duration::from_millis(5)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_prefix_spares_other_keys() {
        let cache = MemoryCache::new(16);
        cache.set("like:guard:1:a", vec![1], None).await.unwrap();
        cache.set("like:guard:1:b", vec![1], None).await.unwrap();
        cache.set("like:guard:2:a", vec![1], None).await.unwrap();

        let removed = cache.delete_prefix("like:guard:1:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(!cache.exists("like:guard:1:a").await.unwrap());
        assert!(cache.exists("like:guard:2:a").await.unwrap());
    }

    #[tokio::test]
    async fn distinct_count_ignores_repeat_members() {
        let cache = MemoryCache::new(16);
        assert_eq!(cache.distinct_count("uv").await.unwrap(), 0);

        assert!(cache.distinct_add("uv", "1.1.1.1", None).await.unwrap());
        assert!(cache.distinct_add("uv", "2.2.2.2", None).await.unwrap());
        assert!(!cache.distinct_add("uv", "1.1.1.1", None).await.unwrap());
        assert_eq!(cache.distinct_count("uv").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn scan_prefix_lists_live_matches_only() {
        let cache = MemoryCache::new(16);
        cache.set_counter("view:1", 3, None).await.unwrap();
        cache.set_counter("view:2", 1, None).await.unwrap();
        cache
            .set_counter("view:3", 9, Some(Duration::from_millis(5)))
            .await
            .unwrap();
        cache.set_counter("like:count:1", 7, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        let mut keys = cache.scan_prefix("view:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["view:1".to_string(), "view:2".to_string()]);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = MemoryCache::new(2);
        cache.set("a", vec![1], None).await.unwrap();
        cache.set("b", vec![2], None).await.unwrap();
        // Touch "a" so "b" is the eviction candidate.
        assert!(cache.exists("a").await.unwrap());
        cache.set("c", vec![3], None).await.unwrap();

        assert!(cache.exists("a").await.unwrap());
        assert!(!cache.exists("b").await.unwrap());
        assert!(cache.exists("c").await.unwrap());
    }
}
