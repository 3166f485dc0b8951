// Volatile cache abstraction: counters, guard keys, serialized aggregates

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppResult;

/// Low-latency volatile store. Implementations may lose data at any time;
/// callers treat every read as advisory and fall back to the durable store.
///
/// Counters and byte values live in separate slots per key: a key holds one
/// kind of value and switching kinds replaces it.
#[async_trait]
pub trait FastCache: Send + Sync {
    /// Fetch raw bytes. Expired or missing keys read as `None`.
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    /// Store raw bytes, replacing any previous value. `None` TTL means the
    /// entry never expires on its own (it can still be evicted).
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> AppResult<()>;

    /// Store only if the key is absent. Returns true when this call claimed
    /// the key.
    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> AppResult<bool>;

    /// Read a counter without creating it.
    async fn get_counter(&self, key: &str) -> AppResult<Option<i64>>;

    /// Add `delta` to a counter, creating it at zero first. Returns the new
    /// value. An existing TTL is left untouched.
    async fn incr_by(&self, key: &str, delta: i64) -> AppResult<i64>;

    /// Overwrite a counter outright.
    async fn set_counter(&self, key: &str, value: i64, ttl: Option<Duration>) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Remove every key starting with `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64>;

    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// Reset the TTL of an existing key. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<bool>;

    /// Add a member to a distinct-count set. Returns true when the member was
    /// new. Creates the set (with `ttl`) on first insert.
    async fn distinct_add(&self, key: &str, member: &str, ttl: Option<Duration>)
        -> AppResult<bool>;

    /// Approximate number of distinct members added to `key`. Missing keys
    /// count as zero.
    async fn distinct_count(&self, key: &str) -> AppResult<i64>;

    /// List live keys starting with `prefix`. Used by reconciliation sweeps;
    /// the listing is a snapshot, not a consistent view.
    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>>;
}

/// Key namespace and TTL policy. Every cache key in the system is built here
/// so invalidation and flush sweeps agree on the layout.
pub mod keys {
    use std::time::Duration;

    use crate::models::ArticleId;

    pub const LIKE_GUARD_TTL: Duration = Duration::from_secs(24 * 60 * 60);
    pub const LIKE_COUNT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
    pub const CATEGORY_LIST_TTL: Duration = Duration::from_secs(6 * 60 * 60);
    pub const TAG_LIST_TTL: Duration = Duration::from_secs(6 * 60 * 60);
    pub const SETTINGS_TTL: Duration = Duration::from_secs(12 * 60 * 60);
    pub const DAILY_STATS_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    pub const VIEW_PREFIX: &str = "view:";
    pub const CATEGORY_LIST: &str = "category:list";
    pub const TAG_LIST: &str = "tag:list";
    pub const SETTINGS: &str = "settings";
    pub const TOTAL_PV: &str = "stats:pv:total";

    /// Unflushed view delta for one article. No TTL: the delta must survive
    /// until a reconciliation sweep folds it into the store.
    pub fn view(article_id: ArticleId) -> String {
        format!("{}{}", VIEW_PREFIX, article_id)
    }

    /// Article id back out of a `view:` key, for the flush sweep.
    pub fn article_id_of_view_key(key: &str) -> Option<ArticleId> {
        key.strip_prefix(VIEW_PREFIX)?.parse().ok()
    }

    /// First-line dedup marker for one (article, visitor) pair.
    pub fn like_guard(article_id: ArticleId, identity: &str) -> String {
        format!("like:guard:{}:{}", article_id, identity)
    }

    /// Prefix covering every guard for one article, for purge.
    pub fn like_guard_prefix(article_id: ArticleId) -> String {
        format!("like:guard:{}:", article_id)
    }

    /// Read mirror of the persisted like count.
    pub fn like_count(article_id: ArticleId) -> String {
        format!("like:count:{}", article_id)
    }

    pub fn daily_pv(date: chrono::NaiveDate) -> String {
        format!("stats:pv:{}", date.format("%Y%m%d"))
    }

    pub fn daily_uv(date: chrono::NaiveDate) -> String {
        format!("stats:uv:{}", date.format("%Y%m%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn view_keys_round_trip_article_ids() {
        let key = keys::view(42);
        assert_eq!(key, "view:42");
        assert_eq!(keys::article_id_of_view_key(&key), Some(42));
        assert_eq!(keys::article_id_of_view_key("view:notanumber"), None);
        assert_eq!(keys::article_id_of_view_key("like:count:42"), None);
    }

    #[test]
    fn guard_keys_isolate_articles_and_identities() {
        let a = keys::like_guard(1, "1.2.3.4");
        let b = keys::like_guard(1, "5.6.7.8");
        let c = keys::like_guard(2, "1.2.3.4");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with(&keys::like_guard_prefix(1)));
        assert!(!c.starts_with(&keys::like_guard_prefix(1)));
    }

    #[test]
    fn daily_keys_embed_the_date() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(keys::daily_pv(date), "stats:pv:20240309");
        assert_eq!(keys::daily_uv(date), "stats:uv:20240309");
    }
}
