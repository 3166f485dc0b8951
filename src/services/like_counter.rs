// At-most-once likes: guard key, durable record check, unique-index arbitration

use std::sync::Arc;

use tracing::{instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::{keys, FastCache, PersistentStore};
use crate::models::{Article, ArticleId, ArticleStatus};

/// One like per visitor identity per article. The cache guard and the durable
/// record check are both advisory fast paths; the store's unique index on
/// `(article_id, visitor_identity)` is what actually decides races.
///
/// Identity is whatever the caller supplies (typically a network address),
/// with the usual caveats: shared addresses undercount, rotating ones
/// overcount.
#[derive(Clone)]
pub struct LikeDedupCounter {
    cache: Arc<dyn FastCache>,
    store: Arc<dyn PersistentStore>,
}

impl LikeDedupCounter {
    pub fn new(cache: Arc<dyn FastCache>, store: Arc<dyn PersistentStore>) -> Self {
        Self { cache, store }
    }

    /// Accept one like and return the new effective count, or fail with
    /// `AlreadyLiked`. Steps: existence check, guard key, durable record
    /// check, uniqueness-constrained insert, atomic base increment, cache
    /// mirror update.
    #[instrument(skip(self))]
    pub async fn like(&self, article_id: ArticleId, visitor_identity: &str) -> AppResult<i64> {
        let article = self
            .store
            .get_article(article_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Article {} not found", article_id)))?;
        if article.status != ArticleStatus::Published {
            return Err(AppError::NotFound(format!(
                "Article {} is not published",
                article_id
            )));
        }

        let guard_key = keys::like_guard(article_id, visitor_identity);
        match self.cache.exists(&guard_key).await {
            Ok(true) => return Err(AppError::AlreadyLiked),
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Guard check for article {} failed, deferring to the store: {}",
                    article_id, e
                );
            }
        }

        // The guard can be evicted long before 24h; the durable record is the
        // second line. Rediscovering one rebuilds the guard.
        if self.store.has_liked(article_id, visitor_identity).await? {
            self.backfill_guard(&guard_key).await;
            return Err(AppError::AlreadyLiked);
        }

        match self.store.insert_like(article_id, visitor_identity).await {
            Ok(_) => {}
            Err(AppError::AlreadyLiked) => {
                // A concurrent call won the insert between our check and now.
                self.backfill_guard(&guard_key).await;
                return Err(AppError::AlreadyLiked);
            }
            Err(e) => return Err(e),
        }

        let base = self
            .store
            .increment_like_count(article_id, 1)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Article {} not found", article_id)))?;

        Ok(self.update_mirror(article_id, base).await)
    }

    /// Effective like count for a row the caller already holds: the cache
    /// mirror when present, otherwise the persisted base (which reseeds the
    /// mirror).
    pub async fn effective_for(&self, article: &Article) -> i64 {
        let count_key = keys::like_count(article.id);
        match self.cache.get_counter(&count_key).await {
            Ok(Some(count)) => count,
            Ok(None) => {
                self.seed_mirror(&count_key, article.like_count).await;
                article.like_count
            }
            Err(e) => {
                warn!(
                    "Like mirror read for article {} failed, serving base: {}",
                    article.id, e
                );
                article.like_count
            }
        }
    }

    /// Drop the mirror and every guard for an article. Called on deletion.
    pub async fn invalidate(&self, article_id: ArticleId) -> AppResult<()> {
        self.cache.delete(&keys::like_count(article_id)).await?;
        self.cache
            .delete_prefix(&keys::like_guard_prefix(article_id))
            .await?;
        Ok(())
    }

    /// Mirror maintenance after a successful like: increment a live mirror,
    /// reseed an absent one from the fresh base. Cache failures serve the
    /// base, never the error.
    async fn update_mirror(&self, article_id: ArticleId, base: i64) -> i64 {
        let count_key = keys::like_count(article_id);
        match self.cache.exists(&count_key).await {
            Ok(true) => match self.cache.incr_by(&count_key, 1).await {
                Ok(count) => count,
                Err(e) => {
                    warn!("Like mirror bump for article {} failed: {}", article_id, e);
                    base
                }
            },
            Ok(false) => {
                self.seed_mirror(&count_key, base).await;
                base
            }
            Err(e) => {
                warn!("Like mirror probe for article {} failed: {}", article_id, e);
                base
            }
        }
    }

    async fn seed_mirror(&self, count_key: &str, base: i64) {
        if let Err(e) = self
            .cache
            .set_counter(count_key, base, Some(keys::LIKE_COUNT_TTL))
            .await
        {
            warn!("Failed to seed like mirror '{}': {}", count_key, e);
        }
    }

    async fn backfill_guard(&self, guard_key: &str) {
        if let Err(e) = self
            .cache
            .set(guard_key, vec![1], Some(keys::LIKE_GUARD_TTL))
            .await
        {
            warn!("Failed to backfill like guard '{}': {}", guard_key, e);
        }
    }
}
