// View counting: cache-buffered deltas over a persisted base

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::{keys, FastCache, PersistentStore};
use crate::models::{Article, ArticleId};

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Keys whose delta was folded into the persisted base.
    pub keys_flushed: u64,
    /// Total views moved into the store.
    pub views_applied: i64,
    /// Keys dropped because their article no longer exists.
    pub keys_dropped: u64,
}

/// Buffers per-article view increments in the cache and composes them with
/// the persisted base on read. A view is one page render; nothing here
/// deduplicates.
#[derive(Clone)]
pub struct ViewCountAccumulator {
    cache: Arc<dyn FastCache>,
    store: Arc<dyn PersistentStore>,
}

impl ViewCountAccumulator {
    pub fn new(cache: Arc<dyn FastCache>, store: Arc<dyn PersistentStore>) -> Self {
        Self { cache, store }
    }

    /// Count one render. Never fails the caller: a dead cache loses the
    /// increment and logs, nothing more. Articles are not looked up first;
    /// deltas for unknown ids are discarded by the flush sweep.
    pub async fn record_view(&self, article_id: ArticleId) {
        if let Err(e) = self.cache.incr_by(&keys::view(article_id), 1).await {
            warn!("Failed to record view for article {}: {}", article_id, e);
        }
    }

    /// Persisted base plus the unflushed cache delta. Unknown article fails
    /// with `NotFound`; an unavailable cache degrades to the base alone.
    #[instrument(skip(self))]
    pub async fn effective_view_count(&self, article_id: ArticleId) -> AppResult<i64> {
        let article = self
            .store
            .get_article(article_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Article {} not found", article_id)))?;
        Ok(self.effective_for(&article).await)
    }

    /// Same composition for callers that already hold the row.
    pub async fn effective_for(&self, article: &Article) -> i64 {
        article.view_count + self.delta(article.id).await
    }

    async fn delta(&self, article_id: ArticleId) -> i64 {
        match self.cache.get_counter(&keys::view(article_id)).await {
            Ok(Some(delta)) => delta,
            Ok(None) => 0,
            Err(e) => {
                warn!(
                    "View delta read for article {} failed, serving base only: {}",
                    article_id, e
                );
                0
            }
        }
    }

    /// Drop the delta key. Called on article deletion; calling it again is a
    /// no-op.
    pub async fn invalidate(&self, article_id: ArticleId) -> AppResult<()> {
        self.cache.delete(&keys::view(article_id)).await
    }

    /// Fold buffered deltas into the persisted bases. Each key is decremented
    /// by exactly the amount applied rather than deleted, so increments that
    /// land mid-sweep survive for the next one. Deltas for vanished articles
    /// are discarded.
    #[instrument(skip(self))]
    pub async fn flush_views(&self) -> AppResult<FlushOutcome> {
        let view_keys = self.cache.scan_prefix(keys::VIEW_PREFIX).await?;
        let mut outcome = FlushOutcome::default();

        for key in view_keys {
            let Some(article_id) = keys::article_id_of_view_key(&key) else {
                warn!("Skipping malformed view key '{}'", key);
                continue;
            };
            let delta = match self.cache.get_counter(&key).await? {
                Some(delta) if delta > 0 => delta,
                _ => continue,
            };

            match self.store.increment_view_count(article_id, delta).await? {
                Some(_) => {
                    self.cache.incr_by(&key, -delta).await?;
                    outcome.keys_flushed += 1;
                    outcome.views_applied += delta;
                }
                None => {
                    self.cache.delete(&key).await?;
                    outcome.keys_dropped += 1;
                }
            }
        }

        if outcome.keys_flushed > 0 || outcome.keys_dropped > 0 {
            info!(
                "Flushed {} view keys ({} views), dropped {} orphans",
                outcome.keys_flushed, outcome.views_applied, outcome.keys_dropped
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{MemoryCache, SqliteStore};
    use crate::models::{ArticleStatus, NewArticle};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (ViewCountAccumulator, Arc<dyn PersistentStore>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.initialize().await.unwrap();
        let store: Arc<dyn PersistentStore> = Arc::new(store);
        let cache: Arc<dyn FastCache> = Arc::new(MemoryCache::new(64));
        (ViewCountAccumulator::new(cache, store.clone()), store)
    }

    async fn published_article(store: &dyn PersistentStore, base_views: i64) -> ArticleId {
        let article = store
            .create_article(NewArticle {
                title: "t".to_string(),
                content: "c".to_string(),
                category_id: None,
                status: ArticleStatus::Published,
            })
            .await
            .unwrap();
        if base_views > 0 {
            store
                .increment_view_count(article.id, base_views)
                .await
                .unwrap();
        }
        article.id
    }

    #[tokio::test]
    async fn effective_count_is_base_plus_recorded_views() {
        let (views, store) = setup().await;
        let id = published_article(store.as_ref(), 40).await;

        for _ in 0..3 {
            views.record_view(id).await;
        }

        assert_eq!(views.effective_view_count(id).await.unwrap(), 43);
        // The persisted base is untouched until a flush.
        let article = store.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.view_count, 40);
    }

    #[tokio::test]
    async fn missing_article_is_not_found() {
        let (views, _store) = setup().await;
        let err = views.effective_view_count(777).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalidate_discards_the_delta() {
        let (views, store) = setup().await;
        let id = published_article(store.as_ref(), 10).await;

        views.record_view(id).await;
        views.invalidate(id).await.unwrap();
        views.invalidate(id).await.unwrap();

        assert_eq!(views.effective_view_count(id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn flush_moves_deltas_into_the_base() {
        let (views, store) = setup().await;
        let id = published_article(store.as_ref(), 5).await;

        for _ in 0..4 {
            views.record_view(id).await;
        }

        let outcome = views.flush_views().await.unwrap();
        assert_eq!(outcome.keys_flushed, 1);
        assert_eq!(outcome.views_applied, 4);
        assert_eq!(outcome.keys_dropped, 0);

        let article = store.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.view_count, 9);
        // The effective count is unchanged by a flush.
        assert_eq!(views.effective_view_count(id).await.unwrap(), 9);

        // Nothing left to apply on a second pass.
        let outcome = views.flush_views().await.unwrap();
        assert_eq!(outcome, FlushOutcome::default());
    }

    #[tokio::test]
    async fn flush_drops_keys_for_deleted_articles() {
        let (views, store) = setup().await;
        let id = published_article(store.as_ref(), 0).await;

        views.record_view(id).await;
        store.delete_article(id).await.unwrap();

        let outcome = views.flush_views().await.unwrap();
        assert_eq!(outcome.keys_flushed, 0);
        assert_eq!(outcome.keys_dropped, 1);
    }
}
