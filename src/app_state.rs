use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::{
    CacheAsideRegistry, FastCache, MemoryCache, PersistentStore, SqliteStore,
};
use crate::models::ArticleId;
use crate::services::{
    Catalog, CommentService, LikeDedupCounter, SettingsService, ViewCountAccumulator, VisitTracker,
};
use crate::services::visit_stats::DEFAULT_QUEUE_DEPTH;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn PersistentStore>,
    pub cache: Arc<dyn FastCache>,
    pub views: Arc<ViewCountAccumulator>,
    pub likes: Arc<LikeDedupCounter>,
    pub comments: Arc<CommentService>,
    pub catalog: Arc<Catalog>,
    pub settings: Arc<SettingsService>,
    pub visits: Arc<VisitTracker>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        // Initialize the durable store
        let store = SqliteStore::connect(&config.database.url).await?;
        store.initialize().await?;
        let store: Arc<dyn PersistentStore> = Arc::new(store);

        // One shared in-process cache behind the FastCache seam
        let cache: Arc<dyn FastCache> = Arc::new(MemoryCache::new(config.cache.capacity));

        Ok(Self::assemble(config, store, cache))
    }

    /// Wire the services onto externally supplied seams. Used by `new` and by
    /// tests that bring their own store or cache.
    pub fn assemble(
        config: Config,
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn FastCache>,
    ) -> Self {
        let registry = Arc::new(CacheAsideRegistry::new(cache.clone()));
        let settings = Arc::new(SettingsService::new(registry.clone(), store.clone()));

        Self {
            views: Arc::new(ViewCountAccumulator::new(cache.clone(), store.clone())),
            likes: Arc::new(LikeDedupCounter::new(cache.clone(), store.clone())),
            comments: Arc::new(CommentService::new(store.clone(), settings.clone())),
            catalog: Arc::new(Catalog::new(registry, store.clone())),
            visits: Arc::new(VisitTracker::new(
                store.clone(),
                cache.clone(),
                DEFAULT_QUEUE_DEPTH,
            )),
            settings,
            config,
            store,
            cache,
        }
    }

    /// Remove an article and everything derived from it: like records,
    /// comments, the view delta, the like mirror and guards, and the cached
    /// reference lists whose counts just changed. Safe to repeat; purging an
    /// already purged article is a no-op.
    #[instrument(skip(self))]
    pub async fn purge_article(&self, article_id: ArticleId) -> AppResult<()> {
        let existed = self.store.delete_article(article_id).await?;
        let likes_dropped = self.store.delete_likes(article_id).await?;
        let comments_dropped = self.store.delete_comments(article_id).await?;

        self.views.invalidate(article_id).await?;
        self.likes.invalidate(article_id).await?;
        self.catalog.invalidate_reference_lists().await;

        if existed {
            info!(
                "Purged article {} ({} likes, {} comments)",
                article_id, likes_dropped, comments_dropped
            );
        }
        Ok(())
    }
}
