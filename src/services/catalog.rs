// Reference data behind the cache-aside registry: categories, tags, settings

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::AppResult;
use crate::infrastructure::{keys, CacheAsideRegistry, PersistentStore};
use crate::models::{CategorySummary, SiteSettings, TagSummary};

/// Category and tag lists with their published-article counts. Reads are
/// cache-aside with hour-scale TTLs; any admin mutation of the underlying
/// rows goes through `invalidate_reference_lists`.
#[derive(Clone)]
pub struct Catalog {
    registry: Arc<CacheAsideRegistry>,
    store: Arc<dyn PersistentStore>,
}

impl Catalog {
    pub fn new(registry: Arc<CacheAsideRegistry>, store: Arc<dyn PersistentStore>) -> Self {
        Self { registry, store }
    }

    #[instrument(skip(self))]
    pub async fn categories(&self) -> AppResult<Vec<CategorySummary>> {
        self.registry
            .get_or_load(keys::CATEGORY_LIST, keys::CATEGORY_LIST_TTL, || async {
                self.store.categories_with_counts().await
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn tags(&self) -> AppResult<Vec<TagSummary>> {
        self.registry
            .get_or_load(keys::TAG_LIST, keys::TAG_LIST_TTL, || async {
                self.store.tags_with_counts().await
            })
            .await
    }

    /// Invalidation hook handed to every writer that can change list
    /// membership or counts. Never fails: a failed invalidation only means
    /// staleness until TTL expiry.
    pub async fn invalidate_reference_lists(&self) {
        for key in [keys::CATEGORY_LIST, keys::TAG_LIST] {
            if let Err(e) = self.registry.invalidate(key).await {
                warn!("Failed to invalidate '{}': {}", key, e);
            }
        }
    }
}

/// The site settings singleton, cache-aside like the lists but with its own
/// key and TTL. Writers invalidate after the store commit.
#[derive(Clone)]
pub struct SettingsService {
    registry: Arc<CacheAsideRegistry>,
    store: Arc<dyn PersistentStore>,
}

impl SettingsService {
    pub fn new(registry: Arc<CacheAsideRegistry>, store: Arc<dyn PersistentStore>) -> Self {
        Self { registry, store }
    }

    pub async fn get(&self) -> AppResult<SiteSettings> {
        self.registry
            .get_or_load(keys::SETTINGS, keys::SETTINGS_TTL, || async {
                self.store.get_settings().await
            })
            .await
    }

    /// Store first, then invalidate. No transactional coupling: when the
    /// invalidation fails the cache serves the old settings until TTL.
    #[instrument(skip(self, settings))]
    pub async fn update(&self, settings: &SiteSettings) -> AppResult<()> {
        self.store.update_settings(settings).await?;
        if let Err(e) = self.registry.invalidate(keys::SETTINGS).await {
            warn!("Settings saved but cache invalidation failed: {}", e);
        }
        info!("Site settings updated");
        Ok(())
    }
}
