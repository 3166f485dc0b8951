// Visit logging: fire-and-forget recording, cache-first stats

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::error::AppResult;
use crate::infrastructure::{keys, FastCache, PersistentStore};
use crate::models::{VisitEvent, VisitStats};

pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Records page visits without ever blocking the request path: `record` hands
/// the event to a worker over a bounded channel and returns. The worker
/// persists the row and bumps the cached counters; its failures are logged,
/// never surfaced.
#[derive(Clone)]
pub struct VisitTracker {
    sender: mpsc::Sender<VisitEvent>,
    cache: Arc<dyn FastCache>,
    store: Arc<dyn PersistentStore>,
}

impl VisitTracker {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn FastCache>,
        queue_depth: usize,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<VisitEvent>(queue_depth);

        let worker_store = store.clone();
        let worker_cache = cache.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) =
                    persist_visit(worker_store.as_ref(), worker_cache.as_ref(), &event).await
                {
                    warn!("Failed to record visit to '{}': {}", event.page_url, e);
                }
            }
            info!("Visit recorder worker stopped");
        });

        Self {
            sender,
            cache,
            store,
        }
    }

    /// Queue one visit. Never blocks; when the queue is full the event is
    /// dropped with a warning.
    pub fn record(&self, event: VisitEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping visit event: {}", e);
        }
    }

    /// Today's page views and unique visitors plus the running total.
    /// Cache-first; a missing counter falls back to counting the durable
    /// visit log. The read path never writes the cache, so a racing worker
    /// can never be double-counted.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> AppResult<VisitStats> {
        let now = Utc::now();
        let date = now.date_naive();
        let midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));

        let today_pv = match self.cache.get_counter(&keys::daily_pv(date)).await {
            Ok(Some(count)) => count,
            Ok(None) => self.store.count_visits_since(midnight).await?,
            Err(e) => {
                warn!("Daily view counter read failed, counting rows: {}", e);
                self.store.count_visits_since(midnight).await?
            }
        };

        let today_uv = match self.cache.distinct_count(&keys::daily_uv(date)).await {
            Ok(count) if count > 0 => count,
            Ok(_) => self.store.count_distinct_visitors_since(midnight).await?,
            Err(e) => {
                warn!("Daily visitor set read failed, counting rows: {}", e);
                self.store.count_distinct_visitors_since(midnight).await?
            }
        };

        let total_pv = match self.cache.get_counter(keys::TOTAL_PV).await {
            Ok(Some(count)) => count,
            Ok(None) => self.store.count_visits().await?,
            Err(e) => {
                warn!("Total view counter read failed, counting rows: {}", e);
                self.store.count_visits().await?
            }
        };

        Ok(VisitStats {
            today_pv,
            today_uv,
            total_pv,
        })
    }
}

/// Store write first, cache bumps after; an error anywhere leaves the row
/// authoritative and the counters behind, which the fallback read tolerates.
async fn persist_visit(
    store: &dyn PersistentStore,
    cache: &dyn FastCache,
    event: &VisitEvent,
) -> AppResult<()> {
    let now = Utc::now();
    store.insert_visit(event, now).await?;

    let date = now.date_naive();
    let pv_key = keys::daily_pv(date);
    cache.incr_by(&pv_key, 1).await?;
    cache.expire(&pv_key, keys::DAILY_STATS_TTL).await?;
    cache
        .distinct_add(
            &keys::daily_uv(date),
            &event.ip_address,
            Some(keys::DAILY_STATS_TTL),
        )
        .await?;
    cache.incr_by(keys::TOTAL_PV, 1).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{MemoryCache, SqliteStore};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn setup() -> (VisitTracker, Arc<dyn PersistentStore>, Arc<dyn FastCache>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.initialize().await.unwrap();
        let store: Arc<dyn PersistentStore> = Arc::new(store);
        let cache: Arc<dyn FastCache> = Arc::new(MemoryCache::new(64));
        (
            VisitTracker::new(store.clone(), cache.clone(), DEFAULT_QUEUE_DEPTH),
            store,
            cache,
        )
    }

    fn visit(ip: &str, url: &str) -> VisitEvent {
        VisitEvent {
            ip_address: ip.to_string(),
            user_agent: Some("tester".to_string()),
            page_url: url.to_string(),
            referer: None,
        }
    }

    /// The total counter is the worker's last write per event, so reaching
    /// `expected` means every earlier write for those events has landed.
    async fn wait_for_total(cache: &dyn FastCache, expected: i64) {
        for _ in 0..200 {
            if cache.get_counter(keys::TOTAL_PV).await.unwrap() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("visit worker did not drain in time");
    }

    #[tokio::test]
    async fn recorded_visits_reach_store_and_counters() {
        let (tracker, store, cache) = setup().await;

        tracker.record(visit("1.1.1.1", "/a"));
        tracker.record(visit("1.1.1.1", "/b"));
        tracker.record(visit("2.2.2.2", "/a"));
        wait_for_total(cache.as_ref(), 3).await;

        let stats = tracker.stats().await.unwrap();
        assert_eq!(stats.today_pv, 3);
        assert_eq!(stats.today_uv, 2);
        assert_eq!(stats.total_pv, 3);

        assert_eq!(store.count_visits().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cold_cache_counts_from_the_durable_log() {
        let (tracker, store, _cache) = setup().await;

        // Rows written outside the tracker, so no counters exist.
        let two_days_ago = Utc::now() - chrono::Duration::days(2);
        store
            .insert_visit(&visit("1.1.1.1", "/old"), two_days_ago)
            .await
            .unwrap();
        store
            .insert_visit(&visit("3.3.3.3", "/new"), Utc::now())
            .await
            .unwrap();

        let stats = tracker.stats().await.unwrap();
        assert_eq!(stats.today_pv, 1);
        assert_eq!(stats.today_uv, 1);
        assert_eq!(stats.total_pv, 2);
    }
}
