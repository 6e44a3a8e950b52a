use super::invalidation::InvalidationScheduler;
use crate::api::{ApiClient, ApiError, Feed, FeedId, NewFeed, Stats};
use crate::cache::Cache;

/// Feed list, stats, and the create/delete/refresh lifecycle.
///
/// Reads are cache-first. Lifecycle actions hand their cache consequences to
/// the [`InvalidationScheduler`] only after the backend accepted them; a
/// failed action leaves the cache untouched and is both logged and returned.
pub struct FeedManager {
    api: ApiClient,
    cache: Cache,
    scheduler: InvalidationScheduler,
}

impl FeedManager {
    pub fn new(api: ApiClient, cache: Cache, scheduler: InvalidationScheduler) -> Self {
        Self {
            api,
            cache,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &InvalidationScheduler {
        &self.scheduler
    }

    /// The feed list, fetched only when the cached copy is missing or stale.
    pub async fn feeds(&self) -> Result<Vec<Feed>, ApiError> {
        if let Some(feeds) = self.cache.feeds() {
            return Ok(feeds);
        }
        self.reload_feeds().await
    }

    /// Fetches the feed list regardless of cache state.
    pub async fn reload_feeds(&self) -> Result<Vec<Feed>, ApiError> {
        let fetched = self.api.list_feeds().await.inspect_err(|e| {
            tracing::warn!(error = %e, "Failed to load feeds");
        })?;
        tracing::debug!(count = fetched.len(), "Loaded feeds");

        self.cache.replace_feeds(fetched.clone());
        // Re-read so deleted feeds the backend still lists stay hidden
        Ok(self.cache.feeds().unwrap_or(fetched))
    }

    pub async fn stats(&self) -> Result<Stats, ApiError> {
        if let Some(stats) = self.cache.stats() {
            return Ok(stats);
        }
        let stats = self.api.stats().await.inspect_err(|e| {
            tracing::warn!(error = %e, "Failed to load stats");
        })?;
        self.cache.set_stats(stats);
        Ok(stats)
    }

    pub async fn create(&self, feed: &NewFeed) -> Result<Feed, ApiError> {
        match self.api.create_feed(feed).await {
            Ok(created) => {
                tracing::info!(
                    feed_id = created.id,
                    url = %created.url,
                    kind = %created.kind(),
                    "Feed created"
                );
                self.scheduler.feed_created();
                Ok(created)
            }
            Err(e) => {
                tracing::warn!(url = %feed.url, error = %e, "Failed to create feed");
                Err(e)
            }
        }
    }

    pub async fn delete(&self, feed_id: FeedId) -> Result<(), ApiError> {
        match self.api.delete_feed(feed_id).await {
            Ok(()) => {
                tracing::info!(feed_id = feed_id, "Feed deleted");
                self.scheduler.feed_deleted(feed_id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(feed_id = feed_id, error = %e, "Failed to delete feed");
                Err(e)
            }
        }
    }

    /// Queues a backend refresh. Success means the fetch was accepted, not
    /// that it finished.
    pub async fn refresh(&self, feed_id: FeedId) -> Result<(), ApiError> {
        match self.api.refresh_feed(feed_id).await {
            Ok(()) => {
                tracing::info!(feed_id = feed_id, "Feed refresh queued");
                self.scheduler.feed_refreshed(feed_id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(feed_id = feed_id, error = %e, "Failed to refresh feed");
                Err(e)
            }
        }
    }
}
