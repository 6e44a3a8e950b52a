use crate::api::{ApiClient, ApiError, ArticleFlag, ArticleId, FeedId};
use crate::cache::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// ============================================================================
// Per-Article Locks
// ============================================================================

/// One async lock per article id with a mutation queued or running.
///
/// Entries are created on demand and removed when the last holder or waiter
/// lets go, so the map only ever holds ids that are being mutated.
#[derive(Default)]
struct ArticleLocks {
    locks: Mutex<HashMap<ArticleId, Arc<AsyncMutex<()>>>>,
}

impl ArticleLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<ArticleId, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for every earlier mutation of `id` to finish. Tokio's mutex is
    /// fair, so waiters are served in arrival order.
    async fn acquire(&self, id: ArticleId) -> ArticleGuard<'_> {
        let lock = Arc::clone(self.map().entry(id).or_default());
        let guard = lock.lock_owned().await;
        ArticleGuard {
            locks: self,
            id,
            guard: Some(guard),
        }
    }

    /// Locks several ids in ascending order so concurrent bulk operations
    /// cannot deadlock each other.
    async fn acquire_all(&self, ids: &[ArticleId]) -> Vec<ArticleGuard<'_>> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for id in ordered {
            guards.push(self.acquire(id).await);
        }
        guards
    }

    fn len(&self) -> usize {
        self.map().len()
    }
}

struct ArticleGuard<'a> {
    locks: &'a ArticleLocks,
    id: ArticleId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ArticleGuard<'_> {
    fn drop(&mut self) {
        // Release first so the strong count below only counts the map and waiters
        self.guard.take();
        let mut map = self.locks.map();
        if let Some(lock) = map.get(&self.id) {
            if Arc::strong_count(lock) == 1 {
                map.remove(&self.id);
            }
        }
    }
}

// ============================================================================
// Mutation Engine
// ============================================================================

/// Applies read/star changes to the cache before the backend confirms them.
///
/// Every mutation follows the same protocol: snapshot the affected flags and
/// apply the new value under one cache write, send the request, then either
/// reconcile with the confirmed value or restore the snapshot exactly.
///
/// Mutations of the same article are serialized through a per-id lock held
/// for the whole round trip. Without it, a slow failing request could roll
/// back over a later one that succeeded.
pub struct MutationEngine {
    api: ApiClient,
    cache: Cache,
    locks: ArticleLocks,
}

impl MutationEngine {
    pub fn new(api: ApiClient, cache: Cache) -> Self {
        Self {
            api,
            cache,
            locks: ArticleLocks::default(),
        }
    }

    /// Sets one flag on one article. Returns the value the backend confirmed.
    pub async fn set_flag(
        &self,
        id: ArticleId,
        flag: ArticleFlag,
        value: bool,
    ) -> Result<bool, ApiError> {
        let _guard = self.locks.acquire(id).await;
        self.set_flag_locked(id, flag, value).await
    }

    pub async fn mark_read(&self, id: ArticleId, read: bool) -> Result<bool, ApiError> {
        self.set_flag(id, ArticleFlag::Read, read).await
    }

    pub async fn set_starred(&self, id: ArticleId, starred: bool) -> Result<bool, ApiError> {
        self.set_flag(id, ArticleFlag::Starred, starred).await
    }

    /// Flips a flag based on its cached value, read after earlier mutations
    /// of the same article have settled.
    ///
    /// Returns `Ok(None)` when the article is not cached.
    pub async fn toggle(&self, id: ArticleId, flag: ArticleFlag) -> Result<Option<bool>, ApiError> {
        let _guard = self.locks.acquire(id).await;
        let Some(current) = self.cache.article(id).map(|a| a.flag(flag)) else {
            return Ok(None);
        };
        self.set_flag_locked(id, flag, !current).await.map(Some)
    }

    async fn set_flag_locked(
        &self,
        id: ArticleId,
        flag: ArticleFlag,
        value: bool,
    ) -> Result<bool, ApiError> {
        let snapshot = self.cache.apply_flag(&[id], flag, value);

        match self.api.set_flag(id, flag, value).await {
            Ok(confirmed) => {
                let confirmed = confirmed.map_or(value, |article| article.flag(flag));
                if confirmed != value {
                    tracing::debug!(
                        article_id = id,
                        field = flag.field(),
                        requested = value,
                        confirmed = confirmed,
                        "Backend confirmed a different value"
                    );
                }
                self.cache.set_flag(id, flag, confirmed);
                if flag == ArticleFlag::Read {
                    self.cache.invalidate_stats();
                }
                Ok(confirmed)
            }
            Err(e) => {
                self.cache.restore(&snapshot);
                tracing::warn!(
                    article_id = id,
                    field = flag.field(),
                    error = %e,
                    "Mutation failed, rolled back"
                );
                Err(e)
            }
        }
    }

    /// Marks every cached article in scope as read, then asks the backend to
    /// do the same. Returns how many cached articles changed.
    ///
    /// The backend marks articles the client never loaded too, so article
    /// views are invalidated on success.
    pub async fn mark_all_read(&self, feed_id: Option<FeedId>) -> Result<usize, ApiError> {
        let ids = self.cache.article_ids_in(feed_id);
        let _guards = self.locks.acquire_all(&ids).await;

        let snapshot = self.cache.apply_flag(&ids, ArticleFlag::Read, true);
        let changed = snapshot.changed(true);

        match self.api.mark_all_read(feed_id).await {
            Ok(()) => {
                tracing::debug!(feed_id = ?feed_id, changed = changed, "Marked all read");
                self.cache.invalidate_articles();
                self.cache.invalidate_stats();
                Ok(changed)
            }
            Err(e) => {
                self.cache.restore(&snapshot);
                tracing::warn!(
                    feed_id = ?feed_id,
                    restored = snapshot.values.len(),
                    error = %e,
                    "Mark all read failed, rolled back"
                );
                Err(e)
            }
        }
    }

    /// Article ids with a mutation currently queued or running.
    pub fn pending(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::article;
    use crate::cache::CacheEvent;
    use crate::api::Stats;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, Cache, MutationEngine) {
        let server = MockServer::start().await;
        let api = ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let cache = Cache::new();
        cache.upsert_articles([article(1, 10), article(2, 10), article(3, 20)]);
        let engine = MutationEngine::new(api, cache.clone());
        (server, cache, engine)
    }

    fn is_read(cache: &Cache, id: ArticleId) -> bool {
        cache.article(id).map(|a| a.is_read).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_optimistic_read_visible_then_rolled_back() {
        let (server, cache, engine) = setup().await;
        Mock::given(method("PUT"))
            .and(path("/api/articles/1/read"))
            .and(body_json(serde_json::json!({ "is_read": true })))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let (result, seen_during_flight) = tokio::join!(engine.mark_read(1, true), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            is_read(&cache, 1)
        });

        assert!(seen_during_flight);
        assert_eq!(result.unwrap_err().status(), Some(500));
        assert!(!is_read(&cache, 1));
        assert_eq!(engine.pending(), 0);
    }

    #[tokio::test]
    async fn test_success_with_empty_body_keeps_value_and_invalidates_stats() {
        let (server, cache, engine) = setup().await;
        cache.set_stats(Stats::default());
        Mock::given(method("PUT"))
            .and(path("/api/articles/2/read"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(engine.mark_read(2, true).await.unwrap());
        assert!(is_read(&cache, 2));
        assert_eq!(cache.stats(), None);
    }

    #[tokio::test]
    async fn test_star_reconciles_with_returned_article() {
        let (server, cache, engine) = setup().await;
        cache.set_stats(Stats::default());
        let mut returned = serde_json::to_value(article(3, 20)).unwrap();
        returned["is_starred"] = serde_json::Value::Bool(false);
        Mock::given(method("PUT"))
            .and(path("/api/articles/3/star"))
            .and(body_json(serde_json::json!({ "is_starred": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(returned))
            .mount(&server)
            .await;

        let confirmed = engine.set_starred(3, true).await.unwrap();
        assert!(!confirmed);
        assert_eq!(cache.article(3).map(|a| a.is_starred), Some(false));
        // Star changes leave unread counts alone
        assert_eq!(cache.stats(), Some(Stats::default()));
    }

    #[tokio::test]
    async fn test_same_article_mutations_are_serialized() {
        let (server, cache, engine) = setup().await;
        // First request fails slowly; anything after it succeeds
        Mock::given(method("PUT"))
            .and(path("/api/articles/1/read"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(300)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/articles/1/read"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let (first, second) = tokio::join!(engine.mark_read(1, true), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            engine.mark_read(1, true).await
        });

        assert!(first.is_err());
        assert!(second.unwrap());
        // The earlier rollback ran before the later mutation, not over it
        assert!(is_read(&cache, 1));
        assert_eq!(engine.pending(), 0);
    }

    #[tokio::test]
    async fn test_toggle_reads_cached_value() {
        let (server, cache, engine) = setup().await;
        Mock::given(method("PUT"))
            .and(path("/api/articles/2/star"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert_eq!(engine.toggle(2, ArticleFlag::Starred).await.unwrap(), Some(true));
        assert_eq!(engine.toggle(2, ArticleFlag::Starred).await.unwrap(), Some(false));
        assert_eq!(engine.toggle(99, ArticleFlag::Starred).await.unwrap(), None);
        assert_eq!(cache.article(2).map(|a| a.is_starred), Some(false));
    }

    #[tokio::test]
    async fn test_mark_all_read_scoped_to_feed() {
        let (server, cache, engine) = setup().await;
        let epoch = cache.article_epoch();
        Mock::given(method("POST"))
            .and(path("/api/articles/mark-all-read"))
            .and(query_param("feed_id", "10"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(engine.mark_all_read(Some(10)).await.unwrap(), 2);
        assert!(is_read(&cache, 1));
        assert!(is_read(&cache, 2));
        assert!(!is_read(&cache, 3));
        assert_eq!(cache.article_epoch(), epoch + 1);
    }

    #[tokio::test]
    async fn test_mark_all_read_failure_restores_snapshot() {
        let (server, cache, engine) = setup().await;
        cache.set_flag(2, ArticleFlag::Read, true);
        let mut events = cache.subscribe();
        Mock::given(method("POST"))
            .and(path("/api/articles/mark-all-read"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = engine.mark_all_read(None).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(!is_read(&cache, 1));
        assert!(is_read(&cache, 2));
        assert!(!is_read(&cache, 3));

        // Apply then restore, nothing else
        assert_eq!(
            events.try_recv().unwrap(),
            CacheEvent::ArticlesUpdated(vec![1, 2, 3])
        );
        assert_eq!(
            events.try_recv().unwrap(),
            CacheEvent::ArticlesUpdated(vec![1, 2, 3])
        );
        assert!(events.try_recv().is_err());
    }
}
