use crate::api::FeedId;
use crate::cache::Cache;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// How long to wait after a feed is created or refreshed before article views
/// are invalidated.
///
/// The backend ingests new feeds asynchronously and sends no completion
/// signal, so this is a guess at how long ingestion usually takes. It is
/// best-effort: articles may still be missing right after it elapses, and the
/// next invalidation (or a manual reload) picks them up.
pub const INGEST_SETTLE_DELAY: Duration = Duration::from_millis(2000);

/// Decides when cached portions go stale after feed lifecycle actions.
///
/// | Action  | Feeds + stats | Articles                        |
/// |---------|---------------|---------------------------------|
/// | create  | immediately   | after the ingest delay          |
/// | refresh | immediately   | after the ingest delay          |
/// | delete  | immediately   | immediately (feed's rows purged) |
///
/// Delayed invalidations run as spawned tasks. They are aborted when the
/// scheduler is dropped or [`cancel_pending`](Self::cancel_pending) is called.
pub struct InvalidationScheduler {
    cache: Cache,
    ingest_delay: Duration,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl InvalidationScheduler {
    pub fn new(cache: Cache, ingest_delay: Duration) -> Self {
        Self {
            cache,
            ingest_delay,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn ingest_delay(&self) -> Duration {
        self.ingest_delay
    }

    fn pending(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|task| !task.is_finished());
        pending
    }

    /// Delayed invalidations not yet run.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    pub fn feed_created(&self) {
        self.cache.invalidate_feeds();
        self.cache.invalidate_stats();
        self.schedule_articles("created", None);
    }

    pub fn feed_refreshed(&self, feed_id: FeedId) {
        self.cache.invalidate_feeds();
        self.cache.invalidate_stats();
        self.schedule_articles("refreshed", Some(feed_id));
    }

    /// Everything goes stale at once. The backend cascades the delete to the
    /// feed's articles; we purge our copies without confirming that.
    pub fn feed_deleted(&self, feed_id: FeedId) {
        let purged = self.cache.remove_feed(feed_id);
        self.cache.invalidate_feeds();
        self.cache.invalidate_articles();
        self.cache.invalidate_stats();
        tracing::debug!(feed_id = feed_id, purged = purged, "Purged deleted feed");
    }

    /// Aborts every delayed invalidation still waiting. Returns how many.
    pub fn cancel_pending(&self) -> usize {
        let mut pending = self.pending();
        for task in pending.iter() {
            task.abort();
        }
        let cancelled = pending.len();
        pending.clear();
        cancelled
    }

    fn schedule_articles(&self, action: &'static str, feed_id: Option<FeedId>) {
        if self.ingest_delay.is_zero() {
            self.cache.invalidate_articles();
            return;
        }

        // Outside a runtime there is nothing to wait on; invalidate now
        let Ok(runtime) = Handle::try_current() else {
            self.cache.invalidate_articles();
            return;
        };

        let cache = self.cache.clone();
        let delay = self.ingest_delay;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let epoch = cache.invalidate_articles();
            tracing::debug!(
                action = action,
                feed_id = ?feed_id,
                epoch = epoch,
                "Articles invalidated after ingest delay"
            );
        });
        self.pending().push(task);
    }
}

impl Drop for InvalidationScheduler {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
