use crate::api::{ApiClient, ApiError, Article, ArticleId, FilterContext};
use crate::cache::Cache;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Canonical page size. The backend clamps anything above 100 to its own
/// default of 20, so this must stay in 1..=100 for `has_more` to work.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// What a call to [`PaginationController::load_next`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page was appended; `received` is its length before de-duplication.
    Loaded { received: usize },
    /// A fetch for this view is already in flight; nothing was started.
    Busy,
    /// The previous page was short, so the view is complete.
    Exhausted,
    /// The view was reset while the fetch was in flight; its result was dropped.
    Discarded,
}

/// Read-only copy of the view bookkeeping, for rendering and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewStatus {
    pub filter: FilterContext,
    pub cursor: u32,
    pub len: usize,
    pub has_more: bool,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

struct PageState {
    filter: FilterContext,
    /// Bumped by every reset; a resolving fetch compares it with its own.
    generation: u64,
    /// Cache article epoch this view was built against.
    epoch: u64,
    ids: Vec<ArticleId>,
    seen: HashSet<ArticleId>,
    cursor: u32,
    has_more: bool,
    in_flight: bool,
    last_error: Option<String>,
}

/// Clears `in_flight` if a `load_next` future is dropped before its fetch
/// resolves, so a cancelled load does not leave the view stuck as busy.
struct InFlight<'a> {
    controller: &'a PaginationController,
    generation: u64,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.controller.lock();
        if state.generation == self.generation {
            state.in_flight = false;
        }
    }
}

/// One ordered, infinitely-scrollable view of articles for a filter context.
///
/// Pages are fetched strictly one at a time: a `load_next` issued while
/// another is pending for the same view returns [`LoadOutcome::Busy`]
/// without touching the network. Results are stored in the shared
/// [`Cache`]; the view itself only keeps the ordered ids.
///
/// # End-of-list detection
///
/// `has_more` turns false only when a page comes back strictly shorter than
/// the page size. A last page that happens to be exactly full cannot be told
/// apart from "more exists", so one further (empty) fetch is needed before
/// the view reports exhaustion. This is accepted: the backend exposes no
/// total count.
pub struct PaginationController {
    api: ApiClient,
    cache: Cache,
    page_size: u32,
    state: Mutex<PageState>,
}

impl PaginationController {
    pub fn new(api: ApiClient, cache: Cache, page_size: u32, filter: FilterContext) -> Self {
        let epoch = cache.article_epoch();
        Self {
            api,
            cache,
            page_size: page_size.max(1),
            state: Mutex::new(PageState {
                filter,
                generation: 0,
                epoch,
                ids: Vec::new(),
                seen: HashSet::new(),
                cursor: 0,
                has_more: true,
                in_flight: false,
                last_error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn filter(&self) -> FilterContext {
        self.lock().filter
    }

    pub fn has_more(&self) -> bool {
        self.lock().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.lock().in_flight
    }

    pub fn status(&self) -> ViewStatus {
        let state = self.lock();
        ViewStatus {
            filter: state.filter,
            cursor: state.cursor,
            len: state.ids.len(),
            has_more: state.has_more,
            is_loading: state.in_flight,
            last_error: state.last_error.clone(),
        }
    }

    pub fn ids(&self) -> Vec<ArticleId> {
        self.lock().ids.clone()
    }

    /// The view's articles in server order, resolved through the cache.
    ///
    /// Articles purged from the cache (e.g. their feed was deleted) are
    /// skipped, so the view never shows orphans.
    pub fn articles(&self) -> Vec<Article> {
        let ids = self.ids();
        self.cache.articles(&ids)
    }

    /// Clears the view for `filter`: empty list, cursor 0, `has_more` true.
    ///
    /// Any fetch still in flight is orphaned and will be discarded on arrival.
    /// Only the filter controller changes the filter; everything else calls
    /// [`reload`](Self::reload).
    pub(crate) fn reset(&self, filter: FilterContext) {
        let epoch = self.cache.article_epoch();
        let mut state = self.lock();
        state.filter = filter;
        state.generation += 1;
        state.epoch = epoch;
        state.ids.clear();
        state.seen.clear();
        state.cursor = 0;
        state.has_more = true;
        state.in_flight = false;
        state.last_error = None;
        tracing::debug!(
            unread = filter.unread,
            feed_id = ?filter.feed_id,
            generation = state.generation,
            "Article view reset"
        );
    }

    /// Resets the view in place, keeping the current filter.
    pub fn reload(&self) {
        let filter = self.filter();
        self.reset(filter);
    }

    /// Whether the cache invalidated articles after this view was built.
    pub fn is_stale(&self) -> bool {
        self.lock().epoch != self.cache.article_epoch()
    }

    /// Rebuilds the view from the first page if the article cache was
    /// invalidated since it was built. Returns `None` when already fresh.
    pub async fn ensure_fresh(&self) -> Result<Option<LoadOutcome>, ApiError> {
        if !self.is_stale() {
            return Ok(None);
        }
        self.reload();
        self.load_next().await.map(Some)
    }

    /// Fetches the page at the cursor and appends it.
    ///
    /// On failure the list and cursor are untouched; only `last_error` is set,
    /// and calling `load_next` again retries the same offset.
    pub async fn load_next(&self) -> Result<LoadOutcome, ApiError> {
        let (filter, generation, offset) = {
            let mut state = self.lock();
            if state.in_flight {
                return Ok(LoadOutcome::Busy);
            }
            if !state.has_more {
                return Ok(LoadOutcome::Exhausted);
            }
            state.in_flight = true;
            state.last_error = None;
            (state.filter, state.generation, state.cursor)
        };
        let requested_at = self.cache.flag_clock();
        let mut in_flight = InFlight {
            controller: self,
            generation,
            armed: true,
        };

        let result = self
            .api
            .list_articles(offset, self.page_size, &filter)
            .await;
        in_flight.disarm();

        let mut state = self.lock();
        if state.generation != generation || state.filter != filter {
            tracing::debug!(
                offset = offset,
                stale_generation = generation,
                current_generation = state.generation,
                "Discarding page from superseded view"
            );
            return Ok(LoadOutcome::Discarded);
        }
        state.in_flight = false;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(offset = offset, error = %e, "Failed to load article page");
                state.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let received = page.len();
        let stored = self.cache.upsert_fetched(page, requested_at);
        for id in stored {
            if state.seen.insert(id) {
                state.ids.push(id);
            }
        }
        state.cursor = state.cursor.saturating_add(self.page_size);
        state.has_more = received >= self.page_size as usize;

        tracing::debug!(
            offset = offset,
            received = received,
            total = state.ids.len(),
            has_more = state.has_more,
            "Loaded article page"
        );
        Ok(LoadOutcome::Loaded { received })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_json(ids: std::ops::Range<i64>, feed_id: i64) -> serde_json::Value {
        ids.map(|id| {
            serde_json::json!({
                "id": id,
                "feed_id": feed_id,
                "title": format!("Article {id}"),
                "url": format!("https://example.com/{id}"),
                "published_at": "2024-01-01T00:00:00Z",
                "is_read": false,
                "is_starred": false
            })
        })
        .collect::<Vec<_>>()
        .into()
    }

    fn controller(server: &MockServer, page_size: u32) -> PaginationController {
        let api = ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        PaginationController::new(api, Cache::new(), page_size, FilterContext::all())
    }

    async fn mount_page(server: &MockServer, offset: u32, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/articles"))
            .and(query_param("offset", offset.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_pages_append_and_cursor_advances() {
        let server = MockServer::start().await;
        mount_page(&server, 0, page_json(1..4, 1)).await;
        mount_page(&server, 3, page_json(4..6, 1)).await;

        let pages = controller(&server, 3);
        assert_eq!(
            pages.load_next().await.unwrap(),
            LoadOutcome::Loaded { received: 3 }
        );
        assert!(pages.has_more());
        assert_eq!(
            pages.load_next().await.unwrap(),
            LoadOutcome::Loaded { received: 2 }
        );
        assert!(!pages.has_more());
        assert_eq!(pages.ids(), vec![1, 2, 3, 4, 5]);
        assert_eq!(pages.status().cursor, 6);

        // Exhausted views do not fetch again
        assert_eq!(pages.load_next().await.unwrap(), LoadOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_exactly_full_last_page_needs_one_more_fetch() {
        let server = MockServer::start().await;
        mount_page(&server, 0, page_json(1..3, 1)).await;
        mount_page(&server, 2, serde_json::json!([])).await;

        let pages = controller(&server, 2);
        pages.load_next().await.unwrap();
        assert!(pages.has_more());
        assert_eq!(
            pages.load_next().await.unwrap(),
            LoadOutcome::Loaded { received: 0 }
        );
        assert!(!pages.has_more());
        assert_eq!(pages.ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_across_pages_appear_once() {
        let server = MockServer::start().await;
        // A new article shifted the offsets: id 3 shows up on both pages
        mount_page(&server, 0, page_json(1..4, 1)).await;
        mount_page(&server, 3, page_json(3..6, 1)).await;

        let pages = controller(&server, 3);
        pages.load_next().await.unwrap();
        pages.load_next().await.unwrap();
        assert_eq!(pages.ids(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_failure_leaves_view_unchanged_and_retry_works() {
        let server = MockServer::start().await;
        mount_page(&server, 0, page_json(1..3, 1)).await;
        // Two failures (initial + built-in read retry), then success
        Mock::given(method("GET"))
            .and(path("/api/articles"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount_page(&server, 2, page_json(3..4, 1)).await;

        let pages = controller(&server, 2);
        pages.load_next().await.unwrap();

        let err = pages.load_next().await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        let status = pages.status();
        assert_eq!(status.len, 2);
        assert_eq!(status.cursor, 2);
        assert!(status.has_more);
        assert!(!status.is_loading);
        assert!(status.last_error.is_some());

        assert_eq!(
            pages.load_next().await.unwrap(),
            LoadOutcome::Loaded { received: 1 }
        );
        assert_eq!(pages.ids(), vec![1, 2, 3]);
        assert_eq!(pages.status().last_error, None);
    }

    #[tokio::test]
    async fn test_concurrent_load_next_is_single_flight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/articles"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page_json(1..3, 1))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let pages = controller(&server, 5);
        let (first, second) = tokio::join!(pages.load_next(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(pages.is_loading());
            pages.load_next().await
        });
        assert_eq!(first.unwrap(), LoadOutcome::Loaded { received: 2 });
        assert_eq!(second.unwrap(), LoadOutcome::Busy);
    }

    #[tokio::test]
    async fn test_cancelled_load_does_not_leave_view_busy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/articles"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page_json(1..3, 1))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let pages = controller(&server, 5);
        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), pages.load_next()).await;
        assert!(cancelled.is_err());
        assert!(!pages.is_loading());

        assert_eq!(
            pages.load_next().await.unwrap(),
            LoadOutcome::Loaded { received: 2 }
        );
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/articles"))
            .and(query_param_is_missing("feed_id"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page_json(1..3, 1))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/articles"))
            .and(query_param("feed_id", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_json(10..12, 2)))
            .mount(&server)
            .await;

        let pages = controller(&server, 5);
        let (slow, fast) = tokio::join!(pages.load_next(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pages.reset(FilterContext::all().with_feed(Some(2)));
            pages.load_next().await
        });

        assert_eq!(fast.unwrap(), LoadOutcome::Loaded { received: 2 });
        assert_eq!(slow.unwrap(), LoadOutcome::Discarded);
        assert_eq!(pages.ids(), vec![10, 11]);
        assert!(!pages.is_loading());
    }

    #[tokio::test]
    async fn test_ensure_fresh_rebuilds_after_invalidation() {
        let server = MockServer::start().await;
        mount_page(&server, 0, page_json(1..3, 1)).await;

        let pages = controller(&server, 5);
        pages.load_next().await.unwrap();
        assert_eq!(pages.ensure_fresh().await.unwrap(), None);

        pages.cache.invalidate_articles();
        assert!(pages.is_stale());
        assert_eq!(
            pages.ensure_fresh().await.unwrap(),
            Some(LoadOutcome::Loaded { received: 2 })
        );
        assert!(!pages.is_stale());
        assert_eq!(pages.status().cursor, 5);
    }

    #[tokio::test]
    async fn test_orphans_hidden_after_feed_removal() {
        let server = MockServer::start().await;
        let mut body = page_json(1..3, 1);
        if let Some(items) = body.as_array_mut() {
            items.extend(page_json(3..4, 2).as_array().cloned().unwrap_or_default());
        }
        mount_page(&server, 0, body).await;

        let pages = controller(&server, 5);
        pages.load_next().await.unwrap();
        pages.cache.remove_feed(1);

        let ids: Vec<_> = pages.articles().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3]);
    }
}
