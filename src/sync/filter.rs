use super::pagination::{LoadOutcome, PaginationController};
use crate::api::{ApiError, FeedId, FilterContext};

/// Result of [`FilterController::set_filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterChange {
    /// The requested filter equals the active one; the view was left alone.
    Unchanged,
    /// The view was reset and its first page requested.
    Applied(LoadOutcome),
}

/// Sole owner of the active [`FilterContext`].
///
/// Holds the pagination controller so nothing else can change its filter.
pub struct FilterController {
    pages: PaginationController,
}

impl FilterController {
    pub fn new(pages: PaginationController) -> Self {
        Self { pages }
    }

    pub fn active(&self) -> FilterContext {
        self.pages.filter()
    }

    pub fn pagination(&self) -> &PaginationController {
        &self.pages
    }

    /// Switches the view to `next`, starting again from offset 0.
    ///
    /// An equal filter is a no-op. The reset happens before the fetch, so a
    /// failed first page still leaves an empty view for the new filter.
    pub async fn set_filter(&self, next: FilterContext) -> Result<FilterChange, ApiError> {
        if self.active() == next {
            return Ok(FilterChange::Unchanged);
        }

        self.pages.reset(next);
        let outcome = self.pages.load_next().await?;
        Ok(FilterChange::Applied(outcome))
    }

    pub async fn show_unread(&self, unread: bool) -> Result<FilterChange, ApiError> {
        let next = self.active().with_unread(unread);
        self.set_filter(next).await
    }

    pub async fn select_feed(&self, feed_id: Option<FeedId>) -> Result<FilterChange, ApiError> {
        let next = self.active().with_feed(feed_id);
        self.set_filter(next).await
    }
}
