//! Controllers that keep the [`Cache`](crate::cache::Cache) coherent with the
//! backend.
//!
//! - [`pagination`] - One ordered article view, fetched a page at a time
//! - [`filter`] - The active `(unread, feed_id)` selection; resets the view
//! - [`mutation`] - Optimistic read/star changes with exact rollback
//! - [`invalidation`] - When feed lifecycle actions make cached data stale
//! - [`feeds`] - Feed list, stats, and create/delete/refresh
//!
//! Controllers take `&self` and keep their state behind short-lived locks
//! that are never held across a network await. The one exception is the
//! per-article mutation lock, which is held for the whole round trip.

pub mod feeds;
pub mod filter;
pub mod invalidation;
pub mod mutation;
pub mod pagination;

pub use feeds::FeedManager;
pub use filter::{FilterChange, FilterController};
pub use invalidation::{InvalidationScheduler, INGEST_SETTLE_DELAY};
pub use mutation::MutationEngine;
pub use pagination::{LoadOutcome, PaginationController, ViewStatus, DEFAULT_PAGE_SIZE};
