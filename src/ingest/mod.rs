//! Turning user input into a feed-creation payload.
//!
//! Four input shapes ([`FeedSource`]) collapse into one [`NewFeed`]:
//!
//! - RSS URLs pass through with a placeholder title
//! - Subreddit + sort become a Reddit RSS URL and a synthesized title
//! - YouTube references become a channel feed URL, resolved by the backend
//!   unless a channel id is already present
//! - Discovered candidates are relayed as chosen
//!
//! [`FeedForm`] wraps submission in an Idle → Submitting → Succeeded state
//! machine that rejects duplicate submits.
//!
//! [`NewFeed`]: crate::api::NewFeed

pub mod form;
pub mod normalize;
pub mod youtube;

pub use form::{FeedForm, FormState};
pub use normalize::{normalize_reddit, normalize_rss, FeedSource, Normalizer, RedditSort};
pub use youtube::{channel_feed_url, YoutubeRef};

use crate::api::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Input rejected before any request was made
    #[error("Invalid input: {0}")]
    Validation(String),
    /// YouTube resolution or discovery failed or found nothing usable
    #[error("Could not resolve feed: {0}")]
    Resolution(String),
    #[error("A feed is already being added")]
    SubmissionInProgress,
    #[error(transparent)]
    Api(#[from] ApiError),
}
