use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub type ArticleId = i64;
pub type FeedId = i64;

/// Title sent with a new feed until the backend fetches the real one.
pub const PLACEHOLDER_TITLE: &str = "Loading...";

// ============================================================================
// Serde Helpers
// ============================================================================

/// The backend encodes missing text fields as `""` rather than omitting them.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

// ============================================================================
// Entities
// ============================================================================

/// One ingested item belonging to a feed.
///
/// Everything except `is_read` and `is_starred` is read-only from the client's
/// point of view; those two flags are mirrored from the server and only change
/// locally through the mutation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub feed_id: FeedId,
    pub title: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_starred: bool,
    /// Joined in by the list endpoint; absent on single-article reads.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub feed_title: Option<String>,
}

impl Article {
    pub fn flag(&self, flag: ArticleFlag) -> bool {
        match flag {
            ArticleFlag::Read => self.is_read,
            ArticleFlag::Starred => self.is_starred,
        }
    }

    pub fn set_flag(&mut self, flag: ArticleFlag, value: bool) {
        match flag {
            ArticleFlag::Read => self.is_read = value,
            ArticleFlag::Starred => self.is_starred = value,
        }
    }
}

/// The two client-writable boolean fields of an [`Article`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleFlag {
    Read,
    Starred,
}

impl ArticleFlag {
    /// Path segment of the `PUT /api/articles/{id}/<segment>` endpoint.
    pub fn path_segment(self) -> &'static str {
        match self {
            ArticleFlag::Read => "read",
            ArticleFlag::Starred => "star",
        }
    }

    /// JSON field carried in the request body.
    pub fn field(self) -> &'static str {
        match self {
            ArticleFlag::Read => "is_read",
            ArticleFlag::Starred => "is_starred",
        }
    }
}

/// Source kind of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Rss,
    Reddit,
    Youtube,
}

impl FeedKind {
    /// Infers the kind from a feed URL, for backends that do not report it.
    pub fn from_url(url: &str) -> Self {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default();

        if host == "reddit.com" || host.ends_with(".reddit.com") {
            FeedKind::Reddit
        } else if host == "youtube.com" || host.ends_with(".youtube.com") {
            FeedKind::Youtube
        } else {
            FeedKind::Rss
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedKind::Rss => "rss",
            FeedKind::Reddit => "reddit",
            FeedKind::Youtube => "youtube",
        })
    }
}

/// A subscribed content source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub url: String,
    pub title: String,
    #[serde(rename = "type", default)]
    kind: Option<FeedKind>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub last_error: Option<String>,
    #[serde(default, alias = "last_fetched")]
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl Feed {
    pub fn new(id: FeedId, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: title.into(),
            kind: None,
            last_error: None,
            last_fetched_at: None,
        }
    }

    /// Kind reported by the backend, or inferred from the URL when absent.
    pub fn kind(&self) -> FeedKind {
        self.kind.unwrap_or_else(|| FeedKind::from_url(&self.url))
    }
}

/// Server-side counters. Eventually consistent; never derived locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_feeds: u64,
    pub total_articles: u64,
    pub unread_count: u64,
}

/// Feed format reported by the discovery scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateKind {
    Rss,
    Atom,
    #[serde(other)]
    Unknown,
}

/// A feed proposed by discovery. Never persisted; the user promotes one
/// explicitly into a [`NewFeed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredFeedCandidate {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default = "unknown_kind")]
    pub kind: CandidateKind,
}

fn unknown_kind() -> CandidateKind {
    CandidateKind::Unknown
}

/// Canonical feed-creation payload (`POST /api/feeds`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
}

/// Response of `GET /api/youtube/resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct YoutubeResolution {
    pub rss_url: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

// ============================================================================
// Filter Context
// ============================================================================

/// The `(unread, feed_id)` pair defining one article view.
///
/// Compared by value: two contexts with the same fields are the same view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FilterContext {
    pub unread: bool,
    pub feed_id: Option<FeedId>,
}

impl FilterContext {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn unread() -> Self {
        Self {
            unread: true,
            feed_id: None,
        }
    }

    pub fn with_feed(mut self, feed_id: Option<FeedId>) -> Self {
        self.feed_id = feed_id;
        self
    }

    pub fn with_unread(mut self, unread: bool) -> Self {
        self.unread = unread;
        self
    }
}
