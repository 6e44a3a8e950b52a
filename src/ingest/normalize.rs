use super::youtube::YoutubeRef;
use super::IngestError;
use crate::api::{ApiClient, DiscoveredFeedCandidate, NewFeed, PLACEHOLDER_TITLE};
use crate::util::{validate_feed_url, validate_http_url};
use std::fmt;
use std::str::FromStr;

/// Listing order of a subreddit feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RedditSort {
    #[default]
    Hot,
    New,
    Top,
    Rising,
}

impl RedditSort {
    pub const ALL: [RedditSort; 4] = [
        RedditSort::Hot,
        RedditSort::New,
        RedditSort::Top,
        RedditSort::Rising,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RedditSort::Hot => "hot",
            RedditSort::New => "new",
            RedditSort::Top => "top",
            RedditSort::Rising => "rising",
        }
    }
}

impl fmt::Display for RedditSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedditSort {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        RedditSort::ALL
            .into_iter()
            .find(|sort| sort.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                IngestError::Validation(format!(
                    "unknown sort '{s}' (expected hot, new, top or rising)"
                ))
            })
    }
}

/// Everything a user can hand us to subscribe to.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSource {
    Rss { url: String },
    Reddit { subreddit: String, sort: RedditSort },
    Youtube { input: String },
    /// A candidate picked from [`Normalizer::discover`] results.
    Discovered(DiscoveredFeedCandidate),
}

impl FeedSource {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedSource::Rss { .. } => "rss",
            FeedSource::Reddit { .. } => "reddit",
            FeedSource::Youtube { .. } => "youtube",
            FeedSource::Discovered(_) => "discovered",
        }
    }
}

/// An RSS/Atom URL, sent exactly as typed with a placeholder title the
/// backend replaces once it fetches the feed. Only the check trims it.
pub fn normalize_rss(url: &str) -> Result<NewFeed, IngestError> {
    let checked = url.trim();
    if checked.is_empty() {
        return Err(IngestError::Validation("feed URL is empty".into()));
    }
    validate_feed_url(checked).map_err(|e| IngestError::Validation(e.to_string()))?;

    Ok(NewFeed {
        url: url.to_owned(),
        title: PLACEHOLDER_TITLE.to_owned(),
    })
}

/// `technology` / `r/technology` + `new` →
/// `https://www.reddit.com/r/technology/new.rss`, titled `r/technology (new)`.
///
/// Any name Reddit routes is accepted, multireddits like `rust+programming`
/// included. Only characters that would leave the `/r/<name>` path segment
/// are rejected.
pub fn normalize_reddit(subreddit: &str, sort: RedditSort) -> Result<NewFeed, IngestError> {
    let trimmed = subreddit.trim();
    let name = trimmed.strip_prefix("r/").unwrap_or(trimmed).trim();

    if name.is_empty() {
        return Err(IngestError::Validation("subreddit name is empty".into()));
    }
    if name
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '?' | '#') || c.is_whitespace() || c.is_control())
    {
        return Err(IngestError::Validation(format!(
            "'{name}' is not a valid subreddit name"
        )));
    }

    Ok(NewFeed {
        url: format!("https://www.reddit.com/r/{name}/{sort}.rss"),
        title: format!("r/{name} ({sort})"),
    })
}

/// Relays a discovered candidate unchanged; only an empty title is filled in.
fn normalize_candidate(candidate: &DiscoveredFeedCandidate) -> Result<NewFeed, IngestError> {
    let url = candidate.url.trim();
    if url.is_empty() {
        return Err(IngestError::Validation("discovered feed has no URL".into()));
    }

    let title = candidate.title.trim();
    Ok(NewFeed {
        url: url.to_owned(),
        title: if title.is_empty() {
            PLACEHOLDER_TITLE.to_owned()
        } else {
            title.to_owned()
        },
    })
}

/// Converts any [`FeedSource`] into a [`NewFeed`], calling the backend only
/// where the input cannot be resolved locally.
#[derive(Debug, Clone)]
pub struct Normalizer {
    api: ApiClient,
}

impl Normalizer {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn normalize(&self, source: &FeedSource) -> Result<NewFeed, IngestError> {
        let result = match source {
            FeedSource::Rss { url } => normalize_rss(url),
            FeedSource::Reddit { subreddit, sort } => normalize_reddit(subreddit, *sort),
            FeedSource::Youtube { input } => self.normalize_youtube(input).await,
            FeedSource::Discovered(candidate) => normalize_candidate(candidate),
        };

        match &result {
            Ok(feed) => tracing::debug!(source = source.kind(), url = %feed.url, "Normalized feed input"),
            Err(e) => tracing::warn!(source = source.kind(), error = %e, "Rejected feed input"),
        }
        result
    }

    /// Channel ids become a feed URL directly. Handles and legacy names have
    /// no offline mapping, so the backend resolves them; a failure there is a
    /// [`IngestError::Resolution`], never a guessed URL.
    async fn normalize_youtube(&self, input: &str) -> Result<NewFeed, IngestError> {
        let reference = YoutubeRef::extract(input)
            .ok_or_else(|| IngestError::Validation("YouTube channel is empty".into()))?;

        if let Some(url) = reference.feed_url() {
            return Ok(NewFeed {
                url,
                title: PLACEHOLDER_TITLE.to_owned(),
            });
        }

        let input = input.trim();
        let resolution = self
            .api
            .resolve_youtube(input)
            .await
            .map_err(|e| IngestError::Resolution(format!("YouTube channel '{input}': {e}")))?;

        let url = resolution.rss_url.trim();
        if url.is_empty() {
            return Err(IngestError::Resolution(format!(
                "YouTube channel '{input}': backend returned no feed URL"
            )));
        }

        tracing::debug!(
            input = input,
            reference = ?reference,
            channel_id = ?resolution.channel_id,
            "Resolved YouTube channel"
        );
        Ok(NewFeed {
            url: url.to_owned(),
            title: PLACEHOLDER_TITLE.to_owned(),
        })
    }

    /// Asks the backend to scan a site for feeds. Finding none is an error:
    /// there is nothing for the user to pick.
    pub async fn discover(
        &self,
        site_url: &str,
    ) -> Result<Vec<DiscoveredFeedCandidate>, IngestError> {
        let site_url = site_url.trim();
        validate_http_url(site_url).map_err(|e| IngestError::Validation(e.to_string()))?;

        let candidates = match self.api.discover(site_url).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(url = site_url, error = %e, "Feed discovery failed");
                return Err(IngestError::Resolution(format!("discovery for {site_url}: {e}")));
            }
        };

        if candidates.is_empty() {
            tracing::warn!(url = site_url, "Feed discovery found nothing");
            return Err(IngestError::Resolution(format!("no feeds found at {site_url}")));
        }

        tracing::debug!(url = site_url, count = candidates.len(), "Discovered feeds");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CandidateKind;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn normalizer(server: &MockServer) -> Normalizer {
        Normalizer::new(ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap())
    }

    #[test]
    fn test_reddit_example() {
        let expected = NewFeed {
            url: "https://www.reddit.com/r/technology/new.rss".into(),
            title: "r/technology (new)".into(),
        };
        assert_eq!(normalize_reddit("technology", RedditSort::New).unwrap(), expected);
        assert_eq!(normalize_reddit("r/technology", RedditSort::New).unwrap(), expected);
        assert_eq!(normalize_reddit("  r/ technology ", RedditSort::New).unwrap(), expected);
    }

    #[test]
    fn test_reddit_accepts_multireddit() {
        let feed = normalize_reddit("r/rust+programming", RedditSort::New).unwrap();
        assert_eq!(feed.url, "https://www.reddit.com/r/rust+programming/new.rss");
        assert_eq!(feed.title, "r/rust+programming (new)");
    }

    #[test]
    fn test_reddit_rejects_bad_names() {
        assert!(matches!(
            normalize_reddit("r/", RedditSort::Hot),
            Err(IngestError::Validation(_))
        ));
        assert!(matches!(
            normalize_reddit("rust/../admin", RedditSort::Hot),
            Err(IngestError::Validation(_))
        ));
        for bad in ["rust?x=1", "rust#top", "rust programming"] {
            assert!(
                matches!(normalize_reddit(bad, RedditSort::Hot), Err(IngestError::Validation(_))),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn test_sort_parsing() {
        assert_eq!("rising".parse::<RedditSort>().unwrap(), RedditSort::Rising);
        assert_eq!(" TOP ".parse::<RedditSort>().unwrap(), RedditSort::Top);
        assert!(matches!(
            "best".parse::<RedditSort>(),
            Err(IngestError::Validation(_))
        ));
    }

    #[test]
    fn test_rss_passes_url_through() {
        let feed = normalize_rss("https://blog.example.com/feed.xml?format=atom").unwrap();
        assert_eq!(feed.url, "https://blog.example.com/feed.xml?format=atom");
        // Validated trimmed, sent as typed
        let padded = normalize_rss(" https://blog.example.com/feed.xml ").unwrap();
        assert_eq!(padded.url, " https://blog.example.com/feed.xml ");
        assert_eq!(feed.title, PLACEHOLDER_TITLE);

        assert!(matches!(normalize_rss("  "), Err(IngestError::Validation(_))));
        assert!(matches!(
            normalize_rss("file:///etc/passwd"),
            Err(IngestError::Validation(_))
        ));
    }

    #[test]
    fn test_candidate_is_relayed() {
        let candidate = DiscoveredFeedCandidate {
            url: "https://site.example/atom.xml".into(),
            title: String::new(),
            kind: CandidateKind::Atom,
        };
        let feed = normalize_candidate(&candidate).unwrap();
        assert_eq!(feed.url, candidate.url);
        assert_eq!(feed.title, PLACEHOLDER_TITLE);
    }

    #[tokio::test]
    async fn test_youtube_channel_id_needs_no_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let feed = normalizer(&server)
            .normalize(&FeedSource::Youtube {
                input: "https://www.youtube.com/channel/UCabcdefghijklmnopqrstuv".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            feed.url,
            "https://www.youtube.com/feeds/videos.xml?channel_id=UCabcdefghijklmnopqrstuv"
        );
    }

    #[tokio::test]
    async fn test_youtube_handle_resolved_by_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/youtube/resolve"))
            .and(query_param("input", "https://www.youtube.com/@somechannel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "channel_id": "UCzzzzzzzzzzzzzzzzzzzzzz",
                "rss_url": "https://www.youtube.com/feeds/videos.xml?channel_id=UCzzzzzzzzzzzzzzzzzzzzzz"
            })))
            .mount(&server)
            .await;

        let feed = normalizer(&server)
            .normalize(&FeedSource::Youtube {
                input: "https://www.youtube.com/@somechannel".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            feed.url,
            "https://www.youtube.com/feeds/videos.xml?channel_id=UCzzzzzzzzzzzzzzzzzzzzzz"
        );
    }

    #[tokio::test]
    async fn test_youtube_resolution_failure_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/youtube/resolve"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = normalizer(&server)
            .normalize(&FeedSource::Youtube {
                input: "@ghost".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Resolution(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_discover_empty_is_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/discover"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        let err = normalizer(&server)
            .discover("https://nothing.example")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Resolution(_)));
    }

    #[tokio::test]
    async fn test_discover_returns_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/discover"))
            .and(query_param("url", "https://blog.example"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "url": "https://blog.example/feed", "title": "Blog", "type": "rss" },
                { "url": "https://blog.example/atom", "title": "", "type": "atom" }
            ])))
            .mount(&server)
            .await;

        let candidates = normalizer(&server)
            .discover("https://blog.example")
            .await
            .unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].kind, CandidateKind::Atom);
    }

    #[tokio::test]
    async fn test_discover_validates_before_request() {
        let server = MockServer::start().await;
        let err = normalizer(&server).discover("not a url").await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    proptest! {
        #[test]
        fn prop_reddit_prefix_is_stripped(name in "[A-Za-z0-9_]{1,21}", idx in 0usize..4) {
            let sort = RedditSort::ALL[idx];
            let bare = normalize_reddit(&name, sort).unwrap();
            let prefixed = normalize_reddit(&format!("r/{name}"), sort).unwrap();
            prop_assert_eq!(&bare, &prefixed);
            prop_assert_eq!(bare.url, format!("https://www.reddit.com/r/{name}/{sort}.rss"));
            prop_assert_eq!(bare.title, format!("r/{name} ({sort})"));
        }

        #[test]
        fn prop_reddit_never_panics(input in ".*") {
            let _ = normalize_reddit(&input, RedditSort::Hot);
        }
    }
}
