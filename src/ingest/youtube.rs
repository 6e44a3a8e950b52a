use std::sync::LazyLock;

use regex::Regex;

/// A YouTube channel reference pulled out of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YoutubeRef {
    /// `UC` + 22 id characters; enough to build the feed URL offline.
    ChannelId(String),
    /// `@handle`
    Handle(String),
    /// Legacy `/c/<name>` custom URL
    Custom(String),
    /// Legacy `/user/<name>` URL
    User(String),
}

static RAW_CHANNEL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^UC[A-Za-z0-9_-]{22}$").expect("valid channel id regex")
});

type MakeRef = fn(String) -> YoutubeRef;

/// URL shapes in priority order; the first match wins.
static URL_PATTERNS: LazyLock<Vec<(Regex, MakeRef)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"youtube\.com/channel/(UC[A-Za-z0-9_-]{22})").expect("valid channel regex"),
            YoutubeRef::ChannelId as MakeRef,
        ),
        (
            Regex::new(r"youtube\.com/@([A-Za-z0-9_-]+)").expect("valid handle regex"),
            YoutubeRef::Handle as MakeRef,
        ),
        (
            Regex::new(r"youtube\.com/c/([A-Za-z0-9_-]+)").expect("valid custom regex"),
            YoutubeRef::Custom as MakeRef,
        ),
        (
            Regex::new(r"youtube\.com/user/([A-Za-z0-9_-]+)").expect("valid user regex"),
            YoutubeRef::User as MakeRef,
        ),
    ]
});

impl YoutubeRef {
    /// Classifies a raw channel id, a channel/handle/custom/user URL, or
    /// anything else (treated as a bare handle, leading `@` dropped).
    ///
    /// Returns `None` only for blank input. A bare-handle result is a guess:
    /// it still has to be resolved by the backend.
    pub fn extract(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        if RAW_CHANNEL_ID.is_match(input) {
            return Some(YoutubeRef::ChannelId(input.to_owned()));
        }

        for (pattern, make) in URL_PATTERNS.iter() {
            if let Some(m) = pattern.captures(input).and_then(|c| c.get(1)) {
                return Some(make(m.as_str().to_owned()));
            }
        }

        let handle = input.strip_prefix('@').unwrap_or(input);
        if handle.is_empty() {
            return None;
        }
        Some(YoutubeRef::Handle(handle.to_owned()))
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            YoutubeRef::ChannelId(id) => Some(id),
            _ => None,
        }
    }

    /// Feed URL when it can be built without a round trip.
    pub fn feed_url(&self) -> Option<String> {
        self.channel_id().map(channel_feed_url)
    }
}

/// The Atom feed YouTube publishes for every channel.
pub fn channel_feed_url(channel_id: &str) -> String {
    format!("https://www.youtube.com/feeds/videos.xml?channel_id={channel_id}")
}
