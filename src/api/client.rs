use super::types::{
    Article, ArticleFlag, ArticleId, DiscoveredFeedCandidate, Feed, FeedId, FilterContext,
    NewFeed, Stats, YoutubeResolution,
};
use super::ApiError;
use crate::util::validate_http_url;
use futures::StreamExt;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Pause before the single retry granted to read queries.
const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Thin client for the feed backend.
///
/// Cloning is cheap: `reqwest::Client` is reference counted internally.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    max_response_bytes: usize,
}

impl ApiClient {
    /// Builds a client for `base_url` (e.g. `http://localhost:8080`).
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidBaseUrl`] if the URL is not http(s), or
    /// [`ApiError::Network`] if the TLS backend fails to initialize.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base =
            validate_http_url(base_url).map_err(|e| ApiError::InvalidBaseUrl(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kantent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(http, base))
    }

    pub fn with_client(http: reqwest::Client, base: Url) -> Self {
        Self {
            http,
            base,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }

    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    // ========================================================================
    // Articles
    // ========================================================================

    /// `GET /api/articles?offset&limit&unread&feed_id`
    pub async fn list_articles(
        &self,
        offset: u32,
        limit: u32,
        filter: &FilterContext,
    ) -> Result<Vec<Article>, ApiError> {
        let mut url = self.endpoint(&["api", "articles"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("offset", &offset.to_string())
                .append_pair("limit", &limit.to_string());
            if filter.unread {
                query.append_pair("unread", "true");
            }
            if let Some(feed_id) = filter.feed_id {
                query.append_pair("feed_id", &feed_id.to_string());
            }
        }
        self.get_list(url).await
    }

    /// `GET /api/articles/{id}`
    pub async fn get_article(&self, id: ArticleId) -> Result<Article, ApiError> {
        let url = self.endpoint(&["api", "articles", &id.to_string()])?;
        self.get(url).await
    }

    /// `PUT /api/articles/{id}/read` or `/star`.
    ///
    /// Returns the updated article when the backend sends one back; a 204 or
    /// an unrecognized body yields `None`.
    pub async fn set_flag(
        &self,
        id: ArticleId,
        flag: ArticleFlag,
        value: bool,
    ) -> Result<Option<Article>, ApiError> {
        let url = self.endpoint(&["api", "articles", &id.to_string(), flag.path_segment()])?;

        let mut body = serde_json::Map::new();
        body.insert(flag.field().to_owned(), serde_json::Value::Bool(value));

        let request = self.with_json(self.http.put(url), &body)?;
        let response = self.execute(request).await?;
        Ok(decode_optional(response))
    }

    /// `POST /api/articles/mark-all-read?feed_id=`
    pub async fn mark_all_read(&self, feed_id: Option<FeedId>) -> Result<(), ApiError> {
        let mut url = self.endpoint(&["api", "articles", "mark-all-read"])?;
        if let Some(feed_id) = feed_id {
            url.query_pairs_mut()
                .append_pair("feed_id", &feed_id.to_string());
        }
        self.execute(self.http.post(url)).await?;
        Ok(())
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    /// `GET /api/feeds`
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, ApiError> {
        let url = self.endpoint(&["api", "feeds"])?;
        self.get_list(url).await
    }

    /// `POST /api/feeds {url, title}`
    pub async fn create_feed(&self, feed: &NewFeed) -> Result<Feed, ApiError> {
        let url = self.endpoint(&["api", "feeds"])?;
        let request = self.with_json(self.http.post(url), feed)?;
        let body = self.execute(request).await?;
        decode(body)
    }

    /// `DELETE /api/feeds/{id}`
    pub async fn delete_feed(&self, id: FeedId) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "feeds", &id.to_string()])?;
        self.execute(self.http.delete(url)).await?;
        Ok(())
    }

    /// `POST /api/feeds/{id}/refresh`. The backend answers 200/202 before the
    /// fetch actually runs, so success only means the refresh was queued.
    pub async fn refresh_feed(&self, id: FeedId) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "feeds", &id.to_string(), "refresh"])?;
        self.execute(self.http.post(url)).await?;
        Ok(())
    }

    // ========================================================================
    // Stats, Discovery, Resolution
    // ========================================================================

    /// `GET /api/stats`
    pub async fn stats(&self) -> Result<Stats, ApiError> {
        let url = self.endpoint(&["api", "stats"])?;
        self.get(url).await
    }

    /// `GET /api/discover?url=`
    pub async fn discover(&self, site_url: &str) -> Result<Vec<DiscoveredFeedCandidate>, ApiError> {
        let mut url = self.endpoint(&["api", "discover"])?;
        url.query_pairs_mut().append_pair("url", site_url);
        self.get_list(url).await
    }

    /// `GET /api/youtube/resolve?input=`
    pub async fn resolve_youtube(&self, input: &str) -> Result<YoutubeResolution, ApiError> {
        let mut url = self.endpoint(&["api", "youtube", "resolve"])?;
        url.query_pairs_mut().append_pair("input", input);
        self.get(url).await
    }

    // ========================================================================
    // Request Plumbing
    // ========================================================================

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_json<T: Serialize + ?Sized>(
        &self,
        request: RequestBuilder,
        body: &T,
    ) -> Result<RequestBuilder, ApiError> {
        let bytes = serde_json::to_vec(body).map_err(|e| ApiError::Json(e.to_string()))?;
        Ok(request
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(bytes))
    }

    /// GET with one retry on transient failure. Mutations never go through here.
    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let body = match self.execute(self.http.get(url.clone())).await {
            Err(e) if e.is_retryable() => {
                tracing::debug!(
                    url = %url,
                    error = %e,
                    delay_ms = READ_RETRY_DELAY.as_millis() as u64,
                    "Retrying read after transient error"
                );
                tokio::time::sleep(READ_RETRY_DELAY).await;
                self.execute(self.http.get(url)).await?
            }
            other => other?,
        };
        decode(body)
    }

    /// List endpoints may encode "no rows" as JSON `null`.
    async fn get_list<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, ApiError> {
        let items: Option<Vec<T>> = self.get(url).await?;
        Ok(items.unwrap_or_default())
    }

    /// Sends a request and returns the body, or `None` for 204 / empty bodies.
    async fn execute(&self, request: RequestBuilder) -> Result<Option<Vec<u8>>, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(ApiError::Server {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_owned(),
            });
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let bytes = read_limited(response, self.max_response_bytes).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(bytes))
    }
}

/// Reads a response body, refusing anything larger than `limit` bytes.
async fn read_limited(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(ApiError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

fn decode<T: DeserializeOwned>(body: Option<Vec<u8>>) -> Result<T, ApiError> {
    let body = body.ok_or_else(|| ApiError::Json("empty response body".to_owned()))?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Json(e.to_string()))
}

/// Decodes an optional confirmation body. The request already succeeded, so a
/// body we cannot read is dropped rather than turned into an error.
fn decode_optional<T: DeserializeOwned>(body: Option<Vec<u8>>) -> Option<T> {
    let body = body?;
    match serde_json::from_slice(&body) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unrecognized confirmation body");
            None
        }
    }
}
