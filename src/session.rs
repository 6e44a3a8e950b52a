//! One client session: a shared cache and every controller wired to it.

use crate::api::{
    ApiClient, ApiError, Article, ArticleId, DiscoveredFeedCandidate, Feed, FilterContext, Stats,
};
use crate::cache::Cache;
use crate::config::Config;
use crate::ingest::{FeedForm, FeedSource, IngestError, Normalizer};
use crate::sync::{
    FeedManager, FilterController, InvalidationScheduler, LoadOutcome, MutationEngine,
    PaginationController,
};
use std::time::Duration;

/// Result of the initial concurrent load.
#[derive(Debug, Clone, PartialEq)]
pub struct Bootstrap {
    pub feeds: Vec<Feed>,
    pub stats: Stats,
    pub first_page: LoadOutcome,
}

/// An article fetched for reading.
///
/// Opening an unread article marks it read. That mutation can fail
/// independently of the fetch; the article is still returned, with the
/// (already rolled back) failure alongside it.
#[derive(Debug)]
pub struct OpenedArticle {
    pub article: Article,
    pub mark_read_error: Option<ApiError>,
}

pub struct Session {
    api: ApiClient,
    cache: Cache,
    filters: FilterController,
    mutations: MutationEngine,
    feeds: FeedManager,
    normalizer: Normalizer,
    form: FeedForm,
}

impl Session {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let api = ApiClient::new(&config.api_url, config.request_timeout())?
            .with_max_response_bytes(config.max_response_bytes);
        Ok(Self::with_client(
            api,
            config.page_size,
            config.ingest_delay(),
        ))
    }

    pub fn with_client(api: ApiClient, page_size: u32, ingest_delay: Duration) -> Self {
        let cache = Cache::new();
        let pages =
            PaginationController::new(api.clone(), cache.clone(), page_size, FilterContext::all());
        let scheduler = InvalidationScheduler::new(cache.clone(), ingest_delay);

        Self {
            filters: FilterController::new(pages),
            mutations: MutationEngine::new(api.clone(), cache.clone()),
            feeds: FeedManager::new(api.clone(), cache.clone(), scheduler),
            normalizer: Normalizer::new(api.clone()),
            form: FeedForm::new(),
            api,
            cache,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn filters(&self) -> &FilterController {
        &self.filters
    }

    pub fn pages(&self) -> &PaginationController {
        self.filters.pagination()
    }

    pub fn mutations(&self) -> &MutationEngine {
        &self.mutations
    }

    pub fn feeds(&self) -> &FeedManager {
        &self.feeds
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn form(&self) -> &FeedForm {
        &self.form
    }

    /// Loads feeds, stats and the first article page concurrently.
    pub async fn bootstrap(&self) -> Result<Bootstrap, ApiError> {
        let (feeds, stats, first_page) = futures::try_join!(
            self.feeds.feeds(),
            self.feeds.stats(),
            self.pages().load_next()
        )?;
        tracing::debug!(
            feeds = feeds.len(),
            unread = stats.unread_count,
            "Session bootstrapped"
        );
        Ok(Bootstrap {
            feeds,
            stats,
            first_page,
        })
    }

    /// Fetches one article and stores it in the cache.
    pub async fn article(&self, id: ArticleId) -> Result<Article, ApiError> {
        let requested_at = self.cache.flag_clock();
        let fetched = self.api.get_article(id).await.inspect_err(|e| {
            tracing::warn!(article_id = id, error = %e, "Failed to load article");
        })?;
        self.cache.upsert_fetched([fetched.clone()], requested_at);
        // Merged row: carries any newer local flags and cached fields
        Ok(self.cache.article(id).unwrap_or(fetched))
    }

    /// Fetches an article for reading and marks it read if it was unread.
    pub async fn open_article(&self, id: ArticleId) -> Result<OpenedArticle, ApiError> {
        let mut article = self.article(id).await?;
        if article.is_read {
            return Ok(OpenedArticle {
                article,
                mark_read_error: None,
            });
        }

        let mark_read_error = match self.mutations.mark_read(id, true).await {
            Ok(confirmed) => {
                article.is_read = confirmed;
                None
            }
            Err(e) => Some(e),
        };
        Ok(OpenedArticle {
            article,
            mark_read_error,
        })
    }

    /// Runs `source` through the add-feed form.
    pub async fn submit_feed(&self, source: FeedSource) -> Result<Feed, IngestError> {
        self.form.set_input(source);
        self.form.submit(&self.normalizer, &self.feeds).await
    }

    pub async fn discover(&self, site_url: &str) -> Result<Vec<DiscoveredFeedCandidate>, IngestError> {
        self.normalizer.discover(site_url).await
    }

    /// Rebuilds the article view if anything invalidated it.
    pub async fn refresh_view(&self) -> Result<Option<LoadOutcome>, ApiError> {
        self.pages().ensure_fresh().await
    }
}
