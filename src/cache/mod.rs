//! Normalized entity cache shared by every controller.
//!
//! Articles live in one id-keyed table; views (see
//! [`PaginationController`](crate::sync::PaginationController)) keep only
//! ordered id lists and resolve them through the table, so a point update
//! never walks paginated structures and a purged article vanishes from every
//! view at once.
//!
//! Reactivity is explicit: every write publishes a [`CacheEvent`] on a
//! broadcast channel, and consumers opt in with [`Cache::subscribe`].
//!
//! Freshness is tracked per portion:
//! - Articles carry an epoch, bumped by [`Cache::invalidate_articles`]. Views
//!   remember the epoch they were built at and rebuild when it moves.
//! - Feeds and stats carry a stale flag; a stale or absent value reads as
//!   `None`, forcing the caller to refetch.
//!
//! Local flag writes tick a flag clock and stamp the article with it. A
//! fetch records [`Cache::flag_clock`] before it is sent, and
//! [`Cache::upsert_fetched`] keeps the cached `is_read`/`is_starred` of any
//! article stamped after that, so a response that was already in flight
//! cannot undo a mutation that settled first.

use crate::api::{Article, ArticleFlag, ArticleId, Feed, FeedId, Stats};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Capacity of the notification channel. Slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Change notifications published after each cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Articles were inserted, replaced, or had a flag changed.
    ArticlesUpdated(Vec<ArticleId>),
    /// Article views must be rebuilt; carries the new epoch.
    ArticlesInvalidated { epoch: u64 },
    FeedsReplaced,
    FeedsInvalidated,
    /// A feed and all of its articles were dropped.
    FeedRemoved(FeedId),
    StatsUpdated,
    StatsInvalidated,
}

/// Pre-mutation values of one flag across a set of articles.
///
/// Taken and applied under a single write lock by [`Cache::apply_flag`], and
/// handed back to [`Cache::restore`] to undo exactly that change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSnapshot {
    pub flag: ArticleFlag,
    pub values: Vec<(ArticleId, bool)>,
}

impl FlagSnapshot {
    /// Number of articles whose value actually changed when applied.
    pub fn changed(&self, applied: bool) -> usize {
        self.values.iter().filter(|(_, v)| *v != applied).count()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Default)]
struct Tables {
    articles: HashMap<ArticleId, Article>,
    article_epoch: u64,
    flag_clock: u64,
    /// Clock tick of the last local flag write per article.
    flag_marks: HashMap<ArticleId, u64>,
    feeds: Option<Vec<Feed>>,
    feeds_stale: bool,
    /// Deleted feed ids. Late responses must not resurrect them or their articles.
    removed_feeds: HashSet<FeedId>,
    stats: Option<Stats>,
    stats_stale: bool,
}

impl Tables {
    fn stamp(&mut self, id: ArticleId) {
        self.flag_clock += 1;
        self.flag_marks.insert(id, self.flag_clock);
    }
}

/// Folds a server row into the cached one.
///
/// List responses leave out `content` (and single reads leave out
/// `feed_title`), so a missing optional field keeps the cached value.
fn merge_row(cached: &Article, mut incoming: Article, keep_flags: bool) -> Article {
    incoming.description = incoming.description.or_else(|| cached.description.clone());
    incoming.content = incoming.content.or_else(|| cached.content.clone());
    incoming.image_url = incoming.image_url.or_else(|| cached.image_url.clone());
    incoming.author = incoming.author.or_else(|| cached.author.clone());
    incoming.feed_title = incoming.feed_title.or_else(|| cached.feed_title.clone());
    if keep_flags {
        incoming.is_read = cached.is_read;
        incoming.is_starred = cached.is_starred;
    }
    incoming
}

struct Inner {
    tables: RwLock<Tables>,
    events: broadcast::Sender<CacheEvent>,
}

/// Cheap-clone handle to the shared cache.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.read();
        f.debug_struct("Cache")
            .field("articles", &tables.articles.len())
            .field("article_epoch", &tables.article_epoch)
            .field("feeds", &tables.feeds.as_ref().map(Vec::len))
            .field("feeds_stale", &tables.feeds_stale)
            .field("stats_stale", &tables.stats_stale)
            .finish()
    }
}

impl Cache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                events,
            }),
        }
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    // ========================================================================
    // Articles
    // ========================================================================

    /// Current flag clock. Read it before sending a request whose response
    /// will go through [`upsert_fetched`](Self::upsert_fetched).
    pub fn flag_clock(&self) -> u64 {
        self.read().flag_clock
    }

    /// Stores articles whose flags are known to be newer than any local change.
    pub fn upsert_articles(&self, articles: impl IntoIterator<Item = Article>) -> Vec<ArticleId> {
        self.upsert_fetched(articles, u64::MAX)
    }

    /// Stores articles from a response requested at flag clock `requested_at`.
    ///
    /// Rows merge into cached ones field by field. Flags written locally
    /// after `requested_at` are kept. Articles of deleted feeds are dropped.
    /// Returns the ids actually stored, in input order.
    pub fn upsert_fetched(
        &self,
        articles: impl IntoIterator<Item = Article>,
        requested_at: u64,
    ) -> Vec<ArticleId> {
        let stored: Vec<ArticleId> = {
            let mut tables = self.write();
            let Tables {
                articles: table,
                flag_marks,
                removed_feeds,
                ..
            } = &mut *tables;
            let mut stored = Vec::new();
            for article in articles {
                if removed_feeds.contains(&article.feed_id) {
                    tracing::debug!(
                        article_id = article.id,
                        feed_id = article.feed_id,
                        "Dropping article of deleted feed"
                    );
                    continue;
                }
                let id = article.id;
                let row = match table.get(&id) {
                    Some(cached) => {
                        let keep_flags = flag_marks
                            .get(&id)
                            .is_some_and(|&mark| mark > requested_at);
                        if keep_flags {
                            tracing::debug!(article_id = id, "Keeping newer local flags");
                        }
                        merge_row(cached, article, keep_flags)
                    }
                    None => article,
                };
                stored.push(id);
                table.insert(id, row);
            }
            stored
        };

        if !stored.is_empty() {
            self.publish(CacheEvent::ArticlesUpdated(stored.clone()));
        }
        stored
    }

    pub fn article(&self, id: ArticleId) -> Option<Article> {
        self.read().articles.get(&id).cloned()
    }

    /// Resolves ids in order, skipping any no longer in the table.
    pub fn articles(&self, ids: &[ArticleId]) -> Vec<Article> {
        let tables = self.read();
        ids.iter()
            .filter_map(|id| tables.articles.get(id).cloned())
            .collect()
    }

    pub fn contains_article(&self, id: ArticleId) -> bool {
        self.read().articles.contains_key(&id)
    }

    /// Ids of cached articles in `feed_id` (all feeds when `None`), ascending.
    pub fn article_ids_in(&self, feed_id: Option<FeedId>) -> Vec<ArticleId> {
        let tables = self.read();
        let mut ids: Vec<ArticleId> = tables
            .articles
            .values()
            .filter(|a| feed_id.is_none() || feed_id == Some(a.feed_id))
            .map(|a| a.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshots `flag` on every listed article, then sets it to `value`.
    ///
    /// Both happen under one write lock, so no other write can slip between
    /// the snapshot and the change. Ids not in the table are skipped.
    pub fn apply_flag(&self, ids: &[ArticleId], flag: ArticleFlag, value: bool) -> FlagSnapshot {
        let snapshot = {
            let mut tables = self.write();
            let mut values = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(article) = tables.articles.get_mut(id) {
                    values.push((*id, article.flag(flag)));
                    article.set_flag(flag, value);
                    tables.stamp(*id);
                }
            }
            FlagSnapshot { flag, values }
        };

        if !snapshot.is_empty() {
            self.publish(CacheEvent::ArticlesUpdated(
                snapshot.values.iter().map(|(id, _)| *id).collect(),
            ));
        }
        snapshot
    }

    /// Puts back exactly the values recorded in `snapshot`.
    pub fn restore(&self, snapshot: &FlagSnapshot) {
        let restored: Vec<ArticleId> = {
            let mut tables = self.write();
            snapshot
                .values
                .iter()
                .filter_map(|(id, value)| {
                    let article = tables.articles.get_mut(id)?;
                    article.set_flag(snapshot.flag, *value);
                    tables.stamp(*id);
                    Some(*id)
                })
                .collect()
        };

        if !restored.is_empty() {
            self.publish(CacheEvent::ArticlesUpdated(restored));
        }
    }

    /// Sets one flag to a server-confirmed value.
    pub fn set_flag(&self, id: ArticleId, flag: ArticleFlag, value: bool) {
        let changed = {
            let mut tables = self.write();
            let Some(article) = tables.articles.get_mut(&id) else {
                return;
            };
            let changed = article.flag(flag) != value;
            article.set_flag(flag, value);
            // Stamped even when unchanged: the confirmation itself is newer
            tables.stamp(id);
            changed
        };

        if changed {
            self.publish(CacheEvent::ArticlesUpdated(vec![id]));
        }
    }

    pub fn article_epoch(&self) -> u64 {
        self.read().article_epoch
    }

    /// Marks every article view stale. Returns the new epoch.
    ///
    /// Cached rows are kept: they still back flag mutations until the views
    /// refetch and overwrite them.
    pub fn invalidate_articles(&self) -> u64 {
        let epoch = {
            let mut tables = self.write();
            tables.article_epoch += 1;
            tables.article_epoch
        };
        self.publish(CacheEvent::ArticlesInvalidated { epoch });
        epoch
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    /// The feed list, or `None` when it was never loaded or is stale.
    pub fn feeds(&self) -> Option<Vec<Feed>> {
        let tables = self.read();
        if tables.feeds_stale {
            return None;
        }
        tables.feeds.clone()
    }

    /// Any cached copy of a feed, fresh or not.
    pub fn feed(&self, id: FeedId) -> Option<Feed> {
        self.read()
            .feeds
            .as_ref()
            .and_then(|feeds| feeds.iter().find(|f| f.id == id).cloned())
    }

    pub fn replace_feeds(&self, feeds: Vec<Feed>) {
        {
            let mut tables = self.write();
            let removed = &tables.removed_feeds;
            let feeds: Vec<Feed> = feeds
                .into_iter()
                .filter(|f| !removed.contains(&f.id))
                .collect();
            tables.feeds = Some(feeds);
            tables.feeds_stale = false;
        }
        self.publish(CacheEvent::FeedsReplaced);
    }

    pub fn invalidate_feeds(&self) {
        self.write().feeds_stale = true;
        self.publish(CacheEvent::FeedsInvalidated);
    }

    /// Drops a deleted feed and purges its articles from the table.
    ///
    /// Returns the number of articles purged.
    pub fn remove_feed(&self, id: FeedId) -> usize {
        let purged = {
            let mut tables = self.write();
            tables.removed_feeds.insert(id);
            if let Some(feeds) = tables.feeds.as_mut() {
                feeds.retain(|f| f.id != id);
            }
            let Tables {
                articles,
                flag_marks,
                ..
            } = &mut *tables;
            let before = articles.len();
            articles.retain(|_, a| a.feed_id != id);
            flag_marks.retain(|article_id, _| articles.contains_key(article_id));
            before - articles.len()
        };
        self.publish(CacheEvent::FeedRemoved(id));
        purged
    }

    // ========================================================================
    // Stats
    // ========================================================================

    /// The stats snapshot, or `None` when never loaded or stale.
    pub fn stats(&self) -> Option<Stats> {
        let tables = self.read();
        if tables.stats_stale {
            return None;
        }
        tables.stats
    }

    pub fn set_stats(&self, stats: Stats) {
        {
            let mut tables = self.write();
            tables.stats = Some(stats);
            tables.stats_stale = false;
        }
        self.publish(CacheEvent::StatsUpdated);
    }

    pub fn invalidate_stats(&self) {
        self.write().stats_stale = true;
        self.publish(CacheEvent::StatsInvalidated);
    }
}
