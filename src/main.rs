use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kantent::api::{Article, FeedId, FilterContext};
use kantent::config::Config;
use kantent::ingest::{FeedSource, RedditSort};
use kantent::sync::FilterChange;
use kantent::util::{display_line, validate_http_url};
use kantent::Session;
use std::path::PathBuf;

/// Columns given to titles in listings.
const TITLE_WIDTH: usize = 72;

#[derive(Parser, Debug)]
#[command(name = "kantent", about = "Feed reader client for RSS, Reddit and YouTube feeds")]
struct Args {
    /// Config file (default: ~/.config/kantent/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List articles, newest first
    Articles {
        /// Only unread articles
        #[arg(long)]
        unread: bool,
        /// Only articles from this feed
        #[arg(long, value_name = "ID")]
        feed: Option<FeedId>,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Show an article and mark it read
    Open {
        id: i64,
        /// Also open the article URL in the default browser
        #[arg(long)]
        browser: bool,
    },
    /// Mark an article read
    Read {
        id: i64,
        /// Mark unread instead
        #[arg(long)]
        unread: bool,
    },
    /// Star an article
    Star {
        id: i64,
        /// Remove the star instead
        #[arg(long)]
        off: bool,
    },
    /// Mark every article (or one feed's articles) read
    MarkAllRead {
        #[arg(long, value_name = "ID")]
        feed: Option<FeedId>,
    },
    /// List subscribed feeds
    Feeds,
    /// Show feed and article counters
    Stats,
    /// Subscribe to a feed
    Add {
        #[command(subcommand)]
        source: AddSource,
    },
    /// Scan a website for feeds
    Discover {
        url: String,
        /// Subscribe to the Nth candidate (1-based)
        #[arg(long, value_name = "N")]
        pick: Option<usize>,
    },
    /// Unsubscribe from a feed and drop its articles
    Delete { id: FeedId },
    /// Ask the backend to fetch a feed now
    Refresh { id: FeedId },
}

#[derive(Subcommand, Debug)]
enum AddSource {
    /// An RSS or Atom feed URL
    Rss { url: String },
    /// A subreddit (with or without the r/ prefix)
    Reddit {
        name: String,
        #[arg(long, default_value = "hot")]
        sort: RedditSort,
    },
    /// A YouTube channel id, channel URL, or @handle
    Youtube { input: String },
}

impl From<AddSource> for FeedSource {
    fn from(source: AddSource) -> Self {
        match source {
            AddSource::Rss { url } => FeedSource::Rss { url },
            AddSource::Reddit { name, sort } => FeedSource::Reddit {
                subreddit: name,
                sort,
            },
            AddSource::Youtube { input } => FeedSource::Youtube { input },
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let config = match path.or_else(Config::default_path) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from '{}'", path.display()))?,
        None => Config::default(),
    };
    config
        .with_env_overrides()
        .context("Invalid configuration")
}

fn print_article_line(article: &Article) {
    let read = if article.is_read { ' ' } else { '*' };
    let star = if article.is_starred { '+' } else { ' ' };
    println!(
        "{:>7} {read}{star} {}  {}",
        article.id,
        article.published_at.format("%Y-%m-%d"),
        display_line(&article.title, TITLE_WIDTH)
    );
}

async fn run(session: &Session, command: Command) -> Result<()> {
    match command {
        Command::Articles {
            unread,
            feed,
            pages,
        } => {
            let filter = FilterContext {
                unread,
                feed_id: feed,
            };
            let change = session
                .filters()
                .set_filter(filter)
                .await
                .context("Failed to load articles")?;
            if change == FilterChange::Unchanged {
                session
                    .pages()
                    .load_next()
                    .await
                    .context("Failed to load articles")?;
            }
            for _ in 1..pages {
                if !session.pages().has_more() {
                    break;
                }
                session
                    .pages()
                    .load_next()
                    .await
                    .context("Failed to load more articles")?;
            }

            let articles = session.pages().articles();
            if articles.is_empty() {
                println!("No articles.");
            }
            for article in &articles {
                print_article_line(article);
            }
            if session.pages().has_more() {
                println!("(more available, use --pages {})", pages.saturating_add(1));
            }
        }
        Command::Open { id, browser } => {
            let opened = session
                .open_article(id)
                .await
                .with_context(|| format!("Failed to load article {id}"))?;
            let article = &opened.article;

            println!("{}", display_line(&article.title, usize::MAX));
            if let Some(feed) = article.feed_title.as_deref() {
                println!("Feed:      {}", display_line(feed, TITLE_WIDTH));
            }
            if let Some(author) = article.author.as_deref() {
                println!("Author:    {}", display_line(author, TITLE_WIDTH));
            }
            println!("Published: {}", article.published_at.format("%Y-%m-%d %H:%M UTC"));
            println!("URL:       {}", article.url);
            if let Some(description) = article.description.as_deref() {
                println!();
                println!("{}", display_line(description, 500));
            }
            if let Some(e) = &opened.mark_read_error {
                eprintln!("Warning: could not mark article read: {e}");
            }

            if browser {
                // Only hand http(s) URLs to the system opener
                let url = validate_http_url(&article.url)
                    .with_context(|| format!("Refusing to open '{}'", article.url))?;
                open::that(url.as_str()).context("Failed to open browser")?;
            }
        }
        Command::Read { id, unread } => {
            let read = session
                .mutations()
                .mark_read(id, !unread)
                .await
                .with_context(|| format!("Failed to update article {id}"))?;
            println!("Article {id} marked {}.", if read { "read" } else { "unread" });
        }
        Command::Star { id, off } => {
            let starred = session
                .mutations()
                .set_starred(id, !off)
                .await
                .with_context(|| format!("Failed to update article {id}"))?;
            println!("Article {id} {}.", if starred { "starred" } else { "unstarred" });
        }
        Command::MarkAllRead { feed } => {
            session
                .mutations()
                .mark_all_read(feed)
                .await
                .context("Failed to mark articles read")?;
            match feed {
                Some(feed_id) => println!("All articles in feed {feed_id} marked read."),
                None => println!("All articles marked read."),
            }
        }
        Command::Feeds => {
            let feeds = session.feeds().feeds().await.context("Failed to load feeds")?;
            if feeds.is_empty() {
                println!("No feeds. Add one with `kantent add rss <URL>`.");
            }
            for feed in &feeds {
                println!(
                    "{:>5} {:<8} {}",
                    feed.id,
                    feed.kind().to_string(),
                    display_line(&feed.title, TITLE_WIDTH)
                );
                if let Some(error) = feed.last_error.as_deref() {
                    println!("      error: {}", display_line(error, TITLE_WIDTH));
                }
            }
        }
        Command::Stats => {
            let stats = session.feeds().stats().await.context("Failed to load stats")?;
            println!("Feeds:    {}", stats.total_feeds);
            println!("Articles: {}", stats.total_articles);
            println!("Unread:   {}", stats.unread_count);
        }
        Command::Add { source } => {
            let feed = session
                .submit_feed(source.into())
                .await
                .context("Failed to add feed")?;
            println!(
                "Added feed {} ({}): {}",
                feed.id,
                feed.kind(),
                display_line(&feed.url, TITLE_WIDTH)
            );
        }
        Command::Discover { url, pick } => {
            let candidates = session.discover(&url).await.context("Discovery failed")?;
            let Some(n) = pick else {
                for (i, candidate) in candidates.iter().enumerate() {
                    println!(
                        "{:>3}. [{:?}] {}  {}",
                        i + 1,
                        candidate.kind,
                        display_line(&candidate.title, 40),
                        candidate.url
                    );
                }
                println!("Subscribe with `kantent discover {url} --pick N`.");
                return Ok(());
            };

            let candidate = n
                .checked_sub(1)
                .and_then(|i| candidates.get(i))
                .cloned()
                .with_context(|| format!("No candidate #{n} (found {})", candidates.len()))?;
            let feed = session
                .submit_feed(FeedSource::Discovered(candidate))
                .await
                .context("Failed to add feed")?;
            println!("Added feed {}: {}", feed.id, display_line(&feed.url, TITLE_WIDTH));
        }
        Command::Delete { id } => {
            session
                .feeds()
                .delete(id)
                .await
                .with_context(|| format!("Failed to delete feed {id}"))?;
            println!("Feed {id} deleted.");
        }
        Command::Refresh { id } => {
            session
                .feeds()
                .refresh(id)
                .await
                .with_context(|| format!("Failed to refresh feed {id}"))?;
            println!("Refresh of feed {id} started; new articles may take a moment to appear.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config)?;
    tracing::debug!(?config, "Starting");

    let session = Session::new(&config).context("Failed to create API client")?;
    run(&session, args.command).await
}
