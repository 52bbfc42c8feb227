use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use feedline::api::HttpFeedApi;
use feedline::config::Config;
use feedline::feed::{FeedController, FeedEvent};
use feedline::model::{Author, CommentId, FeedItem, FeedSource, Id};

/// Get the config directory path (~/.config/feedline/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedline"))
}

#[derive(Parser, Debug)]
#[command(name = "feedline", about = "Browse and react to an achievement feed")]
struct Args {
    /// Config file (default: ~/.config/feedline/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the backend base URL from the config file
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one or more pages of a feed
    Browse {
        /// all, connections, popular or mine
        #[arg(long)]
        source: Option<FeedSource>,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Print items as JSON
        #[arg(long)]
        json: bool,
    },
    /// Like an achievement, or unlike it if already liked
    Like {
        item: String,
        #[arg(long)]
        source: Option<FeedSource>,
    },
    /// Comment on an achievement
    Comment {
        item: String,
        text: String,
        #[arg(long)]
        source: Option<FeedSource>,
    },
    /// Delete one of your comments
    Uncomment {
        item: String,
        comment: String,
        #[arg(long)]
        source: Option<FeedSource>,
    },
}

/// Pages searched when looking up an item for a mutation.
const LOOKUP_PAGE_LIMIT: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    tracing::debug!(?config, "Effective configuration");

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let api = HttpFeedApi::new(client, &config.base_url, config.api_token())
        .context("Invalid base_url")?
        .with_timeout(config.request_timeout());

    let current_user = config.current_user();
    let needs_user = !matches!(args.command, Command::Browse { .. });
    if needs_user && current_user.is_none() {
        anyhow::bail!(
            "No [user] id configured in {}; likes and comments need one",
            config_path.display()
        );
    }
    let current_user = current_user.unwrap_or_else(anonymous);

    let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(64);
    let events = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                FeedEvent::RateLimited {
                    channel,
                    attempt,
                    delay,
                } => {
                    eprintln!(
                        "Rate limited on {channel}, retry {attempt} in {:.1}s",
                        delay.as_secs_f64()
                    );
                }
                FeedEvent::MutationFailed {
                    action, message, ..
                } => {
                    eprintln!("Couldn't {action}: {message}");
                }
                other => tracing::trace!(event = ?other, "Feed event"),
            }
        }
    });

    let feed = FeedController::new(
        api,
        current_user,
        config.controller_options(),
        Some(event_tx),
    );

    let outcome = run(&feed, &config, args.command).await;
    drop(feed);
    let _ = events.await;
    outcome
}

async fn run(
    feed: &FeedController<HttpFeedApi>,
    config: &Config,
    command: Command,
) -> Result<()> {
    match command {
        Command::Browse {
            source,
            pages,
            json,
        } => {
            let source = source.unwrap_or(config.default_source);
            feed.switch_source(source)
                .await
                .with_context(|| format!("Failed to load the {source} feed"))?;
            for _ in 1..pages.max(1) {
                if !feed.view().has_more {
                    break;
                }
                feed.load_more().await.context("Failed to load more")?;
            }

            let view = feed.view();
            if json {
                println!("{}", serde_json::to_string_pretty(&*view.items)?);
            } else {
                for item in view.items.iter() {
                    print_item(item);
                }
                if view.has_more {
                    println!("-- page {} (more available)", view.page);
                } else {
                    println!("-- page {} (end of feed)", view.page);
                }
            }
        }
        Command::Like { item, source } => {
            let item_id = Id::from(item);
            locate(feed, source.unwrap_or(config.default_source), &item_id).await?;
            feed.toggle_like(&item_id).await?;
            if let Some(item) = find(feed, &item_id) {
                let state = if item.is_liked_by_current_user {
                    "Liked"
                } else {
                    "Unliked"
                };
                println!("{state} {} ({} likes)", item.title, item.like_count);
            }
        }
        Command::Comment { item, text, source } => {
            let item_id = Id::from(item);
            locate(feed, source.unwrap_or(config.default_source), &item_id).await?;
            let comment = feed.add_comment(&item_id, &text).await?;
            println!("Posted comment {}", comment.id);
        }
        Command::Uncomment {
            item,
            comment,
            source,
        } => {
            let item_id = Id::from(item);
            locate(feed, source.unwrap_or(config.default_source), &item_id).await?;
            feed.delete_comment(&item_id, &CommentId::from(comment.as_str()))
                .await?;
            println!("Deleted comment {comment}");
        }
    }
    Ok(())
}

/// Load pages of `source` until `item_id` is cached.
async fn locate(
    feed: &FeedController<HttpFeedApi>,
    source: FeedSource,
    item_id: &Id,
) -> Result<()> {
    feed.switch_source(source)
        .await
        .with_context(|| format!("Failed to load the {source} feed"))?;
    let mut pages = 1;
    while find(feed, item_id).is_none() {
        if !feed.view().has_more || pages >= LOOKUP_PAGE_LIMIT {
            anyhow::bail!("Achievement {item_id} not found in the {source} feed");
        }
        feed.load_more().await.context("Failed to load more")?;
        pages += 1;
    }
    Ok(())
}

fn find(feed: &FeedController<HttpFeedApi>, item_id: &Id) -> Option<FeedItem> {
    feed.view().items.iter().find(|i| &i.id == item_id).cloned()
}

fn print_item(item: &FeedItem) {
    let liked = if item.is_liked_by_current_user { "*" } else { " " };
    println!(
        "{liked} [{}] {} by {} ({} likes, {} comments)",
        item.id,
        item.title,
        item.author.display_name(),
        item.like_count,
        item.comment_count
    );
}

fn anonymous() -> Author {
    Author {
        id: Id::from(""),
        first_name: String::new(),
        last_name: String::new(),
        avatar_url: None,
    }
}
