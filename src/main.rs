//! feedsync operator binary
//!
//! Maintenance actions against the on-device store and caches:
//!
//! ```text
//! feedsync status
//! feedsync rebuild-store
//! feedsync invalidate-cache <user-id>
//! ```

use anyhow::{Context, bail};
use feedsync::config::{self, AppConfig};
use feedsync::data::{BoundedFeedCache, FeedKind, PersistentStore, UserId};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

enum Command {
    Status,
    RebuildStore,
    InvalidateCache(UserId),
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let command = args.next().unwrap_or_else(|| "status".to_string());
        match command.as_str() {
            "status" => Ok(Self::Status),
            "rebuild-store" => Ok(Self::RebuildStore),
            "invalidate-cache" => {
                let user = args
                    .next()
                    .context("invalidate-cache requires a <user-id> argument")?;
                Ok(Self::InvalidateCache(UserId::new(user)))
            }
            other => bail!(
                "unknown command {other:?}; expected status, rebuild-store or invalidate-cache <user-id>"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    let config = AppConfig::load()?;

    // 2. Initialize tracing/logging
    init_tracing(&config.logging);
    feedsync::metrics::init_metrics();

    let command = Command::parse(std::env::args().skip(1))?;

    // 3. Load the store; recoverable failures are repaired, fatal ones exit
    let store = PersistentStore::new(&config.store.path);
    store.load().await;

    // 4. Run the requested action
    match command {
        Command::Status => {
            tracing::info!(
                store = %store.path().display(),
                loaded = store.is_loaded(),
                cache = %config.cache.directory.display(),
                max_items = config.cache.max_items,
                "Store status"
            );
        }
        Command::RebuildStore => {
            store
                .rebuild()
                .await
                .context("failed to rebuild persistent store")?;
        }
        Command::InvalidateCache(user) => {
            let cache = BoundedFeedCache::with_max_items(
                &config.cache.directory,
                config.cache.max_items,
            );
            for kind in FeedKind::ALL {
                cache.invalidate(kind, &user).await;
            }
            tracing::info!(user_id = %user, "Feed caches invalidated");
        }
    }

    tracing::debug!(metrics = %feedsync::metrics::gather_text(), "Final metrics");
    store.close().await;
    Ok(())
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("feedsync={}", logging.level).into());

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
