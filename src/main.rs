use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use logged_user::config::{ConfigError, SessionConfig, parse_api_url};
use logged_user::fetcher::{FetchError, HttpUserFetcher};
use logged_user::query::RequestCache;
use logged_user::store::FileStore;
use logged_user::{SessionAccessor, SessionError, SessionSnapshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

/// Each flag falls back to its `SESSION_*` environment variable, then to the
/// `SessionConfig` default.
#[derive(Parser, Debug)]
#[command(name = "session-watch", about = "Follow the current user session and its token refreshes")]
struct Cli {
    #[arg(long, env = "SESSION_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "SESSION_APP")]
    app: Option<String>,

    #[arg(long, env = "SESSION_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "Fetch once, log the session, and exit")]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), WatchError> {
    // `.env` first so `RUST_LOG` set there reaches the subscriber.
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();
    if let Err(e) = dotenv {
        tracing::debug!(error = %e, "no .env loaded");
    }

    let cli = Cli::parse();
    let config = apply_flags(SessionConfig::from_env()?, &cli)?;

    let fetcher = Arc::new(HttpUserFetcher::from_config(&config)?);
    let store = Arc::new(FileStore::new(&config.store_dir));
    info!(url = fetcher.url(), store_dir = %config.store_dir.display(), app = %config.app, "watching session");

    let session = SessionAccessor::builder(config.app.clone(), fetcher, store)
        .cache(RequestCache::new(config.retry))
        .refresh_lead(config.refresh_lead)
        .start()
        .await;

    if cli.once {
        let result = session.refresh().await;
        log_snapshot(&session.get_user());
        session.shutdown();
        result?;
        return Ok(());
    }

    let mut updates = session.subscribe();
    log_snapshot(&updates.borrow_and_update().clone());
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                log_snapshot(&snapshot);
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    session.shutdown();
    Ok(())
}

/// `RUST_LOG` when set, otherwise info for this crate and the binary.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "logged_user=info,session_watch=info".into())
}

fn apply_flags(mut config: SessionConfig, cli: &Cli) -> Result<SessionConfig, ConfigError> {
    if let Some(api_url) = &cli.api_url {
        config.api_url = parse_api_url(api_url)?;
    }
    if let Some(app) = &cli.app {
        config.app.clone_from(app);
    }
    if let Some(store_dir) = &cli.store_dir {
        config.store_dir.clone_from(store_dir);
    }
    Ok(config)
}

fn log_snapshot(snapshot: &SessionSnapshot) {
    match &snapshot.user {
        Some(user) => info!(
            user_id = %user.id,
            providers = ?user.providers,
            token_expires = ?user.access_token.as_ref().map(|t| t.expires_in),
            token_refreshed = snapshot.token_refreshed,
            loaded_from_cache = snapshot.loaded_from_cache,
            "logged in"
        ),
        None => info!(
            tracking_id = ?snapshot.tracking_id,
            is_loading = snapshot.is_loading,
            loaded_from_cache = snapshot.loaded_from_cache,
            "not logged in"
        ),
    }
    if let Some(error) = &snapshot.last_error {
        warn!(%error, "last user fetch failed");
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
