//! Session accessor — current user, snapshot cache, and token refresh.
//!
//! ARCHITECTURE
//! ============
//! Two tiers feed the visible user. The network tier is the `["loggedUser"]`
//! entry of the request cache, filled by fetches and by `set_user`. The
//! persisted tier is the `"user"` snapshot read once at start. The network
//! tier wins whenever it has a value.
//!
//! Every new user goes through `apply_user`, the single state-update path:
//! it replaces the refresh timer, writes the token-free snapshot, and flips
//! `token_refreshed`. Each apply takes a generation number. Snapshot writes
//! run one at a time, and a write whose generation has been superseded is
//! skipped, so the persisted user is always the last one applied. Consumers either poll `get_user` or follow
//! `subscribe`, which publishes a fresh `SessionSnapshot` after each change.
//!
//! LIFECYCLE
//! =========
//! The refresh timer belongs to the accessor. Timer tasks hold a weak
//! reference, so dropping the last accessor handle, or calling `shutdown`,
//! cancels any pending refresh. `shutdown` closes the timer itself, so no
//! apply racing with it can schedule a new refresh.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::fetcher::{FetchError, UserFetcher};
use crate::query::{QueryKey, RequestCache};
use crate::refresh::{DEFAULT_REFRESH_LEAD, RefreshTimer, refresh_delay};
use crate::store::PersistentStore;
use crate::user::{LoggedUser, User};

/// Request-cache key of the fetched user.
pub const LOGGED_USER_KEY: &str = "loggedUser";
/// Request-cache key prefix of per-user profile data.
pub const PROFILE_KEY: &str = "profile";
/// Persistent-store key of the user snapshot.
pub const SNAPSHOT_KEY: &str = "user";

#[must_use]
pub fn logged_user_key() -> QueryKey {
    QueryKey::new([LOGGED_USER_KEY])
}

#[must_use]
pub fn profile_key(user_id: &str) -> QueryKey {
    QueryKey::new([PROFILE_KEY, user_id])
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("user payload invalid: {0}")]
    Payload(#[from] serde_json::Error),
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Everything a consumer needs to render session-dependent UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    /// The available user when it is logged in.
    pub user: Option<LoggedUser>,
    /// Id of the available user of either kind.
    pub tracking_id: Option<String>,
    /// First fetch still pending and no user available from any tier.
    pub is_loading: bool,
    /// At least one user has been fetched and cached. Never resets.
    pub token_refreshed: bool,
    /// A persisted snapshot existed at start.
    pub loaded_from_cache: bool,
    /// Display text of the last failed fetch, cleared by the next success.
    pub last_error: Option<String>,
}

#[derive(Default)]
struct SessionState {
    fetched: Option<User>,
    cached: Option<User>,
    loaded_from_cache: bool,
    token_refreshed: bool,
    fetching: bool,
    last_error: Option<String>,
    generation: u64,
}

impl SessionState {
    fn available(&self) -> Option<&User> {
        self.fetched.as_ref().or(self.cached.as_ref())
    }

    fn snapshot(&self) -> SessionSnapshot {
        let available = self.available();
        SessionSnapshot {
            user: available.and_then(User::as_logged).cloned(),
            tracking_id: available.map(|user| user.id().to_owned()),
            is_loading: self.fetching && self.fetched.is_none() && available.is_none(),
            token_refreshed: self.token_refreshed,
            loaded_from_cache: self.loaded_from_cache,
            last_error: self.last_error.clone(),
        }
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Collects collaborators, then starts an accessor with [`SessionBuilder::start`].
pub struct SessionBuilder {
    app: String,
    fetcher: Arc<dyn UserFetcher>,
    store: Arc<dyn PersistentStore>,
    cache: RequestCache,
    refresh_lead: Duration,
}

impl SessionBuilder {
    /// Share a request cache with other consumers (e.g. profile queries).
    #[must_use]
    pub fn cache(mut self, cache: RequestCache) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn refresh_lead(mut self, lead: Duration) -> Self {
        self.refresh_lead = lead;
        self
    }

    /// Read the persisted snapshot, then issue the first fetch in the background.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start(self) -> SessionAccessor {
        let cached = load_snapshot(self.store.as_ref()).await;
        let loaded_from_cache = cached.is_some();
        let state = SessionState { cached, loaded_from_cache, fetching: true, ..SessionState::default() };
        let (updates, _) = watch::channel(state.snapshot());

        let inner = Arc::new(Inner {
            app: self.app,
            fetcher: self.fetcher,
            store: self.store,
            cache: self.cache,
            refresh_lead: self.refresh_lead,
            state: Mutex::new(state),
            timer: Mutex::new(RefreshTimer::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            updates,
        });

        info!(app = %inner.app, loaded_from_cache, "session accessor started");
        let weak = Arc::downgrade(&inner);
        tokio::spawn(refresh_weak(weak));

        SessionAccessor { inner }
    }
}

async fn load_snapshot(store: &dyn PersistentStore) -> Option<User> {
    let value = match store.read(SNAPSHOT_KEY).await {
        Ok(value) => value?,
        Err(e) => {
            warn!(error = %e, "snapshot read failed; starting without cached user");
            return None;
        }
    };
    match serde_json::from_value::<User>(value) {
        Ok(user) => {
            debug!(user_id = %user.id(), "loaded user snapshot");
            Some(user)
        }
        Err(e) => {
            warn!(error = %e, "snapshot is not a user; ignoring");
            None
        }
    }
}

// =============================================================================
// ACCESSOR
// =============================================================================

/// Handle to a running session. Clones share the same session.
#[derive(Clone)]
pub struct SessionAccessor {
    inner: Arc<Inner>,
}

struct Inner {
    app: String,
    fetcher: Arc<dyn UserFetcher>,
    store: Arc<dyn PersistentStore>,
    cache: RequestCache,
    refresh_lead: Duration,
    state: Mutex<SessionState>,
    /// Lock order: `timer` before `state`.
    timer: Mutex<RefreshTimer>,
    persist_lock: tokio::sync::Mutex<()>,
    updates: watch::Sender<SessionSnapshot>,
}

impl SessionAccessor {
    /// Start configuring an accessor for `app`.
    pub fn builder(
        app: impl Into<String>,
        fetcher: Arc<dyn UserFetcher>,
        store: Arc<dyn PersistentStore>,
    ) -> SessionBuilder {
        SessionBuilder {
            app: app.into(),
            fetcher,
            store,
            cache: RequestCache::default(),
            refresh_lead: DEFAULT_REFRESH_LEAD,
        }
    }

    /// Current view of the session: freshest user plus status flags.
    #[must_use]
    pub fn get_user(&self) -> SessionSnapshot {
        self.inner.lock_state().snapshot()
    }

    /// Replace the current user without a network round trip.
    ///
    /// The user goes through the same path as a fetched one (timer, snapshot,
    /// `token_refreshed`), then `["profile", id]` cache entries are invalidated.
    pub async fn set_user(&self, user: User) -> Result<(), SessionError> {
        let value = serde_json::to_value(&user)?;
        self.inner.cache.set_data(&logged_user_key(), value);

        let user_id = user.id().to_owned();
        self.inner.apply_user(user).await;

        let invalidated = self.inner.cache.invalidate(&profile_key(&user_id));
        debug!(%user_id, invalidated, "user set");
        Ok(())
    }

    /// Fetch the user now (joining any fetch in flight) and apply it.
    pub async fn refresh(&self) -> Result<Option<LoggedUser>, SessionError> {
        self.inner.refresh().await
    }

    /// Follow session changes. The receiver starts at the current snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.updates.subscribe()
    }

    /// The request cache backing the network tier.
    #[must_use]
    pub fn cache(&self) -> &RequestCache {
        &self.inner.cache
    }

    /// True while a token refresh is scheduled.
    #[must_use]
    pub fn refresh_pending(&self) -> bool {
        self.inner.lock_timer().is_pending()
    }

    /// Cancel the pending refresh and stop scheduling new ones.
    pub fn shutdown(&self) {
        if self.inner.lock_timer().close() {
            debug!("pending token refresh cancelled");
        }
        info!("session accessor shut down");
    }
}

async fn refresh_weak(inner: Weak<Inner>) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    // Failures are recorded in the snapshot and logged by `refresh`.
    if inner.refresh().await.is_err() {
        debug!("background refresh did not produce a user");
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_timer(&self) -> MutexGuard<'_, RefreshTimer> {
        self.timer.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Mutate state and publish the resulting snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.lock_state();
            let result = f(&mut state);
            (result, state.snapshot())
        };
        self.updates.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }

    async fn refresh(self: &Arc<Self>) -> Result<Option<LoggedUser>, SessionError> {
        self.update(|state| state.fetching = true);

        let fetcher = Arc::clone(&self.fetcher);
        let app = self.app.clone();
        let result = self
            .cache
            .fetch(&logged_user_key(), move || {
                let fetcher = Arc::clone(&fetcher);
                let app = app.clone();
                async move {
                    let user = fetcher.fetch(&app).await?;
                    serde_json::to_value(&user).map_err(|e| FetchError::Decode(e.to_string()))
                }
            })
            .await;

        let user = match result.map_err(SessionError::from).and_then(decode_user) {
            Ok(user) => user,
            Err(e) => {
                error!(error = %e, "user fetch failed");
                self.update(|state| {
                    state.fetching = false;
                    state.last_error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        self.apply_user(user).await;
        Ok(self.lock_state().snapshot().user)
    }

    /// Single update path for every new user, fetched or set.
    async fn apply_user(self: &Arc<Self>, user: User) {
        let snapshot = user.clone().without_token();

        // Timer and visible user change together, so the pending refresh
        // always belongs to the user being shown.
        let generation = {
            let mut timer = self.lock_timer();
            self.schedule_refresh(&mut timer, &user);
            self.update(|state| {
                state.generation += 1;
                state.fetched = Some(user);
                state.fetching = false;
                state.last_error = None;
                state.generation
            })
        };

        let _writer = self.persist_lock.lock().await;
        let latest = self.lock_state().generation;
        if latest != generation {
            debug!(generation, latest, "newer user applied; skipping stale snapshot write");
            return;
        }

        self.persist(&snapshot).await;
        self.update(|state| {
            state.cached = Some(snapshot);
            state.token_refreshed = true;
        });
    }

    fn schedule_refresh(self: &Arc<Self>, timer: &mut RefreshTimer, user: &User) {
        timer.cancel();
        let Some(token) = user.access_token() else {
            return;
        };

        let delay = refresh_delay(token.expires_in, OffsetDateTime::now_utc(), self.refresh_lead);
        let weak = Arc::downgrade(self);
        if timer.schedule(delay, move || refresh_weak(weak)) {
            debug!(user_id = %user.id(), delay_ms = delay.as_millis(), "token refresh scheduled");
        }
    }

    async fn persist(&self, snapshot: &User) {
        let value = match serde_json::to_value(snapshot) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "snapshot encode failed");
                return;
            }
        };
        if let Err(e) = self.store.write(SNAPSHOT_KEY, value).await {
            warn!(error = %e, user_id = %snapshot.id(), "snapshot write failed");
        }
    }
}

fn decode_user(value: Value) -> Result<User, SessionError> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
