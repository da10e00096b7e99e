//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::fetcher::{FetchError, UserFetcher};
use crate::query::{RequestCache, RetryPolicy};
use crate::session::SessionAccessor;
use crate::store::{MemoryStore, PersistentStore, StoreError};
use crate::user::{AccessToken, AnonymousUser, LoggedUser, User};

type Respond = Box<dyn Fn(usize) -> Result<User, FetchError> + Send + Sync>;

/// Fetcher whose answer is chosen per call index, recording when each call started.
pub struct ScriptedFetcher {
    respond: Respond,
    delay: Duration,
    calls: Mutex<Vec<Instant>>,
    count: watch::Sender<usize>,
}

impl ScriptedFetcher {
    pub fn new(respond: impl Fn(usize) -> Result<User, FetchError> + Send + Sync + 'static) -> Arc<Self> {
        Self::delayed(Duration::ZERO, respond)
    }

    pub fn delayed(
        delay: Duration,
        respond: impl Fn(usize) -> Result<User, FetchError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let (count, _) = watch::channel(0);
        Arc::new(Self { respond: Box::new(respond), delay, calls: Mutex::new(Vec::new()), count })
    }

    pub fn always(user: User) -> Arc<Self> {
        Self::new(move |_| Ok(user.clone()))
    }

    pub fn offline() -> Arc<Self> {
        Self::new(|_| Err(FetchError::Request("network unreachable".into())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.count.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }
}

#[async_trait::async_trait]
impl UserFetcher for ScriptedFetcher {
    async fn fetch(&self, _app: &str) -> Result<User, FetchError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len() - 1
        };
        self.count.send_replace(index + 1);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(index)
    }
}

/// Store whose writes always fail; reads see nothing.
pub struct FailingStore;

#[async_trait::async_trait]
impl PersistentStore for FailingStore {
    async fn read(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }

    async fn write(&self, key: &str, _value: Value) -> Result<(), StoreError> {
        Err(StoreError::InvalidKey(key.to_owned()))
    }
}

/// Memory store whose first write stalls for `delay`.
pub struct SlowFirstWriteStore {
    inner: MemoryStore,
    delay: Duration,
    writes: AtomicUsize,
}

impl SlowFirstWriteStore {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { inner: MemoryStore::new(), delay, writes: AtomicUsize::new(0) })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key)
    }
}

#[async_trait::async_trait]
impl PersistentStore for SlowFirstWriteStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.write(key, value).await
    }
}

pub fn logged(id: &str) -> LoggedUser {
    LoggedUser::new(id, vec!["github".to_owned()])
}

pub fn anonymous(id: &str) -> User {
    User::Anonymous(AnonymousUser::new(id))
}

/// Logged user whose token expires `expires_in` from the wall clock now.
pub fn logged_with_token(id: &str, expires_in: time::Duration) -> User {
    let token = AccessToken { value: format!("token-{id}"), expires_in: OffsetDateTime::now_utc() + expires_in };
    User::Logged(logged(id).with_access_token(token))
}

/// Start an accessor without fetch retries.
pub async fn start_session(fetcher: Arc<ScriptedFetcher>, store: Arc<dyn PersistentStore>) -> SessionAccessor {
    SessionAccessor::builder("webapp", fetcher, store)
        .cache(RequestCache::new(RetryPolicy::none()))
        .start()
        .await
}
