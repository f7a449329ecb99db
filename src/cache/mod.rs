//! Read-through cache in front of a [`Fetch`] backend.
//!
//! [`Cache::get`] answers from memory while an entry is younger than the
//! staleness window and otherwise asks the backend, storing what comes back.
//!
//! The store sits behind a reader/writer lock with two short critical
//! sections per lookup: a read to check freshness, and, after a refresh, a
//! write to insert the new entry. The backend call happens between them with
//! no lock held, so two lookups that both see a stale entry may both fetch;
//! the later write wins. Failed fetches never touch the store.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{Fetch, FetchError};

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

/// One cached lookup result.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    value: Value,
    fetched_at: u64,
}

impl Entry {
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Unix seconds at which the value was stored.
    pub fn fetched_at(&self) -> u64 {
        self.fetched_at
    }

    /// An entry is fresh while strictly less than `window` has elapsed since
    /// it was stored. Timestamps from the future count as age zero.
    pub fn is_fresh(&self, now: u64, window: Duration) -> bool {
        now.saturating_sub(self.fetched_at) < window.as_secs()
    }
}

/// How a `(collection, key)` lookup maps onto a store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyScope {
    /// Entries are keyed by collection and key together.
    #[default]
    Collection,
    /// Entries are keyed by lookup key alone; collections sharing a key
    /// share an entry.
    KeyOnly,
}

impl KeyScope {
    pub fn key(self, collection: &str, key: &str) -> CacheKey {
        CacheKey {
            collection: match self {
                Self::Collection => Some(collection.to_owned()),
                Self::KeyOnly => None,
            },
            key: key.to_owned(),
        }
    }
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Collection => "collection",
            Self::KeyOnly => "key-only",
        })
    }
}

#[derive(Debug, Error)]
#[error("unknown key scope {0:?} (expected \"collection\" or \"key-only\")")]
pub struct ParseKeyScopeError(String);

impl FromStr for KeyScope {
    type Err = ParseKeyScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collection" => Ok(Self::Collection),
            "key-only" => Ok(Self::KeyOnly),
            other => Err(ParseKeyScopeError(other.to_owned())),
        }
    }
}

/// Store key derived from a lookup under some [`KeyScope`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    collection: Option<String>,
    key: String,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.collection {
            Some(collection) => write!(f, "{collection}/{}", self.key),
            None => f.write_str(&self.key),
        }
    }
}

/// A read-through cache over a [`Fetch`] backend.
///
/// Construct one per process and share it behind an [`Arc`](std::sync::Arc).
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use readthru::backend::BackendClient;
/// use readthru::cache::Cache;
///
/// # async fn example() -> Result<(), readthru::backend::FetchError> {
/// let backend = BackendClient::new("http://localhost:8080", Duration::from_secs(10))?;
/// let cache = Cache::new(backend, Duration::from_secs(300));
///
/// let first = cache.get("items", "x").await?;  // goes to the backend
/// let second = cache.get("items", "x").await?; // served from memory
/// assert_eq!(first, second);
/// # Ok(())
/// # }
/// ```
pub struct Cache<F, C = SystemClock> {
    store: RwLock<HashMap<CacheKey, Entry>>,
    fetcher: F,
    clock: C,
    staleness: Duration,
    scope: KeyScope,
}

impl<F: Fetch> Cache<F> {
    /// Creates an empty cache stamped by the system clock.
    pub fn new(fetcher: F, staleness: Duration) -> Self {
        Self::with_clock(fetcher, staleness, SystemClock)
    }
}

impl<F: Fetch, C: Clock> Cache<F, C> {
    pub fn with_clock(fetcher: F, staleness: Duration, clock: C) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            fetcher,
            clock,
            staleness,
            scope: KeyScope::default(),
        }
    }

    #[must_use]
    pub fn with_key_scope(mut self, scope: KeyScope) -> Self {
        self.scope = scope;
        self
    }

    /// Returns the value for `(collection, key)`, refreshing it from the
    /// backend when it is missing or stale.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`FetchError`] unchanged. A stale entry is never
    /// served in place of a failed refresh, and stays in the store as it was.
    pub async fn get(&self, collection: &str, key: &str) -> Result<Value, FetchError> {
        let cache_key = self.scope.key(collection, key);

        if let Some(value) = self.fresh_value(&cache_key) {
            return Ok(value);
        }

        let value = match self.fetcher.fetch(collection, key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(key = %cache_key, error = %err, "refresh failed");
                return Err(err);
            }
        };

        let entry = Entry {
            value: value.clone(),
            fetched_at: self.clock.unix_seconds(),
        };
        self.store.write().insert(cache_key, entry);

        Ok(value)
    }

    // Value and timestamp are read under one guard.
    fn fresh_value(&self, cache_key: &CacheKey) -> Option<Value> {
        let now = self.clock.unix_seconds();
        let store = self.store.read();
        match store.get(cache_key) {
            Some(entry) if entry.is_fresh(now, self.staleness) => {
                debug!(key = %cache_key, "cache hit");
                Some(entry.value.clone())
            }
            Some(entry) => {
                debug!(key = %cache_key, age = now.saturating_sub(entry.fetched_at), "stale entry");
                None
            }
            None => {
                debug!(key = %cache_key, "cache miss");
                None
            }
        }
    }

    /// A snapshot of the stored entry for `(collection, key)`, fresh or not.
    pub fn entry(&self, collection: &str, key: &str) -> Option<Entry> {
        self.store
            .read()
            .get(&self.scope.key(collection, key))
            .cloned()
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    pub fn key_scope(&self) -> KeyScope {
        self.scope
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use serde_json::json;

    const FIVE_MINUTES: Duration = Duration::from_secs(300);

    /// In-memory backend that counts calls.
    #[derive(Default)]
    struct FakeStore {
        values: Mutex<HashMap<(String, String), Value>>,
        calls: AtomicUsize,
        failing: AtomicBool,
        delay: Option<Duration>,
    }

    impl FakeStore {
        fn with(collection: &str, key: &str, value: Value) -> Self {
            let store = Self::default();
            store.put(collection, key, value);
            store
        }

        fn put(&self, collection: &str, key: &str, value: Value) {
            self.values
                .lock()
                .unwrap()
                .insert((collection.to_owned(), key.to_owned()), value);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl Fetch for FakeStore {
        async fn fetch(&self, collection: &str, key: &str) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::Backend { status: 503 });
            }
            let found = self
                .values
                .lock()
                .unwrap()
                .get(&(collection.to_owned(), key.to_owned()))
                .cloned();
            found.ok_or(FetchError::Backend { status: 404 })
        }
    }

    fn cache_at(store: FakeStore, now: u64) -> (Cache<FakeStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(now);
        (Cache::with_clock(store, FIVE_MINUTES, clock.clone()), clock)
    }

    #[tokio::test]
    async fn miss_fetches_once_and_returns_backend_value() {
        let (cache, _clock) = cache_at(FakeStore::with("items", "x", json!({"a": 1})), 1_000);

        let value = cache.get("items", "x").await.unwrap();

        assert_eq!(value, json!({"a": 1}));
        assert_eq!(cache.fetcher().calls(), 1);
        let entry = cache.entry("items", "x").unwrap();
        assert_eq!(entry.value(), &json!({"a": 1}));
        assert_eq!(entry.fetched_at(), 1_000);
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_fetching() {
        let (cache, clock) = cache_at(FakeStore::with("items", "x", json!([1, 2])), 1_000);

        cache.get("items", "x").await.unwrap();
        clock.advance(Duration::from_secs(299));
        let value = cache.get("items", "x").await.unwrap();

        assert_eq!(value, json!([1, 2]));
        assert_eq!(cache.fetcher().calls(), 1);
    }

    #[tokio::test]
    async fn stale_entry_is_refreshed_once() {
        let (cache, clock) = cache_at(FakeStore::with("items", "x", json!("old")), 1_000);
        cache.get("items", "x").await.unwrap();

        cache.fetcher().put("items", "x", json!("new"));
        clock.advance(Duration::from_secs(301));
        let value = cache.get("items", "x").await.unwrap();

        assert_eq!(value, json!("new"));
        assert_eq!(cache.fetcher().calls(), 2);
        let entry = cache.entry("items", "x").unwrap();
        assert_eq!(entry.value(), &json!("new"));
        assert_eq!(entry.fetched_at(), 1_301);

        // The refreshed entry is fresh again.
        cache.get("items", "x").await.unwrap();
        assert_eq!(cache.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn entry_exactly_window_old_is_stale() {
        let (cache, clock) = cache_at(FakeStore::with("items", "x", json!(1)), 1_000);
        cache.get("items", "x").await.unwrap();

        clock.advance(FIVE_MINUTES);
        cache.get("items", "x").await.unwrap();

        assert_eq!(cache.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entry() {
        let (cache, clock) = cache_at(FakeStore::with("items", "x", json!({"v": 1})), 1_000);
        cache.get("items", "x").await.unwrap();
        let before = cache.entry("items", "x").unwrap();

        cache.fetcher().fail(true);
        clock.advance(Duration::from_secs(600));
        let err = cache.get("items", "x").await.unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(cache.entry("items", "x").unwrap(), before);

        // The stale entry is not served; the next call retries the backend.
        cache.fetcher().fail(false);
        let value = cache.get("items", "x").await.unwrap();
        assert_eq!(value, json!({"v": 1}));
        assert_eq!(cache.fetcher().calls(), 3);
        assert_eq!(cache.entry("items", "x").unwrap().fetched_at(), 1_600);
    }

    #[tokio::test]
    async fn failed_first_fetch_stores_nothing() {
        let (cache, _clock) = cache_at(FakeStore::default(), 1_000);

        let err = cache.get("items", "missing").await.unwrap_err();

        assert!(matches!(err, FetchError::Backend { status: 404 }));
        assert!(cache.is_empty());
        assert!(cache.entry("items", "missing").is_none());

        cache.get("items", "missing").await.unwrap_err();
        assert_eq!(cache.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn empty_key_is_an_ordinary_key() {
        let (cache, _clock) = cache_at(FakeStore::with("items", "", json!(null)), 1_000);

        assert_eq!(cache.get("items", "").await.unwrap(), Value::Null);
        assert_eq!(cache.get("items", "").await.unwrap(), Value::Null);
        assert_eq!(cache.fetcher().calls(), 1);
    }

    #[tokio::test]
    async fn collections_are_cached_separately_by_default() {
        let store = FakeStore::with("items", "x", json!("item"));
        store.put("users", "x", json!("user"));
        let (cache, _clock) = cache_at(store, 1_000);

        assert_eq!(cache.get("items", "x").await.unwrap(), json!("item"));
        assert_eq!(cache.get("users", "x").await.unwrap(), json!("user"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn key_only_scope_shares_entries_across_collections() {
        let store = FakeStore::with("items", "x", json!("item"));
        store.put("users", "x", json!("user"));
        let (cache, _clock) = cache_at(store, 1_000);
        let cache = cache.with_key_scope(KeyScope::KeyOnly);

        assert_eq!(cache.get("items", "x").await.unwrap(), json!("item"));
        assert_eq!(cache.get("users", "x").await.unwrap(), json!("item"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.fetcher().calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_leave_one_whole_entry() {
        let store = FakeStore {
            delay: Some(Duration::from_millis(20)),
            ..FakeStore::with("items", "x", json!({"a": [1, 2, 3]}))
        };
        let start = SystemClock.unix_seconds();
        let cache = Arc::new(Cache::new(store, FIVE_MINUTES));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get("items", "x").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), json!({"a": [1, 2, 3]}));
        }

        assert_eq!(cache.len(), 1);
        let entry = cache.entry("items", "x").unwrap();
        assert_eq!(entry.value(), &json!({"a": [1, 2, 3]}));
        assert!(entry.fetched_at() >= start);
        assert!(cache.fetcher().calls() >= 1);
    }

    #[tokio::test]
    async fn items_lookup_across_five_minute_window() {
        let (cache, clock) = cache_at(FakeStore::with("items", "x", json!({"a": 1})), 1_700_000_000);

        assert_eq!(cache.get("items", "x").await.unwrap(), json!({"a": 1}));
        assert_eq!(cache.fetcher().calls(), 1);

        assert_eq!(cache.get("items", "x").await.unwrap(), json!({"a": 1}));
        assert_eq!(cache.fetcher().calls(), 1);

        clock.advance(FIVE_MINUTES + Duration::from_secs(1));
        assert_eq!(cache.get("items", "x").await.unwrap(), json!({"a": 1}));
        assert_eq!(cache.fetcher().calls(), 2);
    }

    #[test]
    fn freshness_boundaries() {
        let entry = Entry {
            value: Value::Null,
            fetched_at: 100,
        };
        assert!(entry.is_fresh(100, FIVE_MINUTES));
        assert!(entry.is_fresh(399, FIVE_MINUTES));
        assert!(!entry.is_fresh(400, FIVE_MINUTES));
        // Clock stepped backwards.
        assert!(entry.is_fresh(50, FIVE_MINUTES));
        // Sub-second windows never hold an entry.
        assert!(!entry.is_fresh(100, Duration::from_millis(500)));
    }

    #[test]
    fn key_scope_round_trips_through_text() {
        assert_eq!("collection".parse::<KeyScope>().unwrap(), KeyScope::Collection);
        assert_eq!("key-only".parse::<KeyScope>().unwrap(), KeyScope::KeyOnly);
        assert_eq!(KeyScope::KeyOnly.to_string(), "key-only");
        assert!("global".parse::<KeyScope>().is_err());
    }

    #[test]
    fn cache_keys_display_their_scope() {
        assert_eq!(KeyScope::Collection.key("items", "x").to_string(), "items/x");
        assert_eq!(KeyScope::KeyOnly.key("items", "x").to_string(), "x");
        assert_ne!(
            KeyScope::Collection.key("items", "x"),
            KeyScope::Collection.key("users", "x")
        );
    }
}
