//! Request deduplication cache.
//!
//! Successful results of upstream calls are memoized for a short TTL keyed by
//! the call's serialized arguments, so identical requests arriving together
//! reach the upstream once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::clock::SharedClock;
use crate::config::DedupConfig;
use crate::lifecycle::maintenance::Sweep;
use crate::observability::metrics;

/// Errors produced while keying or encoding cache entries.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to serialize cache key: {0}")]
    Key(#[source] serde_json::Error),
    #[error("failed to encode cached value: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Stable key for an argument list.
///
/// Arguments go through `serde_json::Value`, whose objects keep keys sorted,
/// so maps with equal contents produce equal keys regardless of insertion
/// order.
pub fn generate_cache_key<A: Serialize + ?Sized>(args: &A) -> Result<String, CacheError> {
    let value = serde_json::to_value(args).map_err(CacheError::Key)?;
    serde_json::to_string(&value).map_err(CacheError::Key)
}

#[derive(Debug, Clone)]
struct CachedRequest {
    data: Value,
    timestamp: u64,
}

#[derive(Debug)]
struct Inner {
    entries: DashMap<String, CachedRequest>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    ttl_ms: u64,
    clock: SharedClock,
    sweep_interval: Duration,
}

/// A thread-safe short-TTL result cache.
#[derive(Debug, Clone)]
pub struct RequestCache {
    inner: Arc<Inner>,
}

impl RequestCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5);
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    /// Create an empty cache. A zero `ttl` is raised to 1ms.
    pub fn new(ttl: Duration, sweep_interval: Duration, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                inflight: DashMap::new(),
                ttl_ms: (ttl.as_millis() as u64).max(1),
                clock,
                sweep_interval,
            }),
        }
    }

    pub fn from_config(config: &DedupConfig, clock: SharedClock) -> Self {
        Self::new(
            Duration::from_millis(config.ttl_ms),
            Duration::from_secs(config.sweep_interval_secs),
            clock,
        )
    }

    /// Cached value for `key`, if younger than the TTL. Stale entries are removed.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.inner.clock.now_millis();
        let ttl = self.inner.ttl_ms;

        if let Some(entry) = self.inner.entries.get(key) {
            if now.saturating_sub(entry.timestamp) < ttl {
                return Some(entry.data.clone());
            }
        } else {
            return None;
        }

        self.inner
            .entries
            .remove_if(key, |_, entry| now.saturating_sub(entry.timestamp) >= ttl);
        None
    }

    /// Store `data` under `key`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, data: Value) {
        let timestamp = self.inner.clock.now_millis();
        self.inner.entries.insert(key.into(), CachedRequest { data, timestamp });
        metrics::record_dedup_entries(self.inner.entries.len());
    }

    /// Typed [`get`](Self::get); an entry that does not decode as `T` is a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Typed [`set`](Self::set).
    pub fn set_as<T: Serialize + ?Sized>(&self, key: impl Into<String>, data: &T) -> Result<(), CacheError> {
        let value = serde_json::to_value(data).map_err(CacheError::Encode)?;
        self.set(key, value);
        Ok(())
    }

    pub fn clear(&self, key: &str) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    pub fn clear_all(&self) {
        self.inner.entries.clear();
        metrics::record_dedup_entries(0);
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.inner.ttl_ms)
    }

    /// Wrap `f` so that calls with equal arguments within the TTL share one result.
    ///
    /// The default key combines `name` with the serialized arguments; use
    /// [`Deduplicated::with_key`] to supply one.
    pub fn with_deduplication<A, F>(&self, name: impl Into<String>, f: F) -> Deduplicated<A, F> {
        Deduplicated {
            cache: self.clone(),
            name: name.into(),
            key_fn: None,
            f,
        }
    }

    /// Serialize callers working on the same key.
    async fn lock_key(&self, key: &str) -> KeyLock {
        let slot = self
            .inner
            .inflight
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        KeyLock {
            inner: self.inner.clone(),
            key: key.to_owned(),
            guard: Some(slot.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inner.inflight.len()
    }
}

/// Held while a keyed call runs; frees the lock slot once nobody else waits on it.
struct KeyLock {
    inner: Arc<Inner>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.inner
            .inflight
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl Sweep for RequestCache {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn interval(&self) -> Duration {
        self.inner.sweep_interval
    }

    /// Drop entries older than the TTL, and lock slots nobody holds or waits on.
    fn sweep(&self) -> usize {
        let now = self.inner.clock.now_millis();
        let ttl = self.inner.ttl_ms;
        let before = self.inner.entries.len();
        self.inner
            .entries
            .retain(|_, entry| now.saturating_sub(entry.timestamp) < ttl);

        // A waiter cancelled after the holder released leaves its slot behind.
        let slots = self.inner.inflight.len();
        self.inner.inflight.retain(|_, slot| Arc::strong_count(slot) > 1);
        let orphaned = slots.saturating_sub(self.inner.inflight.len());
        if orphaned > 0 {
            tracing::debug!(orphaned, "Dropped idle dedup lock slots");
        }

        let remaining = self.inner.entries.len();
        metrics::record_dedup_entries(remaining);
        before.saturating_sub(remaining)
    }
}

type KeyFn<A> = Box<dyn Fn(&A) -> String + Send + Sync>;

/// A function wrapped by [`RequestCache::with_deduplication`].
pub struct Deduplicated<A, F> {
    cache: RequestCache,
    name: String,
    key_fn: Option<KeyFn<A>>,
    f: F,
}

impl<A, F> Deduplicated<A, F> {
    /// Use a caller-supplied key instead of the serialized arguments.
    pub fn with_key<K>(mut self, key_fn: K) -> Self
    where
        K: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Box::new(key_fn));
        self
    }

    /// Call the wrapped function, or return a cached result for equal arguments.
    ///
    /// Errors are returned as-is and never cached. If the arguments cannot be
    /// keyed or the result cannot be encoded, the call still goes through
    /// uncached.
    pub async fn call<Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        A: Serialize,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
    {
        let key = match &self.key_fn {
            Some(key_fn) => key_fn(&args),
            None => match generate_cache_key(&(&self.name, &args)) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(function = %self.name, error = %e, "Calling without deduplication");
                    return (self.f)(args).await;
                }
            },
        };

        let _lock = self.cache.lock_key(&key).await;

        if let Some(cached) = self.cache.get_as::<T>(&key) {
            tracing::debug!(function = %self.name, "Dedup cache hit");
            metrics::record_dedup(true);
            return Ok(cached);
        }
        metrics::record_dedup(false);

        let result = (self.f)(args).await;
        if let Ok(value) = &result {
            if let Err(e) = self.cache.set_as(key, value) {
                tracing::warn!(function = %self.name, error = %e, "Result not cached");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache() -> (RequestCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(50_000));
        (
            RequestCache::new(RequestCache::DEFAULT_TTL, RequestCache::DEFAULT_SWEEP_INTERVAL, clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = generate_cache_key(&("tools", 1, "search")).unwrap();
        let b = generate_cache_key(&("tools", 1, "search")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, generate_cache_key(&("tools", 2, "search")).unwrap());
    }

    #[test]
    fn test_cache_key_ignores_map_insertion_order() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("category", "image"), ("page", "2"), ("sort", "new")] {
            first.insert(k, v);
        }
        for (k, v) in [("sort", "new"), ("category", "image"), ("page", "2")] {
            second.insert(k, v);
        }
        assert_eq!(
            generate_cache_key(&first).unwrap(),
            generate_cache_key(&second).unwrap()
        );
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let (cache, clock) = cache();
        cache.set("k", serde_json::json!({"tools": [1, 2]}));

        clock.advance(Duration::from_millis(4999));
        assert_eq!(cache.get("k"), Some(serde_json::json!({"tools": [1, 2]})));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_overwrites_and_refreshes() {
        let (cache, clock) = cache();
        cache.set("k", Value::from(1));
        clock.advance(Duration::from_secs(4));
        cache.set("k", Value::from(2));
        clock.advance(Duration::from_secs(4));
        assert_eq!(cache.get("k"), Some(Value::from(2)));
    }

    #[test]
    fn test_clear_and_clear_all() {
        let (cache, _clock) = cache();
        cache.set("a", Value::from(1));
        cache.set("b", Value::from(2));

        assert!(cache.clear("a"));
        assert!(!cache.clear("a"));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 1);

        cache.clear_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_stale_entries() {
        let (cache, clock) = cache();
        cache.set("old", Value::from(1));
        clock.advance(Duration::from_secs(3));
        cache.set("new", Value::from(2));
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get("new"), Some(Value::from(2)));
    }

    #[tokio::test]
    async fn test_sweep_drops_lock_slot_of_cancelled_waiter() {
        let (cache, _clock) = cache();
        let holder = cache.lock_key("k").await;
        {
            let waiter = cache.lock_key("k");
            tokio::pin!(waiter);
            let parked = std::future::poll_fn(|cx| std::task::Poll::Ready(waiter.as_mut().poll(cx).is_pending())).await;
            assert!(parked);

            // The holder sees a waiter and keeps the slot; the waiter is then cancelled.
            drop(holder);
        }
        assert_eq!(cache.inflight_len(), 1);

        let busy = cache.lock_key("busy").await;
        cache.sweep();
        assert_eq!(cache.inflight_len(), 1);

        drop(busy);
        assert_eq!(cache.inflight_len(), 0);
    }

    #[test]
    fn test_typed_get_mismatch_is_miss() {
        let (cache, _clock) = cache();
        cache.set("k", Value::from("text"));
        assert_eq!(cache.get_as::<u32>("k"), None);
        assert_eq!(cache.get_as::<String>("k"), Some("text".to_string()));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tool {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn test_dedup_invokes_once_within_ttl() {
        let (cache, clock) = cache();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let fetch = cache.with_deduplication("get_tool", move |id: u32| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Tool {
                id,
                name: format!("tool-{}", id),
            })
        });

        let first = fetch.call(7).await.unwrap();
        let second = fetch.call(7).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        fetch.call(8).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        clock.advance(RequestCache::DEFAULT_TTL);
        fetch.call(7).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (cache, _clock) = cache();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let fetch = cache.with_deduplication("flaky", move |_: ()| async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err("upstream down".to_string())
            } else {
                Ok(n)
            }
        });

        assert_eq!(fetch.call(()).await, Err("upstream down".to_string()));
        assert_eq!(fetch.call(()).await, Ok(1));
        assert_eq!(fetch.call(()).await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_key_generator() {
        let (cache, _clock) = cache();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let fetch = cache
            .with_deduplication("search", move |query: String| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(query.len())
            })
            .with_key(|query: &String| format!("search:{}", query.to_lowercase()));

        assert_eq!(fetch.call("Image".to_string()).await, Ok(5));
        // Same key after lowercasing, so the first result is returned.
        assert_eq!(fetch.call("IMAGE".to_string()).await, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("search:image").is_some());
    }

    #[tokio::test]
    async fn test_functions_with_different_names_do_not_share() {
        let (cache, _clock) = cache();
        let a = cache.with_deduplication("a", |x: u32| async move { Ok::<_, String>(x) });
        let b = cache.with_deduplication("b", |x: u32| async move { Ok::<_, String>(x * 10) });

        assert_eq!(a.call(1).await, Ok(1));
        assert_eq!(b.call(1).await, Ok(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_collapse() {
        let (cache, _clock) = cache();
        let calls = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                let fetch = cache.with_deduplication("slow", move |id: u32| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(id)
                    }
                });
                fetch.call(42).await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.inflight_len(), 0);
    }
}
