//! In-memory TTL cache with an injected clock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

struct Entry<V> {
    inserted: Instant,
    value: V,
}

/// Entries expire `ttl` after insertion.
pub struct TtlCache<V, C: Clock = SystemClock> {
    ttl: Duration,
    clock: C,
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V, SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<V: Clone, C: Clock> TtlCache<V, C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted) < self.ttl
    }

    /// The cached value if it has not expired. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if self.fresh(entry, now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let inserted = self.clock.now();
        self.lock().insert(key.into(), Entry { inserted, value });
    }

    /// Cached value, or the result of `load` which is cached on success.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &str,
        load: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = load()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Live entries, expired ones excluded.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock().values().filter(|e| self.fresh(e, now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cache(ttl_secs: u64) -> (TtlCache<String, Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (TtlCache::with_clock(Duration::from_secs(ttl_secs), clock.clone()), clock)
    }

    #[test]
    fn hit_before_expiry_miss_after() {
        let (cache, clock) = cache(60);
        cache.insert("k", "v".to_string());
        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn loader_runs_once_while_fresh() {
        let (cache, clock) = cache(10);
        let mut calls = 0;
        for _ in 0..3 {
            let v: Result<String, ()> = cache.get_or_try_insert_with("k", || {
                calls += 1;
                Ok("loaded".into())
            });
            assert_eq!(v.unwrap(), "loaded");
        }
        assert_eq!(calls, 1);

        clock.advance(Duration::from_secs(10));
        let _: Result<String, ()> = cache.get_or_try_insert_with("k", || {
            calls += 1;
            Ok("again".into())
        });
        assert_eq!(calls, 2);
    }

    #[test]
    fn failed_load_is_not_cached() {
        let (cache, _) = cache(10);
        let err: Result<String, &str> = cache.get_or_try_insert_with("k", || Err("boom"));
        assert_eq!(err, Err("boom"));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn invalidate_and_clear() {
        let (cache, _) = cache(10);
        cache.insert("a", "1".to_string());
        cache.insert("b", "2".to_string());
        cache.invalidate("a");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
