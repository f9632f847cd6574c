// ── Persistent cache ──
//
// JSON values over a durable `Storage`, each wrapped with the time it was
// saved and an optional time-to-live. Storage failures never reach the
// caller: a cache that cannot write is a cache miss next time, not an error.

mod storage;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};

// ── Clock ────────────────────────────────────────────────────────────

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start_millis)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

// ── Entries ──────────────────────────────────────────────────────────

/// On-disk shape of one cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: Value,
    /// Epoch milliseconds.
    pub saved_at: i64,
    /// Milliseconds; absent means the entry never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl CacheEntry {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.ttl.is_some_and(|ttl| {
            let age = now_millis.saturating_sub(self.saved_at);
            u64::try_from(age).is_ok_and(|age| age > ttl)
        })
    }
}

/// A value read with [`PersistentCache::get_ignoring_expiry`].
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub saved_at: i64,
    /// The TTL has passed; the caller should refresh when it can.
    pub expired: bool,
}

// ── PersistentCache ──────────────────────────────────────────────────

/// Key/value cache over durable storage with optional TTL.
///
/// Cheap to clone; clones share the storage backend.
#[derive(Clone)]
pub struct PersistentCache {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache").finish_non_exhaustive()
    }
}

impl PersistentCache {
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self::with_clock(storage, SystemClock)
    }

    pub fn with_clock(storage: impl Storage + 'static, clock: impl Clock + 'static) -> Self {
        Self {
            storage: Arc::new(storage),
            clock: Arc::new(clock),
        }
    }

    /// A cache that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    /// Store `value` under `key`, stamped with the current time. Returns
    /// whether the write landed.
    ///
    /// Serialization and storage failures (quota, I/O) are logged, not
    /// raised. A failed write also drops whatever was stored under `key`
    /// before, so readers never mistake the older entry for the new one.
    pub fn save<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "cache value not serializable, skipping save");
                self.remove(key);
                return false;
            }
        };
        let entry = CacheEntry {
            value,
            saved_at: self.clock.now_millis(),
            ttl: ttl.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        };

        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache entry not serializable, skipping save");
                self.remove(key);
                return false;
            }
        };
        match self.storage.set_item(key, &raw) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "cache write failed, dropping previous entry");
                self.remove(key);
                false
            }
        }
    }

    /// The value under `key` if present and not expired.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_ignoring_expiry(key)
            .filter(|cached| !cached.expired)
            .map(|cached| cached.value)
    }

    /// The value under `key` regardless of TTL, flagged when expired.
    pub fn get_ignoring_expiry<T: DeserializeOwned>(&self, key: &str) -> Option<Cached<T>> {
        let entry = self.read_entry(key)?;
        let expired = entry.is_expired(self.clock.now_millis());
        match serde_json::from_value(entry.value) {
            Ok(value) => Some(Cached {
                value,
                saved_at: entry.saved_at,
                expired,
            }),
            Err(e) => {
                debug!(key, error = %e, "cached value has unexpected shape, treating as absent");
                None
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.storage.remove_item(key) {
            warn!(key, error = %e, "cache remove failed");
        }
    }

    /// Drop every entry in the backing storage.
    pub fn clear_all(&self) {
        if let Err(e) = self.storage.clear() {
            warn!(error = %e, "cache clear failed");
        }
    }

    fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.storage.get_item(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(key, error = %e, "unparseable cache entry, treating as absent");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const HOUR: Duration = Duration::from_secs(3600);

    fn cache_at(start: i64) -> (PersistentCache, ManualClock, MemoryStorage) {
        let storage = MemoryStorage::new();
        let clock = ManualClock::new(start);
        (
            PersistentCache::with_clock(storage.clone(), clock.clone()),
            clock,
            storage,
        )
    }

    #[test]
    fn save_then_get() {
        let (cache, _, _) = cache_at(1_000);
        cache.save("things_order", &vec!["Lamp1", "Door"], None);
        assert_eq!(
            cache.get::<Vec<String>>("things_order"),
            Some(vec!["Lamp1".to_string(), "Door".to_string()])
        );
        assert_eq!(cache.get::<Vec<String>>("missing"), None);
    }

    #[test]
    fn entries_use_camel_case_envelope() {
        let (cache, _, storage) = cache_at(42);
        cache.save("k", &json!({ "a": 1 }), Some(Duration::from_millis(500)));

        let raw: Value = serde_json::from_str(&storage.get_item("k").unwrap().unwrap()).unwrap();
        assert_eq!(raw, json!({ "value": { "a": 1 }, "savedAt": 42, "ttl": 500 }));
    }

    #[test]
    fn expired_entries_hide_from_get_but_not_from_ignoring_expiry() {
        let (cache, clock, _) = cache_at(0);
        cache.save("k", &5_u32, Some(HOUR));

        clock.advance(HOUR);
        assert_eq!(cache.get::<u32>("k"), Some(5), "exactly at ttl is still fresh");

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get::<u32>("k"), None);

        let cached = cache.get_ignoring_expiry::<u32>("k").unwrap();
        assert_eq!(cached.value, 5);
        assert!(cached.expired);
        assert_eq!(cached.saved_at, 0);
    }

    #[test]
    fn no_ttl_never_expires() {
        let (cache, clock, _) = cache_at(0);
        cache.save("k", "v", None);
        clock.advance(HOUR * 24 * 365);
        assert_eq!(cache.get::<String>("k").as_deref(), Some("v"));
    }

    #[test]
    fn unparseable_or_mistyped_entries_read_as_absent() {
        let (cache, _, storage) = cache_at(0);
        storage.set_item("garbage", "not json").unwrap();
        storage.set_item("bare", r#""just a string""#).unwrap();
        cache.save("number", &7, None);

        assert_eq!(cache.get::<Value>("garbage"), None);
        assert_eq!(cache.get::<Value>("bare"), None);
        assert_eq!(cache.get::<Vec<String>>("number"), None);
    }

    #[test]
    fn quota_errors_are_swallowed() {
        let cache = PersistentCache::new(MemoryStorage::with_quota(16));
        assert!(!cache.save("big", &"x".repeat(100), None));
        assert_eq!(cache.get::<String>("big"), None);
    }

    #[test]
    fn failed_overwrite_drops_the_older_entry() {
        let cache = PersistentCache::new(MemoryStorage::with_quota(200));
        assert!(cache.save("k", &"small", None));
        assert!(!cache.save("k", &"x".repeat(300), None));
        assert_eq!(cache.get_ignoring_expiry::<String>("k"), None);
    }

    #[test]
    fn remove_and_clear_all() {
        let (cache, _, _) = cache_at(0);
        cache.save("a", &1, None);
        cache.save("b", &2, None);

        cache.remove("a");
        assert_eq!(cache.get::<i32>("a"), None);
        assert_eq!(cache.get::<i32>("b"), Some(2));

        cache.clear_all();
        assert_eq!(cache.get::<i32>("b"), None);
    }

    #[test]
    fn file_cache_survives_restart_past_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(1_000);

        {
            let cache = PersistentCache::with_clock(FileStorage::new(dir.path()), clock.clone());
            cache.save("things_metas_lights", &vec!["Lamp1"], Some(HOUR));
        }

        clock.advance(HOUR * 2);
        let reopened = PersistentCache::with_clock(FileStorage::new(dir.path()), clock);
        assert_eq!(reopened.get::<Vec<String>>("things_metas_lights"), None);

        let cached = reopened
            .get_ignoring_expiry::<Vec<String>>("things_metas_lights")
            .unwrap();
        assert_eq!(cached.value, vec!["Lamp1".to_string()]);
        assert!(cached.expired);
    }
}
