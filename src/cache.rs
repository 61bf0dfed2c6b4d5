use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often the background sweeper purges expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Item<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Item<V> {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// TTL Cache
///
/// `TtlCache` is a generic key/value store with per-entry expiry. Every
/// operation is atomic: the whole map sits behind a single mutex and each
/// call locks for the duration of the operation.
///
/// Entries expire in two ways:
///
/// * `get` evicts an entry it finds expired and reports a miss
/// * a background sweeper task (see [`TtlCache::spawn_sweeper`]) purges all
///   expired entries once per minute
///
/// The cache is a cheap clone handle; all clones share the same map. It backs
/// the SIP REGISTER state, keyed by the contact URI user, where a later
/// REGISTER for the same key supersedes the earlier one.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use meshbook::cache::TtlCache;
///
/// let cache: TtlCache<String, u32> = TtlCache::new();
/// cache.set("100".to_string(), 7, Duration::from_secs(600));
/// assert_eq!(cache.get(&"100".to_string()), Some(7));
/// assert_eq!(cache.len(), 1);
/// ```
pub struct TtlCache<K, V> {
    items: Arc<Mutex<HashMap<K, Item<V>>>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        TtlCache {
            items: self.items.clone(),
        }
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        TtlCache {
            items: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Stores `value` under `key`, overwriting any prior entry.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut items = self.items.lock().unwrap();
        items.insert(
            key,
            Item {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Removes the entry unconditionally. The value is only returned when it
    /// had not yet expired.
    pub fn pop(&self, key: &K) -> Option<V> {
        let mut items = self.items.lock().unwrap();
        let item = items.remove(key)?;
        if item.is_expired() {
            return None;
        }
        Some(item.value)
    }

    pub fn remove(&self, key: &K) {
        self.items.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn keys(&self) -> Vec<K> {
        self.items.lock().unwrap().keys().cloned().collect()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Returns the value for `key` if present and not expired. An expired
    /// entry is removed on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut items = self.items.lock().unwrap();
        match items.get(key) {
            None => None,
            Some(item) if item.is_expired() => {
                items.remove(key);
                None
            }
            Some(item) => Some(item.value.clone()),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    /// Spawns the periodic sweeper. It holds the lock for the whole pass,
    /// which is fine for the bounded sizes this cache sees, and exits when
    /// `token` is cancelled.
    pub fn spawn_sweeper(&self, token: CancellationToken) {
        let items = self.items.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = token.cancelled() => {
                        break;
                    }
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                }
                let mut items = items.lock().unwrap();
                let before = items.len();
                items.retain(|_, item| !item.is_expired());
                if items.len() < before {
                    debug!("cache sweeper purged {} entries", before - items.len());
                }
            }
        });
    }
}
