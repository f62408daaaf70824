//! In-process cache with per-entry TTL.

use super::Cache;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// In-memory [`Cache`]. Expired entries are evicted when read.
#[derive(Debug)]
pub struct InMemoryCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> InMemoryCache<V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes an entry, returning true if it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<V> Default for InMemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> Cache<V> for InMemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> anyhow::Result<Option<V>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: V, ttl_seconds: Option<u64>) -> anyhow::Result<()> {
        let expires_at = ttl_seconds.map(|ttl| Instant::now() + Duration::from_secs(ttl));
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_get_and_set() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None::<String>);

        cache.set("k", "v".to_string(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_on_read() {
        let cache = InMemoryCache::new();
        cache.set("k", 1_u32, Some(0)).await.unwrap();
        cache.set("keep", 2_u32, Some(3600)).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.get("keep").await.unwrap(), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = InMemoryCache::new();
        cache.set("a", 1_u8, None).await.unwrap();
        cache.set("b", 2_u8, None).await.unwrap();

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
