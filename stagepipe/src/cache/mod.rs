//! Key-value cache collaborator used by the caching stage.
//!
//! The [`Cache`] trait is the boundary: any backend that can `get` and `set`
//! values with an optional TTL can sit behind a
//! [`CachingStage`](crate::stages::CachingStage). [`InMemoryCache`] is the
//! bundled implementation.

mod keys;
mod memory;

pub use keys::hashed_key;
pub use memory::InMemoryCache;

use async_trait::async_trait;
use std::sync::Arc;

/// Protocol for cache backends.
///
/// A `None` from [`Cache::get`] is a miss.
#[async_trait]
pub trait Cache<V>: Send + Sync {
    /// Gets a cached value by key.
    async fn get(&self, key: &str) -> anyhow::Result<Option<V>>;

    /// Stores a value, expiring after `ttl_seconds` when given.
    async fn set(&self, key: &str, value: V, ttl_seconds: Option<u64>) -> anyhow::Result<()>;
}

#[async_trait]
impl<V, C> Cache<V> for Arc<C>
where
    V: Send + 'static,
    C: Cache<V> + ?Sized,
{
    async fn get(&self, key: &str) -> anyhow::Result<Option<V>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: V, ttl_seconds: Option<u64>) -> anyhow::Result<()> {
        (**self).set(key, value, ttl_seconds).await
    }
}
