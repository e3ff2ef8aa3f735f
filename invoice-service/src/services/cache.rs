//! Short-lived key/value cache used by the credit-limit evaluator.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// A miss is `Ok(None)`; only genuine backend failures are errors.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn health_check(&self) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(url: &str) -> Result<Self, CacheError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            e
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

/// Process-local cache with per-entry expiry. An entry whose expiry does not
/// fit in an `Instant` never expires.
#[derive(Default)]
pub struct LocalCache {
    entries: DashMap<String, (String, Option<Instant>)>,
}

fn live(expires: &Option<Instant>, now: Instant) -> bool {
    expires.map_or(true, |at| at > now)
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| live(&entry.1, now))
            .map(|entry| entry.0.clone());

        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| !live(expires, now));
        }
        Ok(hit)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        // sweep so keys that are never read again do not pile up
        self.entries.retain(|_, (_, expires)| live(expires, now));
        self.entries
            .insert(key.to_string(), (value.to_string(), now.checked_add(ttl)));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_cache_round_trip_and_expiry() {
        let cache = LocalCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.put("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        cache.put("gone", "v", Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("gone").await.unwrap(), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_local_cache_sweeps_expired_keys_on_put() {
        let cache = LocalCache::new();
        for i in 0..5 {
            cache.put(&format!("stale-{i}"), "v", Duration::ZERO).await.unwrap();
        }
        cache.put("fresh", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_local_cache_huge_ttl_never_expires() {
        let cache = LocalCache::new();
        cache.put("k", "v", Duration::MAX).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
