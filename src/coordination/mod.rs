//! Cross-process coordination store.
//!
//! The store is the only mutable state shared between worker processes:
//! the safety breaker's failure counter and cooldown timestamp, and the
//! rate limiter's window counters all live here. Backends must provide
//! atomic increment; everything else is plain get/set with optional TTL.

mod safety;

pub use safety::{SafetyBreaker, SafetyStatus};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

/// Errors from the coordination store.
///
/// Callers on the acquisition path treat these as soft failures (fail-open);
/// the variants exist for logging and tests.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("store command error: {0}")]
    Command(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared key-value store with atomic counters and TTL'd keys.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Set a key with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Atomically increment a counter key, returning the new value.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Atomically increment a counter and set its TTL on first write.
    ///
    /// Used for fixed-window rate-limit buckets.
    async fn incr_window(&self, key: &str, ttl: Duration) -> StoreResult<i64>;
}

/// Redis-backed coordination store.
///
/// Uses a connection manager so a dropped connection reconnects lazily
/// instead of wedging every worker.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Access the underlying connection for queue operations.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))
    }

    async fn incr_window(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;
        Ok(count)
    }
}

/// In-memory store for tests and single-process runs.
///
/// TTLs are honored lazily at read time, same as the Redis backend's
/// observable behavior.
#[derive(Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

struct MemoryEntry {
    value: String,
    expires_at: Option<std::time::Instant>,
}

impl MemoryEntry {
    fn expired(&self) -> bool {
        self.expires_at
            .map(|at| std::time::Instant::now() >= at)
            .unwrap_or(false)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            if entry.expired() {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries.lock().await.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.entries.lock().await.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(std::time::Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .filter(|e| !e.expired())
            .and_then(|e| e.value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn incr_window(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.expired() => {
                let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: "1".to_string(),
                        expires_at: Some(std::time::Instant::now() + ttl),
                    },
                );
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_incr() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);
        store.delete("counter").await.unwrap();
        assert_eq!(store.incr("counter").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set_ex("flag", "on", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(store.get("flag").await.unwrap().as_deref(), Some("on"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("flag").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_window_counter_resets() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(10);
        assert_eq!(store.incr_window("w", ttl).await.unwrap(), 1);
        assert_eq!(store.incr_window("w", ttl).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.incr_window("w", ttl).await.unwrap(), 1);
    }
}
