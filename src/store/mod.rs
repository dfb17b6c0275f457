//! State store facade
//!
//! Thin interface over Redis with an in-memory fallback when the store
//! is unreachable. All writes are idempotent at the key level; there are
//! no multi-key transactions. Callers that need consistency write the
//! value first and update set membership second, so a crash between the
//! two leaves at most an unreachable entry.

pub mod keys;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// In-memory backend used when Redis is unreachable
#[derive(Default)]
struct MemoryStore {
    kv: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
    sets: HashMap<String, HashSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

enum Backend {
    Redis(redis::aio::ConnectionManager),
    Memory(Arc<RwLock<MemoryStore>>),
}

/// Durable key-value facade
#[derive(Clone)]
pub struct Store {
    backend: Arc<Backend>,
}

impl Store {
    /// Connect to Redis, falling back to memory when allowed
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        match Self::connect_redis(&config.redis_url).await {
            Ok(store) => {
                info!("Connected to store at {}", config.redis_url);
                Ok(store)
            }
            Err(e) if config.allow_memory_fallback => {
                warn!("Store unreachable ({}), using in-memory fallback", e);
                Ok(Self::memory())
            }
            Err(e) => Err(e),
        }
    }

    async fn connect_redis(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::Store(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self {
            backend: Arc::new(Backend::Redis(manager)),
        })
    }

    /// Purely in-memory store (also used by tests)
    pub fn memory() -> Self {
        Self {
            backend: Arc::new(Backend::Memory(Arc::new(RwLock::new(
                MemoryStore::default(),
            )))),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(*self.backend, Backend::Memory(_))
    }

    /// Get a typed value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.get(key).await.map_err(store_err)?
            }
            Backend::Memory(mem) => mem.read().await.kv.get(key).cloned(),
        };
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Set a typed value
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.set::<_, _, ()>(key, json).await.map_err(store_err)?;
            }
            Backend::Memory(mem) => {
                mem.write().await.kv.insert(key.to_string(), json);
            }
        }
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.del::<_, ()>(key).await.map_err(store_err)?;
            }
            Backend::Memory(mem) => {
                let mut mem = mem.write().await;
                mem.kv.remove(key);
                mem.lists.remove(key);
                mem.sets.remove(key);
                mem.hashes.remove(key);
            }
        }
        Ok(())
    }

    /// Push to the head of a list
    pub async fn list_push<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.lpush::<_, _, ()>(key, json).await.map_err(store_err)?;
            }
            Backend::Memory(mem) => {
                mem.write()
                    .await
                    .lists
                    .entry(key.to_string())
                    .or_default()
                    .insert(0, json);
            }
        }
        Ok(())
    }

    /// Trim a list to its first `max` entries (capped ring)
    pub async fn list_trim(&self, key: &str, max: usize) -> Result<()> {
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.ltrim::<_, ()>(key, 0, max as isize - 1)
                    .await
                    .map_err(store_err)?;
            }
            Backend::Memory(mem) => {
                if let Some(list) = mem.write().await.lists.get_mut(key) {
                    list.truncate(max);
                }
            }
        }
        Ok(())
    }

    pub async fn list_range<T: DeserializeOwned>(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<T>> {
        let raw: Vec<String> = match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.lrange(key, start as isize, stop as isize)
                    .await
                    .map_err(store_err)?
            }
            Backend::Memory(mem) => {
                let mem = mem.read().await;
                match mem.lists.get(key) {
                    Some(list) => list
                        .iter()
                        .skip(start)
                        .take(stop.saturating_sub(start) + 1)
                        .cloned()
                        .collect(),
                    None => vec![],
                }
            }
        };
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(Into::into))
            .collect()
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.sadd::<_, _, ()>(key, member).await.map_err(store_err)?;
            }
            Backend::Memory(mem) => {
                mem.write()
                    .await
                    .sets
                    .entry(key.to_string())
                    .or_default()
                    .insert(member.to_string());
            }
        }
        Ok(())
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<()> {
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.srem::<_, _, ()>(key, member).await.map_err(store_err)?;
            }
            Backend::Memory(mem) => {
                if let Some(set) = mem.write().await.sets.get_mut(key) {
                    set.remove(member);
                }
            }
        }
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.smembers(key).await.map_err(store_err)
            }
            Backend::Memory(mem) => Ok(mem
                .read()
                .await
                .sets
                .get(key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()),
        }
    }

    pub async fn hset<T: Serialize>(&self, key: &str, field: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.hset::<_, _, _, ()>(key, field, json)
                    .await
                    .map_err(store_err)?;
            }
            Backend::Memory(mem) => {
                mem.write()
                    .await
                    .hashes
                    .entry(key.to_string())
                    .or_default()
                    .insert(field.to_string(), json);
            }
        }
        Ok(())
    }

    pub async fn hget<T: DeserializeOwned>(&self, key: &str, field: &str) -> Result<Option<T>> {
        let raw: Option<String> = match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.hget(key, field).await.map_err(store_err)?
            }
            Backend::Memory(mem) => mem
                .read()
                .await
                .hashes
                .get(key)
                .and_then(|h| h.get(field).cloned()),
        };
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn hgetall<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<(String, T)>> {
        let raw: HashMap<String, String> = match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.hgetall(key).await.map_err(store_err)?
            }
            Backend::Memory(mem) => mem
                .read()
                .await
                .hashes
                .get(key)
                .cloned()
                .unwrap_or_default(),
        };
        raw.into_iter()
            .map(|(field, json)| Ok((field, serde_json::from_str(&json)?)))
            .collect()
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                conn.hdel::<_, _, ()>(key, field).await.map_err(store_err)?;
            }
            Backend::Memory(mem) => {
                if let Some(h) = mem.write().await.hashes.get_mut(key) {
                    h.remove(field);
                }
            }
        }
        Ok(())
    }

    /// Connectivity probe
    pub async fn ping(&self) -> Result<()> {
        match &*self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                redis::cmd("PING")
                    .query_async::<_, String>(&mut conn)
                    .await
                    .map_err(store_err)?;
                Ok(())
            }
            Backend::Memory(_) => Ok(()),
        }
    }
}

fn store_err(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_kv_roundtrip() {
        let store = Store::memory();
        store.set("lp:test", &42u64).await.unwrap();
        assert_eq!(store.get::<u64>("lp:test").await.unwrap(), Some(42));
        store.del("lp:test").await.unwrap();
        assert_eq!(store.get::<u64>("lp:test").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_set_membership() {
        let store = Store::memory();
        store.sadd("lp:dca:active", "a").await.unwrap();
        store.sadd("lp:dca:active", "b").await.unwrap();
        store.sadd("lp:dca:active", "a").await.unwrap();
        let mut members = store.smembers("lp:dca:active").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);
        store.srem("lp:dca:active", "a").await.unwrap();
        assert_eq!(store.smembers("lp:dca:active").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_memory_capped_list() {
        let store = Store::memory();
        for i in 0..10u32 {
            store.list_push("lp:worker:logs", &i).await.unwrap();
            store.list_trim("lp:worker:logs", 5).await.unwrap();
        }
        let entries: Vec<u32> = store.list_range("lp:worker:logs", 0, 99).await.unwrap();
        assert_eq!(entries, vec![9, 8, 7, 6, 5]);
    }

    #[tokio::test]
    async fn test_memory_hash_ops() {
        let store = Store::memory();
        store.hset("lp:dca:schedules", "id1", &"one").await.unwrap();
        store.hset("lp:dca:schedules", "id2", &"two").await.unwrap();
        assert_eq!(
            store
                .hget::<String>("lp:dca:schedules", "id1")
                .await
                .unwrap(),
            Some("one".to_string())
        );
        let all = store
            .hgetall::<String>("lp:dca:schedules")
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        store.hdel("lp:dca:schedules", "id1").await.unwrap();
        assert_eq!(
            store
                .hget::<String>("lp:dca:schedules", "id1")
                .await
                .unwrap(),
            None
        );
    }
}
