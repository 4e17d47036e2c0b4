//! Key-value store boundary
//!
//! Cache entries, experiment assignments and metric samples all live behind
//! [`KvStore`]. Durability is the store's concern; the engine only relies on
//! per-key atomicity. [`MemoryStore`] is the in-process implementation used by
//! the service binary and the test suites.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::Result;

/// Key-value store with TTL values and bounded lists
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch an unexpired value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Remove a value; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every value and list whose key starts with `prefix`
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Append to a list, dropping oldest entries beyond `max_len`; returns the new length
    async fn push_bounded(&self, key: &str, value: String, max_len: usize) -> Result<usize>;

    /// Full list contents, oldest first
    async fn list(&self, key: &str) -> Result<Vec<String>>;

    /// Drop expired values; returns how many were removed
    async fn purge_expired(&self) -> Result<usize>;
}

/// Fetch and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and store a JSON value
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    store.set(key, serde_json::to_string(value)?, ttl).await
}

#[derive(Debug)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Slot>,
    lists: HashMap<String, VecDeque<String>>,
}

/// In-process [`KvStore`] with lazy expiry
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live values (lists excluded)
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner.values.values().filter(|slot| slot.is_live(now)).count()
    }

    /// Whether the store holds no live values
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        Ok(inner
            .values
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let mut inner = self.inner.write().await;
        inner.values.insert(key.to_string(), Slot { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        Ok(inner
            .values
            .remove(key)
            .map_or(false, |slot| slot.is_live(now)))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.values.len() + inner.lists.len();
        inner.values.retain(|key, _| !key.starts_with(prefix));
        inner.lists.retain(|key, _| !key.starts_with(prefix));
        Ok(before - inner.values.len() - inner.lists.len())
    }

    async fn push_bounded(&self, key: &str, value: String, max_len: usize) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(value);
        while list.len() > max_len {
            list.pop_front();
        }
        Ok(list.len())
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.values.len();
        inner.values.retain(|_, slot| slot.is_live(now));
        Ok(before - inner.values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("a", "1".to_string(), None).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_and_purge() {
        let store = MemoryStore::new();
        store
            .set("short", "x".to_string(), Some(Duration::from_secs(30)))
            .await
            .unwrap();
        store.set("forever", "y".to_string(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(store.get("short").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("short").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.get("forever").await.unwrap().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_delete_prefix_only_touches_matching_keys() {
        let store = MemoryStore::new();
        store.set("recs:u1:10:default", "a".into(), None).await.unwrap();
        store.set("recs:u1:5:default", "b".into(), None).await.unwrap();
        store.set("recs:u2:10:default", "c".into(), None).await.unwrap();

        assert_eq!(store.delete_prefix("recs:u1:").await.unwrap(), 2);
        assert!(store.get("recs:u2:10:default").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_push_bounded_trims_oldest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.push_bounded("events", i.to_string(), 3).await.unwrap();
        }

        assert_eq!(store.list("events").await.unwrap(), vec!["2", "3", "4"]);
        assert!(store.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_helpers_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Entry {
            name: String,
            score: f64,
        }

        let store = MemoryStore::new();
        let entry = Entry { name: "p1".into(), score: 0.25 };
        set_json(&store, "entry", &entry, None).await.unwrap();

        let loaded: Option<Entry> = get_json(&store, "entry").await.unwrap();
        assert_eq!(loaded, Some(entry));
        let missing: Option<Entry> = get_json(&store, "nope").await.unwrap();
        assert!(missing.is_none());
    }
}
