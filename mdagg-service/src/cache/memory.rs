//! In-process cache tier
//!
//! Bounded by entry count. When full, the entry closest to expiry is dropped,
//! which is always an expired one if any exist. Entries that never expire are
//! evicted only when nothing else is left. A capacity of zero stores nothing.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mdagg_common::{time, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use super::{CacheEntry, CacheTier, DurableTier};

/// Entries plus an index of the ones with an expiry, soonest first
#[derive(Default)]
struct Store {
    entries: HashMap<String, CacheEntry<Value>>,
    by_expiry: BTreeSet<(DateTime<Utc>, String)>,
}

impl Store {
    fn insert(&mut self, capacity: usize, key: String, entry: CacheEntry<Value>) {
        if capacity == 0 {
            return;
        }
        if self.entries.len() >= capacity && !self.entries.contains_key(&key) {
            self.evict_one();
        }

        let expiry = entry.expiry;
        if let Some(old) = self.entries.insert(key.clone(), entry) {
            self.unindex(&key, old.expiry);
        }
        if let Some(expiry) = expiry {
            self.by_expiry.insert((expiry, key));
        }
    }

    fn evict_one(&mut self) {
        let victim = match self.by_expiry.pop_first() {
            Some((_, key)) => Some(key),
            None => self.entries.keys().next().cloned(),
        };
        if let Some(victim) = victim {
            self.entries.remove(&victim);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.unindex(key, old.expiry);
                true
            }
            None => false,
        }
    }

    fn set_expiry(&mut self, key: &str, expiry: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        let previous = entry.expiry.replace(expiry);
        if previous != Some(expiry) {
            self.unindex(key, previous);
            self.by_expiry.insert((expiry, key.to_string()));
        }
        true
    }

    fn unindex(&mut self, key: &str, expiry: Option<DateTime<Utc>>) {
        if let Some(expiry) = expiry {
            self.by_expiry.remove(&(expiry, key.to_string()));
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.by_expiry.clear();
    }
}

pub struct MemoryTier {
    store: Mutex<Store>,
    capacity: usize,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<Value>>> {
        Ok(self.store.lock().entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.store
            .lock()
            .insert(self.capacity, key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.store.lock().remove(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.store.lock().set_expiry(key, time::expiry_after(ttl)))
    }

    async fn multi_set(&self, pairs: Vec<(String, Value)>, ttl: Option<Duration>) -> Result<()> {
        let mut store = self.store.lock();
        for (key, value) in pairs {
            store.insert(self.capacity, key, CacheEntry::new(value, ttl));
        }
        Ok(())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry<Value>>>> {
        let store = self.store.lock();
        Ok(keys.iter().map(|key| store.entries.get(key).cloned()).collect())
    }

    async fn set_if_absent(&self, key: &str, value: Value, ttl: Duration) -> Result<bool> {
        let mut store = self.store.lock();
        let now = time::now();

        if store.entries.get(key).is_some_and(|e| e.is_fresh_at(now)) {
            return Ok(false);
        }

        store.insert(self.capacity, key.to_string(), CacheEntry::new(value, Some(ttl)));
        Ok(true)
    }

    async fn clear(&self) -> Result<()> {
        self.store.lock().clear();
        Ok(())
    }
}

#[async_trait]
impl DurableTier for MemoryTier {
    async fn get_stale(&self, count: usize, before: DateTime<Utc>) -> Result<Vec<String>> {
        let store = self.store.lock();
        Ok(store
            .by_expiry
            .iter()
            .take_while(|(expiry, _)| *expiry <= before)
            .take(count)
            .map(|(_, key)| key.clone())
            .collect())
    }
}
