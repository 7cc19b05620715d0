use crate::store::KvStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    values: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, HashMap<String, f64>>,
}

/// Process local store, used by tests and throwaway runs
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> Result<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(f(&mut inner))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with(|inner| inner.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.with(|inner| {
            inner.values.insert(key.to_string(), value);
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with(|inner| {
            inner.values.remove(key);
        })
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<()> {
        self.with(|inner| {
            inner
                .sets
                .entry(set.to_string())
                .or_default()
                .insert(member.to_string());
        })
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        self.with(|inner| {
            if let Some(members) = inner.sets.get_mut(set) {
                members.remove(member);
            }
        })
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        self.with(|inner| {
            inner
                .sets
                .get(set)
                .map(|members| members.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn hash_increment(&self, hash: &str, field: &str, amount: f64) -> Result<f64> {
        self.with(|inner| {
            let value = inner
                .hashes
                .entry(hash.to_string())
                .or_default()
                .entry(field.to_string())
                .or_insert(0.0);
            *value += amount;
            *value
        })
    }

    async fn hash_get_all(&self, hash: &str) -> Result<HashMap<String, f64>> {
        self.with(|inner| inner.hashes.get(hash).cloned().unwrap_or_default())
    }
}
