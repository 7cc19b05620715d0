//! Key-value persistence used by the domain repository.
//!
//! The store is addressed by plain string keys and offers three value kinds: strings, sets of
//! strings and hashes of numeric fields. Hash increments are atomic at the store level.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

mod memory;
mod sql;

pub use memory::MemoryStore;
pub use sql::SqlStore;

#[async_trait]
pub trait KvStore {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    async fn set_add(&self, set: &str, member: &str) -> Result<()>;
    async fn set_remove(&self, set: &str, member: &str) -> Result<()>;
    async fn set_members(&self, set: &str) -> Result<Vec<String>>;

    /// Add `amount` to a hash field (missing fields start at zero) and return the new value
    async fn hash_increment(&self, hash: &str, field: &str, amount: f64) -> Result<f64>;
    async fn hash_get_all(&self, hash: &str) -> Result<HashMap<String, f64>>;
}
