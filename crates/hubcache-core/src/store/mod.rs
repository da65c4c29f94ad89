//! Cache storage: named generations of request -> entry mappings.
//!
//! The `CacheStore` trait is the seam between the worker and whatever
//! actually holds the bytes. Two implementations ship:
//!
//! - `MemoryStore`: in-process, used by tests and short-lived hosts
//! - `DiskStore`: one JSON file per generation, survives restarts
//!
//! Every generation keeps its keys in insertion order; eviction relies on it.

pub mod disk;
pub mod memory;

use async_trait::async_trait;

use crate::entry::CachedEntry;
use crate::error::Result;
use crate::request::RequestKey;

pub use disk::DiskStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the generation if it does not exist yet.
    async fn open(&self, generation: &str) -> Result<()>;

    /// Names of every generation, in creation order.
    async fn generation_names(&self) -> Result<Vec<String>>;

    /// Drop a generation and all its entries. Returns whether it existed.
    async fn delete_generation(&self, generation: &str) -> Result<bool>;

    async fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

    /// Store an entry, replacing any previous one for the key. A replaced key
    /// moves to the end of the insertion order. Opens the generation if needed.
    async fn put(&self, generation: &str, key: &RequestKey, entry: CachedEntry) -> Result<()>;

    async fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool>;

    /// Keys in insertion order, oldest first. Empty for unknown generations.
    async fn list_keys(&self, generation: &str) -> Result<Vec<RequestKey>>;

    /// First match for `key` across all generations, in creation order.
    async fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
        for name in self.generation_names().await? {
            if let Some(entry) = self.get(&name, key).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}
