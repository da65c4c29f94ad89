use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheStore;
use crate::entry::CachedEntry;
use crate::error::Result;
use crate::request::RequestKey;

#[derive(Debug, Default)]
struct Generation {
    name: String,
    entries: Vec<(RequestKey, CachedEntry)>,
}

impl Generation {
    fn position(&self, key: &RequestKey) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }
}

/// In-process cache storage. Generations and entries are kept in vectors so
/// creation and insertion order come for free.
#[derive(Debug, Default)]
pub struct MemoryStore {
    generations: RwLock<Vec<Generation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all generations.
    pub async fn len(&self) -> usize {
        self.generations
            .read()
            .await
            .iter()
            .map(|g| g.entries.len())
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn open(&self, generation: &str) -> Result<()> {
        let mut generations = self.generations.write().await;
        if !generations.iter().any(|g| g.name == generation) {
            generations.push(Generation {
                name: generation.to_string(),
                entries: Vec::new(),
            });
        }
        Ok(())
    }

    async fn generation_names(&self) -> Result<Vec<String>> {
        Ok(self
            .generations
            .read()
            .await
            .iter()
            .map(|g| g.name.clone())
            .collect())
    }

    async fn delete_generation(&self, generation: &str) -> Result<bool> {
        let mut generations = self.generations.write().await;
        let before = generations.len();
        generations.retain(|g| g.name != generation);
        Ok(generations.len() != before)
    }

    async fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
        let generations = self.generations.read().await;
        Ok(generations
            .iter()
            .find(|g| g.name == generation)
            .and_then(|g| g.position(key).map(|i| g.entries[i].1.clone())))
    }

    async fn put(&self, generation: &str, key: &RequestKey, entry: CachedEntry) -> Result<()> {
        let mut generations = self.generations.write().await;
        let index = match generations.iter().position(|g| g.name == generation) {
            Some(i) => i,
            None => {
                generations.push(Generation {
                    name: generation.to_string(),
                    entries: Vec::new(),
                });
                generations.len() - 1
            }
        };
        let target = &mut generations[index];
        if let Some(pos) = target.position(key) {
            target.entries.remove(pos);
        }
        target.entries.push((key.clone(), entry));
        Ok(())
    }

    async fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool> {
        let mut generations = self.generations.write().await;
        let Some(target) = generations.iter_mut().find(|g| g.name == generation) else {
            return Ok(false);
        };
        match target.position(key) {
            Some(pos) => {
                target.entries.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_keys(&self, generation: &str) -> Result<Vec<RequestKey>> {
        let generations = self.generations.read().await;
        Ok(generations
            .iter()
            .find(|g| g.name == generation)
            .map(|g| g.entries.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default())
    }
}
