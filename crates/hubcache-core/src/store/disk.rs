use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::CacheStore;
use crate::entry::CachedEntry;
use crate::error::{CacheError, Result};
use crate::request::RequestKey;

/// Lists generation names in creation order
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    generations: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GenerationFile {
    name: String,
    entries: Vec<(RequestKey, CachedEntry)>,
}

/// Durable cache storage: one pretty-printed JSON file per generation.
///
/// Writes are read-modify-write on whole files, serialized by an in-process
/// lock. Two processes sharing a directory are not coordinated.
pub struct DiskStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl DiskStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn generation_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("gen-{}.json", encode_file_name(name)))
    }

    async fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                CacheError::Store(format!("Failed to parse {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let contents = serde_json::to_string_pretty(value)?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn load_index(&self) -> Result<Index> {
        Self::read_json(&self.index_path()).await
    }

    async fn load_generation(&self, name: &str) -> Result<GenerationFile> {
        let mut file: GenerationFile = Self::read_json(&self.generation_path(name)).await?;
        if file.name.is_empty() {
            file.name = name.to_string();
        }
        Ok(file)
    }

    /// Register `name` in the index. Caller holds the lock.
    async fn ensure_generation(&self, name: &str) -> Result<()> {
        let mut index = self.load_index().await?;
        if !index.generations.iter().any(|g| g == name) {
            index.generations.push(name.to_string());
            Self::write_json(&self.index_path(), &index).await?;
            Self::write_json(
                &self.generation_path(name),
                &GenerationFile {
                    name: name.to_string(),
                    entries: Vec::new(),
                },
            )
            .await?;
            debug!(generation = name, "Created cache generation on disk");
        }
        Ok(())
    }
}

/// Map a generation name to a file name stem, one-to-one. Alphanumerics, `-`
/// and `.` are kept; every other byte, `_` included, becomes `_xx` (hex).
fn encode_file_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("_{:02x}", byte));
        }
    }
    encoded
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn open(&self, generation: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_generation(generation).await
    }

    async fn generation_names(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_index().await?.generations)
    }

    async fn delete_generation(&self, generation: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut index = self.load_index().await?;
        let before = index.generations.len();
        index.generations.retain(|g| g != generation);
        if index.generations.len() == before {
            return Ok(false);
        }
        Self::write_json(&self.index_path(), &index).await?;
        match tokio::fs::remove_file(self.generation_path(generation)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    async fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
        let _guard = self.lock.lock().await;
        let file = self.load_generation(generation).await?;
        Ok(file
            .entries
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, entry)| entry))
    }

    async fn put(&self, generation: &str, key: &RequestKey, entry: CachedEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_generation(generation).await?;
        let mut file = self.load_generation(generation).await?;
        file.entries.retain(|(k, _)| k != key);
        file.entries.push((key.clone(), entry));
        Self::write_json(&self.generation_path(generation), &file).await
    }

    async fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut file = self.load_generation(generation).await?;
        let before = file.entries.len();
        file.entries.retain(|(k, _)| k != key);
        if file.entries.len() == before {
            return Ok(false);
        }
        Self::write_json(&self.generation_path(generation), &file).await?;
        Ok(true)
    }

    async fn list_keys(&self, generation: &str) -> Result<Vec<RequestKey>> {
        let _guard = self.lock.lock().await;
        let file = self.load_generation(generation).await?;
        Ok(file.entries.into_iter().map(|(k, _)| k).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use chrono::Utc;
    use url::Url;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse(&format!("https://example.com{}", path)).unwrap())
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let store = DiskStore::new(dir.path().to_path_buf()).unwrap();
            let response = Response::new(200, "OK", b"hello".to_vec());
            store
                .put("hub-dynamic-1", &key("/a"), CachedEntry::stamped(&key("/a"), &response, now))
                .await
                .unwrap();
        }

        let store = DiskStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.generation_names().await.unwrap(), vec!["hub-dynamic-1"]);
        let entry = store.get("hub-dynamic-1", &key("/a")).await.unwrap().unwrap();
        assert_eq!(entry.body, b"hello".to_vec());
        assert_eq!(entry.cached_at, Some(now));
    }

    #[tokio::test]
    async fn test_order_and_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf()).unwrap();
        let response = Response::new(200, "OK", Vec::new());
        for path in ["/1", "/2", "/3"] {
            store
                .put("g", &key(path), CachedEntry::unstamped(&key(path), &response))
                .await
                .unwrap();
        }
        store
            .put("g", &key("/1"), CachedEntry::unstamped(&key("/1"), &response))
            .await
            .unwrap();
        assert_eq!(store.list_keys("g").await.unwrap(), vec![key("/2"), key("/3"), key("/1")]);

        assert!(store.delete("g", &key("/3")).await.unwrap());
        assert_eq!(store.list_keys("g").await.unwrap(), vec![key("/2"), key("/1")]);

        assert!(store.delete_generation("g").await.unwrap());
        assert!(store.generation_names().await.unwrap().is_empty());
        assert!(store.list_keys("g").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_file_names_are_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf()).unwrap();
        store.open("odd/name v1").await.unwrap();
        assert!(dir.path().join("gen-odd_2fname_20v1.json").exists());
        assert_eq!(store.generation_names().await.unwrap(), vec!["odd/name v1"]);
    }

    #[test]
    fn test_encode_file_name_is_one_to_one() {
        assert_eq!(encode_file_name("hub-static-1.0.0"), "hub-static-1.0.0");
        assert_ne!(encode_file_name("site/static-1"), encode_file_name("site_static-1"));
        assert_ne!(encode_file_name("a_2fb"), encode_file_name("a/b"));
    }

    #[tokio::test]
    async fn test_similar_names_do_not_share_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf()).unwrap();
        let response = Response::new(200, "OK", b"mine".to_vec());

        store.open("site/static-1").await.unwrap();
        store
            .put("site_static-1", &key("/a"), CachedEntry::unstamped(&key("/a"), &response))
            .await
            .unwrap();
        assert!(store.list_keys("site/static-1").await.unwrap().is_empty());
        assert_eq!(store.list_keys("site_static-1").await.unwrap(), vec![key("/a")]);

        assert!(store.delete_generation("site/static-1").await.unwrap());
        assert_eq!(store.list_keys("site_static-1").await.unwrap(), vec![key("/a")]);
        assert_eq!(store.generation_names().await.unwrap(), vec!["site_static-1"]);
    }
}
