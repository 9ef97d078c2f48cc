//! Local list of recent successful lookups.
//!
//! Persistence is best effort: a store that cannot be read starts the list
//! empty and a failed write only logs a warning.

use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_HISTORY_LIMIT: usize = 6;
pub const HISTORY_FILE_NAME: &str = "recent_downloads_v1.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecentHistoryEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub at: DateTime<Utc>,
}

impl RecentHistoryEntry {
    pub fn now(url: impl Into<String>, platform: Option<String>, title: Option<String>) -> Self {
        Self {
            url: url.into(),
            platform,
            title,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryStoreError {
    #[error("history storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("history storage is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// Where the history list is persisted.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// `Ok(None)` means nothing has been stored yet.
    async fn load(&self) -> Result<Option<Vec<RecentHistoryEntry>>, HistoryStoreError>;

    async fn save(&self, entries: &[RecentHistoryEntry]) -> Result<(), HistoryStoreError>;
}

#[async_trait]
impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    async fn load(&self) -> Result<Option<Vec<RecentHistoryEntry>>, HistoryStoreError> {
        self.as_ref().load().await
    }

    async fn save(&self, entries: &[RecentHistoryEntry]) -> Result<(), HistoryStoreError> {
        self.as_ref().save(entries).await
    }
}

/// Keeps the list as a JSON array in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/alldl-proxy/recent_downloads_v1.json`, if the platform
    /// has a data directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("alldl-proxy").join(HISTORY_FILE_NAME))
    }
}

#[async_trait]
impl HistoryStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Vec<RecentHistoryEntry>>, HistoryStoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn save(&self, entries: &[RecentHistoryEntry]) -> Result<(), HistoryStoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let payload = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, payload).await?;
        Ok(())
    }
}

/// In-process store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Option<Vec<RecentHistoryEntry>>>,
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn load(&self) -> Result<Option<Vec<RecentHistoryEntry>>, HistoryStoreError> {
        Ok(self
            .entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }

    async fn save(&self, entries: &[RecentHistoryEntry]) -> Result<(), HistoryStoreError> {
        if let Ok(mut stored) = self.entries.lock() {
            *stored = Some(entries.to_vec());
        }
        Ok(())
    }
}

pub struct RecentHistory<S> {
    store: S,
    limit: usize,
    items: Vec<RecentHistoryEntry>,
}

impl<S: HistoryStore> RecentHistory<S> {
    /// Loads whatever the store holds, truncated to `limit`. Read failures
    /// start the list empty.
    pub async fn load(store: S, limit: usize) -> Self {
        let items = match store.load().await {
            Ok(Some(mut items)) => {
                items.truncate(limit);
                items
            }
            Ok(None) => Vec::new(),
            Err(error) => {
                warn!("Ignoring unreadable recent history: {error}");
                Vec::new()
            }
        };

        Self {
            store,
            limit,
            items,
        }
    }

    pub fn items(&self) -> &[RecentHistoryEntry] {
        &self.items
    }

    /// Puts `entry` first, dropping any older entry for the same URL.
    pub async fn add(&mut self, entry: RecentHistoryEntry) {
        self.items.retain(|existing| existing.url != entry.url);
        self.items.insert(0, entry);
        self.items.truncate(self.limit);
        self.persist().await;
    }

    pub async fn clear(&mut self) {
        self.items.clear();
        self.persist().await;
    }

    async fn persist(&self) {
        match self.store.save(&self.items).await {
            Ok(()) => debug!("Saved {} recent history entries", self.items.len()),
            Err(error) => warn!("Could not save recent history: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct BrokenStore;

    #[async_trait]
    impl HistoryStore for BrokenStore {
        async fn load(&self) -> Result<Option<Vec<RecentHistoryEntry>>, HistoryStoreError> {
            Err(std::io::Error::other("disk on fire").into())
        }

        async fn save(&self, _entries: &[RecentHistoryEntry]) -> Result<(), HistoryStoreError> {
            Err(std::io::Error::other("disk on fire").into())
        }
    }

    fn entry(url: &str, at: DateTime<Utc>) -> RecentHistoryEntry {
        RecentHistoryEntry {
            url: url.to_string(),
            platform: None,
            title: None,
            at,
        }
    }

    #[tokio::test]
    async fn same_url_moves_to_front_with_newest_timestamp() {
        let mut history = RecentHistory::load(MemoryStore::default(), DEFAULT_HISTORY_LIMIT).await;
        let first = Utc::now();
        let later = first + Duration::seconds(30);

        history.add(entry("https://a", first)).await;
        history.add(entry("https://b", first)).await;
        history.add(entry("https://a", later)).await;

        let urls: Vec<&str> = history.items().iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, ["https://a", "https://b"]);
        assert_eq!(history.items()[0].at, later);
    }

    #[tokio::test]
    async fn list_is_capped_newest_first() {
        let mut history = RecentHistory::load(MemoryStore::default(), 3).await;
        let now = Utc::now();

        for i in 0..5 {
            history.add(entry(&format!("https://site/{i}"), now)).await;
        }

        let urls: Vec<&str> = history.items().iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, ["https://site/4", "https://site/3", "https://site/2"]);
    }

    #[tokio::test]
    async fn changes_are_persisted_and_reloaded() {
        let store = Arc::new(MemoryStore::default());
        let mut history = RecentHistory::load(Arc::clone(&store), 6).await;
        history
            .add(RecentHistoryEntry::now(
                "https://www.tiktok.com/@a/video/1",
                Some("TikTok".to_string()),
                Some("clip".to_string()),
            ))
            .await;

        let reloaded = RecentHistory::load(Arc::clone(&store), 6).await;
        assert_eq!(reloaded.items(), history.items());

        history.clear().await;
        assert!(history.items().is_empty());
        let reloaded = RecentHistory::load(store, 6).await;
        assert!(reloaded.items().is_empty());
    }

    #[tokio::test]
    async fn reload_truncates_to_a_smaller_limit() {
        let store = Arc::new(MemoryStore::default());
        let mut history = RecentHistory::load(Arc::clone(&store), 6).await;
        for i in 0..6 {
            history.add(entry(&format!("https://site/{i}"), Utc::now())).await;
        }

        let reloaded = RecentHistory::load(store, 2).await;
        assert_eq!(reloaded.items().len(), 2);
        assert_eq!(reloaded.items()[0].url, "https://site/5");
    }

    #[tokio::test]
    async fn storage_failures_are_swallowed() {
        let mut history = RecentHistory::load(BrokenStore, 6).await;
        assert!(history.items().is_empty());

        history.add(entry("https://a", Utc::now())).await;
        assert_eq!(history.items().len(), 1);

        history.clear().await;
        assert!(history.items().is_empty());
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(HISTORY_FILE_NAME);

        let mut history = RecentHistory::load(JsonFileStore::new(&path), 6).await;
        assert!(history.items().is_empty());
        history
            .add(RecentHistoryEntry::now(
                "https://youtu.be/x",
                Some("YouTube".to_string()),
                None,
            ))
            .await;

        let raw = std::fs::read_to_string(&path).unwrap();
        let stored: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored[0]["url"], "https://youtu.be/x");
        assert!(stored[0].get("title").is_none());

        let reloaded = RecentHistory::load(JsonFileStore::new(&path), 6).await;
        assert_eq!(reloaded.items(), history.items());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HISTORY_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(HistoryStoreError::Format(_))
        ));

        let history = RecentHistory::load(store, 6).await;
        assert!(history.items().is_empty());
    }
}
