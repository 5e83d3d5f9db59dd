//! Stored event log
//!
//! Captured events live in a durable key-value store as one JSON array of raw
//! payload strings per key. The log is bounded: appending past capacity
//! evicts the oldest entries.

use crate::config::{StorageConfig, StorageMode};
use crate::error::{Result, SimulatorError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Capacity of the stored event log
pub const MAX_STORED_EVENTS: usize = 1000;

/// Durable key-value store for string values
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Value stored under `name`, if any
    async fn get(&self, name: &str) -> Result<Option<String>>;

    /// Store `value` under `name`, replacing any previous value
    async fn set(&self, name: &str, value: &str) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(name).cloned())
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Store keeping each key in `<data_dir>/<urlencoded key>.json`
#[derive(Debug, Clone)]
pub struct FileEventStore {
    data_dir: PathBuf,
}

impl FileEventStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.json", urlencoding::encode(name)))
    }
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(name)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SimulatorError::Storage(format!("failed to read {}: {}", name, e))),
        }
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        let storage_err =
            |e: std::io::Error| SimulatorError::Storage(format!("failed to write {}: {}", name, e));
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(storage_err)?;

        // Write then rename so readers never see a partial file
        let path = self.path_for(name);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, value).await.map_err(storage_err)?;
        tokio::fs::rename(&staging, &path).await.map_err(storage_err)?;
        Ok(())
    }
}

/// Build the store selected by `config`
pub fn store_from_config(config: &StorageConfig) -> Arc<dyn EventStore> {
    match &config.mode {
        StorageMode::Memory => Arc::new(InMemoryEventStore::new()),
        StorageMode::File { data_dir } => Arc::new(FileEventStore::new(data_dir.clone())),
    }
}

/// Bounded log of raw event payloads under one store key.
///
/// Clones share one write lock, so concurrent appends through any clone
/// never lose an entry.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn EventStore>,
    name: String,
    capacity: usize,
    writes: Arc<Mutex<()>>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            capacity: MAX_STORED_EVENTS,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Override the capacity (at least one entry)
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stored payloads, oldest first. A missing key is an empty log.
    pub async fn load(&self) -> Result<Vec<String>> {
        match self.store.get(&self.name).await? {
            None => Ok(Vec::new()),
            Some(raw) if raw.trim().is_empty() || raw.trim() == "null" => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                SimulatorError::Storage(format!("stored log {} is corrupt: {}", self.name, e))
            }),
        }
    }

    /// Number of stored payloads
    pub async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Append one payload, evicting the oldest entries past capacity.
    ///
    /// Returns the log length after the append.
    pub async fn append(&self, payload: impl Into<String>) -> Result<usize> {
        let _write = self.writes.lock().await;
        let mut events = self.load().await?;
        events.push(payload.into());
        if events.len() > self.capacity {
            let evicted = events.len() - self.capacity;
            warn!(
                log = %self.name,
                evicted,
                capacity = self.capacity,
                "Stored event log full, dropping oldest events"
            );
            events.drain(..evicted);
        }
        self.write(&events).await?;
        Ok(events.len())
    }

    /// Reset the log to empty
    pub async fn clear(&self) -> Result<()> {
        let _write = self.writes.lock().await;
        debug!(log = %self.name, "Clearing stored events");
        self.write(&[]).await
    }

    async fn write(&self, events: &[String]) -> Result<()> {
        let encoded = serde_json::to_string(events)?;
        self.store.set(&self.name, &encoded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory_log() -> EventLog {
        EventLog::new(Arc::new(InMemoryEventStore::new()), "fakeEvents")
    }

    #[tokio::test]
    async fn missing_key_is_empty_log() {
        let log = memory_log();
        assert!(log.load().await.unwrap().is_empty());
        assert!(log.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn append_keeps_order() {
        let log = memory_log();
        log.append("{\"id\":1}").await.unwrap();
        assert_eq!(log.append("{\"id\":2}").await.unwrap(), 2);
        assert_eq!(log.load().await.unwrap(), vec!["{\"id\":1}", "{\"id\":2}"]);
    }

    #[tokio::test]
    async fn overflow_evicts_oldest() {
        let log = memory_log().with_capacity(3);
        for i in 0..5 {
            log.append(format!("{i}")).await.unwrap();
        }
        assert_eq!(log.load().await.unwrap(), vec!["2", "3", "4"]);
    }

    /// Store that yields before every read so concurrent appends interleave
    struct YieldingStore(InMemoryEventStore);

    #[async_trait]
    impl EventStore for YieldingStore {
        async fn get(&self, name: &str) -> Result<Option<String>> {
            tokio::task::yield_now().await;
            self.0.get(name).await
        }

        async fn set(&self, name: &str, value: &str) -> Result<()> {
            tokio::task::yield_now().await;
            self.0.set(name, value).await
        }
    }

    #[tokio::test]
    async fn concurrent_appends_from_clones_keep_every_entry() {
        let log = EventLog::new(Arc::new(YieldingStore(InMemoryEventStore::new())), "fakeEvents");
        let appends = (0..20).map(|i| {
            let log = log.clone();
            async move { log.append(format!("{i}")).await }
        });
        for result in futures::future::join_all(appends).await {
            result.unwrap();
        }

        let mut events = log.load().await.unwrap();
        events.sort_by_key(|e| e.parse::<u32>().unwrap());
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn clear_writes_empty_array() {
        let store = Arc::new(InMemoryEventStore::new());
        let log = EventLog::new(store.clone(), "fakeEvents");
        log.append("x").await.unwrap();
        log.clear().await.unwrap();
        assert_eq!(store.get("fakeEvents").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn corrupt_log_is_storage_error() {
        let store = Arc::new(InMemoryEventStore::new());
        store.set("fakeEvents", "{not json").await.unwrap();
        let log = EventLog::new(store, "fakeEvents");
        assert!(matches!(log.load().await, Err(SimulatorError::Storage(_))));
        assert!(log.append("x").await.is_err());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(Arc::new(FileEventStore::new(dir.path())), "fake/events");
        log.append("a").await.unwrap();
        log.append("b").await.unwrap();

        let reopened = EventLog::new(Arc::new(FileEventStore::new(dir.path())), "fake/events");
        assert_eq!(reopened.load().await.unwrap(), vec!["a", "b"]);
        assert!(dir.path().join("fake%2Fevents.json").exists());
    }

    #[tokio::test]
    async fn store_from_config_picks_backend() {
        let dir = TempDir::new().unwrap();
        let store = store_from_config(&StorageConfig {
            mode: StorageMode::File {
                data_dir: dir.path().to_path_buf(),
            },
            max_events: 10,
        });
        store.set("k", "[]").await.unwrap();
        assert!(dir.path().join("k.json").exists());
    }
}
