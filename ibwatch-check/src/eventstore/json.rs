use super::{Event, EventStore, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Event history kept as a JSON array on disk, with an in-memory cache.
///
/// Every mutation rewrites the file (write to a temp file, then rename) while
/// holding the cache lock, so the file always matches the cache.
pub struct JsonEventStore {
    /// `None` for a memory-only store.
    storage_path: Option<PathBuf>,
    /// Sorted by time ascending.
    cache: Mutex<Vec<Event>>,
}

impl JsonEventStore {
    /// Opens (or creates) the store file at `storage_path`.
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let path = storage_path.into();
        let events = Self::load_from_disk(&path)?;
        debug!(path = %path.display(), events = events.len(), "event store opened");
        Ok(Self {
            storage_path: Some(path),
            cache: Mutex::new(events),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            storage_path: None,
            cache: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    fn load_from_disk(path: &Path) -> Result<Vec<Event>, StoreError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, "[]")?;
        }

        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut events: Vec<Event> = serde_json::from_str(&content)?;
        events.sort_by_key(|e| e.time);
        Ok(events)
    }

    fn save_to_disk(&self, events: &[Event]) -> Result<(), StoreError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        let json = serde_json::to_string(events)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl EventStore for JsonEventStore {
    fn insert(&self, event: &Event) -> Result<(), StoreError> {
        let mut cache = self.cache.lock();
        let idx = cache.partition_point(|e| e.time <= event.time);
        cache.insert(idx, event.clone());

        if let Err(e) = self.save_to_disk(&cache) {
            // not durable, so not stored
            cache.remove(idx);
            return Err(e);
        }
        Ok(())
    }

    fn get(&self, since: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        let cache = self.cache.lock();
        let start = cache.partition_point(|e| e.time < since);
        Ok(cache[start..].to_vec())
    }

    fn purge(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut cache = self.cache.lock();
        let removed = cache.partition_point(|e| e.time < before);
        if removed == 0 {
            return Ok(0);
        }
        // cache is only trimmed once the file no longer holds the old events
        self.save_to_disk(&cache[removed..])?;
        cache.drain(..removed);
        Ok(removed)
    }
}
