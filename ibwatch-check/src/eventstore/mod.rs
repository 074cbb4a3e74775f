//! Durable, time-ordered event history.
//!
//! - [`Event`]: one immutable record, ordered by `time`
//! - [`EventStore`]: append, range read, equivalence lookup, retention purge
//! - [`DedupMode`]: what "equivalent" means when guarding duplicate inserts
//! - [`JsonEventStore`]: JSON file (or memory-only) implementation

mod json;

pub use json::JsonEventStore;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_info: BTreeMap<String, String>,
}

impl Event {
    /// Equality ignoring the timestamp.
    pub fn same_content(&self, other: &Event) -> bool {
        self.name == other.name
            && self.event_type == other.event_type
            && self.message == other.message
            && self.extra_info == other.extra_info
    }
}

/// How [`EventStore::find`] decides that an event is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupMode {
    /// Same time and same content. Consecutive polls always differ in time,
    /// so every poll is recorded.
    #[default]
    ExactTimestamp,
    /// The newest event with the same name has the same content and is no
    /// older than `refresh`. Unchanged polls collapse into one record which is
    /// refreshed once per `refresh`.
    LatestContent { refresh: Duration },
}

pub trait EventStore: Send + Sync {
    /// Inserts an event. Must be durable once it returns `Ok`.
    fn insert(&self, event: &Event) -> Result<(), StoreError>;

    /// Events with `time >= since`, ascending by time.
    fn get(&self, since: DateTime<Utc>) -> Result<Vec<Event>, StoreError>;

    /// Deletes events older than `before`, returns how many were removed.
    fn purge(&self, before: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Looks up an already stored event equivalent to `event` under `mode`.
    fn find(&self, event: &Event, mode: DedupMode) -> Result<Option<Event>, StoreError> {
        match mode {
            DedupMode::ExactTimestamp => Ok(self
                .get(event.time)?
                .into_iter()
                .find(|e| e.time == event.time && e.same_content(event))),
            DedupMode::LatestContent { refresh } => {
                let Some(since) = event.time.checked_sub_signed(refresh) else {
                    return Ok(None);
                };
                let latest = self
                    .get(since)?
                    .into_iter()
                    .filter(|e| e.name == event.name && e.time <= event.time)
                    .last();
                Ok(latest.filter(|e| e.same_content(event)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(time: DateTime<Utc>, message: &str) -> Event {
        Event {
            time,
            name: "ibstat".into(),
            event_type: EventType::Warning,
            message: message.into(),
            extra_info: BTreeMap::new(),
        }
    }

    #[test]
    fn test_find_exact_timestamp() {
        let store = JsonEventStore::in_memory();
        let now = Utc::now();
        store.insert(&ev(now, "down")).unwrap();

        assert!(store.find(&ev(now, "down"), DedupMode::ExactTimestamp).unwrap().is_some());
        let later = ev(now + Duration::minutes(1), "down");
        assert!(store.find(&later, DedupMode::ExactTimestamp).unwrap().is_none());
    }

    #[test]
    fn test_find_latest_content() {
        let store = JsonEventStore::in_memory();
        let now = Utc::now();
        let mode = DedupMode::LatestContent { refresh: Duration::minutes(5) };
        store.insert(&ev(now, "down")).unwrap();

        assert!(store.find(&ev(now + Duration::minutes(1), "down"), mode).unwrap().is_some());
        assert!(store.find(&ev(now + Duration::minutes(1), "up"), mode).unwrap().is_none());
        // refresh horizon elapsed
        assert!(store.find(&ev(now + Duration::minutes(6), "down"), mode).unwrap().is_none());
    }

    #[test]
    fn test_latest_content_only_compares_newest() {
        let store = JsonEventStore::in_memory();
        let now = Utc::now();
        let mode = DedupMode::LatestContent { refresh: Duration::minutes(5) };
        store.insert(&ev(now, "down")).unwrap();
        store.insert(&ev(now + Duration::minutes(1), "up")).unwrap();

        // same content as an older event but not as the newest one
        let again = ev(now + Duration::minutes(2), "down");
        assert!(store.find(&again, mode).unwrap().is_none());
    }
}
