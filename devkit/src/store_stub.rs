/*!
Event store with injectable failures

Wraps an in-memory [`JsonEventStore`]; lookups and inserts can be switched
to fail so tests can drive the store-error paths of a cycle.
*/

use chrono::{DateTime, Utc};
use ibwatch_check::{DedupMode, Event, EventStore, JsonEventStore, StoreError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct FailingStore {
    inner: JsonEventStore,
    fail_insert: AtomicBool,
    fail_find: AtomicBool,
    inserts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            inner: JsonEventStore::in_memory(),
            fail_insert: AtomicBool::new(false),
            fail_find: AtomicBool::new(false),
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_finds(&self, fail: bool) {
        self.fail_find.store(fail, Ordering::SeqCst);
    }

    /// Successful inserts so far.
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn all(&self) -> Vec<Event> {
        self.inner.get(DateTime::<Utc>::MIN_UTC).unwrap_or_default()
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for FailingStore {
    fn insert(&self, event: &Event) -> Result<(), StoreError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("insert disabled by test".into()));
        }
        self.inner.insert(event)?;
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, since: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        self.inner.get(since)
    }

    fn purge(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.purge(before)
    }

    fn find(&self, event: &Event, mode: DedupMode) -> Result<Option<Event>, StoreError> {
        if self.fail_find.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("find disabled by test".into()));
        }
        self.inner.find(event, mode)
    }
}
