//! Conversion between cycle outcomes and `ibstat` history events.

use crate::eventstore::{DedupMode, Event, EventStore, EventType, StoreError};
use crate::models::{CompactPort, IbPort};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::error;

pub const EVENT_NAME_IBSTAT: &str = "ibstat";
pub const EXTRA_INFO_ALL_IBPORTS: &str = "all_ibports";

/// Builds the history record of one cycle.
///
/// Every port is stored (healthy ones included) since drop and flap
/// detection need the full picture, but only device and state are kept.
pub fn to_ibstat_event(
    ts: DateTime<Utc>,
    all_ports: &[IbPort],
    unhealthy_ports: &[IbPort],
    reason: &str,
) -> Event {
    let compact: Vec<CompactPort> = all_ports.iter().map(IbPort::compact).collect();
    let encoded = serde_json::to_string(&compact).unwrap_or_else(|_| "[]".to_string());

    let event_type = if unhealthy_ports.is_empty() {
        EventType::Info
    } else {
        EventType::Warning
    };

    Event {
        time: ts,
        name: EVENT_NAME_IBSTAT.to_string(),
        event_type,
        message: reason.to_string(),
        extra_info: BTreeMap::from([(EXTRA_INFO_ALL_IBPORTS.to_string(), encoded)]),
    }
}

/// Decodes the port list of an `ibstat` event. Returns `None` for other
/// events, missing payloads, and payloads that fail to decode (logged).
pub fn parse_ports_from_event(ev: &Event) -> Option<Vec<CompactPort>> {
    if ev.name != EVENT_NAME_IBSTAT {
        return None;
    }
    let raw = ev.extra_info.get(EXTRA_INFO_ALL_IBPORTS)?;
    if raw.is_empty() {
        return None;
    }

    match serde_json::from_str(raw) {
        Ok(ports) => Some(ports),
        Err(e) => {
            error!(error = %e, time = %ev.time, "error unmarshalling ib ports");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    Duplicate,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("error finding ibstat event: {0}")]
    Find(#[source] StoreError),
    #[error("error inserting ibstat event: {0}")]
    Insert(#[source] StoreError),
}

impl RecordError {
    /// Verdict reason for the failed step.
    pub fn reason(&self) -> &'static str {
        match self {
            RecordError::Find(_) => "error finding ibstat event",
            RecordError::Insert(_) => "error inserting ibstat event",
        }
    }

    pub fn store_error(&self) -> &StoreError {
        match self {
            RecordError::Find(e) | RecordError::Insert(e) => e,
        }
    }
}

/// Inserts `event` unless an equivalent one is already stored.
pub fn record_event(
    store: &dyn EventStore,
    event: &Event,
    mode: DedupMode,
) -> Result<Recorded, RecordError> {
    if store.find(event, mode).map_err(RecordError::Find)?.is_some() {
        return Ok(Recorded::Duplicate);
    }
    store.insert(event).map_err(RecordError::Insert)?;
    Ok(Recorded::Inserted)
}

/// All `ibstat` events since `since`, ascending by time.
pub fn read_ibstat_events(
    store: &dyn EventStore,
    since: DateTime<Utc>,
) -> Result<Vec<Event>, StoreError> {
    Ok(store
        .get(since)?
        .into_iter()
        .filter(|ev| ev.name == EVENT_NAME_IBSTAT)
        .collect())
}
