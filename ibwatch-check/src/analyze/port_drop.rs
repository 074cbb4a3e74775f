use super::{drop_threshold, rel_time};
use crate::eventstore::Event;
use crate::record::parse_ports_from_event;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

pub const REASON_PORT_DROP_PREFIX: &str = "ib port drop -- ";

/// Reports ports that have been continuously `Down` for at least the drop
/// threshold, based on `events` (ascending, already limited to the lookback).
pub fn evaluate_port_drop(ts: DateTime<Utc>, events: &[Event]) -> Option<String> {
    match events {
        [] => return None,
        // only the event recorded this cycle
        [only] if only.time == ts => return None,
        _ => {}
    }

    let mut first_down: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
    for ev in events {
        let Some(ports) = parse_ports_from_event(ev) else {
            continue;
        };
        for port in ports {
            if port.state.is_down() {
                first_down.entry(port.device).or_insert(ev.time);
            } else {
                first_down.remove(&port.device);
            }
        }
    }

    let mut msgs = Vec::new();
    for (device, since) in first_down {
        let elapsed = ts - since;
        if elapsed < chrono::Duration::zero() {
            warn!(
                device = %device,
                since = %since,
                ts = %ts,
                "port down time is after the check time, skipping"
            );
            continue;
        }
        if elapsed < drop_threshold() {
            warn!(
                device = %device,
                elapsed_secs = elapsed.num_seconds(),
                "port down too recently, not yet a drop"
            );
            continue;
        }
        msgs.push(format!("{device} dropped {}", rel_time(since, ts)));
    }

    if msgs.is_empty() {
        return None;
    }
    msgs.sort();
    Some(format!("{REASON_PORT_DROP_PREFIX}{}", msgs.join(", ")))
}
