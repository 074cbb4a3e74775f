use super::{flap_window, MAX_FLAP_TRANSITIONS};
use crate::eventstore::Event;
use crate::models::LinkState;
use crate::record::parse_ports_from_event;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

pub const REASON_PORT_FLAP_PREFIX: &str = "ib port flap -- ";

/// Reports ports whose state changed within the flap window, e.g.
/// `mlx5_0 Down -> Active -> Down`.
pub fn evaluate_port_flap(ts: DateTime<Utc>, events: &[Event]) -> Option<String> {
    if events.len() < 2 {
        return None;
    }
    if events[0].time > ts {
        warn!(
            oldest = %events[0].time,
            ts = %ts,
            "oldest ibstat event is newer than the check time, skipping flap detection"
        );
        return None;
    }

    let mut transitions: BTreeMap<String, Vec<LinkState>> = BTreeMap::new();
    for ev in events.iter().filter(|ev| ts - ev.time <= flap_window()) {
        let Some(ports) = parse_ports_from_event(ev) else {
            continue;
        };
        for port in ports {
            let states = transitions.entry(port.device).or_default();
            if states.last() != Some(&port.state) {
                states.push(port.state);
            }
        }
    }

    let mut msgs: Vec<String> = transitions
        .into_iter()
        .filter(|(_, states)| states.len() >= 2)
        .map(|(device, states)| {
            let tail = &states[states.len().saturating_sub(MAX_FLAP_TRANSITIONS)..];
            let path: Vec<&str> = tail.iter().map(LinkState::as_str).collect();
            format!("{device} {}", path.join(" -> "))
        })
        .collect();

    if msgs.is_empty() {
        return None;
    }
    msgs.sort();
    Some(format!("{REASON_PORT_FLAP_PREFIX}{}", msgs.join(", ")))
}
