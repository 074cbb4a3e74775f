/*!
Builders for ports and `ibstat` history events
*/

use chrono::{DateTime, Utc};
use ibwatch_check::record::{to_ibstat_event, EXTRA_INFO_ALL_IBPORTS};
use ibwatch_check::{Event, EventType, IbPort, LinkState};

/// InfiniBand port with the given state and rate.
pub fn port(device: &str, state: LinkState, rate: u64) -> IbPort {
    let mut p = IbPort::new(device, state, rate);
    p.link_layer = "InfiniBand".to_string();
    p.physical_state = match p.state {
        LinkState::Active => "LinkUp",
        LinkState::Polling => "Polling",
        _ => "Disabled",
    }
    .to_string();
    p
}

/// Builds the event a cycle at `time` would have recorded.
pub struct EventBuilder {
    time: DateTime<Utc>,
    ports: Vec<IbPort>,
    message: String,
    warning: bool,
    raw_payload: Option<String>,
}

impl EventBuilder {
    pub fn ibstat(time: DateTime<Utc>) -> Self {
        Self {
            time,
            ports: Vec::new(),
            message: String::new(),
            warning: false,
            raw_payload: None,
        }
    }

    pub fn port(mut self, device: &str, state: LinkState) -> Self {
        self.ports.push(port(device, state, 400));
        self
    }

    pub fn message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn warning(mut self) -> Self {
        self.warning = true;
        self
    }

    /// Replaces the encoded port list, e.g. with something undecodable.
    pub fn raw_payload(mut self, payload: &str) -> Self {
        self.raw_payload = Some(payload.to_string());
        self
    }

    pub fn build(self) -> Event {
        let unhealthy: Vec<IbPort> = if self.warning {
            self.ports.iter().filter(|p| !p.state.is_active()).cloned().collect()
        } else {
            Vec::new()
        };
        let mut event = to_ibstat_event(self.time, &self.ports, &unhealthy, &self.message);
        if self.warning {
            event.event_type = EventType::Warning;
        }
        if let Some(raw) = self.raw_payload {
            event.extra_info.insert(EXTRA_INFO_ALL_IBPORTS.to_string(), raw);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibwatch_check::record::parse_ports_from_event;

    #[test]
    fn test_builder_payload() {
        let ev = EventBuilder::ibstat(Utc::now())
            .port("mlx5_0", LinkState::Down)
            .port("mlx5_1", LinkState::Active)
            .warning()
            .build();

        assert_eq!(ev.event_type, EventType::Warning);
        let ports = parse_ports_from_event(&ev).unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].state, LinkState::Down);
    }

    #[test]
    fn test_raw_payload() {
        let ev = EventBuilder::ibstat(Utc::now()).raw_payload("{oops").build();
        assert!(parse_ports_from_event(&ev).is_none());
    }
}
