//! Port data as reported by `ibstat`/`ibstatus` and the expected-state policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical link state of an InfiniBand port ("State:" in `ibstat`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LinkState {
    Active,
    Down,
    Polling,
    Disabled,
    Init,
    Armed,
    Other(String),
}

impl LinkState {
    pub fn as_str(&self) -> &str {
        match self {
            LinkState::Active => "Active",
            LinkState::Down => "Down",
            LinkState::Polling => "Polling",
            LinkState::Disabled => "Disabled",
            LinkState::Init => "Initializing",
            LinkState::Armed => "Armed",
            LinkState::Other(s) => s,
        }
    }

    /// Parses both spellings: `Active` (ibstat) and `ACTIVE` (ibstatus).
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "active" => LinkState::Active,
            "down" => LinkState::Down,
            "polling" => LinkState::Polling,
            "disabled" => LinkState::Disabled,
            "init" | "initializing" => LinkState::Init,
            "armed" => LinkState::Armed,
            _ => LinkState::Other(raw.to_string()),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LinkState::Active)
    }

    pub fn is_down(&self) -> bool {
        matches!(self, LinkState::Down)
    }
}

impl From<String> for LinkState {
    fn from(s: String) -> Self {
        LinkState::parse(&s)
    }
}

impl From<&str> for LinkState {
    fn from(s: &str) -> Self {
        LinkState::parse(s)
    }
}

impl From<LinkState> for String {
    fn from(state: LinkState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One port of a host channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IbPort {
    pub device: String,
    pub state: LinkState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub physical_state: String,
    /// Line rate in Gb/s.
    #[serde(default)]
    pub rate: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link_layer: String,
}

impl IbPort {
    pub fn new(device: impl Into<String>, state: LinkState, rate: u64) -> Self {
        Self {
            device: device.into(),
            state,
            physical_state: String::new(),
            rate,
            link_layer: String::new(),
        }
    }

    /// Ethernet (RoCE) ports show up in the same tool output and are ignored.
    /// An empty link layer is treated as InfiniBand.
    pub fn is_infiniband(&self) -> bool {
        self.link_layer.is_empty() || self.link_layer.eq_ignore_ascii_case("infiniband")
    }

    pub fn compact(&self) -> CompactPort {
        CompactPort {
            device: self.device.clone(),
            state: self.state.clone(),
        }
    }
}

/// Port as persisted in event history: physical state and rate are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactPort {
    pub device: String,
    pub state: LinkState,
}

/// Administrator-supplied policy. Both fields zero means the check is disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedPortStates {
    /// Minimum number of ports that must be active at or above `at_least_rate`.
    #[serde(default)]
    pub at_least_ports: usize,
    /// Minimum line rate in Gb/s.
    #[serde(default)]
    pub at_least_rate: u64,
}

impl ExpectedPortStates {
    pub fn is_zero(&self) -> bool {
        self.at_least_ports == 0 && self.at_least_rate == 0
    }
}

/// Parsed output of one data source invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutput {
    /// Every port the tool reported, regardless of link layer.
    pub ports: Vec<IbPort>,
}

impl SourceOutput {
    pub fn new(ports: Vec<IbPort>) -> Self {
        Self { ports }
    }

    pub fn ib_ports(&self) -> Vec<IbPort> {
        self.ports.iter().filter(|p| p.is_infiniband()).cloned().collect()
    }

    pub fn total_ports(&self) -> usize {
        self.ports.len()
    }
}

/// Ports observed during one polling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub ts: DateTime<Utc>,
    /// InfiniBand ports from the source that was trusted this cycle.
    pub ports: Vec<IbPort>,
    /// Port count reported by that same source, used for switch-fault detection.
    pub total_port_count: usize,
    pub source_error: Option<String>,
}
