//! InfiniBand port health check.
//!
//! Each cycle samples port states through `ibstat` (falling back to
//! `ibstatus`), evaluates them against the configured [`ExpectedPortStates`],
//! records the snapshot in an [`EventStore`], and reads recent history back
//! to tell a switch fault, a dropped port and a flapping port apart.
//!
//! ```text
//!   PortSource x2 ──► acquire ──► evaluate ──► record ──► analyze ──► LatestSlot
//!                                               │            ▲
//!                                               └─ EventStore┘
//! ```
//!
//! Tool invocation and hardware detection are provided by the host through
//! the [`PortSource`] and [`Instrumentation`] traits.

pub mod analyze;
pub mod component;
pub mod config;
pub mod evaluate;
pub mod eventstore;
pub mod health;
pub mod models;
pub mod record;
pub mod result;
pub mod source;
pub mod state;

pub use component::{Component, InfinibandComponent, Instrumentation, NAME};
pub use config::{CheckConfig, ToolOverrides};
pub use evaluate::{evaluate_ports_and_rate, PolicyViolation};
pub use eventstore::{DedupMode, Event, EventStore, EventType, JsonEventStore, StoreError};
pub use health::{HealthState, HealthStateType, RepairActionType, SuggestedActions};
pub use models::{CompactPort, ExpectedPortStates, IbPort, LinkState, Snapshot, SourceOutput};
pub use result::CheckResult;
pub use source::{PortSource, SourceError, SourceResult};
