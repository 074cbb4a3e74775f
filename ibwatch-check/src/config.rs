use crate::eventstore::DedupMode;
use crate::models::ExpectedPortStates;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-source command overrides. Empty means the tool's default command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverrides {
    #[serde(default)]
    pub ibstat_command: String,
    #[serde(default)]
    pub ibstatus_command: String,
}

/// Resolved settings of the InfiniBand check. Built by the host from its
/// own configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConfig {
    pub thresholds: ExpectedPortStates,
    pub tool_overrides: ToolOverrides,
    /// Upper bound for each tool invocation.
    pub command_timeout: Duration,
    /// Time between two cycles of the background loop.
    pub interval: Duration,
    pub dedup: DedupMode,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            thresholds: ExpectedPortStates::default(),
            tool_overrides: ToolOverrides::default(),
            command_timeout: Duration::from_secs(15),
            interval: Duration::from_secs(60),
            dedup: DedupMode::default(),
        }
    }
}
