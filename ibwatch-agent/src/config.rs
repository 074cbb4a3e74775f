//! Agent configuration file
//!
//! Read from `$IBWATCH_CONFIG`, or `<config dir>/ibwatch/config.toml`.
//! A missing file means defaults; a malformed one is a startup error.

use anyhow::{Context, Result};
use ibwatch_check::{CheckConfig, DedupMode, ExpectedPortStates, ToolOverrides};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "IBWATCH_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub policy: ExpectedPortStates,
    pub tools: ToolsConfig,
    pub check: LoopConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ibstat_command: String,
    pub ibstatus_command: String,
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub interval_secs: u64,
    /// Skip the check on nodes without an NVIDIA GPU.
    pub require_nvidia: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupSetting {
    #[default]
    ExactTimestamp,
    LatestContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub retention_hours: u64,
    pub dedup: DedupSetting,
    pub refresh_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ibstat_command: String::new(),
            ibstatus_command: String::new(),
            command_timeout_secs: 15,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            require_nvidia: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/ibwatch/events.json"),
            retention_hours: 72,
            dedup: DedupSetting::default(),
            refresh_secs: 300,
        }
    }
}

impl AgentConfig {
    /// Default config file location
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("ibwatch").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("no config directory on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        config
            .retention()
            .and_then(|_| config.check_config())
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn retention(&self) -> Result<chrono::Duration> {
        let hours = self.store.retention_hours;
        i64::try_from(hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .with_context(|| format!("store.retention_hours out of range: {}", hours))
    }

    /// Settings handed to the check component.
    pub fn check_config(&self) -> Result<CheckConfig> {
        let dedup = match self.store.dedup {
            DedupSetting::ExactTimestamp => DedupMode::ExactTimestamp,
            DedupSetting::LatestContent => {
                let secs = self.store.refresh_secs;
                let refresh = i64::try_from(secs)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .with_context(|| format!("store.refresh_secs out of range: {}", secs))?;
                DedupMode::LatestContent { refresh }
            }
        };

        Ok(CheckConfig {
            thresholds: self.policy,
            tool_overrides: ToolOverrides {
                ibstat_command: self.tools.ibstat_command.clone(),
                ibstatus_command: self.tools.ibstatus_command.clone(),
            },
            command_timeout: Duration::from_secs(self.tools.command_timeout_secs),
            interval: Duration::from_secs(self.check.interval_secs.max(1)),
            dedup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AgentConfig::default());

        let check = config.check_config().unwrap();
        assert!(check.thresholds.is_zero());
        assert_eq!(check.command_timeout, Duration::from_secs(15));
        assert_eq!(check.interval, Duration::from_secs(60));
        assert_eq!(check.dedup, DedupMode::ExactTimestamp);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[policy]
at_least_ports = 8
at_least_rate = 400

[tools]
ibstat_command = "sudo ibstat"

[store]
dedup = "latest-content"
refresh_secs = 120
"#,
        )
        .unwrap();

        let config = AgentConfig::load_from(&path).unwrap();
        assert_eq!(config.policy.at_least_ports, 8);
        assert_eq!(config.store.retention_hours, 72);
        assert!(config.check.require_nvidia);

        let check = config.check_config().unwrap();
        assert_eq!(check.tool_overrides.ibstat_command, "sudo ibstat");
        assert_eq!(check.tool_overrides.ibstatus_command, "");
        assert_eq!(
            check.dedup,
            DedupMode::LatestContent { refresh: chrono::Duration::seconds(120) }
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[policy\nat_least_ports = ").unwrap();
        assert!(AgentConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_out_of_range_durations_are_errors() {
        let mut config = AgentConfig::default();
        config.store.retention_hours = u64::MAX;
        assert!(config.retention().is_err());

        config.store.retention_hours = i64::MAX as u64;
        assert!(config.retention().is_err());

        config.store.dedup = DedupSetting::LatestContent;
        config.store.refresh_secs = u64::MAX;
        assert!(config.check_config().is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\nretention_hours = 9223372036854775807\n").unwrap();
        let err = AgentConfig::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("retention_hours out of range"));
    }
}
