//! Snapshot acquisition from the two port data sources.
//!
//! `ibstat` is the primary source. `ibstatus` is a fallback that is only
//! trusted when `ibstat` produced no InfiniBand ports. Both run concurrently,
//! each bounded by its own timeout and by the component's cancellation token.

use crate::models::{SourceOutput, Snapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("{command} command not found")]
    NotInstalled { command: String },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("{command} cancelled")]
    Cancelled { command: String },
    #[error("{command} exited with code {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("failed to run {command}: {message}")]
    Io { command: String, message: String },
    #[error("failed to parse {command} output: {message}")]
    Parse { command: String, message: String },
}

impl SourceError {
    pub fn is_not_installed(&self) -> bool {
        matches!(self, SourceError::NotInstalled { .. })
    }
}

/// Result of one invocation. Both fields may be set: a tool can exit non-zero
/// and still print usable data for the devices it could read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceResult {
    pub output: Option<SourceOutput>,
    pub error: Option<SourceError>,
}

impl SourceResult {
    pub fn ok(output: SourceOutput) -> Self {
        Self {
            output: Some(output),
            error: None,
        }
    }

    pub fn err(error: SourceError) -> Self {
        Self {
            output: None,
            error: Some(error),
        }
    }

    pub fn partial(output: SourceOutput, error: SourceError) -> Self {
        Self {
            output: Some(output),
            error: Some(error),
        }
    }

    fn has_ib_ports(&self) -> bool {
        self.output
            .as_ref()
            .map(|o| o.ports.iter().any(|p| p.is_infiniband()))
            .unwrap_or(false)
    }
}

/// A command that enumerates ports.
#[async_trait]
pub trait PortSource: Send + Sync {
    /// Default command name, used in logs and errors.
    fn command_name(&self) -> &str;

    /// Runs the tool. An empty `command_override` means the built-in default.
    async fn query(&self, timeout: Duration, command_override: &str) -> SourceResult;
}

/// Outcome of querying both sources for one cycle.
#[derive(Debug, Clone, Default)]
pub struct Acquisition {
    pub ibstat: SourceResult,
    pub ibstatus: SourceResult,
}

impl Acquisition {
    /// The output to trust: `ibstat` if it returned InfiniBand ports,
    /// otherwise `ibstatus`, otherwise whatever `ibstat` printed.
    pub fn selected(&self) -> Option<&SourceOutput> {
        if self.ibstat.has_ib_ports() {
            return self.ibstat.output.as_ref();
        }
        if self.ibstatus.output.is_some() {
            return self.ibstatus.output.as_ref();
        }
        self.ibstat.output.as_ref()
    }

    pub fn snapshot(&self, ts: DateTime<Utc>) -> Snapshot {
        let (ports, total_port_count) = match self.selected() {
            Some(out) => (out.ib_ports(), out.total_ports()),
            None => (Vec::new(), 0),
        };
        Snapshot {
            ts,
            ports,
            total_port_count,
            source_error: self.ibstat.error.as_ref().map(|e| e.to_string()),
        }
    }
}

pub async fn acquire(
    ibstat: &dyn PortSource,
    ibstatus: &dyn PortSource,
    ibstat_command: &str,
    ibstatus_command: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Acquisition {
    let (ibstat, ibstatus) = tokio::join!(
        invoke(ibstat, ibstat_command, timeout, cancel),
        invoke(ibstatus, ibstatus_command, timeout, cancel),
    );

    if let Some(err) = &ibstatus.error {
        // the fallback only matters when ibstat returns nothing
        warn!(error = %err, "ibstatus command failed");
    }

    Acquisition { ibstat, ibstatus }
}

async fn invoke(
    source: &dyn PortSource,
    command_override: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> SourceResult {
    let command = source.command_name().to_string();
    tokio::select! {
        _ = cancel.cancelled() => SourceResult::err(SourceError::Cancelled { command }),
        res = tokio::time::timeout(timeout, source.query(timeout, command_override)) => {
            res.unwrap_or_else(|_| SourceResult::err(SourceError::Timeout { command, timeout }))
        }
    }
}
