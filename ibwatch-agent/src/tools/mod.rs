//! `ibstat` and `ibstatus` as port sources for the check.

mod ibstat;
mod ibstatus;

pub use ibstat::parse_ibstat;
pub use ibstatus::parse_ibstatus;

use crate::execution::run_command;
use async_trait::async_trait;
use ibwatch_check::{IbPort, PortSource, SourceError, SourceOutput, SourceResult};
use std::time::Duration;
use tracing::debug;

/// A port tool: a default command plus the parser for its output.
pub struct ToolSource {
    command: &'static str,
    parse: fn(&str) -> Vec<IbPort>,
}

impl ToolSource {
    pub fn ibstat() -> Self {
        Self {
            command: "ibstat",
            parse: parse_ibstat,
        }
    }

    pub fn ibstatus() -> Self {
        Self {
            command: "ibstatus",
            parse: parse_ibstatus,
        }
    }
}

#[async_trait]
impl PortSource for ToolSource {
    fn command_name(&self) -> &str {
        self.command
    }

    async fn query(&self, timeout: Duration, command_override: &str) -> SourceResult {
        let command_line = match command_override.trim() {
            "" => self.command,
            custom => custom,
        };

        let out = match run_command(command_line, timeout).await {
            Ok(out) => out,
            Err(e) => return SourceResult::err(e),
        };

        let ports = (self.parse)(&out.stdout);
        debug!(
            command = %self.command,
            ports = ports.len(),
            exit_code = ?out.exit_code,
            "tool finished"
        );

        if !out.success() {
            let err = SourceError::Failed {
                command: self.command.to_string(),
                code: out.exit_code,
                stderr: out.stderr,
            };
            // whatever could be read before the failure is still usable
            return if ports.is_empty() {
                SourceResult::err(err)
            } else {
                SourceResult::partial(SourceOutput::new(ports), err)
            };
        }

        if ports.is_empty() && !out.stdout.trim().is_empty() {
            return SourceResult::err(SourceError::Parse {
                command: self.command.to_string(),
                message: "no ports found in output".to_string(),
            });
        }
        SourceResult::ok(SourceOutput::new(ports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibwatch_check::LinkState;

    #[tokio::test]
    async fn test_override_runs_custom_command() {
        let src = ToolSource::ibstat();
        let res = src
            .query(
                Duration::from_secs(5),
                "printf \"CA 'mlx5_0'\\n\\tPort 1:\\n\\t\\tState: Active\\n\\t\\tRate: 400\\n\"",
            )
            .await;

        assert!(res.error.is_none());
        let ports = res.output.unwrap().ports;
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].state, LinkState::Active);
    }

    #[tokio::test]
    async fn test_failed_exit_returns_partial_output() {
        let src = ToolSource::ibstatus();
        let script = "sh -c \"printf \\\"Infiniband device 'mlx5_0' port 1 status:\\n\\tstate: 4: ACTIVE\\n\\\"; exit 255\"";
        let res = src.query(Duration::from_secs(5), script).await;

        assert!(matches!(res.error, Some(SourceError::Failed { code: Some(255), .. })));
        assert_eq!(res.output.unwrap().ports[0].device, "mlx5_0");
    }

    #[tokio::test]
    async fn test_unrecognized_output_is_a_parse_error() {
        let res = ToolSource::ibstat().query(Duration::from_secs(5), "echo garbage").await;
        assert!(matches!(res.error, Some(SourceError::Parse { .. })));
        assert!(res.output.is_none());
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let res = ToolSource::ibstat()
            .query(Duration::from_secs(5), "/nonexistent/ibstat")
            .await;
        assert!(res.error.unwrap().is_not_installed());
    }
}
