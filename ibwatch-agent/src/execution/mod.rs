//! External command execution for the port tools
//!
//! - Command lines are split with shell-words rules (no shell involved)
//! - Each run is bounded by a timeout and the child is killed when dropped
//! - A missing binary is reported as `NotInstalled`, not as a failure

use ibwatch_check::SourceError;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs `command_line` and waits at most `timeout` for it to exit.
pub async fn run_command(
    command_line: &str,
    timeout: Duration,
) -> Result<CommandOutput, SourceError> {
    let argv = shell_words::split(command_line).map_err(|e| SourceError::Io {
        command: command_line.to_string(),
        message: format!("invalid command line: {e}"),
    })?;
    let Some((program, args)) = argv.split_first() else {
        return Err(SourceError::Io {
            command: command_line.to_string(),
            message: "empty command line".to_string(),
        });
    };

    debug!(command = command_line, timeout = ?timeout, "executing");

    let child = AsyncCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => SourceError::NotInstalled {
                command: program.clone(),
            },
            _ => SourceError::Io {
                command: program.clone(),
                message: e.to_string(),
            },
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| SourceError::Timeout {
            command: program.clone(),
            timeout,
        })?
        .map_err(|e| SourceError::Io {
            command: program.clone(),
            message: e.to_string(),
        })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        exit_code: output.status.code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = run_command("echo 'Hello World'", Duration::from_secs(5)).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "Hello World");
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_output() {
        let out = run_command("sh -c 'echo partial; echo oops >&2; exit 3'", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "partial");
        assert_eq!(out.stderr, "oops");
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_installed() {
        let err = run_command("ibwatch-no-such-tool --version", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_not_installed());
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let err = run_command("sleep 10", Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, SourceError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_empty_command_line() {
        assert!(run_command("   ", Duration::from_secs(1)).await.is_err());
    }
}
