//! Run a command found on PATH and parse its standard output as JSON.

use crate::error::{BinkitError, Result};
use crate::which;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub args: Vec<String>,
    /// Working directory; the current one when unset.
    pub cwd: Option<PathBuf>,
}

fn build(program: &Path, options: &CommandOptions) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(&options.args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    cmd
}

fn parse_output<T: DeserializeOwned>(command: &str, output: Output) -> Result<T> {
    if !output.status.success() {
        tracing::debug!(
            "{} stderr: {}",
            command,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Err(BinkitError::CommandFailed {
            command: command.to_string(),
            code: output.status.code(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|source| BinkitError::JsonOutput {
        command: command.to_string(),
        source,
    })
}

/// Run `command` (resolved through PATH, falling back to the bare name) and
/// deserialize its stdout.
pub fn command_output_json<T: DeserializeOwned>(
    command: &str,
    options: &CommandOptions,
) -> Result<T> {
    let program = which::which(command).unwrap_or_else(|| PathBuf::from(command));
    let output = build(&program, options)
        .output()
        .map_err(|source| BinkitError::Spawn {
            path: program.display().to_string(),
            source,
        })?;
    parse_output(command, output)
}

/// Asynchronous variant of [`command_output_json`].
pub async fn command_output_json_async<T: DeserializeOwned>(
    command: &str,
    options: &CommandOptions,
) -> Result<T> {
    let program = which::which_async(command)
        .await
        .unwrap_or_else(|| PathBuf::from(command));
    let output = tokio::process::Command::from(build(&program, options))
        .output()
        .await
        .map_err(|source| BinkitError::Spawn {
            path: program.display().to_string(),
            source,
        })?;
    parse_output(command, output)
}
