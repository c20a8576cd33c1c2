//! Subprocess execution
//!
//! Every external program the engine touches (git, the package manager, the
//! installed binary itself) goes through [`CommandRunner`] so callers can swap
//! in a fake during tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use tokio::process::Command;

#[cfg(test)]
use mockall::automock;

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory (None = inherit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    /// Run the command from a specific directory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Append one more argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful exit with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { success: true, code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    /// Failed exit with the given code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { success: false, code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }
}

/// Spawns one command and waits for it
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Returns `Err` only when the process could not be spawned at all.
    async fn run(&self, command: &CommandSpec) -> io::Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &CommandSpec) -> io::Result<CommandOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args).kill_on_drop(true);
        if let Some(ref dir) = command.cwd {
            cmd.current_dir(dir);
        }

        log::debug!("Running `{}`", command);
        let output = cmd.output().await?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
