use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::process::Output;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;

use super::{PosixCommand, ReconcilerError};

/// A POSIX account as seen on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostAccount {
    pub name: String,
    pub home: String,
    /// GECOS field.
    pub comment: String,
    pub primary_group: String,
    /// Supplementary groups, primary group excluded.
    pub groups: BTreeSet<String>,
}

/// Read-only view of host accounts, groups and directories.
#[async_trait]
pub trait HostInventory: Send + Sync {
    async fn lookup_user(&self, name: &str) -> Result<Option<HostAccount>, ReconcilerError>;

    async fn group_exists(&self, name: &str) -> Result<bool, ReconcilerError>;

    async fn dir_exists(&self, path: &str) -> Result<bool, ReconcilerError>;
}

/// Runs one host command to completion.
///
/// - In production this is [`HostSystem`].
/// - Under test, [`super::FakeHost`] interprets commands against an
///   in-memory host.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &PosixCommand) -> Result<(), ReconcilerError>;
}

/// The machine the server runs on. Lookups go through `getent` and `id`,
/// mutations through the platform's user administration tools.
pub struct HostSystem {
    timeout: Duration,
    counter: AtomicU64,
}

impl HostSystem {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            counter: AtomicU64::new(0),
        }
    }

    async fn run(&self, command: &PosixCommand) -> Result<Output, ReconcilerError> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, command = %command, "Running host command");

        let child = Command::new(&command.program)
            .args(&command.args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| ReconcilerError::Timeout(command.render()))?
            .map_err(|source| ReconcilerError::Spawn {
                command: command.render(),
                source,
            })?;

        tracing::debug!(
            id,
            status = output.status.code().unwrap_or(-1),
            "Host command finished"
        );
        Ok(output)
    }

    /// Stdout of a lookup command, `None` when it exits non-zero.
    async fn query(&self, program: &str, args: &[&str]) -> Result<Option<String>, ReconcilerError> {
        let output = self.run(&PosixCommand::new(program, args.iter().copied())).await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}

/// Parses one `getent passwd` line: `name:x:uid:gid:gecos:home:shell`.
pub(crate) fn parse_passwd(line: &str) -> Option<(String, String, String)> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 7 {
        return None;
    }
    Some((
        fields[0].to_string(),
        fields[4].to_string(),
        fields[5].to_string(),
    ))
}

#[async_trait]
impl HostInventory for HostSystem {
    async fn lookup_user(&self, name: &str) -> Result<Option<HostAccount>, ReconcilerError> {
        let Some(passwd) = self.query("getent", &["passwd", name]).await? else {
            return Ok(None);
        };
        let (name, comment, home) = parse_passwd(&passwd)
            .ok_or_else(|| ReconcilerError::Lookup(format!("malformed passwd entry for {}", name)))?;

        let primary_group = self
            .query("id", &["-gn", name.as_str()])
            .await?
            .ok_or_else(|| ReconcilerError::Lookup(format!("no primary group for {}", name)))?;
        let groups = self
            .query("id", &["-Gn", name.as_str()])
            .await?
            .unwrap_or_default()
            .split_whitespace()
            .filter(|g| *g != primary_group)
            .map(str::to_string)
            .collect();

        Ok(Some(HostAccount {
            name,
            home,
            comment,
            primary_group,
            groups,
        }))
    }

    async fn group_exists(&self, name: &str) -> Result<bool, ReconcilerError> {
        Ok(self.query("getent", &["group", name]).await?.is_some())
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, ReconcilerError> {
        Ok(tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }
}

#[async_trait]
impl CommandExecutor for HostSystem {
    async fn execute(&self, command: &PosixCommand) -> Result<(), ReconcilerError> {
        let output = self.run(command).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(ReconcilerError::CommandFailed {
            command: command.render(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
