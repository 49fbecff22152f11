//! Projection of users, groups and projects onto POSIX accounts, groups and
//! directories of the host.
//!
//! Entity mutations never touch the host directly. They describe the desired
//! change to a [`Projector`], which turns it into [`PosixCommand`]s appended
//! to the request's [`CommandQueue`]. The request pipeline decides what
//! happens to the queue once the handler returns: it is executed (active
//! mode), handed back to an operator (suggest mode) or never created
//! (disabled mode).

mod command;
mod fake;
mod host;
mod naming;
mod projector;
mod queue;

pub use command::{shell_quote, PosixCommand};
pub use fake::FakeHost;
pub use host::{CommandExecutor, HostAccount, HostInventory, HostSystem};
pub use naming::{DigestKind, PosixNaming};
pub use projector::{group_members, project_users, Projector};
pub use queue::{CommandQueue, QueueHandle, QueueRegistry};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::services::metrics;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("`{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{0}` timed out")]
    Timeout(String),

    #[error("another command queue is already open")]
    QueueBusy,

    #[error("host lookup failed: {0}")]
    Lookup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Disabled,
    Active,
    Suggest,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disabled" => Ok(Mode::Disabled),
            "active" => Ok(Mode::Active),
            "suggest" => Ok(Mode::Suggest),
            other => Err(format!("Unknown POSIX mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PosixSettings {
    pub mode: Mode,
    /// Allow at most one open command queue per process.
    pub synchronous: bool,
    pub naming: PosixNaming,
    pub shell: String,
    pub command_timeout: Duration,
}

pub struct Reconciler {
    settings: PosixSettings,
    inventory: Arc<dyn HostInventory>,
    executor: Arc<dyn CommandExecutor>,
    queues: Arc<QueueRegistry>,
}

impl Reconciler {
    pub fn new(
        settings: PosixSettings,
        inventory: Arc<dyn HostInventory>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let queues = Arc::new(QueueRegistry::new(settings.synchronous));
        Self {
            settings,
            inventory,
            executor,
            queues,
        }
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    pub fn settings(&self) -> &PosixSettings {
        &self.settings
    }

    pub fn naming(&self) -> &PosixNaming {
        &self.settings.naming
    }

    pub fn inventory(&self) -> &dyn HostInventory {
        self.inventory.as_ref()
    }

    pub fn queues(&self) -> &Arc<QueueRegistry> {
        &self.queues
    }

    /// Projector for one request. In disabled mode no queue is opened.
    pub fn open(self: &Arc<Self>, request_id: &str) -> Result<Projector, ReconcilerError> {
        let queue = match self.settings.mode {
            Mode::Disabled => None,
            Mode::Active | Mode::Suggest => Some(self.queues.open(request_id)?),
        };
        Ok(Projector::new(Arc::clone(self), queue))
    }

    /// Runs commands in order. A failing command aborts the run unless it
    /// is marked best-effort.
    pub async fn execute(&self, commands: &[PosixCommand]) -> Result<(), ReconcilerError> {
        for command in commands {
            match self.executor.execute(command).await {
                Ok(()) => {
                    metrics::record_host_command("ok");
                    tracing::info!(command = %command, "Host command executed");
                }
                Err(e) if command.best_effort => {
                    metrics::record_host_command("ignored");
                    tracing::warn!(command = %command, error = %e, "Best-effort host command failed");
                }
                Err(e) => {
                    metrics::record_host_command("failed");
                    tracing::error!(command = %command, error = %e, "Host command failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
