use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{HostAccount, PosixCommand, ReconcilerError};

/// Host state the queued commands will produce once executed. Lookups
/// consult this overlay before asking the host.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub accounts: HashMap<String, Option<HostAccount>>,
    pub groups: HashMap<String, bool>,
    pub dirs: HashMap<String, bool>,
    /// Old group name to new group name.
    pub renamed_groups: HashMap<String, String>,
}

impl Plan {
    /// Applies planned group renames and deletions to an account read from
    /// the host.
    pub fn overlay(&self, mut account: HostAccount) -> HostAccount {
        let groups: BTreeSet<String> = account
            .groups
            .iter()
            .map(|g| self.renamed_groups.get(g).cloned().unwrap_or_else(|| g.clone()))
            .filter(|g| self.groups.get(g) != Some(&false))
            .collect();
        account.groups = groups;
        if let Some(renamed) = self.renamed_groups.get(&account.primary_group) {
            account.primary_group = renamed.clone();
        }
        account
    }

    pub fn rename_group(&mut self, old: &str, new: &str) {
        self.groups.insert(old.to_string(), false);
        self.groups.insert(new.to_string(), true);
        self.renamed_groups.insert(old.to_string(), new.to_string());
        for account in self.accounts.values_mut().flatten() {
            if account.groups.remove(old) {
                account.groups.insert(new.to_string());
            }
            if account.primary_group == old {
                account.primary_group = new.to_string();
            }
        }
    }

    pub fn drop_group(&mut self, name: &str) {
        self.groups.insert(name.to_string(), false);
        for account in self.accounts.values_mut().flatten() {
            account.groups.remove(name);
        }
    }
}

/// Ordered host mutations of one request.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Vec<PosixCommand>,
    pub(crate) plan: Plan,
}

impl CommandQueue {
    pub fn push(&mut self, command: PosixCommand) {
        tracing::debug!(command = %command, "Host command queued");
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[PosixCommand] {
        &self.commands
    }

    pub fn take(&mut self) -> Vec<PosixCommand> {
        self.plan = Plan::default();
        std::mem::take(&mut self.commands)
    }
}

/// Open queues keyed by request id.
pub struct QueueRegistry {
    queues: DashMap<String, Arc<Mutex<CommandQueue>>>,
    synchronous: bool,
}

impl QueueRegistry {
    pub fn new(synchronous: bool) -> Self {
        Self {
            queues: DashMap::new(),
            synchronous,
        }
    }

    pub fn open(self: &Arc<Self>, request_id: &str) -> Result<QueueHandle, ReconcilerError> {
        if self.synchronous && !self.queues.is_empty() {
            return Err(ReconcilerError::QueueBusy);
        }

        let queue = Arc::new(Mutex::new(CommandQueue::default()));
        match self.queues.entry(request_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ReconcilerError::QueueBusy),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&queue));
                Ok(QueueHandle {
                    request_id: request_id.to_string(),
                    queue,
                    registry: Arc::clone(self),
                })
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.queues.len()
    }
}

/// Owner of one registered queue. Dropping the handle unregisters the queue
/// and discards whatever it still holds.
pub struct QueueHandle {
    request_id: String,
    queue: Arc<Mutex<CommandQueue>>,
    registry: Arc<QueueRegistry>,
}

impl QueueHandle {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut CommandQueue) -> R) -> R {
        let mut guard: MutexGuard<'_, CommandQueue> =
            self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl Drop for QueueHandle {
    fn drop(&mut self) {
        self.registry.queues.remove(&self.request_id);
    }
}

impl std::fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("request_id", &self.request_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queues_are_disjoint_per_request() {
        let registry = Arc::new(QueueRegistry::new(false));
        let a = registry.open("req-a").unwrap();
        let b = registry.open("req-b").unwrap();

        a.with(|q| q.push(PosixCommand::new("groupadd", ["alpha"])));
        assert_eq!(a.with(|q| q.len()), 1);
        assert!(b.with(|q| q.is_empty()));
        assert_eq!(registry.open_count(), 2);
    }

    #[test]
    fn test_duplicate_request_id_is_rejected() {
        let registry = Arc::new(QueueRegistry::new(false));
        let _a = registry.open("req").unwrap();
        assert!(matches!(registry.open("req"), Err(ReconcilerError::QueueBusy)));
    }

    #[test]
    fn test_synchronous_mode_fails_fast() {
        let registry = Arc::new(QueueRegistry::new(true));
        let first = registry.open("one").unwrap();
        assert!(matches!(registry.open("two"), Err(ReconcilerError::QueueBusy)));

        drop(first);
        assert_eq!(registry.open_count(), 0);
        assert!(registry.open("two").is_ok());
    }

    #[test]
    fn test_take_preserves_insertion_order() {
        let mut queue = CommandQueue::default();
        queue.push(PosixCommand::new("groupadd", ["bob"]));
        queue.push(PosixCommand::new("useradd", ["bob"]));

        let programs: Vec<_> = queue.take().into_iter().map(|c| c.program).collect();
        assert_eq!(programs, vec!["groupadd", "useradd"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_plan_overlay_follows_renames() {
        let mut plan = Plan::default();
        plan.rename_group("old", "new");
        plan.drop_group("gone");

        let account = HostAccount {
            name: "u".to_string(),
            home: "/home/u".to_string(),
            comment: String::new(),
            primary_group: "u".to_string(),
            groups: ["old", "gone", "kept"].iter().map(|s| s.to_string()).collect(),
        };
        let seen = plan.overlay(account);
        let expected: BTreeSet<String> = ["new", "kept"].iter().map(|s| s.to_string()).collect();
        assert_eq!(seen.groups, expected);
    }
}
