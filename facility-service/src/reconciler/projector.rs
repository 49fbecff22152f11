use std::collections::BTreeSet;
use std::sync::Arc;

use super::{HostAccount, Mode, PosixCommand, QueueHandle, Reconciler, ReconcilerError};
use crate::models::{AccessLevel, GroupMember, Permission, Project, User};
use crate::services::ServiceError;
use crate::store::{Direction, Query, Tx};

/// Per-request front end of the reconciler.
///
/// Every method compares the desired host state with what the host (plus
/// the commands already queued by this request) holds, and queues only the
/// difference. Without a queue, i.e. in disabled mode, every method is a
/// no-op.
pub struct Projector {
    reconciler: Arc<Reconciler>,
    queue: Option<QueueHandle>,
}

impl Projector {
    pub(super) fn new(reconciler: Arc<Reconciler>, queue: Option<QueueHandle>) -> Self {
        Self { reconciler, queue }
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.is_some()
    }

    pub fn mode(&self) -> Mode {
        self.reconciler.mode()
    }

    pub fn pending(&self) -> usize {
        self.queue.as_ref().map(|q| q.with(|q| q.len())).unwrap_or(0)
    }

    /// Drains the queue, leaving it registered until the projector drops.
    pub fn take_commands(&self) -> Vec<PosixCommand> {
        self.queue
            .as_ref()
            .map(|q| q.with(|q| q.take()))
            .unwrap_or_default()
    }

    fn push(&self, command: PosixCommand) {
        if let Some(queue) = &self.queue {
            queue.with(|q| q.push(command));
        }
    }

    fn plan<R>(&self, f: impl FnOnce(&mut super::queue::Plan) -> R) -> Option<R> {
        self.queue.as_ref().map(|q| q.with(|q| f(&mut q.plan)))
    }

    async fn account(&self, name: &str) -> Result<Option<HostAccount>, ReconcilerError> {
        // A planned removal is `Some(None)` and hides the host's account.
        if let Some(planned) = self.plan(|p| p.accounts.get(name).cloned()).flatten() {
            return Ok(planned);
        }
        let found = self.reconciler.inventory().lookup_user(name).await?;
        Ok(match found {
            Some(account) => self.plan(|p| p.overlay(account.clone())).or(Some(account)),
            None => None,
        })
    }

    async fn group_exists(&self, name: &str) -> Result<bool, ReconcilerError> {
        if let Some(planned) = self.plan(|p| p.groups.get(name).copied()).flatten() {
            return Ok(planned);
        }
        self.reconciler.inventory().group_exists(name).await
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, ReconcilerError> {
        if let Some(planned) = self.plan(|p| p.dirs.get(path).copied()).flatten() {
            return Ok(planned);
        }
        self.reconciler.inventory().dir_exists(path).await
    }

    /// Fills in the reconciler-owned name fields of a user.
    pub fn assign_user_names(&self, user: &mut User) {
        if !self.is_enabled() {
            return;
        }
        let naming = self.reconciler.naming();
        let account = naming.account_name(user.login());
        let home = naming.home_dir(&account);
        user.assign_posix(Some(account), Some(home));
    }

    pub fn assign_project_names(&self, project: &mut Project) {
        if !self.is_enabled() {
            return;
        }
        let naming = self.reconciler.naming();
        let group = naming.project_group(project.alias());
        let dir = naming.project_dir(&group);
        project.assign_posix(Some(group), Some(dir));
    }

    /// Account and primary group of a user. Existing accounts are left
    /// alone apart from their comment.
    pub async fn user_created(&self, user: &User) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let (Some(name), Some(home)) = (user.unix_group(), user.home_dir()) else {
            return Ok(());
        };

        let comment = user.display_name();
        if let Some(account) = self.account(name).await? {
            tracing::debug!(account = name, "Host account already exists");
            if account.comment != comment {
                self.set_comment(account, &comment);
            }
            return Ok(());
        }

        if !self.group_exists(name).await? {
            self.push(PosixCommand::new("groupadd", [name]));
            self.plan(|p| p.groups.insert(name.to_string(), true));
        }
        self.push(PosixCommand::new(
            "useradd",
            [
                "-m",
                "-d",
                home,
                "-g",
                name,
                "-s",
                self.reconciler.settings().shell.as_str(),
                "-c",
                comment.as_str(),
                name,
            ],
        ));
        self.plan(|p| {
            p.dirs.insert(home.to_string(), true);
            p.accounts.insert(
                name.to_string(),
                Some(HostAccount {
                    name: name.to_string(),
                    home: home.to_string(),
                    comment: comment.clone(),
                    primary_group: name.to_string(),
                    groups: BTreeSet::new(),
                }),
            );
        });
        Ok(())
    }

    fn set_comment(&self, mut account: HostAccount, comment: &str) {
        self.push(PosixCommand::new(
            "usermod",
            ["-c", comment, account.name.as_str()],
        ));
        account.comment = comment.to_string();
        self.plan(|p| p.accounts.insert(account.name.clone(), Some(account)));
    }

    /// Moves the account of `previous` to the login of `user`. The user's
    /// name fields are reassigned.
    pub async fn user_renamed(&self, previous: &User, user: &mut User) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.assign_user_names(user);
        let (Some(old), Some(new), Some(new_home)) =
            (previous.unix_group(), user.unix_group(), user.home_dir())
        else {
            return self.user_created(user).await;
        };
        if old == new {
            return self.user_changed(user).await;
        }

        let Some(mut account) = self.account(old).await? else {
            return self.user_created(user).await;
        };

        self.push(PosixCommand::new(
            "usermod",
            ["-l", new, "-d", new_home, "-m", old],
        ));
        if self.group_exists(old).await? {
            self.push(PosixCommand::new("groupmod", ["-n", new, old]));
            self.plan(|p| p.rename_group(old, new));
            account.primary_group = new.to_string();
        }

        let old_home = std::mem::replace(&mut account.home, new_home.to_string());
        account.name = new.to_string();
        self.plan(|p| {
            p.accounts.insert(old.to_string(), None);
            p.accounts.insert(new.to_string(), Some(account));
            p.dirs.insert(old_home, false);
            p.dirs.insert(new_home.to_string(), true);
        });
        self.user_changed(user).await
    }

    /// Brings the account comment in line with the user's display name.
    pub async fn user_changed(&self, user: &User) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let Some(name) = user.unix_group() else {
            return Ok(());
        };
        if let Some(account) = self.account(name).await? {
            let comment = user.display_name();
            if account.comment != comment {
                self.set_comment(account, &comment);
            }
        }
        Ok(())
    }

    pub async fn user_deleted(&self, user: &User) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let Some(name) = user.unix_group() else {
            return Ok(());
        };
        if let Some(account) = self.account(name).await? {
            self.push(PosixCommand::new("userdel", ["-rf", name]));
            self.plan(|p| {
                p.accounts.insert(name.to_string(), None);
                p.dirs.insert(account.home, false);
            });
        }
        if self.group_exists(name).await? {
            self.push(PosixCommand::new("groupdel", [name]).best_effort());
            self.plan(|p| p.drop_group(name));
        }
        Ok(())
    }

    async fn ensure_project(&self, project: &Project) -> Result<(), ServiceError> {
        let (Some(group), Some(dir)) = (project.unix_group(), project.project_dir()) else {
            return Ok(());
        };
        if !self.group_exists(group).await? {
            self.push(PosixCommand::new("groupadd", [group]));
            self.plan(|p| p.groups.insert(group.to_string(), true));
        }
        if !self.dir_exists(dir).await? {
            let owner = format!("root:{}", group);
            self.push(PosixCommand::new("mkdir", ["-p", dir]));
            self.push(PosixCommand::new("chown", [owner.as_str(), dir]));
            self.push(PosixCommand::new("chmod", ["2770", dir]));
            self.plan(|p| p.dirs.insert(dir.to_string(), true));
        }
        Ok(())
    }

    /// Group and directory of a new project, then the memberships it grants.
    pub async fn project_created(&self, tx: &mut Tx, project: &Project) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.ensure_project(project).await?;
        self.sync_project_members(tx, project.id()).await
    }

    /// Renames the group and moves the directory after an alias change. The
    /// project's name fields are reassigned.
    pub async fn project_renamed(&self, previous: &Project, project: &mut Project) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.assign_project_names(project);
        let (Some(old_group), Some(old_dir)) = (previous.unix_group(), previous.project_dir()) else {
            return self.ensure_project(project).await;
        };
        let (Some(group), Some(dir)) = (project.unix_group(), project.project_dir()) else {
            return Ok(());
        };

        if old_group != group && self.group_exists(old_group).await? {
            self.push(PosixCommand::new("groupmod", ["-n", group, old_group]));
            self.plan(|p| p.rename_group(old_group, group));
        }
        if old_dir != dir && self.dir_exists(old_dir).await? {
            self.push(PosixCommand::new("mv", [old_dir, dir]));
            self.plan(|p| {
                p.dirs.insert(old_dir.to_string(), false);
                p.dirs.insert(dir.to_string(), true);
            });
        }
        self.ensure_project(project).await
    }

    pub async fn project_deleted(&self, project: &Project) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let (Some(group), Some(dir)) = (project.unix_group(), project.project_dir()) else {
            return Ok(());
        };
        if self.group_exists(group).await? {
            self.push(PosixCommand::new("groupdel", [group]));
            self.plan(|p| p.drop_group(group));
        }
        if self.dir_exists(dir).await? {
            self.push(PosixCommand::new("rm", ["-rf", dir]));
            self.plan(|p| p.dirs.insert(dir.to_string(), false));
        }
        Ok(())
    }

    /// Project groups a user should belong to: every project whose root
    /// group contains the user or on which one of the user's groups holds a
    /// level other than `no_access`.
    async fn desired_groups(&self, tx: &mut Tx, user_id: i64) -> Result<BTreeSet<String>, ServiceError> {
        let group_ids: Vec<i64> = tx
            .list::<GroupMember>(Query::new().eq("user_id", user_id))
            .await?
            .into_iter()
            .map(|m| m.group_id)
            .collect();
        if group_ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let mut project_ids: BTreeSet<i64> = tx
            .list::<Permission>(
                Query::new()
                    .is_in("group_id", group_ids.iter().copied())
                    .ne("access_level", AccessLevel::NoAccess.alias()),
            )
            .await?
            .into_iter()
            .map(|p| p.project_id())
            .collect();
        project_ids.extend(
            tx.list::<Project>(Query::new().is_in("root_group_id", group_ids.iter().copied()))
                .await?
                .into_iter()
                .map(|p| p.id()),
        );
        if project_ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let mut groups = BTreeSet::new();
        for project in tx
            .list::<Project>(Query::new().is_in("id", project_ids))
            .await?
        {
            if let Some(group) = project.unix_group() {
                if self.group_exists(group).await? {
                    groups.insert(group.to_string());
                }
            }
        }
        Ok(groups)
    }

    /// Rewrites the supplementary group list of one user when it differs
    /// from the desired one. Users without a host account are skipped.
    pub async fn sync_user_groups(&self, tx: &mut Tx, user_id: i64) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let Some(user) = tx.find::<User>(user_id).await? else {
            return Ok(());
        };
        let Some(name) = user.unix_group() else {
            return Ok(());
        };
        let Some(mut account) = self.account(name).await? else {
            tracing::debug!(account = name, "No host account, membership sync skipped");
            return Ok(());
        };

        let desired = self.desired_groups(tx, user_id).await?;
        if account.groups == desired {
            return Ok(());
        }

        let list = desired.iter().cloned().collect::<Vec<_>>().join(",");
        self.push(PosixCommand::new("usermod", ["-G", list.as_str(), name]));
        account.groups = desired;
        self.plan(|p| p.accounts.insert(name.to_string(), Some(account)));
        Ok(())
    }

    pub async fn sync_users(&self, tx: &mut Tx, user_ids: &BTreeSet<i64>) -> Result<(), ServiceError> {
        for &user_id in user_ids {
            self.sync_user_groups(tx, user_id).await?;
        }
        Ok(())
    }

    pub async fn sync_group_members(&self, tx: &mut Tx, group_id: i64) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let members = group_members(tx, &[group_id]).await?;
        self.sync_users(tx, &members).await
    }

    pub async fn sync_project_members(&self, tx: &mut Tx, project_id: i64) -> Result<(), ServiceError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let members = project_users(tx, project_id).await?;
        self.sync_users(tx, &members).await
    }

    /// Recomputes the whole host layout from the database. Returns the
    /// number of commands queued; a second run right after executing the
    /// first queues none.
    pub async fn reconcile_all(&self, tx: &mut Tx) -> Result<usize, ServiceError> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let before = self.pending();

        let users = tx
            .list::<User>(Query::new().order_by("id", Direction::Asc))
            .await?;
        for mut user in users {
            if user.unix_group().is_none() || user.home_dir().is_none() {
                self.assign_user_names(&mut user);
                tx.update(&user).await?;
            }
            self.user_created(&user).await?;
        }

        let projects = tx
            .list::<Project>(Query::new().order_by("id", Direction::Asc))
            .await?;
        for mut project in projects {
            if project.unix_group().is_none() || project.project_dir().is_none() {
                self.assign_project_names(&mut project);
                tx.update(&project).await?;
            }
            self.ensure_project(&project).await?;
        }

        let user_ids: BTreeSet<i64> = tx
            .list::<User>(Query::new())
            .await?
            .iter()
            .map(User::id)
            .collect();
        self.sync_users(tx, &user_ids).await?;

        let queued = self.pending() - before;
        tracing::info!(queued, "Host reconciliation planned");
        Ok(queued)
    }
}

/// Users belonging to any of the given groups.
pub async fn group_members(tx: &mut Tx, group_ids: &[i64]) -> Result<BTreeSet<i64>, ServiceError> {
    if group_ids.is_empty() {
        return Ok(BTreeSet::new());
    }
    Ok(tx
        .list::<GroupMember>(Query::new().is_in("group_id", group_ids.iter().copied()))
        .await?
        .into_iter()
        .map(|m| m.user_id)
        .collect())
}

/// Users whose host groups depend on a project: members of its root group
/// and of every group holding a permission on it.
pub async fn project_users(tx: &mut Tx, project_id: i64) -> Result<BTreeSet<i64>, ServiceError> {
    let Some(project) = tx.find::<Project>(project_id).await? else {
        return Ok(BTreeSet::new());
    };
    let mut group_ids: Vec<i64> = tx
        .list::<Permission>(Query::new().eq("project_id", project_id))
        .await?
        .into_iter()
        .map(|p| p.group_id())
        .collect();
    group_ids.push(project.root_group_id());
    group_members(tx, &group_ids).await
}
