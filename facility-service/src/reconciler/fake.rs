use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CommandExecutor, HostAccount, HostInventory, PosixCommand, ReconcilerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDir {
    pub owner: String,
    pub mode: String,
}

#[derive(Debug, Default)]
struct FakeHostState {
    accounts: BTreeMap<String, HostAccount>,
    groups: BTreeSet<String>,
    dirs: BTreeMap<String, FakeDir>,
    executed: Vec<String>,
    fail_on: Option<String>,
}

/// In-memory host that interprets the user administration commands the
/// projector emits, for tests and local development.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<FakeHostState>>,
}

type Outcome = Result<(), (i32, String)>;

fn fail(status: i32, message: impl Into<String>) -> Outcome {
    Err((status, message.into()))
}

/// Splits `args` into option values and trailing operands. Options listed in
/// `flags` take no value.
fn parse_args<'a>(args: &'a [String], flags: &[&str]) -> (BTreeMap<&'a str, &'a str>, Vec<&'a str>) {
    let mut options = BTreeMap::new();
    let mut operands = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with('-') && arg.len() > 1 {
            if flags.contains(&arg.as_str()) {
                options.insert(arg.as_str(), "");
            } else {
                let value = iter.next().map(String::as_str).unwrap_or("");
                options.insert(arg.as_str(), value);
            }
        } else {
            operands.push(arg.as_str());
        }
    }
    (options, operands)
}

impl FakeHostState {
    fn apply(&mut self, command: &PosixCommand) -> Outcome {
        if let Some(pattern) = &self.fail_on {
            if command.render().contains(pattern.as_str()) {
                return fail(1, format!("injected failure on {}", pattern));
            }
        }

        match command.program.as_str() {
            "groupadd" => self.groupadd(&command.args),
            "groupdel" => self.groupdel(&command.args),
            "groupmod" => self.groupmod(&command.args),
            "useradd" => self.useradd(&command.args),
            "usermod" => self.usermod(&command.args),
            "userdel" => self.userdel(&command.args),
            "mkdir" => self.mkdir(&command.args),
            "chown" => self.chown(&command.args),
            "chmod" => self.chmod(&command.args),
            "mv" => self.mv(&command.args),
            "rm" => self.rm(&command.args),
            other => fail(127, format!("{}: command not found", other)),
        }
    }

    fn groupadd(&mut self, args: &[String]) -> Outcome {
        let (_, operands) = parse_args(args, &[]);
        let [name] = operands.as_slice() else {
            return fail(2, "usage: groupadd NAME");
        };
        if !self.groups.insert(name.to_string()) {
            return fail(9, format!("group '{}' already exists", name));
        }
        Ok(())
    }

    fn groupdel(&mut self, args: &[String]) -> Outcome {
        let (_, operands) = parse_args(args, &[]);
        let [name] = operands.as_slice() else {
            return fail(2, "usage: groupdel NAME");
        };
        if self.accounts.values().any(|a| a.primary_group == *name) {
            return fail(8, format!("cannot remove the primary group of a user: {}", name));
        }
        if !self.groups.remove(*name) {
            return fail(6, format!("group '{}' does not exist", name));
        }
        for account in self.accounts.values_mut() {
            account.groups.remove(*name);
        }
        Ok(())
    }

    fn groupmod(&mut self, args: &[String]) -> Outcome {
        let (options, operands) = parse_args(args, &[]);
        let ([old], Some(new)) = (operands.as_slice(), options.get("-n")) else {
            return fail(2, "usage: groupmod -n NEW OLD");
        };
        if !self.groups.contains(*old) {
            return fail(6, format!("group '{}' does not exist", old));
        }
        if self.groups.contains(*new) {
            return fail(9, format!("group '{}' already exists", new));
        }
        self.groups.remove(*old);
        self.groups.insert(new.to_string());
        for account in self.accounts.values_mut() {
            if account.groups.remove(*old) {
                account.groups.insert(new.to_string());
            }
            if account.primary_group == *old {
                account.primary_group = new.to_string();
            }
        }
        Ok(())
    }

    fn useradd(&mut self, args: &[String]) -> Outcome {
        let (options, operands) = parse_args(args, &["-m"]);
        let [name] = operands.as_slice() else {
            return fail(2, "usage: useradd [options] NAME");
        };
        if self.accounts.contains_key(*name) {
            return fail(9, format!("user '{}' already exists", name));
        }
        let primary_group = options.get("-g").copied().unwrap_or(*name);
        if !self.groups.contains(primary_group) {
            return fail(6, format!("group '{}' does not exist", primary_group));
        }
        let home = options
            .get("-d")
            .map(|d| d.to_string())
            .unwrap_or_else(|| format!("/home/{}", name));
        if options.contains_key("-m") {
            self.dirs.insert(
                home.clone(),
                FakeDir {
                    owner: format!("{}:{}", name, primary_group),
                    mode: "0700".to_string(),
                },
            );
        }
        self.accounts.insert(
            name.to_string(),
            HostAccount {
                name: name.to_string(),
                home,
                comment: options.get("-c").copied().unwrap_or("").to_string(),
                primary_group: primary_group.to_string(),
                groups: BTreeSet::new(),
            },
        );
        Ok(())
    }

    fn usermod(&mut self, args: &[String]) -> Outcome {
        let (options, operands) = parse_args(args, &["-m"]);
        let [name] = operands.as_slice() else {
            return fail(2, "usage: usermod [options] NAME");
        };
        let Some(mut account) = self.accounts.remove(*name) else {
            return fail(6, format!("user '{}' does not exist", name));
        };

        if let Some(list) = options.get("-G") {
            let groups: BTreeSet<String> = list
                .split(',')
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect();
            if let Some(missing) = groups.iter().find(|g| !self.groups.contains(*g)) {
                let message = format!("group '{}' does not exist", missing);
                self.accounts.insert(name.to_string(), account);
                return fail(6, message);
            }
            account.groups = groups;
        }
        if let Some(comment) = options.get("-c") {
            account.comment = comment.to_string();
        }
        if let Some(home) = options.get("-d") {
            if options.contains_key("-m") {
                if let Some(dir) = self.dirs.remove(&account.home) {
                    self.dirs.insert(home.to_string(), dir);
                }
            }
            account.home = home.to_string();
        }
        if let Some(login) = options.get("-l") {
            if self.accounts.contains_key(*login) {
                self.accounts.insert(name.to_string(), account);
                return fail(9, format!("user '{}' already exists", login));
            }
            account.name = login.to_string();
        }
        self.accounts.insert(account.name.clone(), account);
        Ok(())
    }

    fn userdel(&mut self, args: &[String]) -> Outcome {
        let (_, operands) = parse_args(args, &["-r", "-f", "-rf"]);
        let [name] = operands.as_slice() else {
            return fail(2, "usage: userdel -rf NAME");
        };
        let Some(account) = self.accounts.remove(*name) else {
            return fail(6, format!("user '{}' does not exist", name));
        };
        self.dirs.remove(&account.home);
        Ok(())
    }

    fn mkdir(&mut self, args: &[String]) -> Outcome {
        let (_, operands) = parse_args(args, &["-p"]);
        for path in operands {
            self.dirs.entry(path.to_string()).or_insert_with(|| FakeDir {
                owner: "root:root".to_string(),
                mode: "0755".to_string(),
            });
        }
        Ok(())
    }

    fn chown(&mut self, args: &[String]) -> Outcome {
        let (_, operands) = parse_args(args, &[]);
        let [owner, path] = operands.as_slice() else {
            return fail(2, "usage: chown OWNER PATH");
        };
        if let Some((_, group)) = owner.split_once(':') {
            if !self.groups.contains(group) {
                return fail(1, format!("invalid group: '{}'", owner));
            }
        }
        match self.dirs.get_mut(*path) {
            Some(dir) => {
                dir.owner = owner.to_string();
                Ok(())
            }
            None => fail(1, format!("cannot access '{}'", path)),
        }
    }

    fn chmod(&mut self, args: &[String]) -> Outcome {
        let (_, operands) = parse_args(args, &[]);
        let [mode, path] = operands.as_slice() else {
            return fail(2, "usage: chmod MODE PATH");
        };
        match self.dirs.get_mut(*path) {
            Some(dir) => {
                dir.mode = mode.to_string();
                Ok(())
            }
            None => fail(1, format!("cannot access '{}'", path)),
        }
    }

    fn mv(&mut self, args: &[String]) -> Outcome {
        let (_, operands) = parse_args(args, &[]);
        let [from, to] = operands.as_slice() else {
            return fail(2, "usage: mv FROM TO");
        };
        match self.dirs.remove(*from) {
            Some(dir) => {
                self.dirs.insert(to.to_string(), dir);
                Ok(())
            }
            None => fail(1, format!("cannot stat '{}'", from)),
        }
    }

    fn rm(&mut self, args: &[String]) -> Outcome {
        let (_, operands) = parse_args(args, &["-r", "-f", "-rf"]);
        for path in operands {
            let prefix = format!("{}/", path);
            self.dirs.retain(|p, _| p != path && !p.starts_with(&prefix));
        }
        Ok(())
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeHostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every command whose rendered form contains `pattern` fail.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.state().fail_on = Some(pattern.into());
    }

    pub fn clear_failure(&self) {
        self.state().fail_on = None;
    }

    /// Rendered commands that completed successfully, oldest first.
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    pub fn account(&self, name: &str) -> Option<HostAccount> {
        self.state().accounts.get(name).cloned()
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.state().groups.contains(name)
    }

    pub fn dir(&self, path: &str) -> Option<FakeDir> {
        self.state().dirs.get(path).cloned()
    }
}

#[async_trait]
impl HostInventory for FakeHost {
    async fn lookup_user(&self, name: &str) -> Result<Option<HostAccount>, ReconcilerError> {
        Ok(self.account(name))
    }

    async fn group_exists(&self, name: &str) -> Result<bool, ReconcilerError> {
        Ok(self.has_group(name))
    }

    async fn dir_exists(&self, path: &str) -> Result<bool, ReconcilerError> {
        Ok(self.dir(path).is_some())
    }
}

#[async_trait]
impl CommandExecutor for FakeHost {
    async fn execute(&self, command: &PosixCommand) -> Result<(), ReconcilerError> {
        let mut state = self.state();
        match state.apply(command) {
            Ok(()) => {
                state.executed.push(command.render());
                Ok(())
            }
            Err((status, stderr)) => Err(ReconcilerError::CommandFailed {
                command: command.render(),
                status,
                stderr,
            }),
        }
    }
}
