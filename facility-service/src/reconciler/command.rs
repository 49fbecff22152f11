use serde::Serialize;
use std::fmt;

/// One host mutation: a program and its argument vector.
///
/// Arguments are passed to the program directly, never through a shell; the
/// quoted form produced by [`PosixCommand::render`] is for operators only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PosixCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Failure is logged and ignored instead of aborting the request.
    pub best_effort: bool,
}

impl PosixCommand {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            best_effort: false,
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn render(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for PosixCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c)
}

pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_shell_safe) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_arguments_are_unquoted() {
        let cmd = PosixCommand::new("useradd", ["-m", "-d", "/home/bob", "bob"]);
        assert_eq!(cmd.render(), "useradd -m -d /home/bob bob");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("Bob Smith"), "'Bob Smith'");
        assert_eq!(shell_quote("O'Neil"), r"'O'\''Neil'");
        assert_eq!(shell_quote("a,b"), "a,b");
    }

    #[test]
    fn test_best_effort_flag() {
        let cmd = PosixCommand::new("groupdel", ["bob"]).best_effort();
        assert!(cmd.best_effort);
        assert_eq!(cmd.to_string(), "groupdel bob");
    }
}
