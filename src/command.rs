/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Exit code reported when an external program cannot be found or started.
pub const EXIT_NOT_FOUND: ExitCode = 127;

/// Exit code reported for a failed builtin or plugin command.
pub const EXIT_FAILURE: ExitCode = 1;

/// A single parsed input line: the command name and its arguments.
///
/// Commands are immutable once parsed. An empty `name` means the line held
/// nothing to run and the dispatcher must skip it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// True when the line contained no command at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Arguments as borrowed strings, the shape `argh` expects.
    pub fn args_ref(&self) -> Vec<&str> {
        self.args.iter().map(String::as_str).collect()
    }

    /// Arguments joined back with single spaces.
    pub fn args_line(&self) -> String {
        self.args.join(" ")
    }

    /// Maps a success flag to the exit code the shell records for it.
    pub fn exit_code_for(success: bool) -> ExitCode {
        if success { 0 } else { EXIT_FAILURE }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_command_is_empty() {
        assert!(Command::default().is_empty());
        assert!(!Command::new("ls", vec![]).is_empty());
    }

    #[test]
    fn args_line_joins_with_single_spaces() {
        let cmd = Command::new("echo", vec!["a".into(), "b".into()]);
        assert_eq!(cmd.args_line(), "a b");
        assert_eq!(cmd.args_ref(), vec!["a", "b"]);
    }

    #[test]
    fn success_maps_to_zero_and_failure_to_one() {
        assert_eq!(Command::exit_code_for(true), 0);
        assert_eq!(Command::exit_code_for(false), 1);
    }
}
