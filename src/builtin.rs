use crate::command::{Command, EXIT_FAILURE, ExitCode};
use crate::config::{expand_tilde, home_dir, split_assignment, strip_quotes};
use crate::context::ShellContext;
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use std::collections::BTreeMap;
use std::env;
use std::io::Write;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// directly in-process, so every builtin understands `--help`.
pub trait BuiltinCommand: Sized + FromArgs {
    /// Return value follows shell conventions: 0 for success, non-zero for error.
    fn execute(self, out: &mut dyn Write, ctx: &mut ShellContext) -> Result<ExitCode>;
}

type RunFn = fn(&str, &[&str], &mut dyn Write, &mut ShellContext) -> Result<ExitCode>;

/// One row of the builtin dispatch table.
pub struct Builtin {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    run: RunFn,
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "cd",
        usage: "cd <directory>",
        description: "Change directory",
        run: run_operands::<Cd>,
    },
    Builtin {
        name: "pwd",
        usage: "pwd",
        description: "Print working directory",
        run: run::<Pwd>,
    },
    Builtin {
        name: "exit",
        usage: "exit",
        description: "Exit the shell",
        run: run::<Exit>,
    },
    Builtin {
        name: "help",
        usage: "help",
        description: "Show this help message",
        run: run::<Help>,
    },
    Builtin {
        name: "history",
        usage: "history",
        description: "Show command history",
        run: run::<History>,
    },
    Builtin {
        name: "env",
        usage: "env",
        description: "Display environment variables",
        run: run::<Env>,
    },
    Builtin {
        name: "clear",
        usage: "clear",
        description: "Clear the screen",
        run: run::<Clear>,
    },
    Builtin {
        name: "set",
        usage: "set [key [value...]]",
        description: "Show or change settings",
        run: run::<Set>,
    },
    Builtin {
        name: "alias",
        usage: "alias [name=command]",
        description: "Show or define aliases",
        run: run::<Alias>,
    },
    Builtin {
        name: "unalias",
        usage: "unalias <name>",
        description: "Remove an alias",
        run: run::<Unalias>,
    },
    Builtin {
        name: "theme",
        usage: "theme [name]",
        description: "List or switch prompt themes",
        run: run::<ThemeCmd>,
    },
    Builtin {
        name: "version",
        usage: "version",
        description: "Show version information",
        run: run::<Version>,
    },
];

/// The dispatch table, in `help` order.
pub fn builtins() -> &'static [Builtin] {
    BUILTINS
}

pub fn find_builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

pub fn is_builtin_command(name: &str) -> bool {
    find_builtin(name).is_some()
}

/// Run `cmd` if it names a builtin: `Some(0)` on success, `Some(1)` on
/// failure, `None` when there is no such builtin.
pub fn execute_builtin(
    cmd: &Command,
    out: &mut dyn Write,
    ctx: &mut ShellContext,
) -> Option<ExitCode> {
    let builtin = find_builtin(&cmd.name)?;
    let code = match (builtin.run)(builtin.name, &cmd.args_ref(), out, ctx) {
        Ok(0) => 0,
        Ok(_) => EXIT_FAILURE,
        Err(err) => {
            eprintln!("lynx: {:#}", err);
            EXIT_FAILURE
        }
    };
    out.flush().ok();
    Some(code)
}

fn run<T: BuiltinCommand>(
    name: &str,
    args: &[&str],
    out: &mut dyn Write,
    ctx: &mut ShellContext,
) -> Result<ExitCode> {
    match T::from_args(&[name], args) {
        Ok(cmd) => cmd.execute(out, ctx),
        Err(EarlyExit {
            output,
            status: Ok(()),
        }) => {
            write!(out, "{}", output)?;
            Ok(0)
        }
        Err(EarlyExit {
            output,
            status: Err(()),
        }) => Err(anyhow!("{}: {}", name, output.trim_end())),
    }
}

/// Like [`run`], but arguments are operands unless the first one asks for
/// help, so `cd -` reaches the command instead of being rejected as an option.
fn run_operands<T: BuiltinCommand>(
    name: &str,
    args: &[&str],
    out: &mut dyn Write,
    ctx: &mut ShellContext,
) -> Result<ExitCode> {
    match args.first() {
        Some(&"--help") | Some(&"help") | None => run::<T>(name, args, out, ctx),
        Some(_) => {
            let operands: Vec<&str> = std::iter::once("--").chain(args.iter().copied()).collect();
            run::<T>(name, &operands, out, ctx)
        }
    }
}

/// `Lynx Shell v1.0.0 (Linux)`
pub fn version_string() -> String {
    let platform = match env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        other => other,
    };
    format!("Lynx Shell v{} ({})", env!("CARGO_PKG_VERSION"), platform)
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional, greedy)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted, extra words are ignored.
    pub target: Vec<String>,
}

impl BuiltinCommand for Cd {
    fn execute(self, _out: &mut dyn Write, _ctx: &mut ShellContext) -> Result<ExitCode> {
        let (shown, target) = match self.target.first() {
            Some(t) if !t.is_empty() => (t.clone(), PathBuf::from(expand_tilde(t))),
            _ => {
                let home = home_dir().ok_or_else(|| anyhow!("cd: HOME not set"))?;
                (home.display().to_string(), home)
            }
        };
        if !target.exists() {
            bail!("cd: {}: No such file or directory", shown);
        }
        env::set_current_dir(&target).with_context(|| format!("cd: {}", shown))?;

        let pwd = env::current_dir().context("cd: can't read new directory")?;
        // SAFETY: the shell runs on a single thread.
        unsafe { env::set_var("PWD", pwd) };
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn execute(self, out: &mut dyn Write, ctx: &mut ShellContext) -> Result<ExitCode> {
        writeln!(out, "{}", ctx.current_dir().display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell after running shutdown hooks.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn execute(self, _out: &mut dyn Write, ctx: &mut ShellContext) -> Result<ExitCode> {
        ctx.request_exit();
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List the builtin commands.
pub struct Help {}

impl BuiltinCommand for Help {
    fn execute(self, out: &mut dyn Write, _ctx: &mut ShellContext) -> Result<ExitCode> {
        writeln!(out, "Lynx Shell - Available Commands:")?;
        for builtin in BUILTINS {
            writeln!(out, "  {:<22}- {}", builtin.usage, builtin.description)?;
        }
        writeln!(out)?;
        writeln!(out, "Configuration is loaded from ~/.lynx/ files at startup.")?;
        writeln!(
            out,
            "You can also run any external command available in your PATH."
        )?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the lines entered in this session, numbered from 1.
pub struct History {}

impl BuiltinCommand for History {
    fn execute(self, out: &mut dyn Write, ctx: &mut ShellContext) -> Result<ExitCode> {
        for (i, line) in ctx.history().iter().enumerate() {
            writeln!(out, "{}: {}", i + 1, line)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the process environment as KEY=VALUE, sorted by key.
pub struct Env {}

impl BuiltinCommand for Env {
    fn execute(self, out: &mut dyn Write, _ctx: &mut ShellContext) -> Result<ExitCode> {
        let vars: BTreeMap<String, String> = env::vars_os()
            .map(|(k, v)| {
                (
                    k.to_string_lossy().into_owned(),
                    v.to_string_lossy().into_owned(),
                )
            })
            .collect();
        for (key, value) in vars {
            writeln!(out, "{}={}", key, value)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Clear the terminal screen.
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn execute(self, out: &mut dyn Write, _ctx: &mut ShellContext) -> Result<ExitCode> {
        write!(out, "\x1b[2J\x1b[H")?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Show all settings, show one setting, or store `value` under `key`.
pub struct Set {
    #[argh(positional, greedy)]
    /// setting name followed by the words of its new value
    pub args: Vec<String>,
}

impl BuiltinCommand for Set {
    fn execute(self, out: &mut dyn Write, ctx: &mut ShellContext) -> Result<ExitCode> {
        match self.args.as_slice() {
            [] => {
                for (key, value) in ctx.config().iter() {
                    writeln!(out, "{}={}", key, value)?;
                }
            }
            [key] => {
                if !ctx.config().contains(key) {
                    bail!("set: {}: no such setting", key);
                }
                writeln!(out, "{}={}", key, ctx.config().get(key, ""))?;
            }
            [key, words @ ..] => {
                let value = words.join(" ");
                ctx.config_mut()
                    .set(key, &value)
                    .with_context(|| format!("set: {}", key))?;
                ctx.config().save()?;
            }
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Show aliases, or define one as `name=command`.
pub struct Alias {
    #[argh(positional, greedy)]
    /// alias definition `name=command`; the command may span several words
    pub definition: Vec<String>,
}

impl BuiltinCommand for Alias {
    fn execute(self, out: &mut dyn Write, ctx: &mut ShellContext) -> Result<ExitCode> {
        if self.definition.is_empty() {
            for (name, command) in ctx.aliases().iter() {
                writeln!(out, "{}='{}'", name, command)?;
            }
            return Ok(0);
        }

        let definition = self.definition.join(" ");
        let Some((name, command)) = split_assignment(&definition) else {
            return match ctx.aliases().get(&definition) {
                Some(command) => {
                    writeln!(out, "{}='{}'", definition, command)?;
                    Ok(0)
                }
                None => Err(anyhow!("alias: {}: not found", definition)),
            };
        };
        if name.is_empty() {
            bail!("alias: missing alias name");
        }
        ctx.aliases_mut().set(name, strip_quotes(command));
        ctx.aliases().save()?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Remove an alias.
pub struct Unalias {
    #[argh(positional)]
    /// alias to remove
    pub name: String,
}

impl BuiltinCommand for Unalias {
    fn execute(self, _out: &mut dyn Write, ctx: &mut ShellContext) -> Result<ExitCode> {
        if ctx.aliases_mut().remove(&self.name).is_none() {
            bail!("unalias: {}: not found", self.name);
        }
        ctx.aliases().save()?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List the available themes, or switch to one.
pub struct ThemeCmd {
    #[argh(positional)]
    /// theme to activate
    pub name: Option<String>,
}

impl BuiltinCommand for ThemeCmd {
    fn execute(self, out: &mut dyn Write, ctx: &mut ShellContext) -> Result<ExitCode> {
        let Some(name) = self.name else {
            let current = ctx.theme_name();
            writeln!(out, "Available themes:")?;
            for theme in ctx.themes().names() {
                if theme == current {
                    writeln!(out, "* {} (current)", theme)?;
                } else {
                    writeln!(out, "  {}", theme)?;
                }
            }
            return Ok(0);
        };

        if !ctx.themes().contains(&name) {
            bail!("theme: {}: no such theme", name);
        }
        ctx.config_mut().set("theme", &name)?;
        ctx.config().save()?;
        let message = format!("Theme changed to {}", name);
        writeln!(out, "{}", ctx.paint("info", &message))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Print the shell version.
pub struct Version {}

impl BuiltinCommand for Version {
    fn execute(self, out: &mut dyn Write, _ctx: &mut ShellContext) -> Result<ExitCode> {
        writeln!(out, "{}", version_string())?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::lock_current_dir;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn run_line(line: &str, ctx: &mut ShellContext) -> (Option<ExitCode>, String) {
        let cmd = crate::parser::parse_command(line);
        let mut out = Vec::new();
        let code = execute_builtin(&cmd, &mut out, ctx);
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn is_builtin_matches_dispatch_table() {
        let names: HashSet<_> = builtins().iter().map(|b| b.name).collect();
        assert_eq!(names.len(), builtins().len());
        for name in &names {
            assert!(is_builtin_command(name));
        }
        for name in ["ls", "echo", "", "CD", "plugins"] {
            assert!(!is_builtin_command(name));
        }
    }

    #[test]
    fn unknown_name_is_not_dispatched() {
        let mut ctx = ShellContext::in_memory();
        assert_eq!(run_line("ls -la", &mut ctx), (None, String::new()));
    }

    #[test]
    fn pwd_prints_current_dir() {
        let _lock = lock_current_dir();
        let mut ctx = ShellContext::in_memory();
        let cur = env::current_dir().unwrap();
        let (code, out) = run_line("pwd", &mut ctx);
        assert_eq!(code, Some(0));
        assert_eq!(out, format!("{}\n", cur.display()));
    }

    #[test]
    fn cd_changes_directory() {
        let _lock = lock_current_dir();
        let before = env::current_dir().unwrap();
        let dir = TempDir::new().unwrap();
        let target = fs::canonicalize(dir.path()).unwrap();
        let mut ctx = ShellContext::in_memory();

        let (code, _) = run_line(&format!("cd {}", target.display()), &mut ctx);
        let after = env::current_dir().unwrap();
        env::set_current_dir(&before).unwrap();

        assert_eq!(code, Some(0));
        assert_eq!(after, target);
    }

    #[test]
    fn cd_to_missing_dir_keeps_cwd_and_fails() {
        let _lock = lock_current_dir();
        let before = env::current_dir().unwrap();
        let mut ctx = ShellContext::in_memory();

        let (code, _) = run_line("cd /definitely/not/here/lynx", &mut ctx);

        assert_eq!(code, Some(EXIT_FAILURE));
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn cd_dash_is_a_missing_path_not_an_option() {
        let _lock = lock_current_dir();
        let before = env::current_dir().unwrap();
        let mut ctx = ShellContext::in_memory();

        let (code, _) = run_line("cd -", &mut ctx);

        assert_eq!(code, Some(EXIT_FAILURE));
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn cd_ignores_extra_words() {
        let _lock = lock_current_dir();
        let before = env::current_dir().unwrap();
        let dir = TempDir::new().unwrap();
        let target = fs::canonicalize(dir.path()).unwrap();
        let mut ctx = ShellContext::in_memory();

        let (code, _) = run_line(&format!("cd {} extra words", target.display()), &mut ctx);
        let after = env::current_dir().unwrap();
        env::set_current_dir(&before).unwrap();

        assert_eq!(code, Some(0));
        assert_eq!(after, target);
    }

    #[test]
    fn exit_requests_loop_end() {
        let mut ctx = ShellContext::in_memory();
        let (code, _) = run_line("exit 3", &mut ctx);
        assert_eq!(code, Some(0));
        assert!(ctx.should_exit());
    }

    #[test]
    fn history_is_numbered_from_one() {
        let mut ctx = ShellContext::in_memory();
        ctx.add_to_history("ls");
        ctx.add_to_history("history");
        let (_, out) = run_line("history", &mut ctx);
        assert_eq!(out, "1: ls\n2: history\n");
    }

    #[test]
    fn env_output_is_sorted() {
        let mut ctx = ShellContext::in_memory();
        let (code, out) = run_line("env", &mut ctx);
        assert_eq!(code, Some(0));
        let keys: Vec<&str> = out
            .lines()
            .filter_map(|l| l.split_once('=').map(|(k, _)| k))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn clear_writes_escape_sequence() {
        let mut ctx = ShellContext::in_memory();
        assert_eq!(
            run_line("clear", &mut ctx),
            (Some(0), "\x1b[2J\x1b[H".to_string())
        );
    }

    #[test]
    fn set_theme_then_theme_marks_current() {
        let mut ctx = ShellContext::in_memory();
        let (code, _) = run_line("set theme dark", &mut ctx);
        assert_eq!(code, Some(0));

        let (code, out) = run_line("theme", &mut ctx);
        assert_eq!(code, Some(0));
        assert!(out.contains("* dark (current)"), "got {out:?}");
        assert!(out.contains("  default\n"));
    }

    #[test]
    fn set_joins_value_words_and_validates() {
        let mut ctx = ShellContext::in_memory();
        run_line("set prompt_format {cwd} >>", &mut ctx);
        assert_eq!(ctx.config().get("prompt_format", ""), "{cwd} >>");

        let (code, _) = run_line("set history_size lots", &mut ctx);
        assert_eq!(code, Some(EXIT_FAILURE));
        assert_eq!(ctx.config().get("history_size", ""), "1000");

        let (_, out) = run_line("set history_size", &mut ctx);
        assert_eq!(out, "history_size=1000\n");
        assert_eq!(run_line("set nope", &mut ctx).0, Some(EXIT_FAILURE));
    }

    #[test]
    fn theme_switch_rejects_unknown_names() {
        let mut ctx = ShellContext::in_memory();
        assert_eq!(run_line("theme neon", &mut ctx).0, Some(EXIT_FAILURE));
        assert_eq!(run_line("theme rainbow", &mut ctx).0, Some(0));
        assert_eq!(ctx.theme_name(), "rainbow");
    }

    #[test]
    fn alias_define_list_and_remove() {
        let mut ctx = ShellContext::in_memory();
        let (code, _) = run_line("alias gs=\"git status -s\"", &mut ctx);
        assert_eq!(code, Some(0));
        assert_eq!(ctx.aliases().get("gs"), Some("git status -s"));

        let (_, out) = run_line("alias", &mut ctx);
        assert!(out.contains("gs='git status -s'\n"));
        assert!(out.contains("ll='ls -la'\n"));

        assert_eq!(run_line("unalias gs", &mut ctx).0, Some(0));
        assert_eq!(ctx.aliases().get("gs"), None);
        assert_eq!(run_line("unalias gs", &mut ctx).0, Some(EXIT_FAILURE));
    }

    #[test]
    fn alias_help_describes_the_definition() {
        let mut ctx = ShellContext::in_memory();
        let (code, out) = run_line("alias --help", &mut ctx);
        assert_eq!(code, Some(0));
        assert!(out.contains("alias definition `name=command`"));
    }

    #[test]
    fn alias_persists_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aliases");
        let mut ctx = ShellContext::in_memory();
        *ctx.aliases_mut() = crate::alias::AliasManager::load_or_default(&path).unwrap();

        run_line("alias up=cd ..", &mut ctx);
        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.contains("up=\"cd ..\""));
    }

    #[test]
    fn help_flag_prints_usage_and_succeeds() {
        let mut ctx = ShellContext::in_memory();
        let (code, out) = run_line("cd --help", &mut ctx);
        assert_eq!(code, Some(0));
        assert!(out.contains("Usage: cd"));

        assert_eq!(run_line("pwd --bogus", &mut ctx).0, Some(EXIT_FAILURE));
    }

    #[test]
    fn help_lists_every_builtin() {
        let mut ctx = ShellContext::in_memory();
        let (_, out) = run_line("help", &mut ctx);
        for builtin in builtins() {
            assert!(out.contains(builtin.description), "{}", builtin.name);
        }
    }

    #[test]
    fn version_mentions_package_version() {
        let mut ctx = ShellContext::in_memory();
        let (_, out) = run_line("version", &mut ctx);
        assert!(out.starts_with(&format!("Lynx Shell v{}", env!("CARGO_PKG_VERSION"))));
    }
}
