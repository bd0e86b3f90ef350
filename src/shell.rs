//! The read-dispatch loop tying the context, builtins, plugins and the
//! external launcher together.

use crate::builtin::execute_builtin;
use crate::command::{Command, ExitCode};
use crate::config::LynxDirs;
use crate::context::ShellContext;
use crate::external::execute_external;
use crate::parser::parse_command;
use crate::plugin::{EventContext, PluginEvent, PluginManager};
use anyhow::{Context, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead, ErrorKind, Write};

/// Source of input lines for the loop.
pub trait LineReader {
    /// Show `prompt` and read one line. `Ok(None)` means end of input.
    ///
    /// An error covers a single line and the loop keeps reading. A reader
    /// that cannot recover returns the error once and `Ok(None)` afterwards.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Interactive line editing on a terminal.
pub struct EditorReader {
    editor: DefaultEditor,
    closed: bool,
}

impl EditorReader {
    pub fn new() -> Result<Self> {
        let editor = DefaultEditor::new().context("can't initialise line editor")?;
        Ok(Self {
            editor,
            closed: false,
        })
    }
}

impl LineReader for EditorReader {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        if self.closed {
            return Ok(None);
        }
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.editor.add_history_entry(line.as_str())?;
                }
                Ok(Some(line))
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                Ok(Some(String::new()))
            }
            Err(ReadlineError::Eof) => Ok(None),
            Err(ReadlineError::Io(err)) if err.kind() == ErrorKind::Interrupted => {
                Ok(Some(String::new()))
            }
            Err(err) => {
                self.closed = true;
                Err(err).context("can't read from terminal")
            }
        }
    }
}

/// Reads lines from any buffered source, e.g. piped standard input.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD.
pub struct ScriptReader<R> {
    input: R,
    closed: bool,
}

impl<R: BufRead> ScriptReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            closed: false,
        }
    }
}

impl<R: BufRead> LineReader for ScriptReader<R> {
    fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        if self.closed {
            return Ok(None);
        }
        let mut buf = Vec::new();
        let read = loop {
            match self.input.read_until(b'\n', &mut buf) {
                Ok(read) => break read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.closed = true;
                    return Err(err).context("can't read input");
                }
            }
        };
        if read == 0 {
            return Ok(None);
        }
        let mut line = String::from_utf8_lossy(&buf).into_owned();
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

/// An interactive shell session.
///
/// Each line goes through alias expansion and parsing, then is dispatched to
/// the first handler that claims it: a plugin command, a builtin, or an
/// external program.
pub struct Shell {
    ctx: ShellContext,
    plugins: PluginManager,
    out: Box<dyn Write>,
}

impl Shell {
    pub fn new(ctx: ShellContext, plugins: PluginManager) -> Self {
        Self {
            ctx,
            plugins,
            out: Box::new(io::stdout()),
        }
    }

    /// Session backed by `~/.lynx`, loading plugins from the default paths.
    ///
    /// Without a home directory the session keeps its settings in memory.
    pub fn from_environment() -> Result<Self> {
        let ctx = match LynxDirs::from_home() {
            Some(dirs) => ShellContext::load(&dirs)
                .with_context(|| format!("can't load settings from {}", dirs.root().display()))?,
            None => {
                log::warn!("no home directory, settings will not be saved");
                ShellContext::in_memory()
            }
        };
        Ok(Self::new(ctx, PluginManager::new()))
    }

    /// Send builtin output to `out` instead of standard output.
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    pub fn context(&self) -> &ShellContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ShellContext {
        &mut self.ctx
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn plugins_mut(&mut self) -> &mut PluginManager {
        &mut self.plugins
    }

    /// Load plugins, greet the user and announce startup to plugins.
    pub fn startup(&mut self) -> Result<()> {
        self.plugins.load_all_plugins(&mut self.ctx);

        if self.ctx.config().get_bool("show_welcome", true) {
            let message = self
                .ctx
                .config()
                .get("welcome_message", "Welcome to Lynx Shell!");
            writeln!(self.out, "{}", self.ctx.paint("info", &message))?;
            self.out.flush()?;
        }

        self.plugins
            .broadcast_event(PluginEvent::ShellStartup, &EventContext::new());
        Ok(())
    }

    /// Read and execute lines until `exit` or end of input, then shut down.
    pub fn run(&mut self, reader: &mut dyn LineReader) -> Result<()> {
        while !self.ctx.should_exit() {
            let prompt = self.render_prompt();
            let line = match reader.read_line(&prompt) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    eprintln!("lynx: {:#}", err);
                    continue;
                }
            };
            self.execute_line(&line);
        }
        self.shutdown();
        Ok(())
    }

    /// Broadcast [`PluginEvent::PromptDisplay`] and format the prompt.
    pub fn render_prompt(&mut self) -> String {
        let cwd = self.ctx.current_dir().display().to_string();
        let exit_code = self.ctx.last_exit_code();
        let event = EventContext::from([
            ("directory".to_string(), cwd.clone()),
            ("exit_code".to_string(), exit_code.to_string()),
        ]);
        self.plugins
            .broadcast_event(PluginEvent::PromptDisplay, &event);
        self.ctx.format_prompt(&cwd, exit_code)
    }

    /// Execute one raw input line. Blank lines are ignored and return `None`.
    pub fn execute_line(&mut self, line: &str) -> Option<ExitCode> {
        if line.trim().is_empty() {
            return None;
        }
        self.ctx.add_to_history(line);
        let event = EventContext::from([("input".to_string(), line.to_string())]);
        self.plugins
            .broadcast_event(PluginEvent::InputReceived, &event);

        let cmd = parse_command(&self.ctx.expand_aliases(line));
        if cmd.is_empty() {
            return None;
        }
        Some(self.dispatch(&cmd))
    }

    /// Run `cmd` and record its exit code. Plugin commands win over builtins,
    /// builtins over external programs.
    pub fn dispatch(&mut self, cmd: &Command) -> ExitCode {
        let before = EventContext::from([
            ("command".to_string(), cmd.name.clone()),
            ("args".to_string(), cmd.args_line()),
        ]);
        self.plugins
            .broadcast_event(PluginEvent::CommandBefore, &before);

        let code = if self.plugins.is_plugin_command(&cmd.name) {
            let success = self.plugins.execute_plugin_command(cmd, &mut self.ctx);
            Command::exit_code_for(success)
        } else if let Some(code) = execute_builtin(cmd, &mut self.out, &mut self.ctx) {
            code
        } else {
            execute_external(cmd)
        };
        log::debug!("{} exited with {}", cmd.name, code);
        self.ctx.set_last_exit_code(code);

        let after = EventContext::from([
            ("command".to_string(), cmd.name.clone()),
            ("exit_code".to_string(), code.to_string()),
            ("success".to_string(), (code == 0).to_string()),
        ]);
        self.plugins
            .broadcast_event(PluginEvent::CommandAfter, &after);
        code
    }

    /// Broadcast shutdown and unload every plugin.
    pub fn shutdown(&mut self) {
        self.plugins.unload_all_plugins();
        self.out.flush().ok();
    }
}
