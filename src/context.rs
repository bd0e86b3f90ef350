use crate::alias::AliasManager;
use crate::command::ExitCode;
use crate::config::{Config, LynxDirs};
use crate::theme::{DEFAULT_THEME, PromptParts, ThemeManager};
use anyhow::Result;
use std::env;
use std::path::PathBuf;

/// Mutable state shared by the dispatcher, builtins and plugin handlers.
///
/// The context holds:
/// - the append-only history of entered lines,
/// - the exit code of the most recently dispatched command,
/// - configuration, themes and aliases,
/// - a flag that tells the loop to stop after the current command.
///
/// The working directory is not cached here: [`ShellContext::current_dir`]
/// asks the OS every time.
#[derive(Debug, Default)]
pub struct ShellContext {
    history: Vec<String>,
    last_exit_code: ExitCode,
    config: Config,
    themes: ThemeManager,
    aliases: AliasManager,
    should_exit: bool,
}

impl ShellContext {
    pub fn new(config: Config, themes: ThemeManager, aliases: AliasManager) -> Self {
        Self {
            history: Vec::new(),
            last_exit_code: 0,
            config,
            themes,
            aliases,
            should_exit: false,
        }
    }

    /// An in-memory context with default settings, themes and aliases.
    pub fn in_memory() -> Self {
        Self::new(
            Config::with_defaults(),
            ThemeManager::new(),
            AliasManager::with_defaults(),
        )
    }

    /// Load config, themes and aliases from `dirs`, creating defaults as needed.
    pub fn load(dirs: &LynxDirs) -> Result<Self> {
        dirs.ensure()?;
        let config = Config::load_or_create(dirs.config_file())?;
        let mut themes = ThemeManager::new();
        themes.load_dir(&dirs.themes_dir())?;
        let aliases = AliasManager::load_or_default(dirs.aliases_file())?;
        Ok(Self::new(config, themes, aliases))
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn add_to_history(&mut self, line: impl Into<String>) {
        self.history.push(line.into());
    }

    pub fn last_exit_code(&self) -> ExitCode {
        self.last_exit_code
    }

    pub fn set_last_exit_code(&mut self, code: ExitCode) {
        self.last_exit_code = code;
    }

    /// The process working directory, `.` if it can't be determined.
    pub fn current_dir(&self) -> PathBuf {
        env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn themes(&self) -> &ThemeManager {
        &self.themes
    }

    pub fn aliases(&self) -> &AliasManager {
        &self.aliases
    }

    pub fn aliases_mut(&mut self) -> &mut AliasManager {
        &mut self.aliases
    }

    /// Name of the configured theme.
    pub fn theme_name(&self) -> String {
        self.config.get("theme", DEFAULT_THEME)
    }

    /// Apply alias expansion to a raw input line.
    pub fn expand_aliases(&self, line: &str) -> String {
        self.aliases.expand(line)
    }

    /// Render the prompt for `cwd` and `exit_code` with the configured theme.
    pub fn format_prompt(&self, cwd: &str, exit_code: ExitCode) -> String {
        let theme = self.themes.resolve(&self.theme_name());
        let format = match theme.prompt_format() {
            Some(format) => format.to_string(),
            None => self.config.get("prompt_format", "{cwd} $ "),
        };
        let user = username();
        let host = hostname();
        theme.format_prompt(
            &format,
            &PromptParts {
                user: &user,
                host: &host,
                cwd,
                exit_code,
            },
        )
    }

    /// Color `text` with the current theme's color for `element`.
    pub fn paint(&self, element: &str, text: &str) -> String {
        self.themes.resolve(&self.theme_name()).paint(element, text)
    }

    /// Ask the loop to stop once the current command returns.
    pub fn request_exit(&mut self) {
        self.should_exit = true;
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit
    }
}

fn username() -> String {
    env::var("USER")
        .or_else(|_| env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn history_is_append_only_in_order() {
        let mut ctx = ShellContext::in_memory();
        ctx.add_to_history("ls");
        ctx.add_to_history("pwd");
        assert_eq!(ctx.history(), ["ls", "pwd"]);
    }

    #[test]
    fn exit_flag_and_code() {
        let mut ctx = ShellContext::in_memory();
        assert!(!ctx.should_exit());
        ctx.set_last_exit_code(5);
        ctx.request_exit();
        assert!(ctx.should_exit());
        assert_eq!(ctx.last_exit_code(), 5);
    }

    #[test]
    fn minimal_theme_prompt_shows_exit_code() {
        let mut ctx = ShellContext::in_memory();
        ctx.config_mut().set("theme", "minimal").unwrap();
        assert_eq!(ctx.format_prompt("/tmp", 0), "\x1b[37m$ \x1b[0m");
        assert!(ctx.format_prompt("/tmp", 2).starts_with("[2] "));
    }

    #[test]
    fn default_theme_uses_config_prompt_format() {
        let mut ctx = ShellContext::in_memory();
        ctx.config_mut().set("prompt_format", "{cwd}> ").unwrap();
        assert_eq!(ctx.format_prompt("/srv", 0), "\x1b[36m/srv\x1b[0m> ");
    }

    #[test]
    fn load_creates_directory_tree() {
        let dir = TempDir::new().expect("temp dir");
        let dirs = LynxDirs::new(dir.path().join(".lynx"));
        let ctx = ShellContext::load(&dirs).expect("load context");
        assert!(dirs.config_file().is_file());
        assert_eq!(ctx.theme_name(), "default");
        assert_eq!(ctx.aliases().get("cls"), Some("clear"));
    }

    #[test]
    fn host_placeholder_uses_system_hostname() {
        let expected = hostname::get()
            .expect("hostname")
            .to_string_lossy()
            .trim()
            .to_string();
        assert!(!hostname().is_empty());
        if !expected.is_empty() {
            assert_eq!(hostname(), expected);
        }
    }
}
