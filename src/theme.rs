//! Prompt themes.
//!
//! A theme is a flat map of settings: an optional `prompt_format` and a set of
//! `<element>_color` entries naming ANSI colors. Four themes ship built in;
//! more are read from `*.theme` files whose stem becomes the theme name.

use crate::config::{split_assignment, strip_quotes};
use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

pub const RESET: &str = "\x1b[0m";
pub const DEFAULT_THEME: &str = "default";

const MAX_CWD_WIDTH: usize = 40;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(user|host|cwd)\}").expect("valid placeholder regex"));
static FALLBACK_THEME: LazyLock<Theme> = LazyLock::new(|| Theme::new(DEFAULT_THEME, &[]));
static HEX_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#([0-9a-fA-F]{2})([0-9a-fA-F]{2})([0-9a-fA-F]{2})$").expect("valid hex regex")
});

/// Map a color name (`red`, `bright_cyan`, `#ff8800`, ...) to its ANSI escape.
///
/// Unknown names map to the empty string so text is left uncolored.
pub fn ansi_code(color: &str) -> String {
    let lower = color.trim().to_ascii_lowercase();
    let (bright, base) = match lower.strip_prefix("bright_") {
        Some(base) => (true, base),
        None => (false, lower.as_str()),
    };
    let offset = match base {
        "black" => 0,
        "red" => 1,
        "green" => 2,
        "yellow" => 3,
        "blue" => 4,
        "magenta" => 5,
        "cyan" => 6,
        "white" => 7,
        "reset" if !bright => return RESET.to_string(),
        "bold" if !bright => return "\x1b[1m".to_string(),
        "dim" if !bright => return "\x1b[2m".to_string(),
        "underline" if !bright => return "\x1b[4m".to_string(),
        _ => return hex_to_ansi(&lower).unwrap_or_default(),
    };
    let base_code = if bright { 90 } else { 30 };
    format!("\x1b[{}m", base_code + offset)
}

fn hex_to_ansi(hex: &str) -> Option<String> {
    let caps = HEX_COLOR.captures(hex)?;
    let channel = |i: usize| u8::from_str_radix(&caps[i], 16).ok();
    Some(format!(
        "\x1b[38;2;{};{};{}m",
        channel(1)?,
        channel(2)?,
        channel(3)?
    ))
}

/// Values substituted into a prompt format.
#[derive(Debug, Clone)]
pub struct PromptParts<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub cwd: &'a str,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Default)]
pub struct Theme {
    name: String,
    settings: BTreeMap<String, String>,
}

impl Theme {
    pub fn new(name: impl Into<String>, settings: &[(&str, &str)]) -> Self {
        Self {
            name: name.into(),
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Parse a theme file body (`key=value` lines, `#` comments).
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let mut settings = BTreeMap::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = split_assignment(line) {
                settings.insert(key.to_string(), strip_quotes(value).to_string());
            }
        }
        Self {
            name: name.into(),
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompt_format(&self) -> Option<&str> {
        self.settings.get("prompt_format").map(String::as_str)
    }

    /// ANSI escape for `<element>_color`, empty when the theme leaves it unset.
    pub fn color(&self, element: &str) -> String {
        self.settings
            .get(&format!("{}_color", element))
            .map(|c| ansi_code(c))
            .unwrap_or_default()
    }

    /// Wrap `text` in the color for `element`.
    pub fn paint(&self, element: &str, text: &str) -> String {
        let color = self.color(element);
        if color.is_empty() {
            text.to_string()
        } else {
            format!("{}{}{}", color, text, RESET)
        }
    }

    /// Render `format` with this theme's colors.
    ///
    /// A non-zero exit code is inserted as `[code]` before the first `$ `, and
    /// the last `$ ` is colored as the prompt symbol.
    pub fn format_prompt(&self, format: &str, parts: &PromptParts<'_>) -> String {
        let mut prompt = PLACEHOLDER
            .replace_all(format, |caps: &Captures<'_>| match &caps[1] {
                "user" => self.paint("prompt_user", parts.user),
                "host" => self.paint("prompt_host", parts.host),
                _ => self.paint("prompt_cwd", &shorten_cwd(parts.cwd)),
            })
            .into_owned();

        if parts.exit_code != 0 {
            if let Some(pos) = prompt.find("$ ") {
                let marker = self.paint("prompt_error", &format!("[{}]", parts.exit_code));
                prompt.insert_str(pos, &format!("{} ", marker));
            }
        }

        if let Some(pos) = prompt.rfind("$ ") {
            let symbol = self.paint("prompt_symbol", "$ ");
            prompt.replace_range(pos..pos + 2, &symbol);
        }
        prompt
    }
}

fn shorten_cwd(cwd: &str) -> String {
    let chars: Vec<char> = cwd.chars().collect();
    if chars.len() > MAX_CWD_WIDTH {
        let tail: String = chars[chars.len() - (MAX_CWD_WIDTH - 3)..].iter().collect();
        format!("...{}", tail)
    } else {
        cwd.to_string()
    }
}

/// The set of known themes.
#[derive(Debug, Clone)]
pub struct ThemeManager {
    themes: BTreeMap<String, Theme>,
}

impl Default for ThemeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ThemeManager {
    /// A manager holding the built-in themes.
    pub fn new() -> Self {
        let mut manager = Self {
            themes: BTreeMap::new(),
        };
        for theme in builtin_themes() {
            manager.insert(theme);
        }
        manager
    }

    pub fn insert(&mut self, theme: Theme) {
        self.themes.insert(theme.name.clone(), theme);
    }

    /// Load a single `.theme` file; its stem names the theme.
    pub fn load_file(&mut self, path: &Path) -> Result<String> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("theme file {} has no name", path.display()))?;
        let text = fs::read_to_string(path)
            .with_context(|| format!("can't read theme {}", path.display()))?;
        self.insert(Theme::parse(name.clone(), &text));
        Ok(name)
    }

    /// Load every `*.theme` file in `dir`. A missing directory loads nothing.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut paths: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("can't scan themes in {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "theme"))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match self.load_file(&path) {
                Ok(name) => {
                    log::debug!("loaded theme {} from {}", name, path.display());
                    loaded += 1;
                }
                Err(e) => log::warn!("{:#}", e),
            }
        }
        Ok(loaded)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.themes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.themes.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&Theme> {
        self.themes.get(name)
    }

    /// The named theme, or the default theme when the name is unknown.
    pub fn resolve(&self, name: &str) -> &Theme {
        self.themes
            .get(name)
            .or_else(|| self.themes.get(DEFAULT_THEME))
            .unwrap_or(&*FALLBACK_THEME)
    }
}

fn builtin_themes() -> Vec<Theme> {
    vec![
        Theme::new(
            "default",
            &[
                ("prompt_user_color", "green"),
                ("prompt_host_color", "blue"),
                ("prompt_cwd_color", "cyan"),
                ("prompt_symbol_color", "white"),
                ("prompt_error_color", "red"),
                ("error_color", "red"),
                ("success_color", "green"),
                ("warning_color", "yellow"),
                ("info_color", "blue"),
            ],
        ),
        Theme::new(
            "dark",
            &[
                ("prompt_format", "┌─[{user}@{host}]─[{cwd}]\n└─$ "),
                ("prompt_user_color", "bright_green"),
                ("prompt_host_color", "bright_blue"),
                ("prompt_cwd_color", "bright_cyan"),
                ("prompt_symbol_color", "bright_white"),
                ("prompt_error_color", "bright_red"),
                ("error_color", "bright_red"),
                ("success_color", "bright_green"),
                ("warning_color", "bright_yellow"),
                ("info_color", "bright_blue"),
            ],
        ),
        Theme::new(
            "minimal",
            &[
                ("prompt_format", "$ "),
                ("prompt_symbol_color", "white"),
                ("error_color", "red"),
                ("success_color", "green"),
                ("warning_color", "yellow"),
                ("info_color", "blue"),
            ],
        ),
        Theme::new(
            "rainbow",
            &[
                ("prompt_format", "🌈 {user}@{host}:{cwd} ➜ "),
                ("prompt_user_color", "magenta"),
                ("prompt_host_color", "yellow"),
                ("prompt_cwd_color", "cyan"),
                ("prompt_symbol_color", "green"),
                ("prompt_error_color", "red"),
                ("error_color", "bright_red"),
                ("success_color", "bright_green"),
                ("warning_color", "bright_yellow"),
                ("info_color", "bright_blue"),
            ],
        ),
    ]
}
