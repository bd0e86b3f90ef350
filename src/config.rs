//! Key/value settings store backed by `~/.lynx/config`.
//!
//! The file format is one `key=value` per line. Blank lines and lines starting
//! with `#` or `;` are ignored, one pair of matching quotes around the value is
//! stripped, and a leading `~` in a value expands to the home directory.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("theme", "default"),
    ("prompt_format", "{user}@{host}:{cwd}$ "),
    ("history_size", "1000"),
    ("show_welcome", "true"),
    (
        "welcome_message",
        "Welcome to Lynx Shell! Type 'help' for commands.",
    ),
];

/// Home directory of the current user, if one can be determined.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Expand a leading `~` (alone or followed by `/`) to the home directory.
/// Without a home directory the value is returned as is.
pub fn expand_tilde(value: &str) -> String {
    expand_tilde_in(value, home_dir().as_deref())
}

fn expand_tilde_in(value: &str, home: Option<&Path>) -> String {
    match (value.strip_prefix('~'), home) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{}", home.to_string_lossy(), rest)
        }
        _ => value.to_string(),
    }
}

/// Remove one pair of matching `"` or `'` around `value`.
pub fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Split a `key=value` line on the first `=`, trimming both halves.
pub fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

/// Layout of the per-user lynx directory.
#[derive(Debug, Clone)]
pub struct LynxDirs {
    root: PathBuf,
}

impl LynxDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.lynx`, or `None` when the user has no home directory.
    pub fn from_home() -> Option<Self> {
        home_dir().map(|home| Self::new(home.join(".lynx")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn aliases_file(&self) -> PathBuf {
        self.root.join("aliases")
    }

    pub fn themes_dir(&self) -> PathBuf {
        self.root.join("themes")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join("plugins")
    }

    /// Create the directory tree if it does not exist yet.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.root.clone(), self.themes_dir(), self.plugins_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("can't create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// In-memory settings with an optional backing file.
#[derive(Debug, Clone, Default)]
pub struct Config {
    settings: BTreeMap<String, String>,
    path: Option<PathBuf>,
}

impl Config {
    /// Settings populated with the shipped defaults, not backed by a file.
    pub fn with_defaults() -> Self {
        let mut config = Self::default();
        for (key, value) in DEFAULT_SETTINGS {
            config.settings.insert(key.to_string(), value.to_string());
        }
        config
    }

    /// Load settings from `path`, replacing nothing but what the file defines.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = fs::read_to_string(&path)
            .with_context(|| format!("can't read config {}", path.display()))?;
        let mut config = Self::default();
        config.parse(&text);
        config.path = Some(path);
        Ok(config)
    }

    /// Load `path`, writing a default config there first when it is missing.
    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            return Self::load(path);
        }
        let mut config = Self::with_defaults();
        config.path = Some(path);
        config.save()?;
        log::info!("created default config");
        Ok(config)
    }

    /// Merge `key=value` lines from `text` into the current settings.
    pub fn parse(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            match split_assignment(line) {
                Some((key, value)) => {
                    let value = expand_tilde(strip_quotes(value));
                    self.settings.insert(key.to_string(), value);
                }
                None => log::debug!("ignoring config line {:?}", line),
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.settings
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.settings.contains_key(key)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.settings.get(key) {
            Some(v) if !v.is_empty() => {
                matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "on")
            }
            _ => default,
        }
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.settings
            .get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Store a setting after validating it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate(key, value)?;
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.settings.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    /// Render the file contents `save` would write.
    pub fn render(&self) -> String {
        let mut out = String::from(
            "# Lynx Shell Configuration File\n# Generated automatically - you can edit this file\n\n",
        );
        for (key, value) in &self.settings {
            if value.trim() != value {
                out.push_str(&format!("{}=\"{}\"\n", key, value));
            } else {
                out.push_str(&format!("{}={}\n", key, value));
            }
        }
        out
    }

    /// Write settings back to the backing file. In-memory configs are a no-op.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("can't create {}", parent.display()))?;
        }
        fs::write(path, self.render())
            .with_context(|| format!("can't write config {}", path.display()))
    }
}

fn validate(key: &str, value: &str) -> Result<()> {
    let range = match key {
        "history_size" => 0..=10_000,
        "command_timeout" => 0..=3_600,
        _ => return Ok(()),
    };
    match value.trim().parse::<i64>() {
        Ok(n) if range.contains(&n) => Ok(()),
        _ => bail!(
            "invalid value for {}: {} (expected {}..={})",
            key,
            value,
            range.start(),
            range.end()
        ),
    }
}
