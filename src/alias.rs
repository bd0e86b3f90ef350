//! Command aliases and their `~/.lynx/aliases` file.

use crate::config::{split_assignment, strip_quotes};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum number of nested alias expansions applied to one line.
pub const MAX_ALIAS_DEPTH: usize = 10;

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("ll", "ls -la"),
    ("la", "ls -A"),
    ("l", "ls -CF"),
    ("..", "cd .."),
    ("...", "cd ../.."),
    ("cls", "clear"),
];

#[derive(Debug, Clone, Default)]
pub struct AliasManager {
    aliases: BTreeMap<String, String>,
    path: Option<PathBuf>,
}

impl AliasManager {
    /// Aliases preloaded with the shipped defaults.
    pub fn with_defaults() -> Self {
        let mut manager = Self::default();
        for (name, command) in DEFAULT_ALIASES {
            manager.set(name, command);
        }
        manager
    }

    /// Defaults, replaced by the contents of `path` when that file exists.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut manager = Self::with_defaults();
        if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("can't read aliases {}", path.display()))?;
            manager.aliases.clear();
            manager.parse(&text);
        }
        manager.path = Some(path);
        Ok(manager)
    }

    pub fn parse(&mut self, text: &str) {
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((name, command)) = split_assignment(line) {
                self.set(name, strip_quotes(command));
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set(&mut self, name: &str, command: &str) {
        self.aliases.insert(name.to_string(), command.to_string());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.aliases.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    /// All aliases, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replace the first word of `line` with its alias, recursively.
    pub fn expand(&self, line: &str) -> String {
        self.expand_with_depth(line, 0)
    }

    /// One expansion step at `depth`; stops once [`MAX_ALIAS_DEPTH`] is reached.
    pub fn expand_with_depth(&self, line: &str, depth: usize) -> String {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            return line.to_string();
        };
        let Some(command) = self.get(first) else {
            return line.to_string();
        };
        if depth >= MAX_ALIAS_DEPTH {
            log::debug!("alias expansion of {:?} stopped at depth {}", first, depth);
            return line.to_string();
        }

        let mut expanded = command.to_string();
        for word in words {
            expanded.push(' ');
            expanded.push_str(word);
        }
        self.expand_with_depth(&expanded, depth + 1)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# Lynx Shell Aliases\n# Format: alias_name=command\n\n");
        for (name, command) in &self.aliases {
            out.push_str(&format!("{}=\"{}\"\n", name, command));
        }
        out
    }

    /// Write aliases to the backing file. In-memory managers are a no-op.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        fs::write(path, self.render())
            .with_context(|| format!("can't write aliases {}", path.display()))
    }
}
