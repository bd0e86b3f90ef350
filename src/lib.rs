//! Lynx, an interactive command shell extensible through plugins.
//!
//! Every input line is resolved to one of three kinds of command, in this
//! order:
//!
//! 1. a command registered by a loaded plugin (see [`plugin`]),
//! 2. a builtin such as `cd` or `alias` (see [`builtin`]),
//! 3. an external program found through `PATH`.
//!
//! The main entry point is [`Shell`], which owns the session state
//! ([`ShellContext`]) and the [`PluginManager`], and drives the prompt loop.
//! Plugins are ordinary Rust types implementing [`plugin::Plugin`], exported
//! from a `cdylib` with [`declare_plugin!`].

pub mod alias;
pub mod builtin;
pub mod command;
pub mod config;
pub mod context;
pub mod external;
pub mod parser;
pub mod plugin;
pub mod shell;
pub mod theme;

pub use command::{Command, ExitCode};
pub use context::ShellContext;
pub use plugin::PluginManager;
pub use shell::Shell;
