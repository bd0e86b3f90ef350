//! Runtime extension through dynamically loaded plugins.
//!
//! A plugin is any type implementing [`Plugin`]. Compiled as a `cdylib` and
//! exported with [`declare_plugin!`](crate::declare_plugin), it can be dropped
//! into one of the plugin directories and is picked up at startup by the
//! [`PluginManager`].
//!
//! Lifecycle of one plugin:
//!
//! ```text
//! Discovered -> Loading -> Initialized -> Running -> ShuttingDown -> Unloaded
//! ```
//!
//! Plugins contribute commands through a [`CommandRegistrar`] and observe the
//! shell through [`PluginEvent`] notifications.

mod loader;
mod manager;

pub use loader::{
    API_VERSION_SYMBOL, CREATE_SYMBOL, DESTROY_SYMBOL, DynamicLoader, ModuleLoader, PluginModule,
    StaticModule, check_api_version,
};
pub use manager::{
    CommandRegistrar, PluginCommandInfo, PluginManager, PluginState, default_plugin_paths,
};

use crate::command::Command;
use crate::context::ShellContext;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::CStr;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use thiserror::Error;

/// API version the host expects plugins to declare.
pub const PLUGIN_API_VERSION: &str = "1.0.0";

/// [`PLUGIN_API_VERSION`] as a C string, returned by exported plugins.
pub const PLUGIN_API_VERSION_C: &CStr = c"1.0.0";

/// Key/value payload delivered with an event.
pub type EventContext = BTreeMap<String, String>;

/// Signature of a closure command handler.
pub type HandlerFn = dyn Fn(&Command, &mut ShellContext) -> anyhow::Result<bool>;

/// Shell lifecycle moments broadcast to every loaded plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginEvent {
    /// The shell started, or a plugin finished loading (`plugin_name`, `plugin_version`).
    ShellStartup,
    ShellShutdown,
    /// `command`, `args`
    CommandBefore,
    /// `command`, `exit_code`, `success`
    CommandAfter,
    /// `directory`, `exit_code`
    PromptDisplay,
    /// `input`
    InputReceived,
}

impl fmt::Display for PluginEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginEvent::ShellStartup => "shell-startup",
            PluginEvent::ShellShutdown => "shell-shutdown",
            PluginEvent::CommandBefore => "command-before",
            PluginEvent::CommandAfter => "command-after",
            PluginEvent::PromptDisplay => "prompt-display",
            PluginEvent::InputReceived => "input-received",
        };
        f.write_str(name)
    }
}

/// Static description a plugin reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub dependencies: BTreeSet<String>,
    pub api_version: u32,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            api_version: 1,
            ..Self::default()
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }
}

/// How a registered command is executed.
#[derive(Clone)]
pub enum CommandHandler {
    /// Forwarded to [`Plugin::handle_command`] of the registering plugin.
    Plugin,
    /// A standalone closure.
    Func(Rc<HandlerFn>),
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandHandler::Plugin => f.write_str("Plugin"),
            CommandHandler::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// A named command contributed by a plugin.
#[derive(Debug, Clone)]
pub struct CommandRegistration {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub handler: CommandHandler,
}

impl CommandRegistration {
    /// A command handled by the owning plugin's [`Plugin::handle_command`].
    pub fn forwarded(
        name: impl Into<String>,
        description: impl Into<String>,
        usage: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            usage: usage.into(),
            handler: CommandHandler::Plugin,
        }
    }

    /// A command handled by `handler`.
    pub fn with_handler<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        usage: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(&Command, &mut ShellContext) -> anyhow::Result<bool> + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            usage: usage.into(),
            handler: CommandHandler::Func(Rc::new(handler)),
        }
    }
}

/// Capabilities every plugin provides to the host.
///
/// Only [`initialize`](Plugin::initialize), [`shutdown`](Plugin::shutdown) and
/// [`descriptor`](Plugin::descriptor) are required.
pub trait Plugin {
    /// Called once after construction. Commands may be registered here or
    /// later through a clone of `registrar`. An error aborts the load.
    fn initialize(
        &mut self,
        ctx: &mut ShellContext,
        registrar: &CommandRegistrar,
    ) -> anyhow::Result<()>;

    /// Called once before the plugin is released.
    fn shutdown(&mut self);

    fn descriptor(&self) -> &PluginDescriptor;

    fn on_event(&mut self, _event: PluginEvent, _context: &EventContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handles commands registered with [`CommandRegistration::forwarded`].
    fn handle_command(&mut self, _cmd: &Command, _ctx: &mut ShellContext) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Receives the shell settings right after a successful load.
    fn configure(&mut self, _settings: &BTreeMap<String, String>) {}
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("cannot load plugin {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("cannot load symbol {symbol} from {path}: {source}")]
    MissingSymbol {
        path: PathBuf,
        symbol: String,
        #[source]
        source: libloading::Error,
    },
    #[error("incompatible plugin API version: {found} (expected: {expected})")]
    ApiVersionMismatch { found: String, expected: String },
    #[error("failed to create plugin instance from {0}")]
    NullInstance(PathBuf),
    #[error("failed to initialize plugin {name}: {reason}")]
    InitFailed { name: String, reason: String },
    #[error("plugin {0} is already loaded")]
    DuplicatePlugin(String),
    #[error("command {0} is already registered")]
    DuplicateCommand(String),
    #[error("plugin {0} is not loaded")]
    NotLoaded(String),
}

/// Export a [`Plugin`] type from a `cdylib` crate.
///
/// Generates the three entry points the host looks up: a factory building the
/// plugin with `$ctor`, a destructor, and the API version query.
///
/// ```ignore
/// lynx::declare_plugin!(ClockPlugin, ClockPlugin::new());
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($plugin:ty, $ctor:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn lynx_plugin_create() -> *mut ::std::ffi::c_void {
            let plugin: $plugin = $ctor;
            let plugin: ::std::boxed::Box<dyn $crate::plugin::Plugin> =
                ::std::boxed::Box::new(plugin);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(plugin)) as *mut ::std::ffi::c_void
        }

        /// # Safety
        ///
        /// `handle` must come from `lynx_plugin_create` and be passed here once.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn lynx_plugin_destroy(handle: *mut ::std::ffi::c_void) {
            if !handle.is_null() {
                drop(unsafe {
                    ::std::boxed::Box::from_raw(
                        handle as *mut ::std::boxed::Box<dyn $crate::plugin::Plugin>,
                    )
                });
            }
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn lynx_plugin_api_version() -> *const ::std::ffi::c_char {
            $crate::plugin::PLUGIN_API_VERSION_C.as_ptr()
        }
    };
}
