use super::loader::{DynamicLoader, ModuleLoader, PluginModule};
use super::{
    CommandHandler, CommandRegistration, EventContext, PluginDescriptor, PluginError, PluginEvent,
};
use crate::builtin::is_builtin_command;
use crate::command::Command;
use crate::config::LynxDirs;
use crate::context::ShellContext;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

type PluginId = u64;

/// Lifecycle state of a plugin as seen between manager calls.
///
/// Loading, initialization and shutdown complete within a single call and
/// are only reported in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Running,
    Unloaded,
}

/// Plugin directories searched by default, highest priority first.
///
/// `~/.lynx/plugins` is only searched when the user has a home directory.
pub fn default_plugin_paths() -> Vec<PathBuf> {
    plugin_paths_for(LynxDirs::from_home())
}

fn plugin_paths_for(user: Option<LynxDirs>) -> Vec<PathBuf> {
    user.map(|dirs| dirs.plugins_dir())
        .into_iter()
        .chain([
            PathBuf::from("/usr/local/lib/lynx/plugins"),
            PathBuf::from("./plugins"),
        ])
        .collect()
}

struct CommandEntry {
    owner: PluginId,
    plugin: String,
    registration: CommandRegistration,
}

#[derive(Default)]
struct CommandTable {
    commands: BTreeMap<String, CommandEntry>,
}

impl CommandTable {
    fn insert(
        &mut self,
        owner: PluginId,
        plugin: &str,
        registration: CommandRegistration,
    ) -> Result<(), PluginError> {
        let name = registration.name.clone();
        if let Some(existing) = self.commands.get(&name) {
            log::warn!(
                "plugin {} cannot register {}: already registered by {}",
                plugin,
                name,
                existing.plugin
            );
            return Err(PluginError::DuplicateCommand(name));
        }
        if is_builtin_command(&name) {
            log::warn!("plugin command {} from {} shadows the builtin", name, plugin);
        }
        log::debug!("plugin {} registered command {}", plugin, name);
        self.commands.insert(
            name,
            CommandEntry {
                owner,
                plugin: plugin.to_string(),
                registration,
            },
        );
        Ok(())
    }

    fn remove_owned_by(&mut self, owner: PluginId) {
        self.commands.retain(|_, entry| entry.owner != owner);
    }
}

/// Handle through which a plugin adds and removes its commands.
///
/// The handle may be cloned and kept beyond [`Plugin::initialize`](super::Plugin::initialize).
/// Once the manager is gone every call fails with [`PluginError::NotLoaded`].
#[derive(Clone)]
pub struct CommandRegistrar {
    table: Weak<RefCell<CommandTable>>,
    owner: PluginId,
    plugin: String,
}

impl CommandRegistrar {
    pub fn register(&self, registration: CommandRegistration) -> Result<(), PluginError> {
        let table = self
            .table
            .upgrade()
            .ok_or_else(|| PluginError::NotLoaded(self.plugin.clone()))?;
        table
            .borrow_mut()
            .insert(self.owner, &self.plugin, registration)
    }

    /// Remove a command this plugin registered. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let Some(table) = self.table.upgrade() else {
            return false;
        };
        let mut table = table.borrow_mut();
        match table.commands.get(name) {
            Some(entry) if entry.owner == self.owner => table.commands.remove(name).is_some(),
            _ => false,
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }
}

struct LoadedPlugin {
    id: PluginId,
    descriptor: PluginDescriptor,
    module: Box<dyn PluginModule>,
}

/// A command contributed by a loaded plugin, as shown by `help`-like listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCommandInfo {
    pub name: String,
    pub description: String,
    pub usage: String,
    pub plugin: String,
}

/// Discovers, loads and unloads plugins and routes events and commands to them.
pub struct PluginManager {
    loader: Box<dyn ModuleLoader>,
    plugins: BTreeMap<String, LoadedPlugin>,
    unloaded: BTreeSet<String>,
    commands: Rc<RefCell<CommandTable>>,
    paths: Vec<PathBuf>,
    next_id: PluginId,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    /// Manager loading shared libraries from [`default_plugin_paths`].
    pub fn new() -> Self {
        let mut manager = Self::with_loader(Box::new(DynamicLoader));
        for path in default_plugin_paths() {
            manager.add_plugin_path(path);
        }
        manager
    }

    /// Manager with a custom loader and no search paths.
    pub fn with_loader(loader: Box<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            plugins: BTreeMap::new(),
            unloaded: BTreeSet::new(),
            commands: Rc::default(),
            paths: Vec::new(),
            next_id: 0,
        }
    }

    pub fn add_plugin_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn plugin_paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Plugin files in the search paths, path priority first, then by name.
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for dir in &self.paths {
            if !dir.is_dir() {
                continue;
            }
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(err) => {
                    log::warn!("can't read plugin directory {}: {}", dir.display(), err);
                    continue;
                }
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && is_plugin_file(path))
                .collect();
            files.sort();
            found.extend(files);
        }
        found
    }

    /// Load every discovered plugin. Failures are reported and skipped.
    pub fn load_all_plugins(&mut self, ctx: &mut ShellContext) -> usize {
        let mut loaded = 0;
        for path in self.discover() {
            match self.load_plugin(&path, ctx) {
                Ok(_) => loaded += 1,
                Err(err) => log::warn!("skipping plugin {}: {}", path.display(), err),
            }
        }
        log::info!("loaded {} plugin(s)", loaded);
        loaded
    }

    /// Load the plugin at `path` and return its name.
    pub fn load_plugin(
        &mut self,
        path: &Path,
        ctx: &mut ShellContext,
    ) -> Result<String, PluginError> {
        log::debug!("loading plugin {}", path.display());
        let module = self.loader.load(path)?;
        self.load_module(module, ctx)
    }

    /// Initialize and register an already constructed module.
    pub fn load_module(
        &mut self,
        mut module: Box<dyn PluginModule>,
        ctx: &mut ShellContext,
    ) -> Result<String, PluginError> {
        let id = self.next_id;
        self.next_id += 1;

        let descriptor = module.plugin().descriptor().clone();
        let name = descriptor.name.clone();
        log::debug!("initializing plugin {}", name);

        let registrar = CommandRegistrar {
            table: Rc::downgrade(&self.commands),
            owner: id,
            plugin: name.clone(),
        };
        if let Err(reason) = guarded(|| module.plugin().initialize(ctx, &registrar)) {
            self.commands.borrow_mut().remove_owned_by(id);
            return Err(PluginError::InitFailed { name, reason });
        }
        log::debug!("plugin {} initialized", name);

        if self.plugins.contains_key(&name) {
            if let Err(reason) = guarded(|| {
                module.plugin().shutdown();
                Ok(())
            }) {
                log::warn!("plugin {} failed to shut down: {}", name, reason);
            }
            self.commands.borrow_mut().remove_owned_by(id);
            return Err(PluginError::DuplicatePlugin(name));
        }

        let settings = ctx.config().settings().clone();
        if let Err(reason) = guarded(|| {
            module.plugin().configure(&settings);
            Ok(())
        }) {
            log::warn!("plugin {} failed to apply settings: {}", name, reason);
        }

        log::info!("loaded plugin {} v{}", name, descriptor.version);
        let event = EventContext::from([
            ("plugin_name".to_string(), name.clone()),
            ("plugin_version".to_string(), descriptor.version.clone()),
        ]);
        self.plugins.insert(
            name.clone(),
            LoadedPlugin {
                id,
                descriptor,
                module,
            },
        );
        self.unloaded.remove(&name);
        self.broadcast_event(PluginEvent::ShellStartup, &event);
        Ok(name)
    }

    /// Shut down one plugin, drop its commands and release its module.
    pub fn unload_plugin(&mut self, name: &str) -> Result<(), PluginError> {
        let plugin = self
            .plugins
            .remove(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
        self.release(plugin);
        Ok(())
    }

    /// Broadcast [`PluginEvent::ShellShutdown`], then unload every plugin.
    pub fn unload_all_plugins(&mut self) {
        if !self.plugins.is_empty() {
            self.broadcast_event(PluginEvent::ShellShutdown, &EventContext::new());
        }
        while let Some((_, plugin)) = self.plugins.pop_first() {
            self.release(plugin);
        }
        self.commands.borrow_mut().commands.clear();
    }

    fn release(&mut self, mut plugin: LoadedPlugin) {
        let name = plugin.descriptor.name.clone();
        log::debug!("shutting down plugin {}", name);
        if let Err(reason) = guarded(|| {
            plugin.module.plugin().shutdown();
            Ok(())
        }) {
            log::warn!("plugin {} failed to shut down: {}", name, reason);
        }
        self.commands.borrow_mut().remove_owned_by(plugin.id);
        drop(plugin.module);
        log::info!("unloaded plugin {}", name);
        self.unloaded.insert(name);
    }

    /// Deliver `event` to every loaded plugin, in name order.
    pub fn broadcast_event(&mut self, event: PluginEvent, context: &EventContext) {
        for (name, plugin) in self.plugins.iter_mut() {
            if let Err(reason) = guarded(|| plugin.module.plugin().on_event(event, context)) {
                log::warn!("plugin {} failed to handle {}: {}", name, event, reason);
            }
        }
    }

    /// Run a plugin command. `false` if unknown or if the handler failed.
    pub fn execute_plugin_command(&mut self, cmd: &Command, ctx: &mut ShellContext) -> bool {
        let entry = self
            .commands
            .borrow()
            .commands
            .get(&cmd.name)
            .map(|entry| (entry.owner, entry.registration.handler.clone()));
        let Some((owner, handler)) = entry else {
            return false;
        };

        let result = match handler {
            CommandHandler::Func(func) => guarded(|| func(cmd, ctx)),
            CommandHandler::Plugin => match self.plugins.values_mut().find(|p| p.id == owner) {
                Some(plugin) => guarded(|| plugin.module.plugin().handle_command(cmd, ctx)),
                None => Err("owning plugin is not loaded".to_string()),
            },
        };
        match result {
            Ok(success) => success,
            Err(reason) => {
                log::warn!("plugin command {} failed: {}", cmd.name, reason);
                false
            }
        }
    }

    /// Register `registration` on behalf of the loaded plugin `plugin_name`.
    pub fn register_command(
        &mut self,
        plugin_name: &str,
        registration: CommandRegistration,
    ) -> Result<(), PluginError> {
        let owner = self
            .plugins
            .get(plugin_name)
            .ok_or_else(|| PluginError::NotLoaded(plugin_name.to_string()))?
            .id;
        self.commands
            .borrow_mut()
            .insert(owner, plugin_name, registration)
    }

    pub fn unregister_command(&mut self, name: &str) -> bool {
        self.commands.borrow_mut().commands.remove(name).is_some()
    }

    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// `None` for a plugin this manager never loaded.
    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        if self.plugins.contains_key(name) {
            Some(PluginState::Running)
        } else if self.unloaded.contains(name) {
            Some(PluginState::Unloaded)
        } else {
            None
        }
    }

    pub fn loaded_plugin_names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn plugin_infos(&self) -> Vec<PluginDescriptor> {
        self.plugins.values().map(|p| p.descriptor.clone()).collect()
    }

    pub fn is_plugin_command(&self, name: &str) -> bool {
        self.commands.borrow().commands.contains_key(name)
    }

    pub fn plugin_commands(&self) -> Vec<PluginCommandInfo> {
        self.commands
            .borrow()
            .commands
            .values()
            .map(|entry| PluginCommandInfo {
                name: entry.registration.name.clone(),
                description: entry.registration.description.clone(),
                usage: entry.registration.usage.clone(),
                plugin: entry.plugin.clone(),
            })
            .collect()
    }

    pub fn list_plugins(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.plugins.is_empty() {
            return writeln!(out, "No plugins loaded.");
        }
        writeln!(out, "Loaded plugins:")?;
        for plugin in self.plugins.values() {
            let d = &plugin.descriptor;
            writeln!(out, "  {} v{} by {}", d.name, d.version, d.author)?;
            if !d.description.is_empty() {
                writeln!(out, "    {}", d.description)?;
            }
        }
        Ok(())
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        if !self.plugins.is_empty() {
            self.unload_all_plugins();
        }
    }
}

fn is_plugin_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
}

/// Every call into plugin code goes through here: errors and panics become
/// a message instead of unwinding into the shell.
fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{:#}", err)),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}
