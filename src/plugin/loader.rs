use super::{PLUGIN_API_VERSION, Plugin, PluginError};
use libloading::{Library, Symbol};
use std::ffi::{CStr, c_char, c_void};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

pub const CREATE_SYMBOL: &str = "lynx_plugin_create";
pub const DESTROY_SYMBOL: &str = "lynx_plugin_destroy";
pub const API_VERSION_SYMBOL: &str = "lynx_plugin_api_version";

type CreateFn = unsafe extern "C" fn() -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type ApiVersionFn = unsafe extern "C" fn() -> *const c_char;

/// A loaded plugin instance together with whatever keeps its code alive.
///
/// Dropping the module destroys the instance and releases the code.
pub trait PluginModule {
    fn plugin(&mut self) -> &mut dyn Plugin;

    /// File the module was loaded from, if any.
    fn source(&self) -> Option<&Path> {
        None
    }
}

/// Turns a path found during discovery into a [`PluginModule`].
pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>, PluginError>;
}

/// Accepts a missing version (old plugins) or an exact match.
pub fn check_api_version(found: Option<&str>) -> Result<(), PluginError> {
    match found {
        Some(version) if version != PLUGIN_API_VERSION => Err(PluginError::ApiVersionMismatch {
            found: version.to_string(),
            expected: PLUGIN_API_VERSION.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Plugin compiled into the host binary.
pub struct StaticModule {
    plugin: Box<dyn Plugin>,
}

impl StaticModule {
    pub fn new(plugin: impl Plugin + 'static) -> Self {
        Self {
            plugin: Box::new(plugin),
        }
    }

    pub fn boxed(plugin: impl Plugin + 'static) -> Box<dyn PluginModule> {
        Box::new(Self::new(plugin))
    }
}

impl PluginModule for StaticModule {
    fn plugin(&mut self) -> &mut dyn Plugin {
        self.plugin.as_mut()
    }
}

/// Loads `cdylib` plugins exported with [`declare_plugin!`](crate::declare_plugin).
///
/// The plugin must be built with the same compiler and `lynx` version as
/// the host: the instance crosses the boundary as a Rust trait object.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

impl ModuleLoader for DynamicLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>, PluginError> {
        // SAFETY: loading runs the library's initialisers; plugin directories
        // are trusted in the same way as `PATH`.
        let library = unsafe { Library::new(path) }.map_err(|source| PluginError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let create: CreateFn = *resolve::<CreateFn>(&library, path, CREATE_SYMBOL)?;
        let destroy: DestroyFn = *resolve::<DestroyFn>(&library, path, DESTROY_SYMBOL)?;

        let version = api_version(&library);
        check_api_version(version.as_deref())?;

        // SAFETY: the symbol has the signature generated by `declare_plugin!`.
        let raw = unsafe { create() };
        let instance = NonNull::new(raw.cast::<Box<dyn Plugin>>())
            .ok_or_else(|| PluginError::NullInstance(path.to_path_buf()))?;

        log::debug!("loaded plugin module {}", path.display());
        Ok(Box::new(DynamicModule {
            instance,
            destroy,
            path: path.to_path_buf(),
            _library: library,
        }))
    }
}

fn resolve<'lib, T>(
    library: &'lib Library,
    path: &Path,
    symbol: &str,
) -> Result<Symbol<'lib, T>, PluginError> {
    // SAFETY: callers name the exact function type the symbol was exported with.
    unsafe { library.get::<T>(symbol.as_bytes()) }.map_err(|source| PluginError::MissingSymbol {
        path: path.to_path_buf(),
        symbol: symbol.to_string(),
        source,
    })
}

fn api_version(library: &Library) -> Option<String> {
    // SAFETY: see `resolve`.
    let func = unsafe { library.get::<ApiVersionFn>(API_VERSION_SYMBOL.as_bytes()) }.ok()?;
    // SAFETY: the exported function returns a static NUL-terminated string.
    let ptr = unsafe { func() };
    if ptr.is_null() {
        return Some(String::new());
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

struct DynamicModule {
    instance: NonNull<Box<dyn Plugin>>,
    destroy: DestroyFn,
    path: PathBuf,
    // Dropped after `Drop::drop` has destroyed the instance.
    _library: Library,
}

impl PluginModule for DynamicModule {
    fn plugin(&mut self) -> &mut dyn Plugin {
        // SAFETY: `instance` stays valid until `drop` hands it to `destroy`.
        unsafe { self.instance.as_mut() }.as_mut()
    }

    fn source(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

impl Drop for DynamicModule {
    fn drop(&mut self) {
        // SAFETY: the handle came from this library's create function and is
        // destroyed exactly once.
        unsafe { (self.destroy)(self.instance.as_ptr().cast::<c_void>()) };
        log::debug!("released plugin module {}", self.path.display());
    }
}
