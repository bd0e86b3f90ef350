use lynx::plugin::{DynamicLoader, PluginState};
use lynx::{Command, PluginManager, ShellContext};
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::path::PathBuf;

/// The `cdylib` cargo builds next to this test binary.
fn built_library() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let deps = exe.parent()?;
    let file = format!("{}lynx_clock.{}", DLL_PREFIX, DLL_EXTENSION);
    [deps.join(&file), deps.parent()?.join(&file)]
        .into_iter()
        .find(|path| path.is_file())
}

#[test]
fn clock_library_loads_runs_and_unloads() {
    let Some(path) = built_library() else {
        eprintln!("liblynx_clock not built next to the test binary, skipping");
        return;
    };
    let mut ctx = ShellContext::in_memory();
    let mut plugins = PluginManager::with_loader(Box::new(DynamicLoader));

    let name = plugins.load_plugin(&path, &mut ctx).expect("load clock");
    assert_eq!(name, "clock");
    assert_eq!(plugins.plugin_state("clock"), Some(PluginState::Running));
    assert!(plugins.is_plugin_command("now"));
    assert!(plugins.is_plugin_command("uptime"));

    assert!(plugins.execute_plugin_command(&Command::new("now", vec![]), &mut ctx));
    assert!(plugins.execute_plugin_command(&Command::new("uptime", vec![]), &mut ctx));

    plugins.unload_plugin("clock").expect("unload clock");
    assert_eq!(plugins.plugin_state("clock"), Some(PluginState::Unloaded));
    assert!(!plugins.is_plugin_command("now"));
}

#[test]
fn second_copy_of_the_library_is_rejected() {
    let Some(path) = built_library() else {
        return;
    };
    let mut ctx = ShellContext::in_memory();
    let mut plugins = PluginManager::with_loader(Box::new(DynamicLoader));

    plugins.load_plugin(&path, &mut ctx).expect("load clock");
    assert!(plugins.load_plugin(&path, &mut ctx).is_err());
    assert_eq!(plugins.loaded_plugin_names(), ["clock"]);
    assert!(plugins.execute_plugin_command(&Command::new("uptime", vec![]), &mut ctx));
    plugins.unload_all_plugins();
}
