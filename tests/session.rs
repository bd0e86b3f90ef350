use lynx::config::{Config, LynxDirs};
use lynx::plugin::{
    CommandRegistrar, CommandRegistration, DynamicLoader, EventContext, Plugin, PluginDescriptor,
    PluginEvent, StaticModule,
};
use lynx::shell::ScriptReader;
use lynx::{PluginManager, Shell, ShellContext};
use std::cell::RefCell;
use std::fs;
use std::io::{self, Cursor, Write};
use std::rc::Rc;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Counter {
    descriptor: PluginDescriptor,
    log: Rc<RefCell<Vec<String>>>,
}

impl Plugin for Counter {
    fn initialize(
        &mut self,
        _ctx: &mut ShellContext,
        registrar: &CommandRegistrar,
    ) -> anyhow::Result<()> {
        registrar.register(CommandRegistration::forwarded(
            "count",
            "print the number of entered lines",
            "count",
        ))?;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.log.borrow_mut().push("shutdown".to_string());
    }

    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn on_event(&mut self, event: PluginEvent, context: &EventContext) -> anyhow::Result<()> {
        if event == PluginEvent::CommandAfter {
            let entry = format!("{}={}", context["command"], context["exit_code"]);
            self.log.borrow_mut().push(entry);
        } else if event == PluginEvent::ShellShutdown {
            self.log.borrow_mut().push("shell-shutdown".to_string());
        }
        Ok(())
    }

    fn handle_command(
        &mut self,
        _cmd: &lynx::Command,
        ctx: &mut ShellContext,
    ) -> anyhow::Result<bool> {
        let count = ctx.history().len();
        ctx.config_mut().set("last_count", &count.to_string())?;
        Ok(true)
    }
}

fn session(ctx: ShellContext) -> (Shell, SharedBuffer, Rc<RefCell<Vec<String>>>) {
    let out = SharedBuffer::default();
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut plugins = PluginManager::with_loader(Box::new(DynamicLoader));
    let mut ctx = ctx;
    plugins
        .load_module(
            StaticModule::boxed(Counter {
                descriptor: PluginDescriptor::new("counter", "0.1.0"),
                log: log.clone(),
            }),
            &mut ctx,
        )
        .expect("load counter");
    let shell = Shell::new(ctx, plugins).with_output(Box::new(out.clone()));
    (shell, out, log)
}

#[test]
fn scripted_session_runs_plugin_builtin_and_external_commands() {
    let (mut shell, out, log) = session(ShellContext::in_memory());
    let script = "\
count
nosuchcmd123

set theme minimal
history
exit
count
";
    shell.startup().expect("startup");
    shell
        .run(&mut ScriptReader::new(Cursor::new(script)))
        .expect("run");

    let ctx = shell.context();
    assert_eq!(
        ctx.history(),
        ["count", "nosuchcmd123", "set theme minimal", "history", "exit"]
    );
    assert_eq!(ctx.config().get("last_count", ""), "1");
    assert_eq!(ctx.theme_name(), "minimal");

    let text = out.text();
    assert!(text.contains("Welcome to Lynx Shell!"));
    assert!(text.contains("4: history\n"));

    assert_eq!(
        *log.borrow(),
        [
            "count=0",
            "nosuchcmd123=127",
            "set=0",
            "history=0",
            "exit=0",
            "shell-shutdown",
            "shutdown"
        ]
    );
}

#[test]
fn settings_persist_across_sessions() {
    let home = TempDir::new().expect("temp dir");
    let dirs = LynxDirs::new(home.path().join(".lynx"));

    let (mut shell, _, _) = session(ShellContext::load(&dirs).expect("load"));
    let script = "theme dark\nalias gs=git status\nset history_size 50\n";
    shell
        .run(&mut ScriptReader::new(Cursor::new(script)))
        .expect("run");

    let config = Config::load(dirs.config_file()).expect("reload config");
    assert_eq!(config.get("theme", ""), "dark");
    assert_eq!(config.get_int("history_size", 0), 50);
    let aliases = fs::read_to_string(dirs.aliases_file()).expect("aliases file");
    assert!(aliases.contains("gs=\"git status\""));

    let reloaded = ShellContext::load(&dirs).expect("reload");
    assert_eq!(reloaded.theme_name(), "dark");
    assert_eq!(reloaded.aliases().get("gs"), Some("git status"));
}

#[test]
fn plugins_directory_without_libraries_loads_nothing() {
    let home = TempDir::new().expect("temp dir");
    fs::write(home.path().join("README"), "not a plugin").expect("write");

    let mut plugins = PluginManager::with_loader(Box::new(DynamicLoader));
    plugins.add_plugin_path(home.path());
    let mut ctx = ShellContext::in_memory();
    assert_eq!(plugins.load_all_plugins(&mut ctx), 0);
    assert!(plugins.loaded_plugin_names().is_empty());
}
