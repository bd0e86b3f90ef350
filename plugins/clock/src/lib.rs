//! Example Lynx plugin adding `now` and `uptime`.
//!
//! Build with `cargo build -p lynx-clock --release` and copy the resulting
//! shared library into `~/.lynx/plugins`.

use anyhow::anyhow;
use chrono::{DateTime, Local};
use lynx::plugin::{
    CommandRegistrar, CommandRegistration, EventContext, Plugin, PluginDescriptor, PluginEvent,
};
use lynx::{Command, ShellContext};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::rc::Rc;

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct ClockPlugin {
    descriptor: PluginDescriptor,
    started: DateTime<Local>,
    commands_run: u64,
    format: Rc<RefCell<String>>,
}

impl ClockPlugin {
    pub fn new() -> Self {
        Self {
            descriptor: PluginDescriptor::new("clock", env!("CARGO_PKG_VERSION"))
                .author("Lynx developers")
                .description("Current time and session uptime"),
            started: Local::now(),
            commands_run: 0,
            format: Rc::new(RefCell::new(DEFAULT_FORMAT.to_string())),
        }
    }

    fn uptime_line(&self, now: DateTime<Local>) -> String {
        let elapsed = (now - self.started).num_seconds().max(0);
        format!(
            "up {}, {} command(s) run",
            format_duration(elapsed),
            self.commands_run
        )
    }
}

impl Default for ClockPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// `3725` -> `1h 02m 05s`
pub fn format_duration(seconds: i64) -> String {
    let (h, m, s) = (seconds / 3600, seconds % 3600 / 60, seconds % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

impl Plugin for ClockPlugin {
    fn initialize(
        &mut self,
        _ctx: &mut ShellContext,
        registrar: &CommandRegistrar,
    ) -> anyhow::Result<()> {
        self.started = Local::now();
        registrar.register(CommandRegistration::forwarded(
            "uptime",
            "Show how long this shell has been running",
            "uptime",
        ))?;

        let format = self.format.clone();
        registrar.register(CommandRegistration::with_handler(
            "now",
            "Print the current date and time",
            "now [strftime-format]",
            move |cmd: &Command, _ctx: &mut ShellContext| {
                let pattern = if cmd.args.is_empty() {
                    format.borrow().clone()
                } else {
                    cmd.args_line()
                };
                let mut text = String::new();
                write!(text, "{}", Local::now().format(&pattern))
                    .map_err(|_| anyhow!("now: invalid format {:?}", pattern))?;
                println!("{}", text);
                Ok(true)
            },
        ))?;
        Ok(())
    }

    fn shutdown(&mut self) {
        log::debug!("clock: {}", self.uptime_line(Local::now()));
    }

    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn on_event(&mut self, event: PluginEvent, _context: &EventContext) -> anyhow::Result<()> {
        if event == PluginEvent::CommandAfter {
            self.commands_run += 1;
        }
        Ok(())
    }

    fn handle_command(&mut self, cmd: &Command, _ctx: &mut ShellContext) -> anyhow::Result<bool> {
        match cmd.name.as_str() {
            "uptime" => {
                println!("{}", self.uptime_line(Local::now()));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn configure(&mut self, settings: &BTreeMap<String, String>) {
        if let Some(format) = settings.get("clock_format") {
            *self.format.borrow_mut() = format.clone();
        }
    }
}

lynx::declare_plugin!(ClockPlugin, ClockPlugin::new());
