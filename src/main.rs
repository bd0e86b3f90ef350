use lynx::Shell;
use lynx::shell::{EditorReader, LineReader, ScriptReader};
use std::io::{self, IsTerminal};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run() {
        eprintln!("lynx: {:#}", err);
    }
    println!("Goodbye!");
}

fn run() -> anyhow::Result<()> {
    let mut shell = Shell::from_environment()?;
    shell.startup()?;

    let mut reader: Box<dyn LineReader> = if io::stdin().is_terminal() {
        println!("Type 'help' for available commands or 'exit' to quit.");
        Box::new(EditorReader::new()?)
    } else {
        Box::new(ScriptReader::new(io::stdin().lock()))
    };
    shell.run(reader.as_mut())
}
