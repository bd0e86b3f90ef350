//! Line tokenizer.
//!
//! Input is split on runs of whitespace. There is no quoting and no escaping:
//! `echo "a b"` yields the two arguments `"a` and `b"`.

use crate::command::Command;

/// Split a raw input line into whitespace-separated tokens.
pub fn tokenize(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_owned).collect()
}

/// Parse a raw line into a [`Command`].
///
/// The first token becomes the command name and the rest its arguments.
/// Blank input produces a command with an empty name.
pub fn parse_command(line: &str) -> Command {
    let mut tokens = tokenize(line).into_iter();
    match tokens.next() {
        Some(name) => Command::new(name, tokens.collect()),
        None => Command::default(),
    }
}
