//! Command parsing and the built-in command table.

pub mod parse;
pub mod registry;

pub use parse::{parse_command, ParsedCommand};
pub use registry::{CommandContext, CommandHandler, CommandSpec, Denial, Registry};
