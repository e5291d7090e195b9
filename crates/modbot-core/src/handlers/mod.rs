//! Built-in chat command handlers.
//!
//! Each module exposes a `SPECS` table (names, aliases and access rules) and a
//! handler type registered against it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::{rngs::StdRng, SeedableRng};

pub mod auto_quotes;
pub mod ban_roulette;
pub mod chat_control;
pub mod custom_commands;
pub mod help;
pub mod quotes;
pub mod shower_thought;

pub(crate) fn entropy_rng() -> Mutex<StdRng> {
    Mutex::new(StdRng::from_entropy())
}

pub(crate) fn lock_rng(rng: &Mutex<StdRng>) -> MutexGuard<'_, StdRng> {
    rng.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::{
        commands::{parse_command, CommandContext, Registry},
        messaging::types::ChatMessage,
    };

    /// Run `msg` through `registry` with the `!` prefix and collect reply texts.
    pub(crate) async fn invoke(registry: &Registry, msg: &ChatMessage) -> Vec<String> {
        let cmd = parse_command(&msg.content, "!").expect("test message is a command");
        let (spec, handler) = registry.lookup(&cmd.name).expect("command is registered");
        let ctx = CommandContext {
            message: msg,
            command: &cmd,
            spec,
            registry,
        };
        handler
            .handle(&ctx)
            .await
            .expect("handler succeeds")
            .into_iter()
            .map(|m| m.text)
            .collect()
    }
}
