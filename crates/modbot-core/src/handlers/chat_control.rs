use async_trait::async_trait;

use crate::{
    commands::{CommandContext, CommandHandler, CommandSpec},
    messaging::{sender::ChatGate, types::OutboundMessage},
    storage::Store,
    Result,
};

pub const SPECS: &[CommandSpec] = &[
    CommandSpec::new("stop_speaking", "!stop_speaking")
        .mod_only()
        .private_allowed(),
    CommandSpec::new("start_speaking", "!start_speaking")
        .mod_only()
        .private_allowed(),
];

pub const ALLOWED_TO_CHAT_KEY: &str = "allowed_to_chat";

/// The persisted chat flag; defaults to allowed.
pub fn load_chat_flag(store: &Store) -> Result<bool> {
    Ok(store
        .get_value(ALLOWED_TO_CHAT_KEY)?
        .map(|v| v != "false")
        .unwrap_or(true))
}

pub struct ChatControl {
    store: Store,
    gate: ChatGate,
}

impl ChatControl {
    pub fn new(store: Store, gate: ChatGate) -> Self {
        Self { store, gate }
    }

    fn set(&self, allowed: bool) -> Result<()> {
        self.store
            .set_value(ALLOWED_TO_CHAT_KEY, if allowed { "true" } else { "false" })?;
        self.gate.set_allowed(allowed);
        tracing::info!(allowed, "chat output toggled");
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for ChatControl {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>> {
        match ctx.spec.name {
            // Anything queued now would only go out after `!start_speaking`.
            "stop_speaking" => {
                self.set(false)?;
                Ok(Vec::new())
            }
            "start_speaking" => {
                let was_allowed = self.gate.is_allowed();
                self.set(true)?;
                if was_allowed {
                    Ok(Vec::new())
                } else {
                    Ok(vec![ctx.reply("Chat output resumed.")])
                }
            }
            _ => Ok(Vec::new()),
        }
    }
}
