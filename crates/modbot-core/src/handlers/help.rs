use async_trait::async_trait;

use crate::{
    commands::{CommandContext, CommandHandler, CommandSpec},
    messaging::types::OutboundMessage,
    storage::Store,
    Result,
};

pub const SPECS: &[CommandSpec] = &[CommandSpec::new("commands", "!commands").private_allowed()];

/// Lists the built-in commands the sender may run, then the custom ones.
pub struct Help {
    store: Store,
    prefix: String,
}

impl Help {
    pub fn new(store: Store, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl CommandHandler for Help {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>> {
        let builtin: Vec<String> = ctx
            .registry
            .available_to(ctx.message)
            .into_iter()
            .map(|spec| format!("{}{}", self.prefix, spec.name))
            .collect();
        let mut out = vec![ctx.reply(format!("Commands: {}", builtin.join(", ")))];

        let custom = self.store.list_command_calls()?;
        if !custom.is_empty() {
            let custom: Vec<String> = custom
                .into_iter()
                .map(|call| format!("{}{call}", self.prefix))
                .collect();
            out.push(ctx.reply(format!("Custom commands: {}", custom.join(", "))));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        commands::Registry,
        domain::ChatUser,
        handlers::{ban_roulette, chat_control, tests::invoke},
        messaging::{sender::ChatGate, types::ChatMessage},
    };

    #[tokio::test]
    async fn lists_only_what_the_sender_can_run() {
        let store = Store::open_in_memory().unwrap();
        store.add_command("discord", "join").unwrap();

        let mut registry = Registry::new();
        registry.register(SPECS, Arc::new(Help::new(store.clone(), "!")));
        registry.register(ban_roulette::SPECS, Arc::new(ban_roulette::BanRoulette::new(30)));
        registry.register(
            chat_control::SPECS,
            Arc::new(chat_control::ChatControl::new(store.clone(), ChatGate::new(true))),
        );

        let viewer = ChatMessage::public(ChatUser::new("viewer"), "room", "!commands");
        assert_eq!(
            invoke(&registry, &viewer).await,
            vec![
                "Commands: !ban_roulette, !commands",
                "Custom commands: !discord"
            ]
        );

        let whisper = ChatMessage::whisper(ChatUser::new("boss"), "!commands").moderator();
        assert_eq!(
            invoke(&registry, &whisper).await[0],
            "Commands: !commands, !start_speaking, !stop_speaking"
        );
    }
}
