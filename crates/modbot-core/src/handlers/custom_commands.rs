use async_trait::async_trait;

use crate::{
    commands::{parse::is_valid_name, CommandContext, CommandHandler, CommandSpec},
    messaging::types::{ChatMessage, OutboundMessage},
    storage::{CustomCommand, Store},
    Result,
};

pub const SPECS: &[CommandSpec] = &[
    CommandSpec::new("add_command", "!add_command <call> <response>").mod_only(),
    CommandSpec::new("delete_command", "!delete_command <call>").mod_only(),
    CommandSpec::new(
        "command_permission",
        "!command_permission add|remove <call> <user>",
    )
    .mod_only(),
];

/// Whether `msg`'s sender may trigger `command`. Moderators always can; an
/// empty permission list means everyone can.
pub fn may_trigger(command: &CustomCommand, msg: &ChatMessage) -> bool {
    msg.is_moderator
        || command.permitted_users.is_empty()
        || command
            .permitted_users
            .iter()
            .any(|u| u.eq_ignore_ascii_case(&msg.sender.login))
}

/// `!foo` and `foo` both name the call `foo`.
fn normalize_call(raw: &str, prefix: &str) -> String {
    raw.strip_prefix(prefix).unwrap_or(raw).to_lowercase()
}

pub struct CustomCommands {
    store: Store,
    prefix: String,
}

impl CustomCommands {
    pub fn new(store: Store, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn add(&self, ctx: &CommandContext<'_>) -> Result<String> {
        let (Some(raw), response) = (ctx.command.arg(0), ctx.command.rest_after(1)) else {
            return Ok(format!("Usage: {}", ctx.spec.usage));
        };
        if response.is_empty() {
            return Ok(format!("Usage: {}", ctx.spec.usage));
        }
        let call = normalize_call(raw, &self.prefix);
        if !is_valid_name(&call) || ctx.registry.contains(&call) {
            return Ok(format!("{}{call} cannot be used as a command.", self.prefix));
        }
        if !self.store.add_command(&call, response)? {
            return Ok(format!("Command {}{call} already exists.", self.prefix));
        }
        tracing::info!(call = %call, by = %ctx.message.sender.login, "custom command added");
        Ok(format!("Command {}{call} added.", self.prefix))
    }

    fn delete(&self, ctx: &CommandContext<'_>) -> Result<String> {
        let Some(raw) = ctx.command.arg(0) else {
            return Ok(format!("Usage: {}", ctx.spec.usage));
        };
        let call = normalize_call(raw, &self.prefix);
        if self.store.delete_command(&call)? {
            tracing::info!(call = %call, by = %ctx.message.sender.login, "custom command deleted");
            Ok(format!("Command {}{call} deleted.", self.prefix))
        } else {
            Ok("No such command.".to_string())
        }
    }

    fn permission(&self, ctx: &CommandContext<'_>) -> Result<String> {
        let cmd = ctx.command;
        let (Some(action), Some(raw), Some(user)) = (cmd.arg(0), cmd.arg(1), cmd.arg(2)) else {
            return Ok(format!("Usage: {}", ctx.spec.usage));
        };
        let call = normalize_call(raw, &self.prefix);
        let user = user.trim_start_matches('@').to_lowercase();
        if self.store.find_command(&call)?.is_none() {
            return Ok("No such command.".to_string());
        }

        let text = match action.to_lowercase().as_str() {
            "add" if self.store.add_permission(&call, &user)? => {
                format!("{user} may now use {}{call}.", self.prefix)
            }
            "add" => format!("{user} could already use {}{call}.", self.prefix),
            "remove" if self.store.remove_permission(&call, &user)? => {
                format!("{user} may no longer use {}{call}.", self.prefix)
            }
            "remove" => format!("{user} was not on the list for {}{call}.", self.prefix),
            _ => format!("Usage: {}", ctx.spec.usage),
        };
        Ok(text)
    }
}

#[async_trait]
impl CommandHandler for CustomCommands {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>> {
        let text = match ctx.spec.name {
            "add_command" => self.add(ctx)?,
            "delete_command" => self.delete(ctx)?,
            "command_permission" => self.permission(ctx)?,
            _ => return Ok(Vec::new()),
        };
        Ok(vec![ctx.reply(text)])
    }
}
