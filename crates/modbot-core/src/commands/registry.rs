use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    commands::parse::ParsedCommand,
    messaging::types::{ChatMessage, OutboundMessage},
    Result,
};

/// Declarative access rules and help text for one built-in command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub mod_only: bool,
    pub private_allowed: bool,
    pub public_disallowed: bool,
    pub usage: &'static str,
}

impl CommandSpec {
    pub const fn new(name: &'static str, usage: &'static str) -> Self {
        Self {
            name,
            aliases: &[],
            mod_only: false,
            private_allowed: false,
            public_disallowed: false,
            usage,
        }
    }

    pub const fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    pub const fn mod_only(mut self) -> Self {
        self.mod_only = true;
        self
    }

    pub const fn private_allowed(mut self) -> Self {
        self.private_allowed = true;
        self
    }

    pub const fn public_disallowed(mut self) -> Self {
        self.public_disallowed = true;
        self
    }

    /// Check the sender and channel kind against this command's rules.
    pub fn check_access(&self, msg: &ChatMessage) -> std::result::Result<(), Denial> {
        if msg.is_private && !self.private_allowed {
            return Err(Denial::PrivateNotAllowed);
        }
        if !msg.is_private && self.public_disallowed {
            return Err(Denial::PublicNotAllowed);
        }
        if self.mod_only && !msg.is_moderator {
            return Err(Denial::ModeratorOnly);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Denial {
    PrivateNotAllowed,
    PublicNotAllowed,
    ModeratorOnly,
}

/// Everything a handler gets to see for one invocation.
pub struct CommandContext<'a> {
    pub message: &'a ChatMessage,
    pub command: &'a ParsedCommand,
    pub spec: &'a CommandSpec,
    pub registry: &'a Registry,
}

impl CommandContext<'_> {
    pub fn reply(&self, text: impl Into<String>) -> OutboundMessage {
        OutboundMessage::reply(self.message, text)
    }
}

/// Logic bound to one or more chat commands.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Produce zero or more outbound messages. Invalid user input should be a
    /// reply, not an error.
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>>;
}

struct Entry {
    spec: CommandSpec,
    handler: Arc<dyn CommandHandler>,
}

/// Name/alias → handler table for built-in commands.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
    by_name: HashMap<&'static str, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every spec in `specs`. Later registrations of the
    /// same name replace earlier ones.
    pub fn register(&mut self, specs: &[CommandSpec], handler: Arc<dyn CommandHandler>) {
        for spec in specs {
            let idx = self.entries.len();
            self.entries.push(Entry {
                spec: *spec,
                handler: handler.clone(),
            });
            self.by_name.insert(spec.name, idx);
            for alias in spec.aliases {
                self.by_name.insert(*alias, idx);
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<(&CommandSpec, &Arc<dyn CommandHandler>)> {
        let idx = *self.by_name.get(name)?;
        let entry = &self.entries[idx];
        Some((&entry.spec, &entry.handler))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Specs the sender of `msg` could run right now, sorted by name.
    pub fn available_to(&self, msg: &ChatMessage) -> Vec<&CommandSpec> {
        let mut specs: Vec<&CommandSpec> = self
            .by_name
            .iter()
            .filter(|(name, idx)| self.entries[**idx].spec.name == **name)
            .map(|(_, idx)| &self.entries[*idx].spec)
            .filter(|spec| spec.check_access(msg).is_ok())
            .collect();
        specs.sort_by_key(|spec| spec.name);
        specs
    }
}
