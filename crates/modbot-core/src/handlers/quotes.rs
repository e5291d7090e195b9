use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;

use crate::{
    commands::{parse::parse_position, CommandContext, CommandHandler, CommandSpec},
    messaging::types::OutboundMessage,
    quotes::{self, QuoteReply, NEED_DIGIT},
    sheets::SheetSync,
    storage::Store,
    Result,
};

pub const SPECS: &[CommandSpec] = &[
    CommandSpec::new(
        "quote",
        "!quote [n | add <text> | edit <n> <text> | delete <n>]",
    ),
    CommandSpec::new("add_quote", "!add_quote <text>"),
    CommandSpec::new("edit_quote", "!edit_quote <n> <text>").mod_only(),
    CommandSpec::new("delete_quote", "!delete_quote <n>").mod_only(),
    CommandSpec::new("show_quotes", "!show_quotes"),
    CommandSpec::new("update_quote_spreadsheet", "!update_quote_spreadsheet")
        .mod_only()
        .private_allowed(),
    CommandSpec::new(
        "update_quote_db_from_spreadsheet",
        "!update_quote_db_from_spreadsheet",
    )
    .mod_only()
    .private_allowed(),
];

pub const SHEET_NOT_CONFIGURED: &str = "The quote spreadsheet is not configured.";

pub struct QuoteHandler {
    store: Store,
    sync: Option<SheetSync>,
    sheet_link: Option<String>,
    rng: Mutex<StdRng>,
}

impl QuoteHandler {
    pub fn new(store: Store, sync: Option<SheetSync>, sheet_link: Option<String>) -> Self {
        Self::with_rng(store, sync, sheet_link, super::entropy_rng())
    }

    pub fn with_rng(
        store: Store,
        sync: Option<SheetSync>,
        sheet_link: Option<String>,
        rng: Mutex<StdRng>,
    ) -> Self {
        Self {
            store,
            sync,
            sheet_link,
            rng,
        }
    }

    fn random(&self) -> Result<QuoteReply> {
        quotes::get_random_quote(&self.store, &mut *super::lock_rng(&self.rng))
    }

    fn edit(&self, position: Option<&str>, text: &str) -> Result<QuoteReply> {
        let Some(position) = parse_position(position) else {
            return Ok(digit_reply());
        };
        if text.trim().is_empty() {
            return Ok(QuoteReply {
                text: "You must provide the new text of the quote.".to_string(),
                changed: false,
            });
        }
        quotes::edit_quote(&self.store, position, text)
    }

    fn delete(&self, position: Option<&str>) -> Result<QuoteReply> {
        match parse_position(position) {
            Some(position) => quotes::delete_quote(&self.store, position),
            None => Ok(digit_reply()),
        }
    }

    /// `!quote ...` with its sub-actions. `None` means the input is ignored.
    fn quote_command(&self, ctx: &CommandContext<'_>) -> Result<Option<QuoteReply>> {
        let cmd = ctx.command;
        let Some(first) = cmd.arg(0) else {
            return self.random().map(Some);
        };

        if first.chars().all(|c| c.is_ascii_digit()) {
            // Out-of-range (or absurdly long) numbers get the invalid-id reply.
            let position = first.parse().unwrap_or(usize::MAX);
            return quotes::get_quote(&self.store, position).map(Some);
        }

        let is_mod = ctx.message.is_moderator;
        match first.to_lowercase().as_str() {
            "add" => quotes::add_quote(&self.store, cmd.rest_after(1)).map(Some),
            "edit" if is_mod => self.edit(cmd.arg(1), cmd.rest_after(2)).map(Some),
            "delete" if is_mod => self.delete(cmd.arg(1)).map(Some),
            _ => Ok(None),
        }
    }

    async fn import(&self) -> String {
        let Some(sync) = &self.sync else {
            return SHEET_NOT_CONFIGURED.to_string();
        };
        match sync.import(&self.store).await {
            Ok(count) => format!("Imported {count} quotes from the spreadsheet."),
            Err(e) => {
                tracing::warn!(error = %e, "quote import failed");
                "Could not read the quote spreadsheet.".to_string()
            }
        }
    }

    fn request_export(&self) -> bool {
        match &self.sync {
            Some(sync) => {
                sync.request_export();
                true
            }
            None => false,
        }
    }
}

fn digit_reply() -> QuoteReply {
    QuoteReply {
        text: NEED_DIGIT.to_string(),
        changed: false,
    }
}

#[async_trait]
impl CommandHandler for QuoteHandler {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>> {
        let cmd = ctx.command;
        let reply = match ctx.spec.name {
            "quote" => self.quote_command(ctx)?,
            "add_quote" => Some(quotes::add_quote(&self.store, &cmd.rest)?),
            "edit_quote" => Some(self.edit(cmd.arg(0), cmd.rest_after(1))?),
            "delete_quote" => Some(self.delete(cmd.arg(0))?),
            "show_quotes" => {
                let text = match &self.sheet_link {
                    Some(link) => format!("View the quotes at: {link}"),
                    None => SHEET_NOT_CONFIGURED.to_string(),
                };
                return Ok(vec![ctx.reply(text)]);
            }
            "update_quote_spreadsheet" => {
                let text = if self.request_export() {
                    "Quote spreadsheet update queued."
                } else {
                    SHEET_NOT_CONFIGURED
                };
                return Ok(vec![ctx.reply(text)]);
            }
            "update_quote_db_from_spreadsheet" => {
                return Ok(vec![ctx.reply(self.import().await)]);
            }
            _ => None,
        };

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        if reply.changed {
            self.request_export();
        }
        Ok(vec![ctx.reply(reply.text)])
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;

    use super::*;
    use crate::{
        commands::Registry,
        domain::ChatUser,
        handlers::tests::invoke,
        messaging::types::ChatMessage,
    };

    fn handler(store: &Store) -> Registry {
        let handler = QuoteHandler::with_rng(
            store.clone(),
            None,
            Some("https://example.test/quotes".into()),
            Mutex::new(StdRng::seed_from_u64(7)),
        );
        let mut registry = Registry::new();
        registry.register(SPECS, Arc::new(handler));
        registry
    }

    async fn run(registry: &Registry, msg: ChatMessage) -> Vec<String> {
        invoke(registry, &msg).await
    }

    fn viewer(text: &str) -> ChatMessage {
        ChatMessage::public(ChatUser::new("viewer"), "room", text)
    }

    fn moderator(text: &str) -> ChatMessage {
        viewer(text).moderator()
    }

    #[tokio::test]
    async fn add_then_fetch() {
        let store = Store::open_in_memory().unwrap();
        let h = handler(&store);

        assert_eq!(
            run(&h, viewer("!quote add  hello   world")).await,
            vec!["Quote added as quote #1."]
        );
        assert_eq!(
            run(&h, viewer("!add_quote second")).await,
            vec!["Quote added as quote #2."]
        );
        assert_eq!(run(&h, viewer("!quote 1")).await, vec!["#1 hello   world"]);
        assert_eq!(
            run(&h, viewer("!quote 9")).await,
            vec!["Invalid quote id - there are only 2 quotes"]
        );
    }

    #[tokio::test]
    async fn random_quote_and_empty_book() {
        let store = Store::open_in_memory().unwrap();
        let h = handler(&store);
        assert_eq!(run(&h, viewer("!quote")).await, vec![quotes::NO_QUOTES]);

        store.add_quote("only").unwrap();
        assert_eq!(run(&h, viewer("!quote")).await, vec!["#1 only"]);
    }

    #[tokio::test]
    async fn edit_and_delete_need_a_moderator() {
        let store = Store::open_in_memory().unwrap();
        store.add_quote("a").unwrap();
        store.add_quote("b").unwrap();
        let h = handler(&store);

        assert!(run(&h, viewer("!quote delete 1")).await.is_empty());
        assert_eq!(store.list_quotes().unwrap().len(), 2);

        assert_eq!(
            run(&h, moderator("!quote edit 2 bee")).await,
            vec!["Quote has been edited."]
        );
        assert_eq!(
            run(&h, moderator("!quote delete x")).await,
            vec![NEED_DIGIT]
        );
        assert_eq!(
            run(&h, moderator("!delete_quote 1")).await,
            vec!["Quote deleted"]
        );
        assert_eq!(run(&h, viewer("!quote 1")).await, vec!["#1 bee"]);
        assert_eq!(
            run(&h, moderator("!edit_quote 5 nope")).await,
            vec![quotes::QUOTE_NOT_FOUND]
        );
    }

    #[tokio::test]
    async fn spreadsheet_commands_without_configuration() {
        let store = Store::open_in_memory().unwrap();
        let h = handler(&store);
        assert_eq!(
            run(&h, viewer("!show_quotes")).await,
            vec!["View the quotes at: https://example.test/quotes"]
        );
        assert_eq!(
            run(&h, moderator("!update_quote_spreadsheet")).await,
            vec![SHEET_NOT_CONFIGURED]
        );
        assert_eq!(
            run(&h, moderator("!update_quote_db_from_spreadsheet")).await,
            vec![SHEET_NOT_CONFIGURED]
        );
    }
}
