use async_trait::async_trait;

use crate::{
    autoquotes::{AutoQuoteScheduler, MAX_PERIOD},
    commands::{parse::parse_position, CommandContext, CommandHandler, CommandSpec},
    messaging::types::OutboundMessage,
    storage::Store,
    Result,
};

pub const SPECS: &[CommandSpec] = &[
    CommandSpec::new("add_auto_quote", "!add_auto_quote <period secs> <text>").mod_only(),
    CommandSpec::new("delete_auto_quote", "!delete_auto_quote <n>").mod_only(),
    CommandSpec::new("auto_quotes", "!auto_quotes")
        .mod_only()
        .private_allowed(),
    CommandSpec::new("start_auto_quotes", "!start_auto_quotes")
        .mod_only()
        .private_allowed(),
    CommandSpec::new("stop_auto_quotes", "!stop_auto_quotes")
        .mod_only()
        .private_allowed(),
];

pub const AUTO_QUOTE_NOT_FOUND: &str = "That auto quote does not exist";

pub struct AutoQuoteCommands {
    store: Store,
    scheduler: AutoQuoteScheduler,
}

impl AutoQuoteCommands {
    pub fn new(store: Store, scheduler: AutoQuoteScheduler) -> Self {
        Self { store, scheduler }
    }

    /// Running jobs are restarted so they pick up the edited list.
    async fn refresh(&self) -> Result<()> {
        if self.scheduler.is_running() {
            self.scheduler.start().await?;
        }
        Ok(())
    }

    async fn add(&self, ctx: &CommandContext<'_>) -> Result<String> {
        let period = ctx
            .command
            .arg(0)
            .and_then(|p| p.parse::<u64>().ok())
            .filter(|p| (1..=MAX_PERIOD.as_secs()).contains(p));
        let text = ctx.command.rest_after(1);
        let (Some(period), false) = (period, text.is_empty()) else {
            return Ok(format!("Usage: {}", ctx.spec.usage));
        };
        let count = self.store.add_auto_quote(text, period)?;
        self.refresh().await?;
        Ok(format!("Auto quote added as auto quote #{count}."))
    }

    async fn delete(&self, ctx: &CommandContext<'_>) -> Result<String> {
        let Some(position) = parse_position(ctx.command.arg(0)) else {
            return Ok("You must use a digit to specify an auto quote.".to_string());
        };
        let quotes = self.store.list_auto_quotes()?;
        let Some(quote) = quotes.get(position - 1) else {
            return Ok(AUTO_QUOTE_NOT_FOUND.to_string());
        };
        self.store.delete_auto_quote(quote.id)?;
        self.refresh().await?;
        Ok("Auto quote deleted".to_string())
    }
}

#[async_trait]
impl CommandHandler for AutoQuoteCommands {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>> {
        let text = match ctx.spec.name {
            "add_auto_quote" => self.add(ctx).await?,
            "delete_auto_quote" => self.delete(ctx).await?,
            "auto_quotes" => {
                let quotes = self.store.list_auto_quotes()?;
                if quotes.is_empty() {
                    return Ok(vec![ctx.reply("No auto quotes currently exist")]);
                }
                return Ok(quotes
                    .iter()
                    .enumerate()
                    .map(|(idx, q)| {
                        ctx.reply(format!("#{} ({}s) {}", idx + 1, q.period_secs, q.text))
                    })
                    .collect());
            }
            "start_auto_quotes" => {
                let jobs = self.scheduler.start().await?;
                format!("Started {jobs} auto quotes.")
            }
            "stop_auto_quotes" => {
                self.scheduler.stop().await;
                "Auto quotes stopped.".to_string()
            }
            _ => return Ok(Vec::new()),
        };
        Ok(vec![ctx.reply(text)])
    }
}
