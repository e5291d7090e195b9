use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;

use crate::{
    commands::{CommandContext, CommandHandler, CommandSpec},
    messaging::types::OutboundMessage,
    reddit::{pick_title, TitleSource},
    Result,
};

pub const SPECS: &[CommandSpec] = &[CommandSpec::new("shower_thought", "!shower_thought")];

pub const SUBREDDIT: &str = "showerthoughts";
pub const NOTHING_FOUND: &str = "Could not find a shower thought right now.";

pub struct ShowerThought {
    source: Arc<dyn TitleSource>,
    rng: Mutex<StdRng>,
}

impl ShowerThought {
    pub fn new(source: Arc<dyn TitleSource>) -> Self {
        Self::with_rng(source, super::entropy_rng())
    }

    pub fn with_rng(source: Arc<dyn TitleSource>, rng: Mutex<StdRng>) -> Self {
        Self { source, rng }
    }
}

#[async_trait]
impl CommandHandler for ShowerThought {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>> {
        let fetched = self.source.top_titles(SUBREDDIT, "day", 10).await;
        let picked = match fetched {
            Ok(titles) => pick_title(titles, &mut *super::lock_rng(&self.rng)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch shower thoughts");
                None
            }
        };
        Ok(vec![ctx.reply(picked.as_deref().unwrap_or(NOTHING_FOUND))])
    }
}
