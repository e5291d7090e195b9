use std::sync::Mutex;

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng};

use crate::{
    commands::{CommandContext, CommandHandler, CommandSpec},
    messaging::types::OutboundMessage,
    Result,
};

pub const SPECS: &[CommandSpec] = &[CommandSpec::new("ban_roulette", "!ban_roulette [user]")];

/// One pull of the trigger: a fair six-sided draw that loses on a six.
pub fn spin(rng: &mut impl Rng) -> bool {
    rng.gen_range(1..=6) == 6
}

/// Who plays: moderators pick someone else, everyone else plays themself.
pub fn pick_target(sender: &str, is_moderator: bool, requested: Option<&str>) -> Option<String> {
    let requested = requested
        .map(|name| name.trim_start_matches('@').to_lowercase())
        .filter(|name| !name.is_empty());
    match (is_moderator, requested) {
        (true, Some(target)) => Some(target),
        (false, None) => Some(sender.to_lowercase()),
        _ => None,
    }
}

pub struct BanRoulette {
    timeout_secs: u32,
    rng: Mutex<StdRng>,
}

impl BanRoulette {
    pub fn new(timeout_secs: u32) -> Self {
        Self::with_rng(timeout_secs, super::entropy_rng())
    }

    pub fn with_rng(timeout_secs: u32, rng: Mutex<StdRng>) -> Self {
        Self { timeout_secs, rng }
    }
}

#[async_trait]
impl CommandHandler for BanRoulette {
    async fn handle(&self, ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>> {
        let msg = ctx.message;
        let Some(target) = pick_target(&msg.sender.login, msg.is_moderator, ctx.command.arg(0))
        else {
            return Ok(Vec::new());
        };

        // Chat lines name a self-spinning player the way chat shows them.
        let shown = if target.eq_ignore_ascii_case(&msg.sender.login) {
            msg.sender.display_name.as_str()
        } else {
            target.as_str()
        };

        let fired = spin(&mut *super::lock_rng(&self.rng));
        tracing::info!(target_user = %target, fired, "ban roulette");

        if fired {
            Ok(vec![
                ctx.reply(format!("/timeout {target} {}", self.timeout_secs)),
                ctx.reply(format!("Bang! {shown} was timed out.")),
            ])
        } else {
            Ok(vec![ctx.reply(format!("{shown} is safe for now."))])
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;

    use super::*;
    use crate::{
        commands::Registry, domain::ChatUser, handlers::tests::invoke,
        messaging::types::ChatMessage,
    };

    #[test]
    fn fires_about_one_time_in_six() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let trials = 60_000;
        let fired = (0..trials).filter(|_| spin(&mut rng)).count();
        let rate = fired as f64 / trials as f64;
        assert!((rate - 1.0 / 6.0).abs() < 0.01, "rate was {rate}");
    }

    #[test]
    fn target_selection() {
        assert_eq!(pick_target("Mod", true, Some("@Victim")), Some("victim".into()));
        assert_eq!(pick_target("Mod", true, None), None);
        assert_eq!(pick_target("Viewer", false, None), Some("viewer".into()));
        assert_eq!(pick_target("Viewer", false, Some("someone")), None);
    }

    #[tokio::test]
    async fn replies_go_to_the_channel() {
        let mut registry = Registry::new();
        registry.register(SPECS, Arc::new(BanRoulette::new(30)));
        let viewer = ChatUser::with_display_name("viewer", "ViewerOne");
        let msg = ChatMessage::public(viewer, "room", "!ban_roulette");

        for _ in 0..50 {
            let out = invoke(&registry, &msg).await;
            match out.as_slice() {
                [safe] => assert_eq!(safe, "ViewerOne is safe for now."),
                [timeout, bang] => {
                    assert_eq!(timeout, "/timeout viewer 30");
                    assert_eq!(bang, "Bang! ViewerOne was timed out.");
                }
                other => panic!("unexpected replies {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn moderators_name_the_target() {
        let mut registry = Registry::new();
        registry.register(
            SPECS,
            Arc::new(BanRoulette::with_rng(30, Mutex::new(StdRng::seed_from_u64(9)))),
        );
        let boss = ChatUser::with_display_name("boss", "TheBoss");
        let msg = ChatMessage::public(boss, "room", "!ban_roulette @Victim").moderator();

        let out = invoke(&registry, &msg).await;
        assert!(out.iter().all(|line| !line.contains("TheBoss")));
        assert!(out.last().unwrap().contains("victim"));
    }
}
