//! Inbound side of the bot.
//!
//! [`Service`] owns the read loop: it pulls raw batches from the transport,
//! packages them and hands each message, in order, to the [`Dispatcher`].
//! The dispatcher resolves the command, enforces the access table and runs
//! the handler; replies are pushed onto the outbound queue as one unit.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    commands::{parse_command, CommandContext, ParsedCommand, Registry},
    handlers::custom_commands::may_trigger,
    messaging::{
        port::ChatTransport,
        queue::OutboundQueue,
        types::{split_message, ChatMessage, OutboundMessage},
    },
    retry::Backoff,
    storage::Store,
    Result,
};

pub const HANDLER_FAILED: &str = "Sorry, something went wrong running that command.";

pub struct Dispatcher {
    prefix: String,
    registry: Registry,
    store: Store,
    max_message_len: usize,
}

impl Dispatcher {
    pub fn new(
        prefix: impl Into<String>,
        registry: Registry,
        store: Store,
        max_message_len: usize,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            registry,
            store,
            max_message_len,
        }
    }

    /// Everything `msg` should produce, in send order. Long replies are split
    /// into parts that fit the transport.
    pub async fn dispatch(&self, msg: &ChatMessage) -> Vec<OutboundMessage> {
        if let Err(e) = self.store.ensure_user(&msg.sender.login) {
            tracing::warn!(user = %msg.sender.login, error = %e, "failed to record user");
        }

        let Some(cmd) = parse_command(&msg.content, &self.prefix) else {
            return Vec::new();
        };

        let out = match self.registry.lookup(&cmd.name) {
            Some((spec, handler)) => {
                if let Err(denial) = spec.check_access(msg) {
                    tracing::debug!(
                        command = spec.name,
                        user = %msg.sender.login,
                        ?denial,
                        "command denied"
                    );
                    return Vec::new();
                }
                let ctx = CommandContext {
                    message: msg,
                    command: &cmd,
                    spec,
                    registry: &self.registry,
                };
                match handler.handle(&ctx).await {
                    Ok(out) => out,
                    Err(e) => {
                        tracing::error!(command = spec.name, error = %e, "command handler failed");
                        vec![OutboundMessage::reply(msg, HANDLER_FAILED)]
                    }
                }
            }
            None => self.custom_command(msg, &cmd),
        };

        self.split(out)
    }

    fn custom_command(&self, msg: &ChatMessage, cmd: &ParsedCommand) -> Vec<OutboundMessage> {
        if msg.is_private {
            return Vec::new();
        }
        match self.store.find_command(&cmd.name) {
            Ok(Some(command)) if may_trigger(&command, msg) => {
                vec![OutboundMessage::reply(msg, command.response)]
            }
            Ok(Some(command)) => {
                tracing::debug!(
                    call = %command.call,
                    user = %msg.sender.login,
                    "custom command not permitted"
                );
                Vec::new()
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(call = %cmd.name, error = %e, "custom command lookup failed");
                Vec::new()
            }
        }
    }

    fn split(&self, out: Vec<OutboundMessage>) -> Vec<OutboundMessage> {
        out.into_iter()
            .flat_map(|m| {
                let target = m.target;
                split_message(&m.text, self.max_message_len)
                    .into_iter()
                    .map(move |part| OutboundMessage::new(target.clone(), part))
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
}

#[derive(Clone, Copy, Debug)]
pub struct ServiceConfig {
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

/// The dispatch loop.
pub struct Service<T: ChatTransport> {
    transport: Arc<T>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<OutboundQueue>,
    cfg: ServiceConfig,
    running: AtomicBool,
}

impl<T: ChatTransport> Service<T> {
    pub fn new(
        transport: Arc<T>,
        dispatcher: Arc<Dispatcher>,
        queue: Arc<OutboundQueue>,
        cfg: ServiceConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            queue,
            cfg,
            running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ServiceState {
        if self.running.load(Ordering::SeqCst) {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        }
    }

    /// Run until `cancel` fires. Transport errors never end the loop; they
    /// back off exponentially until the next successful read.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("dispatch loop started");

        let mut backoff = Backoff::new(self.cfg.backoff_initial, self.cfg.backoff_max);
        while !cancel.is_cancelled() {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = self.transport.read_raw() => read,
            };

            match read {
                Ok(raw) => {
                    backoff.reset();
                    let messages = self.transport.package(&raw);
                    self.handle_batch(messages).await;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transport read failed; backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("dispatch loop stopped");
        Ok(())
    }

    /// Dispatch one packaged batch in order. Returns the number of replies queued.
    pub async fn handle_batch(&self, messages: Vec<ChatMessage>) -> usize {
        let mut queued = 0;
        for msg in messages {
            let out = self.dispatcher.dispatch(&msg).await;
            if out.is_empty() {
                continue;
            }
            queued += out.len();
            self.queue.push_all(out).await;
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        commands::{CommandHandler, CommandSpec},
        domain::{ChatTarget, ChatUser},
        errors::Error,
        handlers::quotes::{self, QuoteHandler},
        messaging::types::TransportCapabilities,
    };

    /// Lines look like `user|text`, or `@user|text` for moderators.
    struct ScriptedTransport {
        reads: StdMutex<VecDeque<Result<Vec<String>>>>,
        read_calls: StdMutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedTransport {
        fn new(reads: Vec<Result<Vec<String>>>) -> Self {
            Self {
                reads: StdMutex::new(reads.into()),
                read_calls: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        type Raw = Vec<String>;

        fn capabilities(&self) -> TransportCapabilities {
            TransportCapabilities {
                max_message_len: 500,
            }
        }

        async fn read_raw(&self) -> Result<Vec<String>> {
            self.read_calls
                .lock()
                .unwrap()
                .push(tokio::time::Instant::now());
            let next = self.reads.lock().unwrap().pop_front();
            match next {
                Some(read) => read,
                None => std::future::pending().await,
            }
        }

        fn package(&self, raw: &Vec<String>) -> Vec<ChatMessage> {
            raw.iter()
                .filter_map(|line| {
                    let (user, text) = line.split_once('|')?;
                    let msg = match user.strip_prefix('@') {
                        Some(user) => {
                            ChatMessage::public(ChatUser::new(user), "room", text).moderator()
                        }
                        None => ChatMessage::public(ChatUser::new(user), "room", text),
                    };
                    Some(msg)
                })
                .collect()
        }

        async fn send(&self, _target: &ChatTarget, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl CommandHandler for Failing {
        async fn handle(&self, _ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>> {
            Err(Error::External("boom".into()))
        }
    }

    struct Long;

    #[async_trait]
    impl CommandHandler for Long {
        async fn handle(&self, ctx: &CommandContext<'_>) -> Result<Vec<OutboundMessage>> {
            Ok(vec![ctx.reply("aaaa bbbb cccc"), ctx.reply("dd")])
        }
    }

    fn dispatcher(store: &Store, max_len: usize) -> Dispatcher {
        let mut registry = Registry::new();
        registry.register(
            quotes::SPECS,
            Arc::new(QuoteHandler::new(store.clone(), None, None)),
        );
        registry.register(&[CommandSpec::new("fail", "!fail")], Arc::new(Failing));
        registry.register(&[CommandSpec::new("long", "!long")], Arc::new(Long));
        Dispatcher::new("!", registry, store.clone(), max_len)
    }

    fn texts(out: Vec<OutboundMessage>) -> Vec<String> {
        out.into_iter().map(|m| m.text).collect()
    }

    fn lines(lines: &[&str]) -> Result<Vec<String>> {
        Ok(lines.iter().map(|l| l.to_string()).collect())
    }

    #[tokio::test]
    async fn quote_add_end_to_end() {
        let store = Store::open_in_memory().unwrap();
        store.add_quote("existing").unwrap();
        let queue = Arc::new(OutboundQueue::new());
        let transport = Arc::new(ScriptedTransport::new(vec![lines(&["alice|!quote add hello"])]));
        let service = Arc::new(Service::new(
            transport,
            Arc::new(dispatcher(&store, 500)),
            queue.clone(),
            ServiceConfig::default(),
        ));
        assert_eq!(service.state(), ServiceState::Stopped);

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });

        let reply = tokio::time::timeout(Duration::from_secs(2), queue.recv())
            .await
            .unwrap();
        assert_eq!(reply.text, "Quote added as quote #2.");
        assert_eq!(reply.target, ChatTarget::channel("room"));
        assert_eq!(store.list_quotes().unwrap().len(), 2);
        assert_eq!(service.state(), ServiceState::Running);
        assert!(store.get_user("alice").unwrap().is_some());

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn batch_is_dispatched_in_order() {
        let store = Store::open_in_memory().unwrap();
        let queue = Arc::new(OutboundQueue::new());
        let service = Service::new(
            Arc::new(ScriptedTransport::new(Vec::new())),
            Arc::new(dispatcher(&store, 500)),
            queue.clone(),
            ServiceConfig::default(),
        );
        let transport = ScriptedTransport::new(Vec::new());
        let batch = transport.package(&vec![
            "a|!add_quote one".to_string(),
            "b|just chatting".to_string(),
            "c|!add_quote two".to_string(),
            "d|!quote 1".to_string(),
        ]);

        assert_eq!(service.handle_batch(batch).await, 3);
        let mut got = Vec::new();
        while let Some(m) = queue.pop().await {
            got.push(m.text);
        }
        assert_eq!(
            got,
            vec![
                "Quote added as quote #1.",
                "Quote added as quote #2.",
                "#1 one"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_back_off_then_recover() {
        let store = Store::open_in_memory().unwrap();
        let queue = Arc::new(OutboundQueue::new());
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(Error::transport("reset")),
            Err(Error::transport("reset")),
            Err(Error::transport("reset")),
            lines(&["a|!add_quote back"]),
        ]));
        let service = Arc::new(Service::new(
            transport.clone(),
            Arc::new(dispatcher(&store, 500)),
            queue.clone(),
            ServiceConfig {
                backoff_initial: Duration::from_secs(1),
                backoff_max: Duration::from_secs(3),
            },
        ));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });

        let reply = queue.recv().await;
        assert_eq!(reply.text, "Quote added as quote #1.");

        let calls = transport.read_calls.lock().unwrap().clone();
        let gaps: Vec<u64> = calls.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(&gaps[..3], &[1, 2, 3]);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn access_denials_and_unknown_commands_are_silent() {
        let store = Store::open_in_memory().unwrap();
        store.add_quote("q").unwrap();
        let d = dispatcher(&store, 500);

        let viewer = ChatMessage::public(ChatUser::new("v"), "room", "!delete_quote 1");
        assert!(d.dispatch(&viewer).await.is_empty());
        assert_eq!(store.list_quotes().unwrap().len(), 1);

        let whisper = ChatMessage::whisper(ChatUser::new("v"), "!quote");
        assert!(d.dispatch(&whisper).await.is_empty());

        let unknown = ChatMessage::public(ChatUser::new("v"), "room", "!nope");
        assert!(d.dispatch(&unknown).await.is_empty());
    }

    #[tokio::test]
    async fn custom_commands_respect_permissions() {
        let store = Store::open_in_memory().unwrap();
        store.add_command("discord", "join us").unwrap();
        store.add_command("secret", "shh").unwrap();
        store.add_permission("secret", "friend").unwrap();
        let d = dispatcher(&store, 500);

        let msg = |user: &str, text: &str| ChatMessage::public(ChatUser::new(user), "room", text);
        assert_eq!(texts(d.dispatch(&msg("v", "!Discord")).await), vec!["join us"]);
        assert!(d.dispatch(&msg("v", "!secret")).await.is_empty());
        assert_eq!(texts(d.dispatch(&msg("friend", "!secret")).await), vec!["shh"]);
    }

    #[tokio::test]
    async fn handler_errors_become_a_generic_reply() {
        let store = Store::open_in_memory().unwrap();
        let d = dispatcher(&store, 500);
        let msg = ChatMessage::public(ChatUser::new("v"), "room", "!fail");
        assert_eq!(texts(d.dispatch(&msg).await), vec![HANDLER_FAILED]);
    }

    #[tokio::test]
    async fn long_replies_are_split_in_order() {
        let store = Store::open_in_memory().unwrap();
        let d = dispatcher(&store, 9);
        let msg = ChatMessage::public(ChatUser::new("v"), "room", "!long");
        assert_eq!(
            texts(d.dispatch(&msg).await),
            vec!["aaaa bbbb", "cccc", "dd"]
        );
    }
}
