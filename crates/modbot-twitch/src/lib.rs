//! Twitch adapter (IRC over TCP).
//!
//! This crate implements the `modbot-core` ChatTransport over Twitch chat.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
    time::timeout,
};

pub mod irc;

use modbot_core::{
    config::Config,
    domain::ChatTarget,
    errors::Error,
    messaging::{
        port::ChatTransport,
        types::{ChatMessage, TransportCapabilities},
    },
    Result,
};

/// Twitch rejects longer PRIVMSG bodies.
pub const MAX_MESSAGE_LEN: usize = 500;
/// Upper bound on lines returned by one `read_raw`.
const MAX_BATCH: usize = 100;

#[derive(Clone, Debug)]
pub struct TwitchConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// `oauth:`-prefixed chat token.
    pub oauth_token: String,
    /// Channel to join, without `#`.
    pub channel: String,
    pub poll_interval: Duration,
}

impl TwitchConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            host: cfg.twitch_host.clone(),
            port: cfg.twitch_port,
            username: cfg.twitch_username.clone(),
            oauth_token: cfg.twitch_oauth_token.clone(),
            channel: cfg.twitch_channel.clone(),
            poll_interval: cfg.poll_interval,
        }
    }
}

/// Lines sent right after connecting.
pub fn handshake(cfg: &TwitchConfig) -> Vec<String> {
    vec![
        format!("PASS {}", cfg.oauth_token),
        format!("NICK {}", cfg.username),
        "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
        format!("JOIN #{}", cfg.channel),
    ]
}

/// The IRC line that delivers `text` to `target`. Whispers go through the
/// joined channel as a `/w` chat command.
pub fn outgoing_line(channel: &str, target: &ChatTarget, text: &str) -> String {
    let text: String = text
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    match target {
        ChatTarget::Channel(c) => format!("PRIVMSG #{c} :{text}"),
        ChatTarget::Whisper(user) => format!("PRIVMSG #{channel} :/w {user} {text}"),
    }
}

type LineReader = Lines<BufReader<OwnedReadHalf>>;

/// Twitch chat connection.
///
/// The read half is owned by `read_raw` (the dispatch loop); the write half is
/// shared with `send`. A failed write marks the connection broken and the
/// next `read_raw` reconnects.
pub struct TwitchTransport {
    cfg: TwitchConfig,
    reader: Mutex<Option<LineReader>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    broken: AtomicBool,
}

impl TwitchTransport {
    pub fn new(cfg: TwitchConfig) -> Self {
        Self {
            cfg,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            broken: AtomicBool::new(false),
        }
    }

    async fn connect(&self) -> Result<LineReader> {
        let addr = (self.cfg.host.as_str(), self.cfg.port);
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            Error::transport(format!(
                "connect to {}:{} failed: {e}",
                self.cfg.host, self.cfg.port
            ))
        })?;
        let (read, mut write) = stream.into_split();

        for line in handshake(&self.cfg) {
            write_line(&mut write, &line).await?;
        }
        *self.writer.lock().await = Some(write);

        tracing::info!(
            host = %self.cfg.host,
            channel = %self.cfg.channel,
            "connected to twitch chat"
        );
        Ok(BufReader::new(read).lines())
    }

    async fn disconnect(&self, reader: &mut Option<LineReader>) {
        *reader = None;
        *self.writer.lock().await = None;
    }

    async fn pong(&self, payload: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(Error::transport("not connected"));
        };
        write_line(w, &format!("PONG :{payload}")).await
    }

    /// Server-side housekeeping. Returns `true` if the line was consumed.
    async fn handle_control(&self, line: &str) -> Result<bool> {
        let Some(parsed) = irc::parse_line(line) else {
            return Ok(true);
        };
        match parsed.command.as_str() {
            "PING" => {
                let payload = parsed.params.last().map(String::as_str).unwrap_or("tmi.twitch.tv");
                self.pong(payload).await?;
                Ok(true)
            }
            "RECONNECT" => {
                tracing::info!("twitch asked us to reconnect");
                self.broken.store(true, Ordering::SeqCst);
                Ok(true)
            }
            "NOTICE" if is_login_failure(&parsed) => {
                Err(Error::transport("twitch login authentication failed"))
            }
            _ => Ok(false),
        }
    }
}

fn is_login_failure(line: &irc::IrcLine) -> bool {
    line.params
        .last()
        .is_some_and(|text| text.contains("Login authentication failed"))
}

async fn write_line(w: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    let mut bytes = Vec::with_capacity(line.len() + 2);
    bytes.extend_from_slice(line.as_bytes());
    bytes.extend_from_slice(b"\r\n");
    w.write_all(&bytes)
        .await
        .map_err(|e| Error::transport(format!("write failed: {e}")))
}

#[async_trait]
impl ChatTransport for TwitchTransport {
    type Raw = Vec<String>;

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    async fn read_raw(&self) -> Result<Vec<String>> {
        let mut reader = self.reader.lock().await;
        if self.broken.swap(false, Ordering::SeqCst) {
            self.disconnect(&mut reader).await;
        }
        if reader.is_none() {
            *reader = Some(self.connect().await?);
        }

        let mut batch = Vec::new();
        let mut wait = self.cfg.poll_interval;
        while batch.len() < MAX_BATCH {
            let Some(lines) = reader.as_mut() else {
                break;
            };
            // `next_line` is cancel safe, so a timeout never loses a partial line.
            let line = match timeout(wait, lines.next_line()).await {
                Err(_elapsed) => break,
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => {
                    self.disconnect(&mut reader).await;
                    return Err(Error::transport("connection closed by server"));
                }
                Ok(Err(e)) => {
                    self.disconnect(&mut reader).await;
                    return Err(Error::transport(format!("read failed: {e}")));
                }
            };
            // After the first line, only take what is already buffered.
            wait = Duration::ZERO;

            let line = line.trim_end_matches('\r').to_string();
            match self.handle_control(&line).await {
                Ok(true) => {}
                Ok(false) => batch.push(line),
                Err(e) => {
                    self.disconnect(&mut reader).await;
                    return Err(e);
                }
            }
        }
        Ok(batch)
    }

    fn package(&self, raw: &Vec<String>) -> Vec<ChatMessage> {
        raw.iter()
            .filter_map(|line| irc::parse_line(line))
            .filter_map(|line| line.to_chat_message())
            .collect()
    }

    async fn send(&self, target: &ChatTarget, text: &str) -> Result<()> {
        let line = outgoing_line(&self.cfg.channel, target, text);
        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return Err(Error::transport("not connected"));
        };
        if let Err(e) = write_line(w, &line).await {
            *writer = None;
            self.broken.store(true, Ordering::SeqCst);
            return Err(e);
        }
        tracing::debug!(to = %target, "sent chat message");
        Ok(())
    }
}
