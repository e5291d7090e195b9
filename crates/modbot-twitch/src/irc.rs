//! Twitch flavoured IRC line parsing.
//!
//! Only what the bot reads is modelled: IRCv3 tags, the prefix, the command
//! and its params. Lines are expected without the trailing CRLF.

use std::collections::HashMap;

use modbot_core::{domain::ChatUser, messaging::types::ChatMessage};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IrcLine {
    pub tags: HashMap<String, String>,
    /// `nick!user@host` or a server name, without the leading `:`.
    pub prefix: Option<String>,
    pub command: String,
    /// Middle params followed by the trailing param (if any).
    pub params: Vec<String>,
}

impl IrcLine {
    /// The nick part of the prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split('!').next().unwrap_or(prefix);
        (!nick.is_empty()).then_some(nick)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// `mod=1`, or a broadcaster/moderator badge.
    pub fn is_moderator(&self) -> bool {
        if self.tag("mod") == Some("1") {
            return true;
        }
        self.tag("badges")
            .map(|badges| {
                badges.split(',').any(|badge| {
                    let name = badge.split('/').next().unwrap_or_default();
                    name == "broadcaster" || name == "moderator"
                })
            })
            .unwrap_or(false)
    }

    /// Chat messages the bot reacts to: channel `PRIVMSG` and `WHISPER`.
    pub fn to_chat_message(&self) -> Option<ChatMessage> {
        let login = self.nick()?.to_lowercase();
        let sender = match self.tag("display-name") {
            Some(display) => ChatUser::with_display_name(login, display),
            None => ChatUser::new(login),
        };
        let text = self.params.get(1)?;

        let msg = match self.command.as_str() {
            "PRIVMSG" => {
                let channel = self.params.first()?.strip_prefix('#')?;
                ChatMessage::public(sender, channel, text.as_str())
            }
            "WHISPER" => ChatMessage::whisper(sender, text.as_str()),
            _ => return None,
        };
        Some(if self.is_moderator() { msg.moderator() } else { msg })
    }
}

/// Parse one line. Returns `None` for blank or malformed lines.
pub fn parse_line(line: &str) -> Option<IrcLine> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    let mut out = IrcLine::default();

    if let Some(tagged) = rest.strip_prefix('@') {
        let (tags, after) = tagged.split_once(' ')?;
        out.tags = parse_tags(tags);
        rest = after.trim_start();
    }

    if let Some(prefixed) = rest.strip_prefix(':') {
        let (prefix, after) = prefixed.split_once(' ')?;
        out.prefix = Some(prefix.to_string());
        rest = after.trim_start();
    }

    let (middle, trailing) = match rest.split_once(" :") {
        Some((middle, trailing)) => (middle, Some(trailing)),
        None => (rest, None),
    };
    let mut words = middle.split_whitespace();
    out.command = words.next()?.to_ascii_uppercase();
    out.params = words.map(str::to_string).collect();
    if let Some(trailing) = trailing {
        out.params.push(trailing.to_string());
    }
    Some(out)
}

fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter(|kv| !kv.is_empty())
        .map(|kv| match kv.split_once('=') {
            Some((k, v)) => (k.to_string(), unescape_tag_value(v)),
            None => (kv.to_string(), String::new()),
        })
        .collect()
}

/// IRCv3 tag value unescaping (`\s` → space, `\:` → `;`, ...).
pub fn unescape_tag_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
