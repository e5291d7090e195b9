use crate::domain::{ChatTarget, ChatUser};

/// One incoming chat message, already packaged by the transport.
///
/// Never persisted; handlers only read it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: ChatUser,
    pub content: String,
    /// Where the message was received; replies go back here by default.
    pub context: ChatTarget,
    pub is_private: bool,
    pub is_moderator: bool,
}

impl ChatMessage {
    pub fn public(sender: ChatUser, channel: &str, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            context: ChatTarget::channel(channel),
            is_private: false,
            is_moderator: false,
        }
    }

    pub fn whisper(sender: ChatUser, content: impl Into<String>) -> Self {
        let context = ChatTarget::whisper(&sender.login);
        Self {
            sender,
            content: content.into(),
            context,
            is_private: true,
            is_moderator: false,
        }
    }

    pub fn moderator(mut self) -> Self {
        self.is_moderator = true;
        self
    }
}

/// An entry of the outbound queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub target: ChatTarget,
    pub text: String,
}

impl OutboundMessage {
    pub fn new(target: ChatTarget, text: impl Into<String>) -> Self {
        Self {
            target,
            text: text.into(),
        }
    }

    /// Reply to wherever `msg` came from.
    pub fn reply(msg: &ChatMessage, text: impl Into<String>) -> Self {
        Self::new(msg.context.clone(), text)
    }
}

/// Capabilities / limits of a transport implementation.
#[derive(Clone, Copy, Debug)]
pub struct TransportCapabilities {
    pub max_message_len: usize,
}

/// Split `text` into parts of at most `max_len` characters, preferring word
/// boundaries. Parts keep their original order and inner spacing; only the
/// whitespace at a break is dropped.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut parts = Vec::new();
    let mut rest = text.trim();

    while rest.chars().count() > max_len {
        let window_end = rest
            .char_indices()
            .nth(max_len)
            .map_or(rest.len(), |(idx, _)| idx);
        let cut = if rest[window_end..].starts_with(char::is_whitespace) {
            Some(window_end)
        } else {
            rest[..window_end].rfind(char::is_whitespace)
        };

        match cut.filter(|&idx| idx > 0) {
            Some(idx) => {
                parts.push(rest[..idx].trim_end().to_string());
                rest = rest[idx..].trim_start();
            }
            // No break inside the window: hard split mid-word.
            None => {
                parts.push(rest[..window_end].to_string());
                rest = &rest[window_end..];
            }
        }
    }

    if !rest.is_empty() || parts.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}
