use std::fmt;

/// A chat user as seen by the transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChatUser {
    /// Lowercase login name (stable identity).
    pub login: String,
    /// Display name as shown in chat; falls back to the login.
    pub display_name: String,
}

impl ChatUser {
    pub fn new(login: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            display_name: login.clone(),
            login,
        }
    }

    pub fn with_display_name(login: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            display_name: display_name.into(),
        }
    }
}

/// Where a message came from, or where a reply should go.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatTarget {
    /// A public channel, stored without the leading `#`.
    Channel(String),
    /// A private message to one user (login).
    Whisper(String),
}

impl ChatTarget {
    pub fn channel(name: &str) -> Self {
        Self::Channel(name.trim_start_matches('#').to_lowercase())
    }

    pub fn whisper(login: &str) -> Self {
        Self::Whisper(login.to_lowercase())
    }
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatTarget::Channel(c) => write!(f, "#{c}"),
            ChatTarget::Whisper(u) => write!(f, "@{u}"),
        }
    }
}
