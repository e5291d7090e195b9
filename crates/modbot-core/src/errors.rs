/// Core error type for the bot.
///
/// Adapter crates should map their specific errors into this type so the
/// dispatch and sender loops can decide consistently between retrying and
/// giving up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("spreadsheet error: {message}")]
    Spreadsheet { message: String, retryable: bool },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn spreadsheet(msg: impl Into<String>, retryable: bool) -> Self {
        Self::Spreadsheet {
            message: msg.into(),
            retryable,
        }
    }

    /// Whether an operation that failed with this error is worth repeating.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Io(_) | Error::External(_) => true,
            Error::Spreadsheet { retryable, .. } => *retryable,
            Error::Config(_) | Error::Json(_) | Error::Storage(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_retryable_errors() {
        assert!(Error::transport("closed").is_retryable());
        assert!(Error::spreadsheet("503", true).is_retryable());
        assert!(!Error::spreadsheet("401", false).is_retryable());
        assert!(!Error::Config("missing".into()).is_retryable());
    }
}
