use std::{env, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

/// Typed configuration for the bot, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Twitch
    pub twitch_username: String,
    pub twitch_oauth_token: String,
    pub twitch_channel: String,
    pub twitch_host: String,
    pub twitch_port: u16,
    pub poll_interval: Duration,

    // Commands
    pub command_prefix: String,
    pub ban_roulette_timeout_secs: u32,

    // Storage
    pub database_path: PathBuf,

    // Outbound throttling
    pub global_send_interval: Duration,
    pub per_target_send_interval: Duration,

    // Retry policies
    pub transport_backoff_initial: Duration,
    pub transport_backoff_max: Duration,
    pub send_max_attempts: u32,
    pub sheet_sync_max_attempts: u32,
    pub sheet_sync_delay: Duration,

    // Google Sheets (optional)
    pub google_sheets_token: Option<String>,
    pub quotes_spreadsheet_id: Option<String>,
    pub quotes_spreadsheet_link: Option<String>,
    pub quotes_worksheet: String,

    // Reddit (optional)
    pub reddit: Option<RedditCredentials>,
}

#[derive(Clone, Debug)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl Config {
    /// Load from the process environment, after applying `.env` if present.
    ///
    /// Values already set in the environment win over `.env`.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::Config(format!("failed to read .env: {e}"))),
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let twitch_username = required(&get, "TWITCH_USERNAME")?.to_lowercase();
        let mut twitch_oauth_token = required(&get, "TWITCH_OAUTH_TOKEN")?;
        if !twitch_oauth_token.starts_with("oauth:") {
            twitch_oauth_token = format!("oauth:{twitch_oauth_token}");
        }
        let twitch_channel = required(&get, "TWITCH_CHANNEL")?
            .trim_start_matches('#')
            .to_lowercase();

        let twitch_host = get("TWITCH_HOST").unwrap_or_else(|| "irc.chat.twitch.tv".to_string());
        let twitch_port = parse_or(&get, "TWITCH_PORT", 6667u16)?;
        let poll_interval = millis_or(&get, "POLL_INTERVAL_MS", 1000)?;

        let command_prefix = get("COMMAND_PREFIX").unwrap_or_else(|| "!".to_string());
        if command_prefix.chars().any(char::is_whitespace) {
            return Err(Error::Config(
                "COMMAND_PREFIX must not contain whitespace".to_string(),
            ));
        }
        let ban_roulette_timeout_secs = parse_or(&get, "BAN_ROULETTE_TIMEOUT_SECS", 30u32)?;

        let database_path =
            PathBuf::from(get("DATABASE_PATH").unwrap_or_else(|| "modbot.db".into()));

        let global_send_interval = millis_or(&get, "GLOBAL_SEND_INTERVAL_MS", 1500)?;
        let per_target_send_interval = millis_or(&get, "PER_TARGET_SEND_INTERVAL_MS", 1000)?;

        let transport_backoff_initial = millis_or(&get, "TRANSPORT_BACKOFF_INITIAL_MS", 1000)?;
        let transport_backoff_max = millis_or(&get, "TRANSPORT_BACKOFF_MAX_MS", 60_000)?;
        let send_max_attempts = parse_or(&get, "SEND_MAX_ATTEMPTS", 3u32)?.max(1);
        let sheet_sync_max_attempts = parse_or(&get, "SHEET_SYNC_MAX_ATTEMPTS", 5u32)?.max(1);
        let sheet_sync_delay = millis_or(&get, "SHEET_SYNC_DELAY_MS", 5000)?;

        let google_sheets_token = get("GOOGLE_SHEETS_TOKEN");
        let quotes_spreadsheet_id = get("QUOTES_SPREADSHEET_ID");
        let quotes_spreadsheet_link = get("QUOTES_SPREADSHEET_LINK");
        let quotes_worksheet = get("QUOTES_WORKSHEET").unwrap_or_else(|| "Quotes".to_string());

        let reddit = match (get("REDDIT_CLIENT_ID"), get("REDDIT_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(RedditCredentials {
                client_id,
                client_secret,
                user_agent: get("REDDIT_USER_AGENT")
                    .unwrap_or_else(|| "modbot/0.1 (chat moderation bot)".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            twitch_username,
            twitch_oauth_token,
            twitch_channel,
            twitch_host,
            twitch_port,
            poll_interval,
            command_prefix,
            ban_roulette_timeout_secs,
            database_path,
            global_send_interval,
            per_target_send_interval,
            transport_backoff_initial,
            transport_backoff_max,
            send_max_attempts,
            sheet_sync_max_attempts,
            sheet_sync_delay,
            google_sheets_token,
            quotes_spreadsheet_id,
            quotes_spreadsheet_link,
            quotes_worksheet,
            reddit,
        })
    }

    /// Spreadsheet sync is only possible with both a token and a sheet id.
    pub fn sheets_enabled(&self) -> bool {
        self.google_sheets_token.is_some() && self.quotes_spreadsheet_id.is_some()
    }
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    get(key).ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}"))),
    }
}

fn millis_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    parse_or(get, key, default).map(Duration::from_millis)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}
