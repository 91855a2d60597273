use crate::error::AppError;
use std::{env, path::PathBuf, time::Duration};
use teloxide::types::ChatId;

pub const DEFAULT_RANDOM_URL: &str = "https://hanime.tv/browse/random";
pub const SITE_ORIGIN: &str = "https://hanime.tv";
pub const VIDEO_PAGE_PATTERN: &str = "/videos/hentai/";
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;
pub const CAPTION_LIMIT: usize = 1024;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const BROWSER_NAV_TIMEOUT: Duration = Duration::from_secs(30);
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(600);
pub const COOKIE_FILE: &str = "cookies.txt";
pub const LOCK_FILE_NAME: &str = "bot_instance.lock";
pub const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Mobile Safari/537.36";

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_RATE_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub owner_chat: ChatId,
    pub external_url: Option<String>,
    pub port: u16,
    pub rate_limit_per_minute: usize,
    pub browser_enabled: bool,
    pub random_url: String,
    pub max_file_size: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bot_token = non_empty("BOT_TOKEN")
            .or_else(|| non_empty("TELOXIDE_TOKEN"))
            .ok_or_else(|| AppError::Config("BOT_TOKEN environment variable is required".into()))?;

        let chat_id = non_empty("CHAT_ID")
            .ok_or_else(|| AppError::Config("CHAT_ID environment variable is required".into()))?;
        let owner_chat = chat_id
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| AppError::Config(format!("CHAT_ID must be a valid integer, got {chat_id:?}")))?;

        let port = match non_empty("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| AppError::Config(format!("PORT must be a valid port number, got {raw:?}")))?,
            None => DEFAULT_PORT,
        };

        let rate_limit_per_minute = match non_empty("RATE_LIMIT_PER_MINUTE") {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                AppError::Config(format!("RATE_LIMIT_PER_MINUTE must be a positive integer, got {raw:?}"))
            })?,
            None => DEFAULT_RATE_LIMIT,
        };

        let browser_enabled = !matches!(
            non_empty("BROWSER_ENABLED").as_deref(),
            Some("0") | Some("false") | Some("FALSE") | Some("no")
        );

        Ok(Self {
            bot_token,
            owner_chat,
            external_url: non_empty("RENDER_EXTERNAL_URL"),
            port,
            rate_limit_per_minute,
            browser_enabled,
            random_url: non_empty("RANDOM_URL").unwrap_or_else(|| DEFAULT_RANDOM_URL.to_string()),
            max_file_size: MAX_FILE_SIZE,
        })
    }
}

pub fn cookie_file() -> Option<PathBuf> {
    let path = PathBuf::from(COOKIE_FILE);
    path.exists().then_some(path)
}

pub fn lock_file_path() -> PathBuf {
    env::temp_dir().join(LOCK_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parses_required_and_defaults() {
        let config = Config::from_lookup(lookup(&[("BOT_TOKEN", "123:abc"), ("CHAT_ID", "42")])).unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.owner_chat, ChatId(42));
        assert_eq!(config.port, 8080);
        assert_eq!(config.rate_limit_per_minute, 5);
        assert!(config.browser_enabled);
        assert!(config.external_url.is_none());
        assert_eq!(config.random_url, DEFAULT_RANDOM_URL);
    }

    #[test]
    fn missing_token_is_fatal() {
        let err = Config::from_lookup(lookup(&[("CHAT_ID", "42")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn non_integer_chat_id_is_fatal() {
        let err = Config::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("CHAT_ID", "owner")])).unwrap_err();
        assert!(err.to_string().contains("CHAT_ID must be a valid integer"));
    }

    #[test]
    fn optional_values_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("TELOXIDE_TOKEN", "t"),
            ("CHAT_ID", "-100"),
            ("PORT", "9000"),
            ("RENDER_EXTERNAL_URL", "https://bot.example.com"),
            ("BROWSER_ENABLED", "false"),
            ("RATE_LIMIT_PER_MINUTE", "2"),
        ]))
        .unwrap();
        assert_eq!(config.owner_chat, ChatId(-100));
        assert_eq!(config.port, 9000);
        assert_eq!(config.external_url.as_deref(), Some("https://bot.example.com"));
        assert!(!config.browser_enabled);
        assert_eq!(config.rate_limit_per_minute, 2);
    }
}
