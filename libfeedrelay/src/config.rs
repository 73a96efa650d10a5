//! Configuration management for Feedrelay
//!
//! Settings come from an optional TOML file. The three secrets (feed bearer
//! token, bot token and chat id) can also be supplied through the environment,
//! which takes precedence over the file.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

pub const ENV_CONFIG_PATH: &str = "FEEDRELAY_CONFIG";
pub const ENV_HANDLE: &str = "FEEDRELAY_HANDLE";
pub const ENV_BEARER_TOKEN: &str = "TWITTER_BEARER_TOKEN";
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

/// Smallest and largest page the timeline endpoint accepts
const PAGE_SIZE_RANGE: std::ops::RangeInclusive<u8> = 5..=100;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub relay: RelayConfig,
    pub state: StateConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Handle of the account to follow, with or without a leading `@`
    pub handle: Option<String>,
    #[serde(deserialize_with = "deserialize_secret")]
    pub bearer_token: Option<SecretString>,
    pub api_base: String,
    pub page_size: u8,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            handle: None,
            bearer_token: None,
            api_base: "https://api.twitter.com".to_string(),
            page_size: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    #[serde(deserialize_with = "deserialize_secret")]
    pub bot_token: Option<SecretString>,
    pub chat_id: Option<String>,
    pub api_base: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

/// Loop timings, all in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub poll_interval: u64,
    pub error_backoff: u64,
    pub rate_limit_floor: u64,
    pub pacing: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: 120,
            error_backoff: 60,
            rate_limit_floor: 60,
            pacing: 1,
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff)
    }

    pub fn rate_limit_floor(&self) -> Duration {
        Duration::from_secs(self.rate_limit_floor)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.pacing)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub cursor_file: Option<String>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.trim().is_empty())
        .map(SecretString::from))
}

impl Config {
    /// Load configuration from an explicit path, `FEEDRELAY_CONFIG`, or the
    /// default location, then apply environment overrides
    ///
    /// A missing file at the default location is not an error: the relay can
    /// be configured entirely from the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => match std::env::var(ENV_CONFIG_PATH) {
                Ok(path) => Self::load_from_path(&expand(&path))?,
                Err(_) => Self::load_optional(default_config_path())?,
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load the default config file if there is one
    ///
    /// `None` means no config directory could be determined (no HOME), which
    /// is treated like an absent file.
    fn load_optional(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load_from_path(&path),
            Some(path) => {
                tracing::debug!(path = %path.display(), "No config file, using environment only");
                Ok(Self::default())
            }
            None => {
                tracing::debug!("No config directory, using environment only");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Overlay values from a key lookup (the process environment in production)
    ///
    /// Empty values are ignored so that an exported-but-blank variable does not
    /// mask the file.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(handle) = get(ENV_HANDLE) {
            self.source.handle = Some(handle);
        }
        if let Some(token) = get(ENV_BEARER_TOKEN) {
            self.source.bearer_token = Some(SecretString::from(token));
        }
        if let Some(token) = get(ENV_BOT_TOKEN) {
            self.sink.bot_token = Some(SecretString::from(token));
        }
        if let Some(chat_id) = get(ENV_CHAT_ID) {
            self.sink.chat_id = Some(chat_id);
        }
    }

    /// Check that everything the relay needs is present
    pub fn validate(&self) -> Result<()> {
        if self.handle().is_none() {
            return Err(missing(&format!("source.handle (or {})", ENV_HANDLE)));
        }
        if self.source.bearer_token.is_none() {
            return Err(missing(&format!("source.bearer_token (or {})", ENV_BEARER_TOKEN)));
        }
        if self.sink.bot_token.is_none() {
            return Err(missing(&format!("sink.bot_token (or {})", ENV_BOT_TOKEN)));
        }
        if self.chat_id().is_none() {
            return Err(missing(&format!("sink.chat_id (or {})", ENV_CHAT_ID)));
        }

        if !PAGE_SIZE_RANGE.contains(&self.source.page_size) {
            return Err(ConfigError::InvalidValue(format!(
                "source.page_size must be between {} and {} (got {})",
                PAGE_SIZE_RANGE.start(),
                PAGE_SIZE_RANGE.end(),
                self.source.page_size
            ))
            .into());
        }
        if self.relay.poll_interval == 0 {
            return Err(
                ConfigError::InvalidValue("relay.poll_interval must be positive".to_string()).into(),
            );
        }

        Ok(())
    }

    /// Account handle with any leading `@` removed
    pub fn handle(&self) -> Option<&str> {
        self.source
            .handle
            .as_deref()
            .map(|h| h.trim().trim_start_matches('@'))
            .filter(|h| !h.is_empty())
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.sink
            .chat_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Where the cursor lives, expanded
    pub fn cursor_path(&self) -> Result<PathBuf> {
        match &self.state.cursor_file {
            Some(path) => Ok(expand(path)),
            None => Ok(resolve_data_path()?.join("last_post_id.txt")),
        }
    }
}

fn missing(field: &str) -> crate::error::RelayError {
    ConfigError::MissingField(field.to_string()).into()
}

/// Default config file location, following the XDG base directory layout
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("feedrelay").join("config.toml"))
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Resolve the data directory path following the XDG base directory layout
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("feedrelay"))
}
