use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{player::PlaybackSettings, reconnect::ReconnectPolicy};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // dev guild for instant command registration

    // Playback
    pub max_queue_size: usize,
    pub reconnect_delay_secs: f64,
    pub max_reconnect_attempts: u32,
    pub queue_page_size: usize,

    // Sources
    pub ytdlp_path: String,
    pub youtube_cookies: Option<String>,
    pub ytdlp_timeout_secs: u64,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("cannot create {}", config.data_dir.display()))?;

        Ok(config)
    }

    /// Builds and validates a config from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            discord_token: value("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            guild_id: value("GUILD_ID").map(|v| parse("GUILD_ID", &v)).transpose()?,

            max_queue_size: parse_or(&value, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            reconnect_delay_secs: parse_or(&value, "RECONNECT_DELAY_SECS", defaults.reconnect_delay_secs)?,
            max_reconnect_attempts: parse_or(&value, "MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts)?,
            queue_page_size: parse_or(&value, "QUEUE_PAGE_SIZE", defaults.queue_page_size)?,

            ytdlp_path: value("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            youtube_cookies: value("YOUTUBE_COOKIES"),
            ytdlp_timeout_secs: parse_or(&value, "YTDLP_TIMEOUT_SECS", defaults.ytdlp_timeout_secs)?,

            data_dir: value("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Queue, page and attempt caps and the yt-dlp timeout must be greater than 0
    /// - The reconnect delay must be a finite, non-negative number of seconds
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.queue_page_size == 0 {
            anyhow::bail!("Queue page size must be greater than 0");
        }

        if self.ytdlp_timeout_secs == 0 {
            anyhow::bail!("yt-dlp timeout must be greater than 0");
        }

        if self.max_reconnect_attempts == 0 {
            anyhow::bail!("Max reconnect attempts must be greater than 0");
        }

        if !self.reconnect_delay_secs.is_finite() || self.reconnect_delay_secs < 0.0 {
            anyhow::bail!(
                "Reconnect delay must be a non-negative number of seconds, got: {}",
                self.reconnect_delay_secs
            );
        }

        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            delay: Duration::from_secs_f64(self.reconnect_delay_secs),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.ytdlp_timeout_secs)
    }

    pub fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            reconnect: self.reconnect_policy(),
            max_queue_size: self.max_queue_size,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token and the cookie value.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Playback: {} queue, {} per page\n  \
            Reconnect: {} attempts, {}s apart\n  \
            Sources: {} (cookies: {}, timeout {}s)\n  \
            Data: {}",
            self.guild_id.map_or("global".to_string(), |id| format!("in guild {}", id)),
            self.max_queue_size,
            self.queue_page_size,
            self.max_reconnect_attempts,
            self.reconnect_delay_secs,
            self.ytdlp_path,
            if self.youtube_cookies.is_some() { "yes" } else { "no" },
            self.ytdlp_timeout_secs,
            self.data_dir.display()
        )
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{} has an invalid value: {}", key, raw))
}

fn parse_or<T>(value: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value(key).map_or(Ok(default), |raw| parse(key, &raw))
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            max_queue_size: 1000,
            reconnect_delay_secs: 2.0,
            max_reconnect_attempts: 3,
            queue_page_size: 10,

            ytdlp_path: "yt-dlp".to_string(),
            youtube_cookies: None,
            ytdlp_timeout_secs: 25,

            data_dir: "./data".into(),
        }
    }
}
