use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

use crate::sources::compiler::{BanList, CompilerSettings};

const CONFIG_FILE: &str = "dj-bot.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Audio
    pub default_volume: f32,
    pub max_volume: f32,
    pub ffmpeg_options: String,
    pub bassboost_pattern: String,
    pub banned_terms: String,

    // Library
    pub data_dir: PathBuf,
    /// Longest song (seconds) DJ mode will pick.
    pub dj_max_duration: u64,

    // Chat
    /// Seconds before notices delete themselves; 0 keeps them.
    pub notify_delete_secs: u64,
    pub search_results: usize,

    // External tools
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    /// Hours between yt-dlp self updates; 0 disables them.
    pub ytdlp_update_hours: u64,
}

impl Config {
    /// Loads `.env`, then `dj-bot.toml` if present, then the environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let builder = Self::defaults()?
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::default().try_parsing(true));

        let config: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Cannot create data dir {}", config.data_dir.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = Self::default();
        Ok(config::Config::builder()
            .set_default("discord_token", defaults.discord_token)?
            .set_default("command_prefix", defaults.command_prefix)?
            .set_default("default_volume", defaults.default_volume as f64)?
            .set_default("max_volume", defaults.max_volume as f64)?
            .set_default("ffmpeg_options", defaults.ffmpeg_options)?
            .set_default("bassboost_pattern", defaults.bassboost_pattern)?
            .set_default("banned_terms", defaults.banned_terms)?
            .set_default("data_dir", defaults.data_dir.to_string_lossy().into_owned())?
            .set_default("dj_max_duration", defaults.dj_max_duration)?
            .set_default("notify_delete_secs", defaults.notify_delete_secs)?
            .set_default("search_results", defaults.search_results as u64)?
            .set_default("ytdlp_path", defaults.ytdlp_path)?
            .set_default("ffmpeg_path", defaults.ffmpeg_path)?
            .set_default("ytdlp_update_hours", defaults.ytdlp_update_hours)?)
    }

    /// Validates configuration values for correctness.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN is required");
        }

        if self.command_prefix.is_empty() || self.command_prefix.contains(char::is_whitespace) {
            anyhow::bail!("Command prefix must be non-empty and contain no spaces, got: {:?}", self.command_prefix);
        }

        if !(self.max_volume.is_finite() && self.max_volume > 0.0) {
            anyhow::bail!("Max volume must be positive, got: {}", self.max_volume);
        }

        if !(self.default_volume > 0.0 && self.default_volume <= self.max_volume) {
            anyhow::bail!(
                "Default volume must be between 0 and {}, got: {}",
                self.max_volume,
                self.default_volume
            );
        }

        if self.dj_max_duration == 0 {
            anyhow::bail!("DJ max duration must be greater than 0");
        }

        if !(1..=25).contains(&self.search_results) {
            anyhow::bail!("Search results must be between 1 and 25, got: {}", self.search_results);
        }

        Regex::new(&self.bassboost_pattern)
            .with_context(|| format!("Invalid bass boost pattern: {}", self.bassboost_pattern))?;

        Ok(())
    }

    pub fn compiler_settings(&self) -> Result<CompilerSettings> {
        Ok(CompilerSettings {
            base_options: self.ffmpeg_options.clone(),
            bass_boost: Regex::new(&self.bassboost_pattern)?,
            ban_list: BanList::parse(&self.banned_terms),
        })
    }

    /// `None` when notices should stay.
    pub fn notify_delete_after(&self) -> Option<Duration> {
        (self.notify_delete_secs > 0).then(|| Duration::from_secs(self.notify_delete_secs))
    }

    /// Returns a summary of the current configuration for logging, without
    /// the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix {:?}, notices deleted after {}\n  \
            Audio: {}% vol (max {}%), ffmpeg options {:?}\n  \
            Library: {} (DJ songs up to {})\n  \
            Policy: {} banned terms, bass boost on /{}/\n  \
            Tools: {}, {} (yt-dlp updates: {})",
            self.command_prefix,
            self.notify_delete_after()
                .map_or("never".to_string(), |d| humantime::format_duration(d).to_string()),
            (self.default_volume * 100.0) as u32,
            (self.max_volume * 100.0) as u32,
            self.ffmpeg_options,
            self.data_dir.display(),
            humantime::format_duration(Duration::from_secs(self.dj_max_duration)),
            BanList::parse(&self.banned_terms).len(),
            self.bassboost_pattern,
            self.ytdlp_path,
            self.ffmpeg_path,
            if self.ytdlp_update_hours == 0 {
                "off".to_string()
            } else {
                humantime::format_duration(Duration::from_secs(self.ytdlp_update_hours * 3600)).to_string()
            },
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (token must be provided)
            discord_token: String::new(),
            command_prefix: "=".to_string(),

            default_volume: 1.0,
            max_volume: 8.0,
            ffmpeg_options: "-vn".to_string(),
            bassboost_pattern: r"(?i)bass\s*boost(ed)?".to_string(),
            banned_terms: String::new(),

            data_dir: "data".into(),
            dj_max_duration: 600, // 10 minutes

            notify_delete_secs: 10,
            search_results: 5,

            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ytdlp_update_hours: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn from_toml(toml: &str) -> Config {
        Config::defaults()
            .unwrap()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let config = from_toml(r#"discord_token = "abc""#);
        assert_eq!(config.command_prefix, "=");
        assert_eq!(config.notify_delete_secs, 10);
        assert_eq!(config.dj_max_duration, 600);
        assert_eq!(config.search_results, 5);
        assert_eq!(config.ytdlp_update_hours, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_values_override_defaults() {
        let config = from_toml(
            r#"
            discord_token = "abc"
            command_prefix = "!"
            notify_delete_secs = 0
            banned_terms = "earrape=too loud"
            max_volume = 4.0
            "#,
        );
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.notify_delete_after(), None);
        assert_eq!(config.max_volume, 4.0);

        let settings = config.compiler_settings().unwrap();
        assert_eq!(settings.ban_list.check("EARRAPE 10 hours"), Some("too loud"));
        assert!(settings.needs_bass_boost("bassboosted"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let missing_token = Config::default();
        assert!(missing_token.validate().is_err());

        let mut config = Config {
            discord_token: "abc".into(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.default_volume = 10.0;
        assert!(config.validate().is_err());
        config.default_volume = 1.0;

        config.bassboost_pattern = "(".into();
        assert!(config.validate().is_err());
        config.bassboost_pattern = "bass".into();

        config.command_prefix = "dj ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_hides_the_token() {
        let config = Config {
            discord_token: "super-secret".into(),
            ..Config::default()
        };
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("10s"));
    }
}
