//! Process configuration: environment variables for deployment knobs, a YAML
//! profile for what to search and where.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use jobwatch_core::{SearchProfile, SourceId};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub database_url: String,
    pub profile_path: PathBuf,
    pub interval: Duration,
    pub warmup: Duration,
    pub summary_cron: Option<String>,
    pub notify_when_empty: bool,
    pub per_source_messages: bool,
    pub web_port: Option<u16>,
    pub telegram: Option<TelegramConfig>,
    pub http_timeout: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://jobs.db".to_string(),
            profile_path: PathBuf::from("jobwatch.yaml"),
            interval: Duration::from_secs(2 * 60 * 60),
            warmup: Duration::from_secs(30),
            summary_cron: None,
            notify_when_empty: true,
            per_source_messages: false,
            web_port: None,
            telegram: None,
            http_timeout: Duration::from_secs(15),
        }
    }
}

impl WatchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`WatchConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram = match (var("TELEGRAM_TOKEN"), var("TELEGRAM_CHAT_ID")) {
            (Some(token), Some(chat_id)) => Some(TelegramConfig { token, chat_id }),
            _ => None,
        };

        Self {
            database_url: var("DATABASE_URL").unwrap_or(defaults.database_url),
            profile_path: var("JOBWATCH_PROFILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.profile_path),
            interval: parsed(var("JOBWATCH_INTERVAL_SECS"))
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            warmup: parsed(var("JOBWATCH_WARMUP_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.warmup),
            summary_cron: var("JOBWATCH_SUMMARY_CRON"),
            notify_when_empty: var("JOBWATCH_NOTIFY_EMPTY")
                .map(|v| flag(&v))
                .unwrap_or(defaults.notify_when_empty),
            per_source_messages: var("JOBWATCH_PER_SOURCE_MESSAGES")
                .map(|v| flag(&v))
                .unwrap_or(defaults.per_source_messages),
            web_port: parsed(var("JOBWATCH_WEB_PORT")),
            telegram,
            http_timeout: parsed(var("JOBWATCH_HTTP_TIMEOUT_SECS"))
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
        }
    }
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

fn flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("profile lists no keywords")]
    NoKeywords,
    #[error("profile enables no sources")]
    NoSources,
    #[error("source {0} is configured more than once")]
    DuplicateSource(SourceId),
    #[error("source {source_id}: delay range {min}..{max} seconds is invalid")]
    InvalidDelay { source_id: SourceId, min: f64, max: f64 },
    #[error("source {0}: results_per_keyword must be at least 1")]
    ZeroResults(SourceId),
}

/// Search profile plus per-source polling settings, as read from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchProfile {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub user_agents: Vec<String>,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub source: SourceId,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Only the first N profile keywords are searched on this source.
    #[serde(default)]
    pub keyword_limit: Option<usize>,
    #[serde(default = "default_results_per_keyword")]
    pub results_per_keyword: usize,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    #[serde(default = "default_region")]
    pub default_region: String,
}

fn default_enabled() -> bool {
    true
}

fn default_results_per_keyword() -> usize {
    2
}

fn default_region() -> String {
    "Austria".to_string()
}

impl WatchProfile {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading profile {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let profile: Self = serde_yaml::from_str(text).context("parsing profile yaml")?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search_profile().keywords().is_empty() {
            return Err(ConfigError::NoKeywords);
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.source) {
                return Err(ConfigError::DuplicateSource(source.source));
            }
            let (min, max) = (source.min_delay_secs, source.max_delay_secs);
            if !(min.is_finite() && max.is_finite()) || min < 0.0 || min > max {
                return Err(ConfigError::InvalidDelay {
                    source_id: source.source,
                    min,
                    max,
                });
            }
            if source.results_per_keyword == 0 {
                return Err(ConfigError::ZeroResults(source.source));
            }
        }

        if self.enabled_sources().next().is_none() {
            return Err(ConfigError::NoSources);
        }
        Ok(())
    }

    pub fn search_profile(&self) -> SearchProfile {
        SearchProfile::new(
            self.keywords.iter().cloned(),
            self.locations.iter().cloned(),
            self.exclude_keywords.iter().cloned(),
        )
    }

    /// Enabled sources in the order they are polled.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}
