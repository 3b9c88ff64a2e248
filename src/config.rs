//! Configuration module for the crawler.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `COMPASS_`-prefixed environment variables. Durations accept either a bare
//! number of seconds or a string with a unit (`"50ms"`, `"30s"`, `"5m"`).

use crate::compass::{MAX_PAGE_SIZE, RetryPolicy};
use crate::scraper::CrawlOptions;
use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::DurationParser;
use serde::{Deserialize, Deserializer};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when `--config` is not given, if present.
pub const DEFAULT_CONFIG_FILE: &str = "compass.toml";

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Scheme and host of the Compass deployment.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Directory receiving datasets and the faculty cache.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Level for the crate's own log events; `RUST_LOG` overrides it entirely.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_faculty_concurrency")]
    pub faculty_concurrency: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Attempts per request, including the first.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Attempts per department, including the first.
    #[serde(default = "default_retries")]
    pub department_retries: u32,
    #[serde(
        default = "default_retry_base_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_base_interval: Duration,
    #[serde(
        default = "default_retry_max_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_max_interval: Duration,
    #[serde(default = "default_backoff_factor")]
    pub retry_backoff_factor: f64,
    #[serde(default = "default_randomness")]
    pub retry_randomness: f64,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    /// Politeness limit shared by all requests; unlimited when unset.
    #[serde(default)]
    pub requests_per_second: Option<NonZeroU32>,

    #[serde(
        default = "default_cache_flush_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub cache_flush_interval: Duration,
    #[serde(default)]
    pub fetch_course_descriptions: bool,
    /// Terms to crawl. Empty means the newest term(s) from the listing.
    #[serde(default)]
    pub terms: Vec<String>,
}

fn default_base_url() -> String {
    "https://compassxe-ssb.tamu.edu".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_concurrency() -> usize {
    7
}

fn default_faculty_concurrency() -> usize {
    4
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_retries() -> u32 {
    10
}

fn default_retry_base_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_retry_max_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_randomness() -> f64 {
    0.5
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_flush_interval() -> Duration {
    Duration::from_secs(60)
}

impl Config {
    /// Load from `path` (or [`DEFAULT_CONFIG_FILE`] if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();
        match path {
            Some(path) => {
                anyhow::ensure!(path.exists(), "Config file {} not found", path.display());
                figment = figment.merge(Toml::file(path));
            }
            None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        }
        Self::from_figment(figment.merge(Env::prefixed("COMPASS_")))
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment.extract().context("Failed to load config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.concurrency > 0, "concurrency must be at least 1");
        anyhow::ensure!(
            self.faculty_concurrency > 0,
            "faculty_concurrency must be at least 1"
        );
        anyhow::ensure!(self.max_retries > 0, "max_retries must be at least 1");
        anyhow::ensure!(
            self.department_retries > 0,
            "department_retries must be at least 1"
        );
        anyhow::ensure!(
            self.retry_backoff_factor >= 1.0,
            "retry_backoff_factor must be at least 1.0"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retry_randomness),
            "retry_randomness must be between 0 and 1"
        );
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_interval: self.retry_base_interval,
            backoff_factor: self.retry_backoff_factor,
            randomness: self.retry_randomness,
            max_interval: self.retry_max_interval,
        }
    }

    pub fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            concurrency: self.concurrency,
            faculty_concurrency: self.faculty_concurrency,
            department_retries: self.department_retries,
            retry: self.retry_policy(),
            fetch_course_descriptions: self.fetch_course_descriptions,
        }
    }
}

/// Accept seconds as a number or a duration string with a unit.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let parsed = DurationParser::with_all_time_units()
        .parse(text.trim())
        .map_err(|e| format!("invalid duration {text:?}: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration {text:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_compass_limits() {
        let config = Config::from_figment(Figment::new()).unwrap();
        assert_eq!(config.base_url, "https://compassxe-ssb.tamu.edu");
        assert_eq!(config.concurrency, 7);
        assert_eq!(config.faculty_concurrency, 4);
        assert_eq!(config.page_size, 500);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.terms.is_empty());
        assert!(!config.fetch_course_descriptions);
    }

    #[test]
    fn toml_overrides_and_duration_units() {
        let figment = Figment::new().merge(Toml::string(
            r#"
            concurrency = 3
            retry_base_interval = "10ms"
            request_timeout = 5
            cache_flush_interval = "2m"
            requests_per_second = 20
            terms = ["202531", "202521"]
            "#,
        ));
        let config = Config::from_figment(figment).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.retry_base_interval, Duration::from_millis(10));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.cache_flush_interval, Duration::from_secs(120));
        assert_eq!(config.requests_per_second, NonZeroU32::new(20));
        assert_eq!(config.terms, vec!["202531", "202521"]);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let figment = Figment::new().merge(Toml::string("concurrency = 0"));
        assert!(Config::from_figment(figment).is_err());
    }

    #[test]
    fn bad_duration_is_reported() {
        assert!(parse_duration("soon").is_err());
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }
}
