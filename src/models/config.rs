//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{FormSelectors, SiteAdapter};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Browsing and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Inventory store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Notification batching and delivery
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Catalog sites to walk
    #[serde(default = "defaults::sites")]
    pub sites: Vec<SiteAdapter>,

    /// Known yards
    #[serde(default = "defaults::locations")]
    pub locations: Vec<Location>,

    /// Named groups of yards
    #[serde(default = "defaults::regions")]
    pub regions: Vec<Region>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.channel_capacity == 0 {
            return Err(AppError::validation("crawler.channel_capacity must be > 0"));
        }
        if self.notify.max_batch_entries == 0 {
            return Err(AppError::validation("notify.max_batch_entries must be > 0"));
        }
        if self.notify.max_batch_chars < 200 {
            return Err(AppError::validation(
                "notify.max_batch_chars must be at least 200",
            ));
        }
        if self.sites.is_empty() {
            return Err(AppError::validation("No sites defined"));
        }
        for site in &self.sites {
            site.validate()?;
        }
        if self.locations.is_empty() {
            return Err(AppError::validation("No locations defined"));
        }
        for region in &self.regions {
            if let Some(missing) = region
                .members
                .iter()
                .find(|id| !self.locations.iter().any(|l| l.id == **id))
            {
                return Err(AppError::validation(format!(
                    "region '{}' references unknown location {}",
                    region.name, missing
                )));
            }
        }
        Ok(())
    }

    /// Find a site by name (case-insensitive).
    pub fn site(&self, name: &str) -> Option<&SiteAdapter> {
        self.sites.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Resolve the store path relative to a base directory.
    pub fn store_path(&self, base: &Path) -> PathBuf {
        let path = Path::new(&self.store.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            store: StoreConfig::default(),
            notify: NotifyConfig::default(),
            sites: defaults::sites(),
            locations: defaults::locations(),
            regions: defaults::regions(),
        }
    }
}

/// Browsing session and crawl behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Bound on page loads and form submits, in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between form submits in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Maximum locations walked in parallel, one session each
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Retries of a whole site walk after a session-level failure
    #[serde(default = "defaults::retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between walk retries, in seconds
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_secs: u64,

    /// Capacity of the observation channel feeding the store
    #[serde(default = "defaults::channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
            retry_attempts: defaults::retry_attempts(),
            retry_delay_secs: defaults::retry_delay(),
            channel_capacity: defaults::channel_capacity(),
        }
    }
}

/// Inventory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file, relative to the storage directory
    #[serde(default = "defaults::store_path")]
    pub path: String,

    /// Retries on SQLITE_BUSY / SQLITE_LOCKED
    #[serde(default = "defaults::busy_retries")]
    pub busy_retries: u32,

    /// Fixed backoff between busy retries, in milliseconds
    #[serde(default = "defaults::busy_backoff")]
    pub busy_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: defaults::store_path(),
            busy_retries: defaults::busy_retries(),
            busy_backoff_ms: defaults::busy_backoff(),
        }
    }
}

/// Notification batching and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Ceiling on the serialized size of one batch
    #[serde(default = "defaults::max_batch_chars")]
    pub max_batch_chars: usize,

    /// Ceiling on item entries per batch
    #[serde(default = "defaults::max_batch_entries")]
    pub max_batch_entries: usize,

    /// Webhook for owner deliveries; `{owner}` is replaced by the owner id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_webhook_url: Option<String>,

    /// Webhook for the new-arrivals broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_webhook_url: Option<String>,

    /// Skip the scheduled match cycle if the store is older than this
    #[serde(default = "defaults::freshness_minutes")]
    pub freshness_minutes: u64,

    /// How far back the first new-arrivals broadcast reaches
    #[serde(default = "defaults::broadcast_lookback_hours")]
    pub broadcast_lookback_hours: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_batch_chars: defaults::max_batch_chars(),
            max_batch_entries: defaults::max_batch_entries(),
            owner_webhook_url: None,
            broadcast_webhook_url: None,
            freshness_minutes: defaults::freshness_minutes(),
            broadcast_lookback_hours: defaults::broadcast_lookback_hours(),
        }
    }
}

/// A physical yard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Internal numeric id used by the catalog form
    pub id: u32,

    /// Display name (e.g., "BOISE")
    pub name: String,
}

/// A named group of yards (e.g., a metro area).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub members: Vec<u32>,
}

mod defaults {
    use super::{FormSelectors, Location, Region, SiteAdapter};

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; yardwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        250
    }
    pub fn max_concurrent() -> usize {
        1
    }
    pub fn retry_attempts() -> u32 {
        3
    }
    pub fn retry_delay() -> u64 {
        5
    }
    pub fn channel_capacity() -> usize {
        256
    }

    // Store defaults
    pub fn store_path() -> String {
        "inventory.db".into()
    }
    pub fn busy_retries() -> u32 {
        5
    }
    pub fn busy_backoff() -> u64 {
        100
    }

    // Notify defaults
    pub fn max_batch_chars() -> usize {
        6000
    }
    pub fn max_batch_entries() -> usize {
        25
    }
    pub fn freshness_minutes() -> u64 {
        30
    }
    pub fn broadcast_lookback_hours() -> u64 {
        24
    }

    fn pick_a_part_selectors(location_select: Option<&str>) -> FormSelectors {
        FormSelectors {
            location_select: location_select.map(str::to_string),
            make_select: "#car-make".into(),
            model_select: "#car-model".into(),
            search_form: "#searchinventory".into(),
            results_table: ".table-responsive table".into(),
        }
    }

    // Site defaults
    pub fn sites() -> Vec<SiteAdapter> {
        vec![
            SiteAdapter {
                name: "jalopyjungle".into(),
                base_url: "https://inventory.pickapartjalopyjungle.com/".into(),
                has_multiple_locations: true,
                location_id: None,
                selectors: pick_a_part_selectors(Some("#yard-id")),
            },
            SiteAdapter {
                name: "trusty".into(),
                base_url: "https://inventory.trustypickapart.com/".into(),
                has_multiple_locations: false,
                location_id: Some(999999),
                selectors: pick_a_part_selectors(None),
            },
        ]
    }

    // Location defaults
    pub fn locations() -> Vec<Location> {
        [
            (1020, "BOISE"),
            (1021, "CALDWELL"),
            (1022, "NAMPA"),
            (1119, "GARDENCITY"),
            (1099, "TWINFALLS"),
            (999999, "TRUSTYPICKAPART"),
        ]
        .into_iter()
        .map(|(id, name)| Location {
            id,
            name: name.to_string(),
        })
        .collect()
    }

    pub fn regions() -> Vec<Region> {
        vec![Region {
            name: "TREASUREVALLEYYARDS".into(),
            members: vec![1020, 1119, 1021, 1022],
        }]
    }
}
