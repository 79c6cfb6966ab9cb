//! Configuration management for Quillcast
//!
//! Every empirically-tuned knob (retry counts, backoff timing, daily caps,
//! reservation windows, verification thresholds) is configuration, not a
//! hard-coded invariant. The target platforms publish no rate-limit
//! contract, so operators must be able to retune without rebuilding.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub insertion: InsertionConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default, rename = "platform")]
    pub platforms: Vec<PlatformConfig>,
}

/// Endpoints for the external collaborator services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Article generation service; POST with items/style/instructions.
    pub generator_url: Option<String>,
    /// Source feed service; GET returning recent items.
    pub feed_url: Option<String>,
    /// Draft storage service.
    pub drafts_url: Option<String>,
    /// Free-text classification service.
    pub classifier_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            generator_url: None,
            feed_url: None,
            drafts_url: None,
            classifier_url: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run the browser without a visible window. Interactive login needs a
    /// head, so operators flip this off for the first run.
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub interval_minutes: u64,
    /// Terminal jobs older than this many days are purged.
    pub retention_days: u32,
    /// Pause between posts in a multi-part run, to stay under platform
    /// anti-automation friction.
    pub inter_post_delay_secs: u64,
    /// Transient network/API errors: attempts before surfacing.
    pub max_network_attempts: u32,
    /// Base delay for exponential backoff (doubles per attempt).
    pub backoff_base_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            retention_days: 14,
            inter_post_delay_secs: 45,
            max_network_attempts: 3,
            backoff_base_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Daily immediate-publish cap per (platform, account).
    pub daily_cap: u32,
    /// Reservation window: random hour in [start_hour, end_hour] next day.
    pub reservation_start_hour: u32,
    pub reservation_end_hour: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            daily_cap: 15,
            reservation_start_hour: 7,
            reservation_end_hour: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertionConfig {
    /// Minimum byte length of the editor content after insertion.
    pub min_content_bytes: usize,
    /// Minimum count of block elements (paragraphs/headings).
    pub min_block_elements: usize,
    /// With images present, this much plain text is enough even when the
    /// block count falls short.
    pub min_text_with_images: usize,
    /// Block count at which stray markdown characters are tolerated.
    pub strong_structure_blocks: usize,
    /// Clipboard-paste strategy retries.
    pub paste_attempts: u32,
}

impl Default for InsertionConfig {
    fn default() -> Self {
        Self {
            min_content_bytes: 350,
            min_block_elements: 3,
            min_text_with_images: 200,
            strong_structure_blocks: 8,
            paste_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Image search endpoint; queried with ?q=<keyword>, expected to return
    /// a JSON array of candidate URLs.
    pub search_endpoint: Option<String>,
    /// Keyed stock-photo endpoint and its API key.
    pub stock_endpoint: Option<String>,
    pub stock_api_key: Option<String>,
    /// Base URL for the deterministic placeholder generator.
    pub placeholder_base: String,
    pub probe_timeout_secs: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            search_endpoint: None,
            stock_endpoint: None,
            stock_api_key: None,
            placeholder_base: "https://picsum.photos/seed".to_string(),
            probe_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub default_style: String,
    pub instructions: Option<String>,
    /// Feed items older than this are ignored for spontaneous runs.
    pub source_max_age_hours: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            default_style: "informative".to_string(),
            instructions: None,
            source_max_age_hours: 48,
        }
    }
}

/// One target blog account, driven through its ordinary web UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: String,
    pub account_id: String,
    pub landing_url: String,
    pub login_url: String,
    pub editor_url: String,
    /// CSS selector for the login affordance; its absence signals a live session.
    pub login_marker: String,
    /// CSS selector for the user-identity element; its presence signals a live session.
    pub identity_marker: String,
    /// Login polling budget in seconds.
    pub login_timeout_secs: u64,
    /// Fallback category bucket used when no taxonomy node matches.
    pub fallback_category: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/quillcast/quillcast.db".to_string(),
            },
            browser: BrowserConfig::default(),
            scheduler: SchedulerConfig::default(),
            throttle: ThrottleConfig::default(),
            insertion: InsertionConfig::default(),
            images: ImagesConfig::default(),
            generator: GeneratorConfig::default(),
            services: ServicesConfig::default(),
            platforms: vec![],
        }
    }

    /// Look up one configured platform by name
    pub fn platform(&self, name: &str) -> Result<&PlatformConfig> {
        self.platforms
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::MissingField(format!("platform.{}", name)).into())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("QUILLCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("quillcast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("quillcast"))
}
