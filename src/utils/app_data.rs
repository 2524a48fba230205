use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::results::RelevanceWeights;

const APP_NAME: &str = "fedsearch";
const CONFIG_FILE: &str = "config.json";

const ENV_DATA_DIR: &str = "FEDSEARCH_DATA_DIR";
const ENV_MAX_SEARCHERS: &str = "FEDSEARCH_MAX_SEARCHERS";
const ENV_QUEUE_INTERVAL_MS: &str = "FEDSEARCH_QUEUE_INTERVAL_MS";

/// Highlight tuning applied when a query does not override it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightConfig {
    #[serde(default = "default_maxchars")]
    pub maxchars: usize,
    #[serde(default = "default_surround")]
    pub surround: usize,
    /// Number of fragments kept per hit
    #[serde(default = "default_top")]
    pub top: usize,
}

fn default_maxchars() -> usize {
    300
}

fn default_surround() -> usize {
    50
}

fn default_top() -> usize {
    5
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            maxchars: default_maxchars(),
            surround: default_surround(),
            top: default_top(),
        }
    }
}

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory for indices and queues. `None` uses the app data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Segment count that triggers a merge on commit
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,

    /// Number of segments folded together per merge
    #[serde(default = "default_merge_segments")]
    pub merge_segments: usize,

    #[serde(default = "default_lock_max_attempts")]
    pub lock_max_attempts: u32,

    #[serde(default = "default_lock_min_delay_ms")]
    pub lock_min_delay_ms: u64,

    #[serde(default = "default_lock_max_delay_ms")]
    pub lock_max_delay_ms: u64,

    /// Size of the per-request search worker pool
    #[serde(default = "default_max_searchers")]
    pub max_searchers: usize,

    /// Capacity of the open reader LRU
    #[serde(default = "default_max_open_readers")]
    pub max_open_readers: usize,

    /// Consumer wake-up interval
    #[serde(default = "default_queue_interval_ms")]
    pub queue_interval_ms: u64,

    /// Lifetime of a queued operation
    #[serde(default = "default_queue_expiry_secs")]
    pub queue_expiry_secs: u64,

    #[serde(default = "default_ngram_min")]
    pub ngram_min: usize,

    #[serde(default = "default_ngram_max")]
    pub ngram_max: usize,

    /// Suggest edit distance when the query gives none
    #[serde(default = "default_word_max_dist")]
    pub word_max_dist: usize,

    #[serde(default)]
    pub relevance: RelevanceWeights,

    #[serde(default)]
    pub highlight: HighlightConfig,
}

fn default_max_segments() -> usize {
    10
}

fn default_merge_segments() -> usize {
    5
}

fn default_lock_max_attempts() -> u32 {
    40
}

fn default_lock_min_delay_ms() -> u64 {
    100
}

fn default_lock_max_delay_ms() -> u64 {
    250
}

fn default_max_searchers() -> usize {
    64
}

fn default_max_open_readers() -> usize {
    128
}

fn default_queue_interval_ms() -> u64 {
    1000
}

fn default_queue_expiry_secs() -> u64 {
    24 * 60 * 60
}

fn default_ngram_min() -> usize {
    2
}

fn default_ngram_max() -> usize {
    20
}

fn default_word_max_dist() -> usize {
    15
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_segments: default_max_segments(),
            merge_segments: default_merge_segments(),
            lock_max_attempts: default_lock_max_attempts(),
            lock_min_delay_ms: default_lock_min_delay_ms(),
            lock_max_delay_ms: default_lock_max_delay_ms(),
            max_searchers: default_max_searchers(),
            max_open_readers: default_max_open_readers(),
            queue_interval_ms: default_queue_interval_ms(),
            queue_expiry_secs: default_queue_expiry_secs(),
            ngram_min: default_ngram_min(),
            ngram_max: default_ngram_max(),
            word_max_dist: default_word_max_dist(),
            relevance: RelevanceWeights::default(),
            highlight: HighlightConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load config from the app data directory, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific file, or return defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Config rooted at a directory, everything else default (tests, tools)
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Save config to the app data directory
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path()?;
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Environment variables win over file values
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(n) = lookup(ENV_MAX_SEARCHERS).and_then(|v| v.parse().ok()) {
            self.max_searchers = n;
        }
        if let Some(ms) = lookup(ENV_QUEUE_INTERVAL_MS).and_then(|v| v.parse().ok()) {
            self.queue_interval_ms = ms;
        }
    }

    /// Resolve the data directory, creating it if needed
    pub fn effective_data_dir(&self) -> Result<PathBuf> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => get_app_data_dir()?,
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Search pool size, never zero
    pub fn effective_max_searchers(&self) -> usize {
        self.max_searchers.max(1)
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}
