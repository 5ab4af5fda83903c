//! Lowest-fare flight search driven through a headless browser
//!
//! Loads Interpark result pages in chromiumoxide, reads fares with injected
//! scripts, caches and persists what it finds.

mod browser;
pub mod browser_setup;
pub mod cache;
pub mod codes;
pub mod combine;
pub mod error;
pub mod events;
pub mod model;
pub mod monitor;
pub mod parallel;
pub mod scripts;
pub mod searcher;
pub mod session;
pub mod store;
mod utils;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub parallel: ParallelConfig,
}

/// Timing and volume knobs of a single search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Attempts for a network failure, the first one included
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_page_load_timeout_ms")]
    pub page_load_timeout_ms: u64,

    /// Upper bound on waiting for the first result rows
    #[serde(default = "default_data_wait_timeout_ms")]
    pub data_wait_timeout_ms: u64,

    #[serde(default = "default_page_stabilize_ms")]
    pub page_stabilize_ms: u64,

    #[serde(default = "default_scroll_pause_ms")]
    pub scroll_pause_ms: u64,

    #[serde(default = "default_international_max_scrolls")]
    pub international_max_scrolls: u32,

    #[serde(default = "default_domestic_max_scrolls")]
    pub domestic_max_scrolls: u32,

    #[serde(default = "default_domestic_scroll_pause_ms")]
    pub domestic_scroll_pause_ms: u64,

    #[serde(default = "default_domestic_bottom_pause_ms")]
    pub domestic_bottom_pause_ms: u64,

    /// Cheapest rows kept per domestic leg
    #[serde(default = "default_domestic_leg_cap")]
    pub domestic_leg_cap: usize,

    #[serde(default = "default_domestic_return_poll_interval_ms")]
    pub domestic_return_poll_interval_ms: u64,

    #[serde(default = "default_domestic_return_max_polls")]
    pub domestic_return_max_polls: u32,

    #[serde(default = "default_domestic_post_click_settle_ms")]
    pub domestic_post_click_settle_ms: u64,

    /// Per-engine bound on a browser launch
    #[serde(default = "default_engine_launch_timeout_ms")]
    pub engine_launch_timeout_ms: u64,

    #[serde(default = "default_progress_dedup_window_ms")]
    pub progress_dedup_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Refuse image, media and font requests
    #[serde(default = "default_true")]
    pub block_resources: bool,

    /// Window dimensions
    #[serde(default)]
    pub window: WindowConfig,

    /// Profile used by manual sessions; defaults under the data dir
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Age after which history and logs are removed by `cleanup`
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Rows kept per stored result snapshot
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_date_range")]
    pub max_date_range: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_retry_count() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2_000
}
fn default_page_load_timeout_ms() -> u64 {
    60_000
}
fn default_data_wait_timeout_ms() -> u64 {
    30_000
}
fn default_page_stabilize_ms() -> u64 {
    1_500
}
fn default_scroll_pause_ms() -> u64 {
    1_000
}
fn default_international_max_scrolls() -> u32 {
    20
}
fn default_domestic_max_scrolls() -> u32 {
    300
}
fn default_domestic_scroll_pause_ms() -> u64 {
    300
}
fn default_domestic_bottom_pause_ms() -> u64 {
    500
}
fn default_domestic_leg_cap() -> usize {
    150
}
fn default_domestic_return_poll_interval_ms() -> u64 {
    500
}
fn default_domestic_return_max_polls() -> u32 {
    30
}
fn default_domestic_post_click_settle_ms() -> u64 {
    500
}
fn default_engine_launch_timeout_ms() -> u64 {
    20_000
}
fn default_progress_dedup_window_ms() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    180
}
fn default_cache_max_entries() -> usize {
    64
}

fn default_window_width() -> u32 {
    1400
}

fn default_window_height() -> u32 {
    900
}

fn default_retention_days() -> i64 {
    90
}
fn default_snapshot_limit() -> usize {
    1_000
}

fn default_max_concurrent() -> usize {
    2
}
fn default_max_date_range() -> usize {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            cache: CacheConfig::default(),
            browser: BrowserConfig::default(),
            database: DatabaseConfig::default(),
            parallel: ParallelConfig::default(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            page_load_timeout_ms: default_page_load_timeout_ms(),
            data_wait_timeout_ms: default_data_wait_timeout_ms(),
            page_stabilize_ms: default_page_stabilize_ms(),
            scroll_pause_ms: default_scroll_pause_ms(),
            international_max_scrolls: default_international_max_scrolls(),
            domestic_max_scrolls: default_domestic_max_scrolls(),
            domestic_scroll_pause_ms: default_domestic_scroll_pause_ms(),
            domestic_bottom_pause_ms: default_domestic_bottom_pause_ms(),
            domestic_leg_cap: default_domestic_leg_cap(),
            domestic_return_poll_interval_ms: default_domestic_return_poll_interval_ms(),
            domestic_return_max_polls: default_domestic_return_max_polls(),
            domestic_post_click_settle_ms: default_domestic_post_click_settle_ms(),
            engine_launch_timeout_ms: default_engine_launch_timeout_ms(),
            progress_dedup_window_ms: default_progress_dedup_window_ms(),
        }
    }
}

impl ScraperConfig {
    /// Every wait at zero; used by tests driving a scripted backend
    pub fn immediate() -> Self {
        Self {
            retry_delay_ms: 0,
            page_load_timeout_ms: 1_000,
            data_wait_timeout_ms: 0,
            page_stabilize_ms: 0,
            scroll_pause_ms: 0,
            domestic_scroll_pause_ms: 0,
            domestic_bottom_pause_ms: 0,
            domestic_return_poll_interval_ms: 0,
            domestic_post_click_settle_ms: 0,
            engine_launch_timeout_ms: 1_000,
            progress_dedup_window_ms: 0,
            ..Self::default()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }
    pub fn data_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.data_wait_timeout_ms)
    }
    pub fn page_stabilize(&self) -> Duration {
        Duration::from_millis(self.page_stabilize_ms)
    }
    pub fn scroll_pause(&self) -> Duration {
        Duration::from_millis(self.scroll_pause_ms)
    }
    pub fn domestic_scroll_pause(&self) -> Duration {
        Duration::from_millis(self.domestic_scroll_pause_ms)
    }
    pub fn domestic_bottom_pause(&self) -> Duration {
        Duration::from_millis(self.domestic_bottom_pause_ms)
    }
    pub fn domestic_return_poll_interval(&self) -> Duration {
        Duration::from_millis(self.domestic_return_poll_interval_ms)
    }
    pub fn domestic_post_click_settle(&self) -> Duration {
        Duration::from_millis(self.domestic_post_click_settle_ms)
    }
    pub fn engine_launch_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_launch_timeout_ms)
    }
    pub fn progress_dedup_window(&self) -> Duration {
        Duration::from_millis(self.progress_dedup_window_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            block_resources: true,
            window: WindowConfig::default(),
            profile_dir: None,
        }
    }
}

impl BrowserConfig {
    pub fn resolved_profile_dir(&self) -> PathBuf {
        self.profile_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("browser_profile"))
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            retention_days: default_retention_days(),
            snapshot_limit: default_snapshot_limit(),
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| data_dir().join("flight_data.db"))
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_date_range: default_max_date_range(),
        }
    }
}

/// Per-user data directory for the database and the manual profile
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fare-scout")
}

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "FARE_SCOUT_CONFIG";

/// Load config from an explicit path, `$FARE_SCOUT_CONFIG`, or `./config.yaml`.
///
/// Falls back to defaults when none of them exists. An explicit path that
/// does not exist is an error.
pub fn load_yaml_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        return read_config(path);
    }

    let candidate = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));

    if candidate.exists() {
        read_config(&candidate)
    } else {
        Ok(Config::default())
    }
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let contents = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

pub use browser::{BrowserBackend, BrowserError, BrowserResult, ChromiumBackend, Launcher};
pub use browser_setup::{ChromiumLauncher, Engine, LaunchOptions, SessionMode};
pub use cache::SearchCache;
pub use error::{ErrorKind, ScraperError, ScraperResult, StoreError, StoreResult};
pub use events::{ProgressReporter, SearchEvent, SearchHandle, spawn_search};
pub use model::{CabinClass, FlightResult, RawFlightRow, RouteKey, SearchParams};
pub use monitor::{AlertCheck, AlertCheckOutcome, RecordReport, SearchRecorder};
pub use parallel::{DateOutcome, DatePrice, ParallelSearcher};
pub use searcher::{FlightSearcher, ManualSession, SearchOutcome};
pub use session::{BrowserSession, ScrollState};
pub use store::{Store, StoreConnection};
