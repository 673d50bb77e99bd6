//! Configuration loading and typed config structures for the Townhall store.
//!
//! The canonical configuration lives in `town-config.yaml` at the project
//! root. Every field has a default, so a missing file or an empty document
//! yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use town_economy::RewardRates;

/// Smallest deployed mission window.
pub const MIN_MISSIONS: usize = 8;

/// Largest deployed mission window.
pub const MAX_MISSIONS: usize = 10;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration, mirroring `town-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TownConfig {
    /// File locations and write-queue tuning.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Reward rates and starting balance.
    #[serde(default)]
    pub economy: EconomyConfig,

    /// Mission window sizing.
    #[serde(default)]
    pub missions: MissionConfig,

    /// File watcher and periodic reconciliation.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TownConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values for file locations:
    /// - `TOWN_STATE_PATH` overrides `storage.state_path`
    /// - `TOWN_TASKS_DIR` overrides `storage.tasks_dir`
    /// - `TOWN_REPORTS_DIR` overrides `storage.reports_dir`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path` if it exists, otherwise use defaults. Environment
    /// overrides apply either way.
    ///
    /// # Errors
    ///
    /// Same as [`TownConfig::from_file`] when the file exists.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let mut config = Self::default();
        config.storage.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.storage.apply_env_overrides();
        Ok(config)
    }
}

/// Where state lives and how the write queue behaves.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// The persisted world state file.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Directory of per-worker task snapshots.
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,

    /// Directory of per-worker report snapshots.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    /// Modification times closer than this are considered equal.
    #[serde(default = "default_cas_epsilon_us")]
    pub cas_epsilon_us: u64,

    /// Total write attempts before a conflict is reported.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How many reward dedupe keys to remember.
    #[serde(default = "default_ledger_cap")]
    pub ledger_cap: usize,
}

impl StorageConfig {
    /// Apply environment variable overrides for file locations.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TOWN_STATE_PATH") {
            self.state_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TOWN_TASKS_DIR") {
            self.tasks_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TOWN_REPORTS_DIR") {
            self.reports_dir = PathBuf::from(val);
        }
    }

    /// The CAS tolerance as a [`Duration`].
    pub const fn cas_epsilon(&self) -> Duration {
        Duration::from_micros(self.cas_epsilon_us)
    }

    /// At least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            tasks_dir: default_tasks_dir(),
            reports_dir: default_reports_dir(),
            cas_epsilon_us: default_cas_epsilon_us(),
            max_attempts: default_max_attempts(),
            ledger_cap: default_ledger_cap(),
        }
    }
}

/// Economy parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EconomyConfig {
    /// Gold per minute per building level.
    #[serde(default = "default_gold_rate")]
    pub gold_rate: f64,

    /// Xp per minute per building level.
    #[serde(default = "default_xp_rate")]
    pub xp_rate: f64,

    /// Gold in a freshly created state.
    #[serde(default = "default_starting_gold")]
    pub starting_gold: u64,
}

impl EconomyConfig {
    /// The configured reward rates.
    pub const fn rates(&self) -> RewardRates {
        RewardRates {
            gold_rate: self.gold_rate,
            xp_rate: self.xp_rate,
        }
    }
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            gold_rate: default_gold_rate(),
            xp_rate: default_xp_rate(),
            starting_gold: default_starting_gold(),
        }
    }
}

/// Mission window configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MissionConfig {
    /// Preferred number of deployed missions.
    #[serde(default = "default_mission_target")]
    pub target_count: usize,
}

impl MissionConfig {
    /// The target, clamped into the allowed window.
    pub fn target(&self) -> usize {
        self.target_count.clamp(MIN_MISSIONS, MAX_MISSIONS)
    }
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            target_count: default_mission_target(),
        }
    }
}

/// File watcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatcherConfig {
    /// Quiet period before a burst of file events triggers a reconcile.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Interval of the safety-net reconcile.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl WatcherConfig {
    /// Debounce window as a [`Duration`].
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Periodic reconcile interval as a [`Duration`]; never zero.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_state_path() -> PathBuf {
    PathBuf::from("data/world-state.yaml")
}

fn default_tasks_dir() -> PathBuf {
    PathBuf::from("data/tasks")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("data/reports")
}

const fn default_cas_epsilon_us() -> u64 {
    500
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_ledger_cap() -> usize {
    500
}

const fn default_gold_rate() -> f64 {
    1.0
}

const fn default_xp_rate() -> f64 {
    2.0
}

const fn default_starting_gold() -> u64 {
    100
}

const fn default_mission_target() -> usize {
    9
}

const fn default_debounce_ms() -> u64 {
    250
}

const fn default_reconcile_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_owned()
}
