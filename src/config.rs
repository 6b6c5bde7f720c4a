//! Configuration types for attachment-backup

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the download engine schedules a batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// One descriptor at a time, in input order (default)
    #[default]
    Sequential,
    /// Fixed-size pool of parallel workers; outcome order is not guaranteed
    Pooled {
        /// Number of workers pulling descriptors
        workers: usize,
    },
}

impl ConcurrencyMode {
    /// Number of descriptors that may be in flight at once
    pub fn worker_count(&self) -> usize {
        match self {
            ConcurrencyMode::Sequential => 1,
            ConcurrencyMode::Pooled { workers } => *workers,
        }
    }
}

/// Naming of the per-unit directory below the run directory
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitSubdirectory {
    /// Every unit writes straight into the run directory (only valid for a single unit)
    None,
    /// Directory named after the unit (default)
    #[default]
    UnitName,
    /// Directory named after the unit's portal item id
    ItemId,
}

/// Where and how backup output is laid out on disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for all backups (default: "./backups")
    #[serde(default = "default_target_root")]
    pub target_root: PathBuf,

    /// Insert a directory named after today's date below the root (default: true)
    #[serde(default = "default_true")]
    pub date_stamp: bool,

    /// `chrono` format string for the date directory (default: "%m_%d_%Y")
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Per-unit subdirectory naming
    #[serde(default)]
    pub unit_subdirectory: UnitSubdirectory,

    /// File name of the main manifest (default: "attachments.csv")
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// Suffix inserted before the extension of the failure manifest (default: "_failed")
    #[serde(default = "default_failure_suffix")]
    pub failure_suffix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            target_root: default_target_root(),
            date_stamp: true,
            date_format: default_date_format(),
            unit_subdirectory: UnitSubdirectory::default(),
            manifest_name: default_manifest_name(),
            failure_suffix: default_failure_suffix(),
        }
    }
}

/// Download engine settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sequential or pooled execution
    #[serde(default)]
    pub concurrency: ConcurrencyMode,

    /// Time budget for a single fetch attempt (default: 120 seconds)
    ///
    /// An attempt that exceeds it counts as a failed attempt against the retry budget.
    #[serde(default = "default_attempt_timeout", with = "duration_serde")]
    pub attempt_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyMode::default(),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

/// Retry configuration for transient failures
///
/// The pause before the first retry is deliberately longer than the pauses that follow,
/// to ride out a brief loss of connectivity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per descriptor, including the first (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause before the first retry (default: 5 seconds)
    #[serde(default = "default_first_retry_delay", with = "duration_serde")]
    pub first_retry_delay: Duration,

    /// Pause before every later retry (default: 1 second)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Growth factor applied to `retry_delay` per further retry (default: 1.0 = fixed)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for any single pause (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Add random jitter to pauses (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Give up on errors that will recur on every attempt, such as HTTP 404 or a denied
    /// write, instead of spending the whole budget (default: false)
    #[serde(default)]
    pub stop_on_permanent_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            first_retry_delay: default_first_retry_delay(),
            retry_delay: default_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: default_max_delay(),
            jitter: false,
            stop_on_permanent_errors: false,
        }
    }
}

/// One logical unit (a layer or table) to back up
///
/// Everything except `name` is handed untouched to the external
/// [`AttachmentSource`](crate::backup::AttachmentSource).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Unit name, used for logging, events and the unit directory
    pub name: String,

    /// Portal item id of the hosted collection
    #[serde(default)]
    pub item_id: String,

    /// Index of the layer (or table) within the item
    #[serde(default)]
    pub layer_index: u32,

    /// Whether the unit is a table rather than a layer
    #[serde(default)]
    pub table: bool,

    /// Attribute filter forwarded to the query step
    #[serde(default)]
    pub query: Option<String>,

    /// Object-id field of the records (default: "OBJECTID")
    #[serde(default = "default_oid_field")]
    pub oid_field: String,
}

impl UnitConfig {
    /// Create a unit with the given name and default query settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            item_id: String::new(),
            layer_index: 0,
            table: false,
            query: None,
            oid_field: default_oid_field(),
        }
    }
}

/// Main configuration for [`BackupOrchestrator`](crate::backup::BackupOrchestrator)
///
/// Passed by value at construction; nothing in the crate reads process-wide settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Output layout
    #[serde(default)]
    pub output: OutputConfig,

    /// Download engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Units to back up, in order
    #[serde(default)]
    pub units: Vec<UnitConfig>,

    /// Run the external result-attachment step after each unit's reconciliation
    #[serde(default)]
    pub attach_results: bool,
}

impl Config {
    /// Load a configuration from a JSON file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.output.target_root.as_os_str().is_empty() {
            return Err(Error::config(
                "target root must not be empty",
                "output.target_root",
            ));
        }
        if self.output.manifest_name.trim().is_empty() {
            return Err(Error::config(
                "manifest name must not be empty",
                "output.manifest_name",
            ));
        }
        if self.output.failure_suffix.is_empty() {
            return Err(Error::config(
                "failure suffix must not be empty, the failure manifest would overwrite the main manifest",
                "output.failure_suffix",
            ));
        }
        if let Some(sample) = chrono::NaiveDate::from_ymd_opt(2000, 1, 1) {
            crate::utils::run_directory(&self.output, sample)?;
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "at least one attempt is required",
                "retry.max_attempts",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff multiplier must be a finite value >= 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if let ConcurrencyMode::Pooled { workers: 0 } = self.engine.concurrency {
            return Err(Error::config(
                "pooled mode needs at least one worker",
                "engine.concurrency.workers",
            ));
        }
        if self.engine.attempt_timeout.is_zero() {
            return Err(Error::config(
                "attempt timeout must be positive",
                "engine.attempt_timeout",
            ));
        }
        self.validate_units()
    }

    fn validate_units(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut directories = HashSet::new();
        for unit in &self.units {
            if unit.name.trim().is_empty() {
                return Err(Error::config("unit name must not be empty", "units.name"));
            }
            if !names.insert(unit.name.as_str()) {
                return Err(Error::config(
                    format!("unit {:?} is listed more than once", unit.name),
                    "units.name",
                ));
            }
            if self.output.unit_subdirectory == UnitSubdirectory::ItemId
                && unit.item_id.trim().is_empty()
            {
                return Err(Error::config(
                    format!("unit {:?} has no item id to name its directory", unit.name),
                    "units.item_id",
                ));
            }
            let directory = crate::utils::unit_directory_name(&self.output, unit);
            if !directories.insert(directory) {
                return Err(Error::config(
                    format!(
                        "unit {:?} would share its output directory with another unit",
                        unit.name
                    ),
                    "output.unit_subdirectory",
                ));
            }
        }
        Ok(())
    }
}

fn default_target_root() -> PathBuf {
    PathBuf::from("backups")
}

fn default_true() -> bool {
    true
}

fn default_date_format() -> String {
    "%m_%d_%Y".to_string()
}

fn default_manifest_name() -> String {
    "attachments.csv".to_string()
}

fn default_failure_suffix() -> String {
    "_failed".to_string()
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_first_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_oid_field() -> String {
    "OBJECTID".to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
