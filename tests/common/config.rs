//! Test configurations

use attachment_backup::{ConcurrencyMode, Config, RetryConfig, UnitConfig};
use chrono::NaiveDate;
use std::path::Path;
use std::time::Duration;

/// Fixed run date so directory names are predictable
pub fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 25).unwrap()
}

/// Directory name produced by [`run_date`] with the default date format
pub const RUN_DATE_DIR: &str = "04_25_2024";

/// Config rooted at `root` with instant retries and a short attempt timeout
pub fn test_config(root: &Path, units: &[&str], concurrency: ConcurrencyMode) -> Config {
    let mut config = Config::default();
    config.output.target_root = root.to_path_buf();
    config.engine.concurrency = concurrency;
    config.engine.attempt_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 5,
        first_retry_delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
        max_delay: Duration::from_secs(1),
        jitter: false,
        stop_on_permanent_errors: false,
    };
    config.units = units.iter().map(|name| UnitConfig::new(*name)).collect();
    config
}
