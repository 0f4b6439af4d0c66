use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::RetryPolicy;

/// Runtime settings, read from `ROLLCALL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Longest a transaction waits for one row lock before giving up.
    pub lock_wait: Duration,
    pub retry: RetryPolicy,
    /// WAL appends between background compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_wait: Duration::from_millis(5_000),
            retry: RetryPolicy::default(),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_attempts: env_parse("ROLLCALL_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts),
            base_delay: env_parse("ROLLCALL_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
            max_delay: env_parse("ROLLCALL_RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
        };
        Self {
            data_dir: std::env::var("ROLLCALL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_wait: env_parse("ROLLCALL_LOCK_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_wait),
            retry,
            compact_threshold: env_parse("ROLLCALL_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: env_parse("ROLLCALL_METRICS_PORT"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("rollcall.wal")
    }
}
