//! Scheduler configuration from the environment

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::monitor::MonitorConfig;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone)]
pub struct EngineArgs {
    pub batch_size: usize,
    pub min_order_age: Duration,
    pub exec_interval: Duration,
    /// Concurrent execution workers per tick
    pub workers: usize,
    pub risk_interval: Duration,
    pub lock_wait: Duration,
    pub alert_cooldown: Duration,
    /// Commit journal; unset keeps the store in memory
    pub journal_path: Option<PathBuf>,
}

impl Default for EngineArgs {
    fn default() -> Self {
        Self {
            batch_size: 50,
            min_order_age: Duration::ZERO,
            exec_interval: Duration::from_millis(1_000),
            workers: 2,
            risk_interval: Duration::from_millis(30_000),
            lock_wait: Duration::from_millis(5_000),
            alert_cooldown: Duration::from_secs(15 * 60),
            journal_path: None,
        }
    }
}

impl EngineArgs {
    /// Read `EXEC_*`, `RISK_*`, `LOCK_WAIT_MS` and `ENGINE_JOURNAL`; unset or
    /// unparseable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| number(key).map_or(default, Duration::from_millis);

        Self {
            batch_size: number("EXEC_BATCH_SIZE")
                .filter(|n| *n > 0)
                .map_or(defaults.batch_size, |n| n as usize),
            min_order_age: number("EXEC_MIN_AGE_SECS").map_or(defaults.min_order_age, Duration::from_secs),
            exec_interval: millis("EXEC_INTERVAL_MS", defaults.exec_interval),
            workers: number("EXEC_WORKERS")
                .filter(|n| *n > 0)
                .map_or(defaults.workers, |n| n as usize),
            risk_interval: millis("RISK_INTERVAL_MS", defaults.risk_interval),
            lock_wait: millis("LOCK_WAIT_MS", defaults.lock_wait),
            alert_cooldown: number("RISK_ALERT_COOLDOWN_SECS").map_or(defaults.alert_cooldown, Duration::from_secs),
            journal_path: lookup("ENGINE_JOURNAL")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            batch_size: self.batch_size,
            min_age: self.min_order_age,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            alert_cooldown: self.alert_cooldown,
        }
    }
}
