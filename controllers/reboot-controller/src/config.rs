//! Controller configuration from environment variables.

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on machines that are rebooting or not ready at once
    pub max_unavailable: usize,
    /// Period of the informer's full resync
    pub resync_interval: Duration,
    /// Number of reconcile workers
    pub worker_count: usize,
    /// Requeues per key before it is abandoned
    pub max_retries: u32,
    /// Listen address of the metrics and probe server
    pub metrics_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_unavailable: 1,
            resync_interval: Duration::from_secs(30),
            worker_count: 1,
            max_retries: 5,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_unavailable = parse(&lookup, "MAX_UNAVAILABLE", defaults.max_unavailable)?;
        if max_unavailable == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_UNAVAILABLE",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let worker_count = parse(&lookup, "WORKER_COUNT", defaults.worker_count)?;
        if worker_count == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_COUNT",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let resync_secs = parse(
            &lookup,
            "RESYNC_INTERVAL_SECS",
            defaults.resync_interval.as_secs(),
        )?;

        Ok(Self {
            max_unavailable,
            resync_interval: Duration::from_secs(resync_secs),
            worker_count,
            max_retries: parse(&lookup, "MAX_RETRIES", defaults.max_retries)?,
            metrics_addr: parse(&lookup, "METRICS_ADDR", defaults.metrics_addr)?,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
