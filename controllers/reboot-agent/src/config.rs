//! Agent configuration from environment variables.

use crate::error::ConfigError;
use std::time::Duration;

/// Runtime settings of the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of the node this agent runs on (downward API)
    pub node_name: String,
    /// Period of the informer's full resync
    pub resync_interval: Duration,
    /// Log and sleep instead of rebooting the host
    pub dry_run: bool,
    /// How long a dry-run "reboot" takes
    pub dry_run_sleep: Duration,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let node_name = lookup("NODE_NAME")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or(ConfigError::Missing("NODE_NAME"))?;

        let resync_secs = match lookup("RESYNC_INTERVAL_SECS") {
            None => 30,
            Some(raw) => parse_u64("RESYNC_INTERVAL_SECS", &raw)?,
        };
        let dry_run_sleep_secs = match lookup("DRY_RUN_SLEEP_SECS") {
            None => 10,
            Some(raw) => parse_u64("DRY_RUN_SLEEP_SECS", &raw)?,
        };
        let dry_run = match lookup("REBOOT_DRY_RUN") {
            None => false,
            Some(raw) => parse_bool("REBOOT_DRY_RUN", &raw)?,
        };

        Ok(Self {
            node_name,
            resync_interval: Duration::from_secs(resync_secs),
            dry_run,
            dry_run_sleep: Duration::from_secs(dry_run_sleep_secs),
        })
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
