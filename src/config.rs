//! Process configuration read once at startup

use crate::runtime::{EngineConfig, DEFAULT_EVENT_BUFFER, DEFAULT_MAX_ROUND_TRIPS};
use crate::tools::DEFAULT_TOOL_TIMEOUT;
use crate::workflow::DEFAULT_CACHE_CAPACITY;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "chat_history.db";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub max_round_trips: usize,
    pub tool_timeout: Duration,
    pub workflow_cache_size: usize,
    /// Capability ids disabled right after registration
    pub disabled_tools: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            port: DEFAULT_PORT,
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            workflow_cache_size: DEFAULT_CACHE_CAPACITY,
            disabled_tools: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let tool_timeout_ms = parse_or(
            &lookup,
            "CHATLOOP_TOOL_TIMEOUT_MS",
            u64::try_from(defaults.tool_timeout.as_millis()).unwrap_or(u64::MAX),
        );

        Self {
            db_path: lookup("CHATLOOP_DB_PATH")
                .filter(|p| !p.is_empty())
                .map_or(defaults.db_path, PathBuf::from),
            port: parse_or(&lookup, "CHATLOOP_PORT", defaults.port),
            max_round_trips: parse_or(
                &lookup,
                "CHATLOOP_MAX_ROUND_TRIPS",
                defaults.max_round_trips,
            ),
            tool_timeout: Duration::from_millis(tool_timeout_ms),
            workflow_cache_size: parse_or(
                &lookup,
                "CHATLOOP_WORKFLOW_CACHE_SIZE",
                defaults.workflow_cache_size,
            ),
            disabled_tools: lookup("CHATLOOP_DISABLED_TOOLS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_round_trips: self.max_round_trips,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Parse a positive number, falling back to `default` with a warning
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => value,
        _ => {
            tracing::warn!(key, value = %raw, default = %default, "Invalid setting, using default");
            default
        }
    }
}
