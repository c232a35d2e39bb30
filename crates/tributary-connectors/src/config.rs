//! Connector configuration types.
//!
//! - [`ConnectorConfig`]: raw string properties, as handed over by the host
//! - [`ConfigKeySpec`]: declaration of one understood key
//! - [`ExtractConfig`]: typed extraction settings parsed from a config
//! - [`ConnectorState`]: lifecycle state of a running feed

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConnectorError;

/// Raw connector properties.
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    properties: HashMap<String, String>,
}

impl ConnectorConfig {
    /// Creates an empty config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Gets a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Gets a property parsed as `T`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` if the value cannot be parsed.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConnectorError>
    where
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(v) => v.trim().parse::<T>().map(Some).map_err(|e| {
                ConnectorError::ConfigurationError(format!("invalid value for '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }

    /// Rejects properties under `prefix` that none of `specs` declares, so a
    /// misspelt key fails instead of silently falling back to its default.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` naming the first unknown
    /// key, in sorted order.
    pub fn validate(&self, prefix: &str, specs: &[ConfigKeySpec]) -> Result<(), ConnectorError> {
        let mut unknown: Vec<&String> = self
            .properties
            .keys()
            .filter(|k| k.starts_with(prefix) && !specs.iter().any(|s| s.key == k.as_str()))
            .collect();
        unknown.sort();
        match unknown.first() {
            Some(key) => Err(ConnectorError::ConfigurationError(format!(
                "unknown key '{key}'"
            ))),
            None => Ok(()),
        }
    }
}

/// Declaration of a configuration key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigKeySpec {
    /// The key.
    pub key: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Default value, or `None` when the default is derived from other keys.
    pub default: Option<&'static str>,
}

impl ConfigKeySpec {
    /// Declares a key whose default depends on other settings.
    #[must_use]
    pub fn derived(key: &'static str, description: &'static str) -> Self {
        Self {
            key,
            description,
            default: None,
        }
    }

    /// Declares a key with a fixed default.
    #[must_use]
    pub fn with_default(key: &'static str, description: &'static str, default: &'static str) -> Self {
        Self {
            key,
            description,
            default: Some(default),
        }
    }
}

/// How the partitions of a stream are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One partition at a time, in key order.
    Sequential,
    /// Up to `max_concurrency` partitions at a time, in no particular order.
    #[default]
    Concurrent,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(format!(
                "unknown mode '{other}', expected 'sequential' or 'concurrent'"
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// Prefix shared by every extraction key.
pub const KEY_PREFIX: &str = "extract.";
/// Config key: scheduling mode.
pub const MODE: &str = "extract.mode";
/// Config key: worker pool size.
pub const MAX_CONCURRENCY: &str = "extract.max.concurrency";
/// Config key: total reservable memory.
pub const MEMORY_BYTES: &str = "extract.memory.bytes";
/// Config key: memory reserved per partition.
pub const PARTITION_MEMORY_BYTES: &str = "extract.partition.memory.bytes";
/// Config key: target number of sub-partitions per stream.
pub const SPLIT_COUNT: &str = "extract.split.count";
/// Config key: initial rows per chunked read.
pub const FETCH_SIZE_INITIAL: &str = "extract.fetch.size.initial";
/// Config key: maximum rows per chunked read.
pub const FETCH_SIZE_MAX: &str = "extract.fetch.size.max";

const DEFAULT_MAX_CONCURRENCY: usize = 10;
const DEFAULT_MEMORY_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_FETCH_SIZE_INITIAL: u64 = 1_000;
const DEFAULT_FETCH_SIZE_MAX: u64 = 100_000;

/// Typed extraction settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractConfig {
    /// Scheduling mode.
    pub mode: ExecutionMode,
    /// Worker pool size for the concurrent mode.
    pub max_concurrency: usize,
    /// Total capacity of the reservation manager, in bytes.
    pub memory_bytes: u64,
    /// Bytes reserved per partition. `None` reserves an equal share of
    /// `memory_bytes` per worker.
    pub partition_memory_bytes: Option<u64>,
    /// Target number of sub-partitions per stream.
    pub split_count: usize,
    /// Initial rows per chunked read.
    pub fetch_size_initial: u64,
    /// Maximum rows per chunked read.
    pub fetch_size_max: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Concurrent,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            memory_bytes: DEFAULT_MEMORY_BYTES,
            partition_memory_bytes: None,
            split_count: DEFAULT_MAX_CONCURRENCY,
            fetch_size_initial: DEFAULT_FETCH_SIZE_INITIAL,
            fetch_size_max: DEFAULT_FETCH_SIZE_MAX,
        }
    }
}

impl ExtractConfig {
    /// Parses and validates extraction settings.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` for an unknown
    /// `extract.` key, or a value that cannot be parsed or is out of range.
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, ConnectorError> {
        config.validate(KEY_PREFIX, &Self::config_keys())?;
        let mode = config
            .get_parsed::<ExecutionMode>(MODE)?
            .unwrap_or_default();
        let max_concurrency = config
            .get_parsed(MAX_CONCURRENCY)?
            .unwrap_or(DEFAULT_MAX_CONCURRENCY);
        let split_count = config.get_parsed(SPLIT_COUNT)?.unwrap_or(match mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Concurrent => max_concurrency,
        });

        let extract = Self {
            mode,
            max_concurrency,
            memory_bytes: config
                .get_parsed(MEMORY_BYTES)?
                .unwrap_or(DEFAULT_MEMORY_BYTES),
            partition_memory_bytes: config.get_parsed(PARTITION_MEMORY_BYTES)?,
            split_count,
            fetch_size_initial: config
                .get_parsed(FETCH_SIZE_INITIAL)?
                .unwrap_or(DEFAULT_FETCH_SIZE_INITIAL),
            fetch_size_max: config
                .get_parsed(FETCH_SIZE_MAX)?
                .unwrap_or(DEFAULT_FETCH_SIZE_MAX),
        };
        extract.validate()?;
        Ok(extract)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ConfigurationError` describing the first
    /// invalid setting.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        let invalid = |msg: String| Err(ConnectorError::ConfigurationError(msg));
        if self.max_concurrency == 0 {
            return invalid(format!("{MAX_CONCURRENCY} must be at least 1"));
        }
        if self.memory_bytes == 0 {
            return invalid(format!("{MEMORY_BYTES} must be positive"));
        }
        match self.partition_memory_bytes {
            Some(0) => return invalid(format!("{PARTITION_MEMORY_BYTES} must be positive")),
            Some(n) if n > self.memory_bytes => {
                return invalid(format!(
                    "{PARTITION_MEMORY_BYTES} ({n}) exceeds {MEMORY_BYTES} ({})",
                    self.memory_bytes
                ))
            }
            _ => {}
        }
        if self.split_count == 0 {
            return invalid(format!("{SPLIT_COUNT} must be at least 1"));
        }
        if self.fetch_size_initial == 0 || self.fetch_size_initial > self.fetch_size_max {
            return invalid(format!(
                "{FETCH_SIZE_INITIAL} must be between 1 and {FETCH_SIZE_MAX} ({})",
                self.fetch_size_max
            ));
        }
        Ok(())
    }

    /// Fraction of the memory budget reserved by each partition when no
    /// explicit per-partition amount is configured.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn partition_memory_ratio(&self) -> f64 {
        1.0 / self.max_concurrency.max(1) as f64
    }

    /// Returns the configuration keys this module understands.
    #[must_use]
    pub fn config_keys() -> Vec<ConfigKeySpec> {
        vec![
            ConfigKeySpec::with_default(MODE, "Partition scheduling: sequential or concurrent", "concurrent"),
            ConfigKeySpec::with_default(MAX_CONCURRENCY, "Partitions read at the same time", "10"),
            ConfigKeySpec::with_default(MEMORY_BYTES, "Total memory shared by partition readers", "268435456"),
            ConfigKeySpec::derived(
                PARTITION_MEMORY_BYTES,
                "Memory reserved per partition (default: equal share per worker)",
            ),
            ConfigKeySpec::derived(
                SPLIT_COUNT,
                "Target sub-partitions per stream (default: max concurrency, or 1 when sequential)",
            ),
            ConfigKeySpec::with_default(FETCH_SIZE_INITIAL, "Initial rows per chunked read", "1000"),
            ConfigKeySpec::with_default(FETCH_SIZE_MAX, "Maximum rows per chunked read", "100000"),
        ]
    }
}

/// Lifecycle state of a running feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Feed is extracting.
    Running,

    /// Feed finished successfully.
    Completed,

    /// Feed was stopped before finishing.
    Cancelled,

    /// Feed failed.
    Failed,
}

impl ConnectorState {
    /// Returns `true` once the feed can no longer change state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorState::Running => write!(f, "Running"),
            ConnectorState::Completed => write!(f, "Completed"),
            ConnectorState::Cancelled => write!(f, "Cancelled"),
            ConnectorState::Failed => write!(f, "Failed"),
        }
    }
}
