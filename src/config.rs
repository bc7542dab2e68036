//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! Durations are written as strings with a unit suffix (`"500ms"`, `"30s"`,
//! `"15m"`, `"2h"`, `"7d"`) and parsed into [`TimeValue`].

use crate::storage::TimeResolution;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MILLIS_PER_SECOND: u64 = 1_000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: u64 = 24 * MILLIS_PER_HOUR;

/// A duration with millisecond precision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeValue(u64);

impl TimeValue {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * MILLIS_PER_SECOND)
    }

    pub const fn from_minutes(minutes: u64) -> Self {
        Self(minutes * MILLIS_PER_MINUTE)
    }

    pub const fn from_hours(hours: u64) -> Self {
        Self(hours * MILLIS_PER_HOUR)
    }

    pub const fn from_days(days: u64) -> Self {
        Self(days * MILLIS_PER_DAY)
    }

    pub const fn millis(&self) -> u64 {
        self.0
    }

    /// Whole hours, truncated
    pub const fn hours(&self) -> u64 {
        self.0 / MILLIS_PER_HOUR
    }
}

impl FromStr for TimeValue {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = regex::Regex::new(r"^(\d+)\s*(ms|s|m|h|d)$")
            .map_err(|e| ConfigError::InvalidDuration(e.to_string()))?;

        let trimmed = s.trim();
        let caps = re
            .captures(trimmed)
            .ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))?;

        let amount: u64 = caps[1]
            .parse()
            .map_err(|_| ConfigError::InvalidDuration(s.to_string()))?;

        let unit = match &caps[2] {
            "ms" => 1,
            "s" => MILLIS_PER_SECOND,
            "m" => MILLIS_PER_MINUTE,
            "h" => MILLIS_PER_HOUR,
            _ => MILLIS_PER_DAY,
        };

        amount
            .checked_mul(unit)
            .map(TimeValue)
            .ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))
    }
}

impl TryFrom<String> for TimeValue {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeValue> for String {
    fn from(value: TimeValue) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for TimeValue {
    /// Largest unit that represents the value exactly
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = self.0;
        if ms != 0 && ms % MILLIS_PER_DAY == 0 {
            write!(f, "{}d", ms / MILLIS_PER_DAY)
        } else if ms != 0 && ms % MILLIS_PER_HOUR == 0 {
            write!(f, "{}h", ms / MILLIS_PER_HOUR)
        } else if ms != 0 && ms % MILLIS_PER_MINUTE == 0 {
            write!(f, "{}m", ms / MILLIS_PER_MINUTE)
        } else if ms != 0 && ms % MILLIS_PER_SECOND == 0 {
            write!(f, "{}s", ms / MILLIS_PER_SECOND)
        } else {
            write!(f, "{}ms", ms)
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub translog: TranslogConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tsdb").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tsdb_data".to_string())
}

/// Compaction configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Strategy name: SizeTieredCompaction, ForceMergeCompaction or Noop
    #[serde(rename = "type", default = "default_compaction_type")]
    pub compaction_type: String,

    #[serde(default = "default_compaction_frequency")]
    pub frequency: TimeValue,

    /// Unset means data is kept forever
    #[serde(default)]
    pub retention_time: Option<TimeValue>,

    #[serde(default = "default_min_segment_count")]
    pub force_merge_min_segment_count: usize,

    #[serde(default = "default_max_segments_after_merge")]
    pub force_merge_max_segments_after_merge: usize,

    #[serde(default = "default_ooo_cutoff")]
    pub ooo_cutoff: TimeValue,

    #[serde(default = "default_block_duration")]
    pub block_duration: TimeValue,

    #[serde(default)]
    pub time_unit: TimeResolution,
}

fn default_compaction_type() -> String {
    "SizeTieredCompaction".to_string()
}

fn default_compaction_frequency() -> TimeValue {
    TimeValue::from_minutes(15)
}

fn default_min_segment_count() -> usize {
    2
}

fn default_max_segments_after_merge() -> usize {
    1
}

fn default_ooo_cutoff() -> TimeValue {
    TimeValue::from_minutes(20)
}

fn default_block_duration() -> TimeValue {
    TimeValue::from_hours(2)
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            compaction_type: default_compaction_type(),
            frequency: default_compaction_frequency(),
            retention_time: None,
            force_merge_min_segment_count: default_min_segment_count(),
            force_merge_max_segments_after_merge: default_max_segments_after_merge(),
            ooo_cutoff: default_ooo_cutoff(),
            block_duration: default_block_duration(),
            time_unit: TimeResolution::default(),
        }
    }
}

/// Write-ahead log retention configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslogConfig {
    /// Bytes of log to keep; `None` disables size-based retention
    #[serde(
        default = "default_retention_size",
        deserialize_with = "deserialize_retention_size",
        serialize_with = "serialize_retention_size"
    )]
    pub retention_size: Option<u64>,

    /// Age of log to keep; `None` disables age-based retention
    #[serde(
        default = "default_retention_age",
        deserialize_with = "deserialize_retention_age",
        serialize_with = "serialize_retention_age"
    )]
    pub retention_age: Option<TimeValue>,

    #[serde(default = "default_retention_total_files")]
    pub retention_total_files: usize,

    /// Share of eligible generations that may be trimmed per cycle (0-100)
    #[serde(default = "default_max_readers_to_close_percentage")]
    pub max_readers_to_close_percentage: u8,
}

fn default_retention_size() -> Option<u64> {
    Some(512 * 1024 * 1024)
}

fn default_retention_age() -> Option<TimeValue> {
    Some(TimeValue::from_hours(12))
}

/// Written in place of a retention bound to disable it
const UNBOUNDED: &str = "unbounded";
const UNBOUNDED_NUMBER: i64 = -1;

/// A retention bound as written in a config file
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBound {
    Number(i64),
    Text(String),
}

fn deserialize_retention_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    match RawBound::deserialize(deserializer)? {
        RawBound::Number(UNBOUNDED_NUMBER) => Ok(None),
        RawBound::Number(bytes) => u64::try_from(bytes).map(Some).map_err(|_| {
            D::Error::custom(format!("invalid retention_size {}, expected bytes or -1", bytes))
        }),
        RawBound::Text(text) if text.trim().eq_ignore_ascii_case(UNBOUNDED) => Ok(None),
        RawBound::Text(text) => text.trim().parse().map(Some).map_err(|_| {
            D::Error::custom(format!("invalid retention_size '{}', expected bytes or \"{}\"", text, UNBOUNDED))
        }),
    }
}

fn deserialize_retention_age<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<TimeValue>, D::Error> {
    match RawBound::deserialize(deserializer)? {
        RawBound::Number(UNBOUNDED_NUMBER) => Ok(None),
        RawBound::Number(number) => Err(D::Error::custom(format!(
            "invalid retention_age {}, expected a duration string or -1",
            number
        ))),
        RawBound::Text(text) if text.trim().eq_ignore_ascii_case(UNBOUNDED) => Ok(None),
        RawBound::Text(text) => text.parse().map(Some).map_err(D::Error::custom),
    }
}

fn serialize_retention_size<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(bytes) => serializer.serialize_u64(*bytes),
        None => serializer.serialize_i64(UNBOUNDED_NUMBER),
    }
}

fn serialize_retention_age<S: Serializer>(value: &Option<TimeValue>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(age) => serializer.serialize_str(&age.to_string()),
        None => serializer.serialize_str(UNBOUNDED),
    }
}

fn default_retention_total_files() -> usize {
    64
}

fn default_max_readers_to_close_percentage() -> u8 {
    100
}

impl Default for TranslogConfig {
    fn default() -> Self {
        Self {
            retention_size: default_retention_size(),
            retention_age: default_retention_age(),
            retention_total_files: default_retention_total_files(),
            max_readers_to_close_percentage: default_max_readers_to_close_percentage(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tsdb").join("config.toml")),
            Some(PathBuf::from("/etc/tsdb/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    ///
    /// Values that fail to parse are ignored with a warning.
    fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = std::env::var("TSDB_DATA_DIR") {
            self.data_dir = data_dir;
        }

        // Compaction overrides
        if let Ok(compaction_type) = std::env::var("TSDB_COMPACTION_TYPE") {
            self.compaction.compaction_type = compaction_type;
        }
        if let Some(frequency) = env_parsed::<TimeValue>("TSDB_COMPACTION_FREQUENCY") {
            self.compaction.frequency = frequency;
        }
        if let Ok(retention) = std::env::var("TSDB_RETENTION_TIME") {
            if retention.eq_ignore_ascii_case("unbounded") {
                self.compaction.retention_time = None;
            } else if let Ok(value) = retention.parse() {
                self.compaction.retention_time = Some(value);
            } else {
                tracing::warn!("Ignoring invalid TSDB_RETENTION_TIME: {}", retention);
            }
        }

        // Translog overrides
        if let Some(percentage) = env_parsed::<u8>("TSDB_TRANSLOG_RATE_LIMIT_PERCENTAGE") {
            self.translog.max_readers_to_close_percentage = percentage;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("TSDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TSDB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Check the values the settings layer would reject
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compaction.frequency.millis() < MILLIS_PER_MINUTE {
            return Err(ConfigError::Invalid(format!(
                "compaction.frequency must be at least 1m, got {}",
                self.compaction.frequency
            )));
        }
        if self.translog.max_readers_to_close_percentage > 100 {
            return Err(ConfigError::Invalid(format!(
                "translog.max_readers_to_close_percentage must be 0-100, got {}",
                self.translog.max_readers_to_close_percentage
            )));
        }
        Ok(())
    }
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}: {}", key, raw);
            None
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            compaction: CompactionConfig::default(),
            translog: TranslogConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid duration '{0}', expected a number followed by ms, s, m, h or d")]
    InvalidDuration(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# tsdb Configuration
#
# Environment variables override these settings:
# - TSDB_DATA_DIR
# - TSDB_COMPACTION_TYPE
# - TSDB_COMPACTION_FREQUENCY
# - TSDB_RETENTION_TIME ("unbounded" clears it)
# - TSDB_TRANSLOG_RATE_LIMIT_PERCENTAGE
# - TSDB_LOG_LEVEL
# - TSDB_LOG_FORMAT

# Directory holding closed chunk indexes
data_dir = "~/.local/share/tsdb"

[compaction]
# Strategy: SizeTieredCompaction, ForceMergeCompaction or Noop
type = "SizeTieredCompaction"

# How often compaction runs (minimum 1m)
frequency = "15m"

# Data retention; tiers are derived from it. Leave unset for unbounded.
# retention_time = "30d"

# Force merge once an index has this many segments
force_merge_min_segment_count = 2

# Segments left after a force merge (must not exceed the count above)
force_merge_max_segments_after_merge = 1

# Trailing window still accepting out-of-order samples
ooo_cutoff = "20m"

# Width of one time-aligned block
block_duration = "2h"

# Unit of index timestamps: seconds, milliseconds, microseconds, nanoseconds
time_unit = "milliseconds"

[translog]
# Bytes of write-ahead log to retain; -1 or "unbounded" disables size retention
retention_size = 536870912

# Age of write-ahead log to retain; -1 or "unbounded" disables age retention
retention_age = "12h"

# Number of log files to retain, including the active one
retention_total_files = 64

# Percent of trimmable generations released per cycle (0-100)
max_readers_to_close_percentage = 100

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_value_parse() {
        assert_eq!("500ms".parse::<TimeValue>().unwrap().millis(), 500);
        assert_eq!("30s".parse::<TimeValue>().unwrap(), TimeValue::from_secs(30));
        assert_eq!("15m".parse::<TimeValue>().unwrap(), TimeValue::from_minutes(15));
        assert_eq!(" 2 h ".parse::<TimeValue>().unwrap(), TimeValue::from_hours(2));
        assert_eq!("7d".parse::<TimeValue>().unwrap().hours(), 168);

        for bad in ["", "10", "1.5h", "-3m", "10w", "h"] {
            assert!(matches!(
                bad.parse::<TimeValue>(),
                Err(ConfigError::InvalidDuration(_))
            ));
        }
    }

    #[test]
    fn test_time_value_display() {
        assert_eq!(TimeValue::from_days(7).to_string(), "7d");
        assert_eq!(TimeValue::from_hours(12).to_string(), "12h");
        assert_eq!(TimeValue::from_minutes(90).to_string(), "90m");
        assert_eq!(TimeValue::from_millis(1500).to_string(), "1500ms");
        assert_eq!(TimeValue::from_millis(0).to_string(), "0ms");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.compaction.compaction_type, "SizeTieredCompaction");
        assert_eq!(config.compaction.frequency, TimeValue::from_minutes(15));
        assert_eq!(config.compaction.retention_time, None);
        assert_eq!(config.compaction.time_unit, TimeResolution::Milliseconds);
        assert_eq!(config.translog.retention_size, Some(512 * 1024 * 1024));
        assert_eq!(config.translog.max_readers_to_close_percentage, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.compaction, defaults.compaction);
        assert_eq!(config.translog, defaults.translog);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/tmp/tsdb"

[compaction]
type = "ForceMergeCompaction"
retention_time = "30d"
time_unit = "seconds"

[translog]
max_readers_to_close_percentage = 25
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.data_dir, "/tmp/tsdb");
        assert_eq!(config.compaction.compaction_type, "ForceMergeCompaction");
        assert_eq!(config.compaction.retention_time.map(|t| t.hours()), Some(720));
        assert_eq!(config.compaction.time_unit, TimeResolution::Seconds);
        assert_eq!(config.compaction.frequency, TimeValue::from_minutes(15));
        assert_eq!(config.translog.max_readers_to_close_percentage, 25);
        assert_eq!(config.translog.retention_total_files, 64);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::load(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[compaction]\nfrequency = \"soon\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.compaction.frequency = TimeValue::from_secs(30);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.translog.max_readers_to_close_percentage = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_translog_retention_can_be_disabled() {
        let parse = |body: &str| toml::from_str::<Config>(&format!("[translog]\n{}", body));

        let config = parse("retention_size = -1\nretention_age = \"unbounded\"\n").unwrap();
        assert_eq!(config.translog.retention_size, None);
        assert_eq!(config.translog.retention_age, None);

        let config = parse("retention_size = \"Unbounded\"\nretention_age = -1\n").unwrap();
        assert_eq!(config.translog.retention_size, None);
        assert_eq!(config.translog.retention_age, None);

        let config = parse("retention_size = 1024\nretention_age = \"30m\"\n").unwrap();
        assert_eq!(config.translog.retention_size, Some(1024));
        assert_eq!(config.translog.retention_age, Some(TimeValue::from_minutes(30)));

        let config = parse("retention_total_files = 8\n").unwrap();
        assert_eq!(config.translog.retention_size, Some(512 * 1024 * 1024));
        assert_eq!(config.translog.retention_age, Some(TimeValue::from_hours(12)));

        for bad in [
            "retention_size = -2\n",
            "retention_size = \"lots\"\n",
            "retention_age = 3600\n",
            "retention_age = \"forever\"\n",
        ] {
            assert!(parse(bad).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_disabled_retention_survives_round_trip() {
        let mut translog = TranslogConfig::default();
        translog.retention_size = None;
        translog.retention_age = None;

        let written = toml::to_string(&translog).unwrap();
        assert!(written.contains("retention_size = -1"));
        assert!(written.contains("retention_age = \"unbounded\""));

        let read: TranslogConfig = toml::from_str(&written).unwrap();
        assert_eq!(read, translog);

        let defaults: TranslogConfig = toml::from_str(&toml::to_string(&TranslogConfig::default()).unwrap()).unwrap();
        assert_eq!(defaults, TranslogConfig::default());
    }
}
