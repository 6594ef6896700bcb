use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default = "default_processors")]
    pub processors: Vec<ProcessorConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub web: Option<WebConfig>,
}

fn default_processors() -> Vec<ProcessorConfig> {
    vec![
        ProcessorConfig::builtin("severity"),
        ProcessorConfig::builtin("patterns"),
    ]
}

/// Polling behaviour shared by every watched file.
///
/// Watching is purely time-sliced: a line appended to a file is seen at the
/// earliest on the next poll, so `poll_interval` is also the minimum
/// detection latency. Lower it for fresher data at the cost of more `stat`
/// calls per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// How long a path may stay missing before its read position is forgotten.
    #[serde(with = "humantime_serde", default = "default_missing_grace")]
    pub missing_grace: Duration,
    /// Upper bound on bytes read from a single file in one poll.
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
    /// An unterminated line at least this long is emitted as-is.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Re-check a hash of the file head to catch same-size rewrites.
    #[serde(default = "default_true")]
    pub fingerprint: bool,
    #[serde(default)]
    pub skip_empty_lines: bool,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_missing_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_max_read_bytes() -> u64 {
    1024 * 1024
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            missing_grace: default_missing_grace(),
            max_read_bytes: default_max_read_bytes(),
            max_line_bytes: default_max_line_bytes(),
            fingerprint: true,
            skip_empty_lines: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    /// Glob applied inside `path` when it is a directory. Defaults to `*.log`.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(default)]
    pub start: ReadStart,
}

/// Where reading starts for a file that already exists when it is registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStart {
    #[default]
    Beginning,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub patterns: Vec<PatternConfig>,
    #[serde(default = "default_true")]
    pub include_defaults: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            include_defaults: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    pub name: String,
    pub regex: String,
    /// strptime format string, 'iso8601', 'epoch', or 'epoch_ms'
    #[serde(default)]
    pub timestamp_format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Annotation key; must be unique within the chain.
    pub name: String,
    /// Registry key. Falls back to `name`.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub options: serde_yaml::Value,
}

impl ProcessorConfig {
    pub fn builtin(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: None,
            options: serde_yaml::Value::Null,
        }
    }

    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory {
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        fsync: bool,
    },
}

fn default_capacity() -> usize {
    10_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory {
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ingestion halts after this many store failures in a row.
    #[serde(default = "default_max_consecutive_store_failures")]
    pub max_consecutive_store_failures: u32,
}

fn default_max_consecutive_store_failures() -> u32 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_consecutive_store_failures: default_max_consecutive_store_failures(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
}
