use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output of a single processor, a JSON object of findings.
pub type Annotation = serde_json::Map<String, serde_json::Value>;

/// Processor name -> annotation, kept in the order processors ran.
pub type Annotations = serde_json::Map<String, serde_json::Value>;

/// Severity of a log line.
///
/// `Unknown` is used whenever no level could be extracted; it sorts below
/// `Debug` so that a minimum-level filter never lets it through by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Unknown,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Unknown => "UNKNOWN",
        }
    }

    /// Map a level token as it appears in log lines to a `Level`.
    ///
    /// Returns `None` for anything that is not a recognised severity word,
    /// including the literal `UNKNOWN`.
    pub fn from_token(token: &str) -> Option<Level> {
        match token.trim().to_ascii_uppercase().as_str() {
            "TRACE" | "DEBUG" | "DBG" => Some(Level::Debug),
            "INFO" | "NOTICE" => Some(Level::Info),
            "WARN" | "WARNING" => Some(Level::Warn),
            "ERROR" | "ERR" | "CRITICAL" | "CRIT" | "FATAL" | "ALERT" | "EMERG" | "SEVERE" => {
                Some(Level::Error)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unknown") {
            return Ok(Level::Unknown);
        }
        Level::from_token(s).ok_or_else(|| ParseLevelError(s.to_string()))
    }
}

/// A parsed line that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub raw: String,
    pub level: Level,
    pub message: String,
    /// Byte offset of the line start in its source file.
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub annotations: Annotations,
}

/// A stored entry. Immutable once a backend hands it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub raw: String,
    pub level: Level,
    pub message: String,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Record {
    pub fn from_entry(id: u64, entry: LogEntry) -> Self {
        Self {
            id,
            timestamp: entry.timestamp,
            source: entry.source,
            raw: entry.raw,
            level: entry.level,
            message: entry.message,
            offset: entry.offset,
            annotations: entry.annotations,
        }
    }
}
