//! Line parser: raw text in, `LogEntry` out.
//!
//! Patterns are tried in order and the first one that matches wins. A line
//! that no pattern understands still becomes an entry, with level `UNKNOWN`
//! and the raw text as its message.

use crate::config::types::PatternConfig;
use crate::record::{Annotations, Level, LogEntry};
use crate::source::timestamp::{parse_auto, TimestampFormat};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::Path;
use thiserror::Error;

const LEVEL_WORDS: &str =
    r"(?i:TRACE|DEBUG|DBG|INFO|NOTICE|WARN|WARNING|ERROR|ERR|CRITICAL|CRIT|FATAL|ALERT|EMERG|SEVERE)";

const KNOWN_GROUPS: [&str; 3] = ["ts", "level", "msg"];

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("pattern '{name}': invalid regex: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("pattern '{name}': must contain at least one of the named groups 'ts', 'level', 'msg'")]
    NoKnownGroups { name: String },

    #[error("pattern '{name}': unsupported named group '{group}'")]
    UnknownGroup { name: String, group: String },

    #[error("pattern '{name}': timestamp format given but regex has no 'ts' group")]
    FormatWithoutTs { name: String },
}

/// One structured-extraction rule.
#[derive(Debug, Clone)]
pub struct LinePattern {
    name: String,
    regex: Regex,
    timestamp_format: Option<TimestampFormat>,
}

impl LinePattern {
    pub fn new(
        name: impl Into<String>,
        regex: &str,
        timestamp_format: Option<&str>,
    ) -> Result<Self, ParserError> {
        let name = name.into();
        let regex = Regex::new(regex).map_err(|source| ParserError::InvalidRegex {
            name: name.clone(),
            source,
        })?;

        let groups: Vec<&str> = regex.capture_names().flatten().collect();
        if let Some(group) = groups.iter().find(|g| !KNOWN_GROUPS.contains(*g)) {
            return Err(ParserError::UnknownGroup {
                name,
                group: group.to_string(),
            });
        }
        if groups.is_empty() {
            return Err(ParserError::NoKnownGroups { name });
        }
        if timestamp_format.is_some() && !groups.contains(&"ts") {
            return Err(ParserError::FormatWithoutTs { name });
        }

        Ok(Self {
            timestamp_format: timestamp_format.map(TimestampFormat::from_name),
            name,
            regex,
        })
    }

    pub fn from_config(config: &PatternConfig) -> Result<Self, ParserError> {
        Self::new(
            config.name.clone(),
            &config.regex,
            config.timestamp_format.as_deref(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, raw: &str, observed_at: DateTime<Utc>) -> Option<Extracted> {
        let captures = self.regex.captures(raw)?;

        let level = match captures.name("level") {
            Some(token) => Level::from_token(token.as_str())?,
            None => Level::Unknown,
        };

        let timestamp = captures
            .name("ts")
            .and_then(|ts| {
                let parsed = match &self.timestamp_format {
                    Some(format) => format.parse(ts.as_str()),
                    None => parse_auto(ts.as_str()),
                };
                parsed.ok()
            })
            .unwrap_or(observed_at);

        let message = captures
            .name("msg")
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| raw.to_string());

        Some(Extracted {
            timestamp,
            level,
            message,
        })
    }
}

struct Extracted {
    timestamp: DateTime<Utc>,
    level: Level,
    message: String,
}

/// Built-in patterns, most specific first.
pub fn default_patterns() -> Vec<LinePattern> {
    let specs = [
        (
            "iso8601",
            format!(
                r"^(?P<ts>\d{{4}}-\d{{2}}-\d{{2}}[T ]\d{{2}}:\d{{2}}:\d{{2}}(?:[.,]\d+)?(?:Z|[+-]\d{{2}}:?\d{{2}})?)\s+\[?(?P<level>{LEVEL_WORDS})\b\]?:?\s*(?P<msg>.*)$"
            ),
        ),
        (
            "bracketed",
            format!(r"^\[(?P<level>{LEVEL_WORDS})\]\s*(?P<msg>.*)$"),
        ),
        (
            "token_level",
            format!(r"^(?P<ts>\d[\d:./T+\-,Z]*)\s+\[?(?P<level>{LEVEL_WORDS})\]?:?\s+(?P<msg>.*)$"),
        ),
        (
            "level_colon",
            format!(r"^(?P<level>{LEVEL_WORDS}):\s*(?P<msg>.*)$"),
        ),
    ];

    specs
        .iter()
        .filter_map(|(name, regex)| match LinePattern::new(*name, regex, None) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::error!(pattern = %name, error = %e, "Built-in pattern failed to compile");
                None
            }
        })
        .collect()
}

/// Converts raw lines into entries using an ordered list of patterns.
#[derive(Debug, Clone)]
pub struct LineParser {
    patterns: Vec<LinePattern>,
}

impl LineParser {
    pub fn new(patterns: Vec<LinePattern>) -> Self {
        Self { patterns }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_patterns())
    }

    /// Build a parser from configured patterns, tried before the built-ins
    /// when `include_defaults` is set.
    pub fn from_config(
        configs: &[PatternConfig],
        include_defaults: bool,
    ) -> Result<Self, ParserError> {
        let mut patterns = configs
            .iter()
            .map(LinePattern::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        if include_defaults {
            patterns.extend(default_patterns());
        }

        Ok(Self::new(patterns))
    }

    pub fn patterns(&self) -> &[LinePattern] {
        &self.patterns
    }

    /// Parse a line observed now.
    pub fn parse(&self, path: &Path, raw: &str) -> LogEntry {
        self.parse_at(path, raw, Utc::now())
    }

    /// Parse a line with an explicit observation time. Never fails.
    pub fn parse_at(&self, path: &Path, raw: &str, observed_at: DateTime<Utc>) -> LogEntry {
        let extracted = self
            .patterns
            .iter()
            .find_map(|pattern| pattern.extract(raw, observed_at));

        let (timestamp, level, message) = match extracted {
            Some(e) => (e.timestamp, e.level, e.message),
            None => (observed_at, Level::Unknown, raw.to_string()),
        };

        LogEntry {
            timestamp,
            source: path.display().to_string(),
            raw: raw.to_string(),
            level,
            message,
            offset: None,
            annotations: Annotations::new(),
        }
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_default_patterns_all_compile() {
        assert_eq!(default_patterns().len(), 4);
    }

    #[test]
    fn test_token_level_line() {
        let parser = LineParser::with_defaults();
        let entry = parser.parse_at(Path::new("a.log"), "2024 INFO hello", observed());

        assert_eq!(entry.level, Level::Info);
        assert_eq!(entry.message, "hello");
        assert_eq!(entry.raw, "2024 INFO hello");
        assert_eq!(entry.source, "a.log");
        // A bare year is not a usable timestamp
        assert_eq!(entry.timestamp, observed());
    }

    #[test]
    fn test_garbage_is_unknown() {
        let parser = LineParser::with_defaults();
        let entry = parser.parse_at(Path::new("a.log"), "garbage", observed());

        assert_eq!(entry.level, Level::Unknown);
        assert_eq!(entry.message, "garbage");
        assert_eq!(entry.timestamp, observed());
    }

    #[test]
    fn test_iso_timestamp_extracted() {
        let parser = LineParser::with_defaults();
        let entry = parser.parse_at(
            Path::new("app.log"),
            "2025-12-04T10:00:00Z [WARNING] disk almost full",
            observed(),
        );

        assert_eq!(entry.level, Level::Warn);
        assert_eq!(entry.message, "disk almost full");
        assert_eq!(entry.timestamp.to_rfc3339(), "2025-12-04T10:00:00+00:00");
    }

    #[test]
    fn test_python_style_timestamp() {
        let parser = LineParser::with_defaults();
        let entry = parser.parse_at(
            Path::new("app.log"),
            "2025-12-04 10:00:00,123 ERROR connection refused",
            observed(),
        );

        assert_eq!(entry.level, Level::Error);
        assert_eq!(entry.message, "connection refused");
        assert_eq!(
            entry.timestamp.to_rfc3339(),
            "2025-12-04T10:00:00.123+00:00"
        );
    }

    #[test]
    fn test_bracketed_and_colon_levels() {
        let parser = LineParser::with_defaults();

        let bracketed = parser.parse_at(Path::new("x"), "[debug] cache warm", observed());
        assert_eq!(bracketed.level, Level::Debug);
        assert_eq!(bracketed.message, "cache warm");

        let colon = parser.parse_at(Path::new("x"), "FATAL: out of memory", observed());
        assert_eq!(colon.level, Level::Error);
        assert_eq!(colon.message, "out of memory");
    }

    #[test]
    fn test_non_level_second_token_is_unknown() {
        let parser = LineParser::with_defaults();
        let entry = parser.parse_at(Path::new("x"), "user logged in", observed());

        assert_eq!(entry.level, Level::Unknown);
        assert_eq!(entry.message, "user logged in");
    }

    #[test]
    fn test_prose_with_level_word_is_unknown() {
        let parser = LineParser::with_defaults();

        for raw in ["Connection error detected on eth0", "disk warning threshold reached"] {
            let entry = parser.parse_at(Path::new("x"), raw, observed());
            assert_eq!(entry.level, Level::Unknown, "{raw}");
            assert_eq!(entry.message, raw);
        }

        let entry = parser.parse_at(Path::new("x"), "12:00:01 WARN slow query", observed());
        assert_eq!(entry.level, Level::Warn);
        assert_eq!(entry.message, "slow query");
    }

    #[test]
    fn test_invalid_utf8_replacement_survives() {
        let parser = LineParser::with_defaults();
        let raw = String::from_utf8_lossy(b"\xff\xfe binary \x00 junk").into_owned();
        let entry = parser.parse_at(Path::new("bin.log"), &raw, observed());

        assert_eq!(entry.level, Level::Unknown);
        assert_eq!(entry.raw, raw);
    }

    #[test]
    fn test_custom_pattern_takes_precedence() {
        let custom = PatternConfig {
            name: "nginx".to_string(),
            regex: r"^\[(?P<ts>[^\]]+)\] (?P<msg>.*)$".to_string(),
            timestamp_format: Some("%d/%b/%Y:%H:%M:%S %z".to_string()),
        };
        let parser = LineParser::from_config(&[custom], true).unwrap();
        assert_eq!(parser.patterns().len(), 5);
        assert_eq!(parser.patterns()[0].name(), "nginx");

        let entry = parser.parse_at(
            Path::new("access.log"),
            "[04/Dec/2025:02:42:11 +0000] GET /index.html",
            observed(),
        );
        assert_eq!(entry.level, Level::Unknown);
        assert_eq!(entry.message, "GET /index.html");
        assert_eq!(entry.timestamp.to_rfc3339(), "2025-12-04T02:42:11+00:00");
    }

    #[test]
    fn test_pattern_validation() {
        assert!(matches!(
            LinePattern::new("bad", r"(?P<ts>[", None),
            Err(ParserError::InvalidRegex { .. })
        ));
        assert!(matches!(
            LinePattern::new("none", r"^\d+", None),
            Err(ParserError::NoKnownGroups { .. })
        ));
        assert!(matches!(
            LinePattern::new("odd", r"^(?P<host>\S+)", None),
            Err(ParserError::UnknownGroup { .. })
        ));
        assert!(matches!(
            LinePattern::new("fmt", r"^(?P<msg>.*)", Some("epoch")),
            Err(ParserError::FormatWithoutTs { .. })
        ));
    }
}
