//! Processors that ship with the crate.

use super::{Processor, ProcessorError};
use crate::record::{Annotation, Level, LogEntry};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

const DEFAULT_PATTERNS: [(&str, &str); 7] = [
    ("error", r"error|exception|failed"),
    ("warning", r"warning|warn|caution"),
    ("performance", r"(\d+\.?\d*)\s*(ms|seconds?|minutes?)\b"),
    ("memory", r"(\d+\.?\d*)\s*(MB|GB|KB)\b"),
    ("ip_address", r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
    ("url", r"https?://[^\s]+"),
    ("stacktrace", r"traceback|stack trace|at line \d+"),
];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatternDetectorOptions {
    /// Extra name -> regex pairs, checked after the defaults.
    #[serde(default)]
    extra: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    include_defaults: bool,
}

fn default_true() -> bool {
    true
}

/// Tags messages with the names of well-known patterns they contain.
///
/// Produces `{"patterns": ["error", "url", ...]}` in pattern order, or no
/// annotation when nothing matched.
#[derive(Debug)]
pub struct PatternDetector {
    patterns: Vec<(String, Regex)>,
}

impl PatternDetector {
    pub fn new() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .filter_map(|(name, pattern)| match compile(pattern) {
                Ok(regex) => Some((name.to_string(), regex)),
                Err(e) => {
                    tracing::error!(pattern = %name, error = %e, "Built-in detector failed to compile");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn from_options(name: &str, options: &serde_yaml::Value) -> Result<Self, ProcessorError> {
        let options: PatternDetectorOptions = if options.is_null() {
            PatternDetectorOptions {
                include_defaults: true,
                ..Default::default()
            }
        } else {
            serde_yaml::from_value(options.clone()).map_err(|e| {
                ProcessorError::InvalidOptions {
                    name: name.to_string(),
                    reason: e.to_string(),
                }
            })?
        };

        let mut detector = if options.include_defaults {
            Self::new()
        } else {
            Self {
                patterns: Vec::new(),
            }
        };

        for (pattern_name, pattern) in options.extra {
            let regex = compile(&pattern).map_err(|source| ProcessorError::RegexCompilation {
                pattern: pattern.clone(),
                source,
            })?;
            detector.patterns.push((pattern_name, regex));
        }

        Ok(detector)
    }

    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

impl Processor for PatternDetector {
    fn process(&self, entry: &LogEntry) -> Result<Option<Annotation>, ProcessorError> {
        let matched: Vec<&str> = self
            .patterns
            .iter()
            .filter(|(_, regex)| regex.is_match(&entry.message))
            .map(|(name, _)| name.as_str())
            .collect();

        if matched.is_empty() {
            return Ok(None);
        }

        let mut annotation = Annotation::new();
        annotation.insert("patterns".to_string(), json!(matched));
        Ok(Some(annotation))
    }
}

/// Reports the severity word a line was written with.
///
/// Looks at the raw line, since parsing may have cut the level out of
/// `message`. The first hit of `[LEVEL]`, then a leading `LEVEL:`, then a bare
/// level word anywhere, is annotated as `{"level": "ERROR"}` (the token
/// upper-cased as written). Bracketed and prefixed tokens only count when they
/// name a level, so `[main]` is skipped. The record's own level is untouched.
#[derive(Debug)]
pub struct SeverityHint {
    bracketed: Regex,
    prefixed: Regex,
    bare: Regex,
}

impl SeverityHint {
    pub fn new() -> Result<Self, ProcessorError> {
        let build = |pattern: &str| {
            compile(pattern).map_err(|source| ProcessorError::RegexCompilation {
                pattern: pattern.to_string(),
                source,
            })
        };
        Ok(Self {
            bracketed: build(r"\[(\w+)\]")?,
            prefixed: build(r"^\s*(\w+):")?,
            bare: build(r"\b(TRACE|DEBUG|INFO|WARNING|WARN|ERROR|CRITICAL|FATAL)\b")?,
        })
    }

    fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        let is_level = |token: &&str| Level::from_token(token).is_some();

        self.bracketed
            .captures_iter(text)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
            .find(is_level)
            .or_else(|| {
                self.prefixed
                    .captures(text)
                    .and_then(|cap| cap.get(1).map(|m| m.as_str()))
                    .filter(is_level)
            })
            .or_else(|| self.bare.find(text).map(|m| m.as_str()))
    }
}

impl Processor for SeverityHint {
    fn process(&self, entry: &LogEntry) -> Result<Option<Annotation>, ProcessorError> {
        Ok(self.find(&entry.raw).map(|token| {
            let mut annotation = Annotation::new();
            annotation.insert("level".to_string(), json!(token.to_ascii_uppercase()));
            annotation
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Annotations;
    use chrono::Utc;

    fn entry(level: Level, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            source: "app.log".to_string(),
            raw: message.to_string(),
            level,
            message: message.to_string(),
            offset: None,
            annotations: Annotations::new(),
        }
    }

    #[test]
    fn test_pattern_detector_matches_in_order() {
        let detector = PatternDetector::new();
        let annotation = detector
            .process(&entry(
                Level::Error,
                "Request to https://api.example.com failed after 1500ms from 10.0.0.1",
            ))
            .unwrap()
            .unwrap();

        assert_eq!(
            annotation["patterns"],
            json!(["error", "performance", "ip_address", "url"])
        );
    }

    #[test]
    fn test_pattern_detector_no_match() {
        let detector = PatternDetector::new();
        assert!(detector
            .process(&entry(Level::Info, "user logged in"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_pattern_detector_extra_patterns() {
        let options: serde_yaml::Value = serde_yaml::from_str(
            r#"
include_defaults: false
extra:
  auth: "login|logout"
"#,
        )
        .unwrap();
        let detector = PatternDetector::from_options("patterns", &options).unwrap();
        assert_eq!(detector.pattern_names(), vec!["auth"]);

        let annotation = detector
            .process(&entry(Level::Info, "User LOGIN ok"))
            .unwrap()
            .unwrap();
        assert_eq!(annotation["patterns"], json!(["auth"]));
    }

    #[test]
    fn test_pattern_detector_rejects_bad_options() {
        let options: serde_yaml::Value = serde_yaml::from_str("extra: {bad: '('}").unwrap();
        assert!(matches!(
            PatternDetector::from_options("patterns", &options),
            Err(ProcessorError::RegexCompilation { .. })
        ));

        let options: serde_yaml::Value = serde_yaml::from_str("unknown_key: 1").unwrap();
        assert!(matches!(
            PatternDetector::from_options("patterns", &options),
            Err(ProcessorError::InvalidOptions { .. })
        ));
    }

    #[test]
    fn test_severity_hint_reads_raw_line() {
        let hint = SeverityHint::new().unwrap();

        let mut parsed = entry(Level::Error, "request failed");
        parsed.raw = "[ERROR] request failed".to_string();
        let annotation = hint.process(&parsed).unwrap().unwrap();
        assert_eq!(annotation["level"], json!("ERROR"));

        assert!(hint
            .process(&entry(Level::Info, "all good"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_severity_hint_search_order() {
        let hint = SeverityHint::new().unwrap();
        let level = |raw: &str| {
            hint.process(&entry(Level::Unknown, raw))
                .unwrap()
                .map(|a| a["level"].clone())
        };

        assert_eq!(level("[main] [warning] retrying ERROR"), Some(json!("WARNING")));
        assert_eq!(level("debug: cache miss, error ignored"), Some(json!("DEBUG")));
        assert_eq!(level("[main] note: Critical section"), Some(json!("CRITICAL")));
        assert_eq!(level("informative errors only"), None);
    }
}
