use crate::record::{Level, LogEntry, Record};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Append-only record store.
///
/// A single writer calls `store`; any number of readers may call `query`
/// and `count` concurrently. Readers never see a record before `store` has
/// returned it.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Assign the next id to `entry` and append it.
    async fn store(&self, entry: LogEntry) -> Result<Record, StorageError>;

    /// Matching records in ascending id order.
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>, StorageError>;

    /// Number of records currently held.
    async fn count(&self) -> Result<usize, StorageError>;

    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Memory storage capacity must be at least 1")]
    InvalidCapacity,

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

/// Query filter. Every set field must match; the default matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Inclusive lower bound on `timestamp`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `timestamp`.
    pub until: Option<DateTime<Utc>>,
    pub level: Option<Level>,
    pub min_level: Option<Level>,
    pub source: Option<String>,
    /// Case-insensitive substring of `message`.
    pub contains: Option<String>,
    /// Name of a processor whose annotation must be present.
    pub annotation: Option<String>,
    /// Only records with a larger id.
    pub after_id: Option<u64>,
    /// Keep the newest `limit` matches.
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_level(level: Level) -> Self {
        Self {
            level: Some(level),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.timestamp >= until {
                return false;
            }
        }
        if let Some(level) = self.level {
            if record.level != level {
                return false;
            }
        }
        if let Some(min_level) = self.min_level {
            if record.level < min_level {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if record.source != *source {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            if !record
                .message
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(name) = &self.annotation {
            if !record.annotations.contains_key(name) {
                return false;
            }
        }
        if let Some(after_id) = self.after_id {
            if record.id <= after_id {
                return false;
            }
        }
        true
    }

    /// Filter records that are already in id order.
    pub fn select<'a, I>(&self, records: I) -> Vec<Record>
    where
        I: DoubleEndedIterator<Item = &'a Record>,
    {
        match self.limit {
            Some(limit) => {
                let mut newest: Vec<Record> = records
                    .rev()
                    .filter(|r| self.matches(r))
                    .take(limit)
                    .cloned()
                    .collect();
                newest.reverse();
                newest
            }
            None => records.filter(|r| self.matches(r)).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Annotations;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(id: u64, level: Level, message: &str, hour: u32) -> Record {
        Record {
            id,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap(),
            source: if id % 2 == 0 { "b.log" } else { "a.log" }.to_string(),
            raw: message.to_string(),
            level,
            message: message.to_string(),
            offset: None,
            annotations: Annotations::new(),
        }
    }

    fn sample() -> Vec<Record> {
        vec![
            record(1, Level::Info, "service started", 1),
            record(2, Level::Warn, "Disk almost FULL", 2),
            record(3, Level::Error, "disk full", 3),
            record(4, Level::Unknown, "garbage", 4),
            record(5, Level::Debug, "cache warm", 5),
        ]
    }

    fn ids(records: &[Record]) -> Vec<u64> {
        records.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_empty_filter_returns_all() {
        let records = sample();
        assert_eq!(ids(&RecordFilter::all().select(records.iter())), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_level_and_min_level() {
        let records = sample();
        assert_eq!(
            ids(&RecordFilter::with_level(Level::Error).select(records.iter())),
            vec![3]
        );

        let filter = RecordFilter {
            min_level: Some(Level::Warn),
            ..Default::default()
        };
        assert_eq!(ids(&filter.select(records.iter())), vec![2, 3]);
    }

    #[test]
    fn test_time_range_half_open() {
        let records = sample();
        let filter = RecordFilter {
            since: Some(Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2025, 1, 1, 4, 0, 0).unwrap()),
            ..Default::default()
        };
        assert_eq!(ids(&filter.select(records.iter())), vec![2, 3]);
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let records = sample();
        let filter = RecordFilter {
            contains: Some("disk full".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter.select(records.iter())), vec![3]);

        let filter = RecordFilter {
            contains: Some("DISK".to_string()),
            source: Some("b.log".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter.select(records.iter())), vec![2]);
    }

    #[test]
    fn test_annotation_and_after_id() {
        let mut records = sample();
        records[2]
            .annotations
            .insert("patterns".to_string(), json!({"patterns": ["error"]}));

        let filter = RecordFilter {
            annotation: Some("patterns".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&filter.select(records.iter())), vec![3]);

        let filter = RecordFilter {
            after_id: Some(3),
            ..Default::default()
        };
        assert_eq!(ids(&filter.select(records.iter())), vec![4, 5]);
    }

    #[test]
    fn test_limit_keeps_newest_in_ascending_order() {
        let records = sample();
        let filter = RecordFilter {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(ids(&filter.select(records.iter())), vec![4, 5]);

        let filter = RecordFilter {
            limit: Some(0),
            ..Default::default()
        };
        assert!(filter.select(records.iter()).is_empty());
    }
}
