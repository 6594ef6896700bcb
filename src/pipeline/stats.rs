use crate::record::{Level, Record};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Running ingestion counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestStats {
    /// Records successfully stored.
    pub total: u64,
    pub by_level: BTreeMap<Level, u64>,
    /// Stored records carrying each processor's annotation.
    pub by_annotation: BTreeMap<String, u64>,
    /// Records lost to storage failures.
    pub dropped: u64,
    pub processor_failures: BTreeMap<String, u64>,
    pub started_at: DateTime<Utc>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            total: 0,
            by_level: BTreeMap::new(),
            by_annotation: BTreeMap::new(),
            dropped: 0,
            processor_failures: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }

    pub(crate) fn record_stored(&mut self, record: &Record) {
        self.total += 1;
        *self.by_level.entry(record.level).or_default() += 1;
        for name in record.annotations.keys() {
            *self.by_annotation.entry(name.clone()).or_default() += 1;
        }
    }

    pub(crate) fn record_failures(&mut self, failures: &[String]) {
        for name in failures {
            *self.processor_failures.entry(name.clone()).or_default() += 1;
        }
    }

    pub(crate) fn record_dropped(&mut self) {
        self.dropped += 1;
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}
