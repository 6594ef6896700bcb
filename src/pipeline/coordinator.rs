//! Single-writer ingestion loop.
//!
//! The coordinator owns the watcher, parser, processor chain and storage.
//! Each cycle polls the watcher and pushes every line through
//! parse -> annotate -> store, in the order the watcher emitted them.
//! Readers go through a `QueryHandle` and never block ingestion for longer
//! than a single append.

use super::stats::IngestStats;
use crate::processor::ProcessorChain;
use crate::record::{Level, LogEntry, Record};
use crate::source::{FileWatcher, LineParser};
use crate::storage::{RecordFilter, Storage, StorageError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Source name used for entries ingested through `Coordinator::log`.
pub const DIRECT_SOURCE: &str = "direct";

const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// `tokio::time::interval` rejects a zero period.
const MIN_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("ingestion halted after {failures} consecutive storage failures")]
    StorageHalted { failures: u32 },
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub lines: usize,
    pub stored: usize,
    pub dropped: usize,
}

/// Read side of the pipeline. Cheap to clone.
#[derive(Clone)]
pub struct QueryHandle {
    storage: Arc<dyn Storage>,
    stats: Arc<RwLock<IngestStats>>,
}

impl QueryHandle {
    pub async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>, StorageError> {
        self.storage.query(filter).await
    }

    pub async fn count(&self) -> Result<usize, StorageError> {
        self.storage.count().await
    }

    pub async fn stats(&self) -> IngestStats {
        self.stats.read().await.clone()
    }

    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }
}

pub struct Coordinator {
    watcher: FileWatcher,
    parser: LineParser,
    chain: ProcessorChain,
    storage: Arc<dyn Storage>,
    stats: Arc<RwLock<IngestStats>>,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
}

impl Coordinator {
    pub fn new(
        watcher: FileWatcher,
        parser: LineParser,
        chain: ProcessorChain,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            watcher,
            parser,
            chain,
            storage,
            stats: Arc::new(RwLock::new(IngestStats::new())),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            consecutive_failures: 0,
        }
    }

    /// Halt after `max` store failures in a row. Zero is treated as one.
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    pub fn handle(&self) -> QueryHandle {
        QueryHandle {
            storage: self.storage.clone(),
            stats: self.stats.clone(),
        }
    }

    pub fn watcher_mut(&mut self) -> &mut FileWatcher {
        &mut self.watcher
    }

    pub fn is_halted(&self) -> bool {
        self.consecutive_failures >= self.max_consecutive_failures
    }

    /// Poll once and ingest everything the watcher produced.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, PipelineError> {
        self.check_halted()?;

        let lines = self.watcher.poll();
        let mut report = CycleReport {
            lines: lines.len(),
            ..CycleReport::default()
        };

        let observed_at = Utc::now();
        for raw in lines {
            let mut entry = self.parser.parse_at(&raw.path, &raw.line, observed_at);
            entry.offset = Some(raw.offset);

            match self.ingest(entry).await {
                Ok(_) => report.stored += 1,
                Err(_) => {
                    report.dropped += 1;
                    self.check_halted()?;
                }
            }
        }

        if report.lines > 0 {
            debug!(
                lines = report.lines,
                stored = report.stored,
                dropped = report.dropped,
                "Cycle complete"
            );
        }
        Ok(report)
    }

    /// Ingest a message that did not come from a watched file.
    pub async fn log(
        &mut self,
        level: Level,
        message: impl Into<String>,
        source: Option<&str>,
    ) -> Result<Record, PipelineError> {
        self.check_halted()?;

        let message = message.into();
        let entry = LogEntry {
            timestamp: Utc::now(),
            source: source.unwrap_or(DIRECT_SOURCE).to_string(),
            raw: message.clone(),
            level,
            message,
            offset: None,
            annotations: Default::default(),
        };

        Ok(self.ingest(entry).await?)
    }

    /// Run cycles on the watcher's tick until shutdown or a storage halt.
    /// A cycle that has started always finishes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        let period = self.watcher.tick_interval().max(MIN_TICK);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = period.as_millis() as u64,
            backend = self.storage.backend_name(),
            processors = ?self.chain.names(),
            "Coordinator started"
        );

        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Stopping ingestion");
                        return Err(e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Coordinator received shutdown signal");
                        break;
                    }
                }
            }
        }

        let stats = self.stats.read().await;
        info!(
            total = stats.total,
            dropped = stats.dropped,
            "Coordinator shutdown complete"
        );
        Ok(())
    }

    async fn ingest(&mut self, mut entry: LogEntry) -> Result<Record, StorageError> {
        let outcome = self.chain.annotate(&entry);
        entry.annotations = outcome.annotations;

        if !outcome.failures.is_empty() {
            self.stats.write().await.record_failures(&outcome.failures);
        }

        match self.storage.store(entry).await {
            Ok(record) => {
                self.consecutive_failures = 0;
                self.stats.write().await.record_stored(&record);
                Ok(record)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.stats.write().await.record_dropped();
                if self.consecutive_failures >= self.max_consecutive_failures {
                    error!(
                        error = %e,
                        failures = self.consecutive_failures,
                        "Store failed, halting ingestion"
                    );
                } else {
                    warn!(
                        error = %e,
                        failures = self.consecutive_failures,
                        "Store failed, record dropped"
                    );
                }
                Err(e)
            }
        }
    }

    fn check_halted(&self) -> Result<(), PipelineError> {
        if self.is_halted() {
            return Err(PipelineError::StorageHalted {
                failures: self.consecutive_failures,
            });
        }
        Ok(())
    }
}
