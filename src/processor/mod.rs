//! Annotation chain.
//!
//! Processors run in registration order against the same immutable entry.
//! Each one may contribute a JSON object stored under its name. A processor
//! that errors or panics contributes nothing; the others still run and the
//! entry is still stored.
//!
//! Processors must be fast and must not block: the chain runs inline on the
//! ingestion task and has no per-processor timeout.

pub mod builtin;
pub mod registry;

pub use builtin::{PatternDetector, SeverityHint};
pub use registry::{ProcessorConstructor, ProcessorRegistry};

use crate::record::{Annotation, Annotations, LogEntry};
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid options for processor '{name}': {reason}")]
    InvalidOptions { name: String, reason: String },

    #[error("unknown processor kind '{0}'")]
    UnknownKind(String),

    #[error("regex compilation error for pattern '{pattern}': {source}")]
    RegexCompilation {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A single annotator. Returning `Ok(None)` means "no finding".
pub trait Processor: Send + Sync {
    fn process(&self, entry: &LogEntry) -> Result<Option<Annotation>, ProcessorError>;
}

impl<F> Processor for F
where
    F: Fn(&LogEntry) -> Result<Option<Annotation>, ProcessorError> + Send + Sync,
{
    fn process(&self, entry: &LogEntry) -> Result<Option<Annotation>, ProcessorError> {
        self(entry)
    }
}

/// Box a closure as a processor.
pub fn processor_fn<F>(f: F) -> Box<dyn Processor>
where
    F: Fn(&LogEntry) -> Result<Option<Annotation>, ProcessorError> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Result of running the chain over one entry.
#[derive(Debug, Default)]
pub struct ChainOutcome {
    pub annotations: Annotations,
    /// Names of processors that failed on this entry.
    pub failures: Vec<String>,
}

#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<(String, Box<dyn Processor>)>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a processor. Registering an existing name replaces that processor
    /// in place, keeping its position in the chain.
    pub fn register(&mut self, name: impl Into<String>, processor: Box<dyn Processor>) {
        let name = name.into();
        match self.processors.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => {
                warn!(processor = %name, "Processor registered twice, replacing earlier one");
                slot.1 = processor;
            }
            None => self.processors.push((name, processor)),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run every processor over `entry` and collect their findings.
    pub fn annotate(&self, entry: &LogEntry) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();

        for (name, processor) in &self.processors {
            let result = catch_unwind(AssertUnwindSafe(|| processor.process(entry)));
            match result {
                Ok(Ok(Some(annotation))) => {
                    outcome
                        .annotations
                        .insert(name.clone(), serde_json::Value::Object(annotation));
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!(processor = %name, source = %entry.source, error = %e, "Processor failed");
                    outcome.failures.push(name.clone());
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(processor = %name, source = %entry.source, panic = %reason, "Processor panicked");
                    outcome.failures.push(name.clone());
                }
            }
        }

        outcome
    }
}
