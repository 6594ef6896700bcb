pub mod coordinator;
pub mod stats;

pub use coordinator::{Coordinator, CycleReport, PipelineError, QueryHandle, DIRECT_SOURCE};
pub use stats::IngestStats;
