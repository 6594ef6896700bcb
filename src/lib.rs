pub mod cli;
pub mod config;
pub mod pipeline;
pub mod processor;
pub mod record;
pub mod source;
pub mod storage;
pub mod web;

pub use pipeline::{Coordinator, QueryHandle};
pub use record::{Level, LogEntry, Record};
pub use storage::{RecordFilter, Storage};
