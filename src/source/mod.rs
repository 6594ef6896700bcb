pub mod parser;
pub mod timestamp;
pub mod watcher;

pub use parser::{LineParser, LinePattern, ParserError};
pub use timestamp::{TimestampError, TimestampFormat};
pub use watcher::{FileWatcher, RawLine, WatchError, WatchState};
