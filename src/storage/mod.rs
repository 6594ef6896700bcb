pub mod file;
pub mod memory;
pub mod traits;

pub use file::{FileStorage, FileStorageOptions, RebuildReport};
pub use memory::MemoryStorage;
pub use traits::{RecordFilter, Storage, StorageError};

use crate::config::types::StorageConfig;
use std::sync::Arc;

/// Open the backend named by the config.
pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    match config {
        StorageConfig::Memory { capacity } => {
            tracing::info!(capacity, "Using in-memory storage");
            Ok(Arc::new(MemoryStorage::new(*capacity)?))
        }
        StorageConfig::File { path, fsync } => {
            tracing::info!(path = %path.display(), fsync, "Using file storage");
            let (storage, _report) =
                FileStorage::open(path, FileStorageOptions { fsync: *fsync })?;
            Ok(Arc::new(storage))
        }
    }
}
