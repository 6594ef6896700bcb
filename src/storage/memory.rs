use super::traits::{RecordFilter, Storage, StorageError};
use crate::record::{LogEntry, Record};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Bounded ring of the most recent records.
///
/// When full, the oldest record is evicted before the new one is inserted.
/// Evicted records are gone for good.
pub struct MemoryStorage {
    capacity: usize,
    inner: RwLock<Ring>,
}

struct Ring {
    records: VecDeque<Record>,
    next_id: u64,
    evicted: u64,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Result<Self, StorageError> {
        if capacity == 0 {
            return Err(StorageError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            inner: RwLock::new(Ring {
                records: VecDeque::with_capacity(capacity.min(4096)),
                next_id: 1,
                evicted: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records evicted since creation.
    pub async fn evicted(&self) -> u64 {
        self.inner.read().await.evicted
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store(&self, entry: LogEntry) -> Result<Record, StorageError> {
        let mut ring = self.inner.write().await;

        if ring.records.len() >= self.capacity {
            if let Some(oldest) = ring.records.pop_front() {
                ring.evicted += 1;
                tracing::trace!(id = oldest.id, "Evicted oldest record");
            }
        }

        let record = Record::from_entry(ring.next_id, entry);
        ring.next_id += 1;
        ring.records.push_back(record.clone());
        Ok(record)
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>, StorageError> {
        let ring = self.inner.read().await;
        Ok(filter.select(ring.records.iter()))
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.inner.read().await.records.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
