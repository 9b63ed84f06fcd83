//! Result store boundary
//!
//! The engine does not own persistence; normalized price records are
//! appended through the [`ResultStore`] trait supplied by the embedding
//! application. Append failures are retried by the scheduler up to a
//! configured bound, so a record is never silently dropped.

use crate::model::PriceRecord;
use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;

/// Errors that can occur while appending price records
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store rejected records: {0}")]
    Rejected(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only sink for canonical price records
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Appends a batch of records; the batch is all-or-nothing from the
    /// engine's point of view
    async fn append(&self, records: &[PriceRecord]) -> StoreResult<()>;
}

/// In-memory store, used in tests and as a reference implementation
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PriceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far
    pub fn records(&self) -> Vec<PriceRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn append(&self, records: &[PriceRecord]) -> StoreResult<()> {
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}
