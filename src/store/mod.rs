//! Record storage.
//!
//! [`RecordStore`] is the boundary between the note logic and the backing
//! key/value store. The important operation is
//! [`get_and_count`](RecordStore::get_and_count): read, count and
//! conditional delete must happen as one unit as seen by every other client,
//! or concurrent readers can all observe `counted_clicks < max_clicks` and
//! the note is read more often than allowed.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::{Record, RecordMeta};

pub use memory::MemoryRecordStore;
pub use redis_store::RedisRecordStore;

/// What happened to the expiry when a record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryStatus {
    /// `ttl` was zero; the record lives until read out.
    NotRequested,
    Applied,
    /// Fields were written but the expiry was not. The record is valid and
    /// readable, it just never expires on its own.
    Failed,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write every field of `record` under `id`, then set the expiry.
    /// A zero `ttl` means no expiry.
    async fn create(&self, id: &str, record: &Record, ttl: Duration)
        -> Result<ExpiryStatus, StoreError>;

    /// Plain atomic read, no counting. Only for records without a read limit.
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError>;

    /// Atomically read the record and, if it is read-limited, count this
    /// read and delete the record once the limit is reached.
    ///
    /// The returned snapshot carries the incremented count. The caller whose
    /// read reaches the limit gets the last snapshot; later callers get
    /// `None`.
    async fn get_and_count(&self, id: &str) -> Result<Option<Record>, StoreError>;

    /// Existence check with verification material. Never counts a read.
    async fn exists(&self, id: &str) -> Result<Option<RecordMeta>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;
}
