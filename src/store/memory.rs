use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{ExpiryStatus, RecordStore};
use crate::error::StoreError;
use crate::record::{Record, RecordMeta};

struct Entry {
    record: Record,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Single-process record store for local-only mode and tests.
///
/// Every operation runs under one mutex, which gives the same
/// all-or-nothing behaviour the Redis backend gets from its Lua script.
/// Expired entries are dropped when touched, and every write prunes all
/// expired entries so notes nobody opens again do not pile up.
#[derive(Default)]
pub struct MemoryRecordStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries held in the map, expired or not.
    #[cfg(test)]
    fn stored_entries(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Live entry for `id`, removing it first if it has expired.
    fn live<'a>(entries: &'a mut HashMap<String, Entry>, id: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(id).is_some_and(|e| e.is_expired(now)) {
            entries.remove(id);
            return None;
        }
        entries.get_mut(id)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(
        &self,
        id: &str,
        record: &Record,
        ttl: Duration,
    ) -> Result<ExpiryStatus, StoreError> {
        let now = Instant::now();
        let (expires_at, status) = if ttl.is_zero() {
            (None, ExpiryStatus::NotRequested)
        } else {
            (Some(now + ttl), ExpiryStatus::Applied)
        };

        let mut entries = self.lock()?;
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(
            id.to_string(),
            Entry {
                record: record.clone(),
                expires_at,
            },
        );
        Ok(status)
    }

    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, id).map(|entry| entry.record.clone()))
    }

    async fn get_and_count(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let mut entries = self.lock()?;
        let Some(entry) = Self::live(&mut entries, id) else {
            return Ok(None);
        };

        if !entry.record.limit_clicks {
            return Ok(Some(entry.record.clone()));
        }

        entry.record.counted_clicks += 1;
        let snapshot = entry.record.clone();

        if snapshot.counted_clicks >= snapshot.max_clicks {
            entries.remove(id);
        }
        Ok(Some(snapshot))
    }

    async fn exists(&self, id: &str) -> Result<Option<RecordMeta>, StoreError> {
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, id).map(|entry| entry.record.meta()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited(max_clicks: u32) -> Record {
        Record {
            content: "cipher".to_string(),
            limit_clicks: true,
            max_clicks,
            ..Record::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_get_returns_same_record() {
        let store = MemoryRecordStore::new();
        let record = Record {
            verify_hash: "h".to_string(),
            ..limited(2)
        };

        let status = store.create("a", &record, Duration::ZERO).await.unwrap();
        assert_eq!(status, ExpiryStatus::NotRequested);
        assert_eq!(store.get("a").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_counts_and_deletes_at_limit() {
        let store = MemoryRecordStore::new();
        store.create("a", &limited(2), Duration::ZERO).await.unwrap();

        let first = store.get_and_count("a").await.unwrap().unwrap();
        assert_eq!(first.counted_clicks, 1);

        let second = store.get_and_count("a").await.unwrap().unwrap();
        assert_eq!(second.counted_clicks, 2);

        assert_eq!(store.get_and_count("a").await.unwrap(), None);
        assert_eq!(store.exists("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unlimited_read_does_not_count() {
        let store = MemoryRecordStore::new();
        let record = Record {
            content: "cipher".to_string(),
            ..Record::default()
        };
        store.create("a", &record, Duration::ZERO).await.unwrap();

        for _ in 0..5 {
            let read = store.get_and_count("a").await.unwrap().unwrap();
            assert_eq!(read.counted_clicks, 0);
        }
        assert_eq!(store.get("a").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_expired_record_is_gone() {
        let store = MemoryRecordStore::new();
        let status = store
            .create("a", &limited(5), Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(status, ExpiryStatus::Applied);
        assert!(store.exists("a").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.exists("a").await.unwrap(), None);
        assert_eq!(store.get_and_count("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_write_prunes_untouched_expired_records() {
        let store = MemoryRecordStore::new();
        for i in 0..1000 {
            store
                .create(&format!("n{}", i), &limited(1), Duration::from_millis(10))
                .await
                .unwrap();
        }
        assert_eq!(store.stored_entries(), 1000);

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.create("fresh", &limited(1), Duration::ZERO).await.unwrap();

        assert_eq!(store.stored_entries(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exists_reports_meta_without_counting() {
        let store = MemoryRecordStore::new();
        let record = Record {
            verify_hash: "hash".to_string(),
            verify_salt: "salt".to_string(),
            ..limited(1)
        };
        store.create("a", &record, Duration::ZERO).await.unwrap();

        for _ in 0..3 {
            let meta = store.exists("a").await.unwrap().unwrap();
            assert_eq!(meta.verify_hash, "hash");
            assert_eq!(meta.verify_salt, "salt");
            assert!(meta.limit_clicks);
        }
        assert_eq!(store.get("a").await.unwrap().unwrap().counted_clicks, 0);
    }
}
