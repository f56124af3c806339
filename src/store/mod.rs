use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::error::Result;
use crate::protocol::Metrics;

/// Model name recorded for caption-only retrievals
pub const CAPTIONS_MODEL: &str = "CC";

/// A finished job kept in local history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Assigned by the store on insert
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    /// Link or file name that was transcribed
    pub input: String,
    pub model: String,
    pub timestamps_enabled: bool,
    pub transcription: String,
    pub performance: Metrics,
}

impl HistoryRecord {
    /// Build an unsaved record stamped with the current time
    pub fn new(
        input: impl Into<String>,
        model: impl Into<String>,
        timestamps_enabled: bool,
        transcription: impl Into<String>,
        performance: Metrics,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            input: input.into(),
            model: model.into(),
            timestamps_enabled,
            transcription: transcription.into(),
            performance,
        }
    }
}

/// Persistent history of completed jobs
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a record and return it with its assigned id
    async fn add(&self, record: HistoryRecord) -> Result<HistoryRecord>;

    /// Newest first. A limit of 0 returns everything.
    async fn list(&self, limit: usize) -> Result<Vec<HistoryRecord>>;

    async fn get(&self, id: u64) -> Result<Option<HistoryRecord>>;

    /// Remove one record. Unknown ids are ignored.
    async fn delete(&self, id: u64) -> Result<()>;

    /// Remove every record in one atomic step
    async fn clear(&self) -> Result<()>;
}

/// Record store backed by a sled tree keyed by big-endian ids
#[derive(Clone)]
pub struct HistoryStore {
    db: Db,
    records: Tree,
    /// Held across id assignment and insert so keys land in id order
    write_lock: Arc<Mutex<()>>,
}

impl HistoryStore {
    /// Open (or create) the history database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(&path)?;
        let store = Self::from_db(db)?;
        info!(
            "Opened history at {} ({} records)",
            path.as_ref().display(),
            store.records.len()
        );
        Ok(store)
    }

    /// Create a throwaway store that is removed when dropped
    pub fn new_temp() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let records = db.open_tree("history")?;
        Ok(Self { db, records, write_lock: Arc::new(Mutex::new(())) })
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn decode(data: &[u8]) -> Result<HistoryRecord> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[async_trait]
impl RecordStore for HistoryStore {
    async fn add(&self, mut record: HistoryRecord) -> Result<HistoryRecord> {
        {
            let _writer = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            // sled persists generate_id across restarts and clears
            record.id = self.db.generate_id()? + 1;
            let data = rmp_serde::to_vec(&record)?;
            self.records.insert(record.id.to_be_bytes(), data)?;
        }
        self.flush().await?;

        debug!("Stored history record {}", record.id);
        Ok(record)
    }

    async fn list(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        // Snapshot bound: records added after this point are not returned
        let newest = match self.records.last()? {
            Some((key, _)) => key,
            None => return Ok(Vec::new()),
        };

        let take = if limit == 0 { usize::MAX } else { limit };
        self.records
            .range(..=newest)
            .rev()
            .take(take)
            .map(|entry| {
                let (_, data) = entry?;
                Self::decode(&data)
            })
            .collect()
    }

    async fn get(&self, id: u64) -> Result<Option<HistoryRecord>> {
        self.records
            .get(id.to_be_bytes())?
            .map(|data| Self::decode(&data))
            .transpose()
    }

    async fn delete(&self, id: u64) -> Result<()> {
        if self.records.remove(id.to_be_bytes())?.is_some() {
            self.flush().await?;
            debug!("Deleted history record {}", id);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut batch = Batch::default();
        let mut count = 0usize;
        for key in self.records.iter().keys() {
            batch.remove(key?);
            count += 1;
        }
        self.records.apply_batch(batch)?;
        self.flush().await?;

        info!("Cleared {} history records", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> HistoryRecord {
        HistoryRecord::new(
            format!("https://youtu.be/{n}"),
            "large-v3",
            false,
            format!("transcript {n}"),
            Metrics { total_time: n as f64, word_count: 2 },
        )
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_limited() {
        let store = HistoryStore::new_temp().unwrap();
        for n in 0..8 {
            store.add(record(n)).await.unwrap();
        }

        let recent = store.list(5).await.unwrap();
        let inputs: Vec<_> = recent.iter().map(|r| r.transcription.as_str()).collect();
        assert_eq!(
            inputs,
            vec!["transcript 7", "transcript 6", "transcript 5", "transcript 4", "transcript 3"]
        );

        let all = store.list(0).await.unwrap();
        assert_eq!(all.len(), 8);
        assert!(all.windows(2).all(|w| w[0].id > w[1].id));
    }

    #[tokio::test]
    async fn test_duplicates_are_kept() {
        let store = HistoryStore::new_temp().unwrap();
        let first = store.add(record(1)).await.unwrap();
        let second = store.add(record(1)).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.list(0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_only_that_record() {
        let store = HistoryStore::new_temp().unwrap();
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(store.add(record(n)).await.unwrap().id);
        }

        let before = store.list(0).await.unwrap();
        store.delete(ids[1]).await.unwrap();
        let after = store.list(0).await.unwrap();

        assert_eq!(after.len(), 2);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1], before[2]);
        assert!(store.get(ids[1]).await.unwrap().is_none());

        store.delete(9_999).await.unwrap();
        assert_eq!(store.list(0).await.unwrap(), after);
    }

    #[tokio::test]
    async fn test_clear_empties_store() {
        let store = HistoryStore::new_temp().unwrap();
        for n in 0..4 {
            store.add(record(n)).await.unwrap();
        }

        store.clear().await.unwrap();
        assert!(store.list(0).await.unwrap().is_empty());

        let next = store.add(record(9)).await.unwrap();
        assert!(next.id > 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_list_during_concurrent_adds_sees_a_prefix() {
        for _ in 0..50 {
            let store = HistoryStore::new_temp().unwrap();

            let writers: Vec<_> = (0..8)
                .map(|n| {
                    let store = store.clone();
                    tokio::spawn(async move { store.add(record(n)).await.unwrap() })
                })
                .collect();
            let reader = {
                let store = store.clone();
                tokio::spawn(async move { store.list(0).await.unwrap() })
            };

            for writer in writers {
                writer.await.unwrap();
            }
            let snapshot: Vec<u64> = reader.await.unwrap().iter().map(|r| r.id).collect();
            let all: Vec<u64> = store.list(0).await.unwrap().iter().map(|r| r.id).collect();

            assert_eq!(all.len(), 8);
            // Newest first, so an earlier state of the store is a tail of the final listing
            assert!(all.ends_with(&snapshot), "snapshot {snapshot:?} not a prefix of {all:?}");
        }
    }

    #[tokio::test]
    async fn test_history_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("history");

        let saved = {
            let store = HistoryStore::open(&path).unwrap();
            store.add(record(1)).await.unwrap()
        };

        let store = HistoryStore::open(&path).unwrap();
        let loaded = store.get(saved.id).await.unwrap().unwrap();
        assert_eq!(loaded, saved);

        let next = store.add(record(2)).await.unwrap();
        assert!(next.id > saved.id);
    }
}
