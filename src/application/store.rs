//! Durable job-state storage, specified at its trait boundary.
//!
//! The store is a TTL-keyed string store: each `put` overwrites the full
//! serialized record, and `get` on an expired or never-written id yields the
//! same `None`. Callers cannot distinguish "expired" from "never existed".
//! The dispatcher is the only writer for a given job id and its writes are
//! strictly ordered, so the store needs no compare-and-swap.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::jobs::{JobId, JobRecord};

pub const JOBS_EXPIRED_COUNTER: &str = "pagelens_jobs_expired_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode job record: {0}")]
    Encode(String),
    #[error("failed to decode job record: {0}")]
    Decode(String),
    #[error("job store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Write the full record under `id`, valid for `ttl` from now. Overwrites
    /// reset the expiry so an in-flight job cannot expire before its terminal
    /// write.
    async fn put(&self, id: JobId, record: &JobRecord, ttl: Duration) -> Result<(), StoreError>;

    /// Fetch the record for `id`, or `None` when unknown or expired.
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Remove every expired record and return them, so callers can release
    /// resources the records still point at. A backend with native expiry
    /// may return an empty list.
    async fn sweep(&self) -> Result<Vec<JobRecord>, StoreError>;
}

struct Entry {
    payload: String,
    expires_at: Instant,
}

/// In-process TTL store over serialized records.
///
/// Expired entries turn invisible to `get` immediately but stay in the map
/// until the next [`JobStore::sweep`], which hands them back for artifact
/// cleanup. The sweep is driven by a periodic task in the server loop.
#[derive(Default)]
pub struct MemoryJobStore {
    entries: DashMap<JobId, Entry>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, id: JobId, record: &JobRecord, ttl: Duration) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(record).map_err(|err| StoreError::Encode(err.to_string()))?;
        self.entries.insert(
            id,
            Entry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        // An expired entry reads as never-existing; the entry itself waits
        // for the next sweep so its artifact can be reclaimed with it.
        match self.entries.get(&id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let record = serde_json::from_str(&entry.payload)
                    .map_err(|err| StoreError::Decode(err.to_string()))?;
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }

    async fn sweep(&self) -> Result<Vec<JobRecord>, StoreError> {
        let now = Instant::now();
        let mut reclaimed = Vec::new();
        self.entries.retain(|id, entry| {
            if entry.expires_at > now {
                return true;
            }
            match serde_json::from_str(&entry.payload) {
                Ok(record) => reclaimed.push(record),
                Err(err) => {
                    debug!(
                        target = "pagelens::store",
                        job_id = %id,
                        error = %err,
                        "dropping undecodable expired record"
                    );
                }
            }
            false
        });
        if !reclaimed.is_empty() {
            counter!(JOBS_EXPIRED_COUNTER).increment(reclaimed.len() as u64);
            debug!(
                target = "pagelens::store",
                removed = reclaimed.len(),
                "swept expired job records"
            );
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::JobState;
    use crate::domain::{ImageFormat, RenderSource, RenderSpec, Viewport};

    fn record(id: JobId) -> JobRecord {
        JobRecord::pending(
            id,
            RenderSpec::new(
                RenderSource::Html("<p>x</p>".into()),
                Viewport {
                    width: 10,
                    height: 10,
                },
                ImageFormat::Png,
                Duration::ZERO,
            ),
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        store
            .put(id, &record(id), Duration::from_secs(60))
            .await
            .expect("put");

        let fetched = store.get(id).await.expect("get").expect("present");
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.state, JobState::Pending);
    }

    #[tokio::test]
    async fn unknown_id_reads_as_none() {
        let store = MemoryJobStore::new();
        assert!(store.get(JobId::new()).await.expect("get").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_record_is_indistinguishable_from_unknown() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        store
            .put(id, &record(id), Duration::from_secs(3600))
            .await
            .expect("put");

        tokio::time::advance(Duration::from_secs(3601)).await;

        assert!(store.get(id).await.expect("get").is_none());
        // The entry lingers for the sweeper, invisible to reads.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_extends_ttl() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        store
            .put(id, &record(id), Duration::from_secs(100))
            .await
            .expect("put");

        tokio::time::advance(Duration::from_secs(90)).await;
        let updated = record(id).into_processing();
        store
            .put(id, &updated, Duration::from_secs(100))
            .await
            .expect("overwrite");

        tokio::time::advance(Duration::from_secs(90)).await;
        let fetched = store.get(id).await.expect("get").expect("still live");
        assert_eq!(fetched.state, JobState::Processing);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        store
            .put(id, &record(id), Duration::from_secs(60))
            .await
            .expect("put pending");
        store
            .put(id, &record(id).into_processing(), Duration::from_secs(60))
            .await
            .expect("put processing");

        let fetched = store.get(id).await.expect("get").expect("present");
        assert_eq!(fetched.state, JobState::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reclaims_expired_entries() {
        let store = MemoryJobStore::new();
        let live = JobId::new();
        let dead = JobId::new();
        store
            .put(live, &record(live), Duration::from_secs(3600))
            .await
            .expect("put live");
        store
            .put(dead, &record(dead), Duration::from_secs(10))
            .await
            .expect("put dead");

        tokio::time::advance(Duration::from_secs(11)).await;

        let reclaimed = store.sweep().await.expect("sweep");
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, dead);
        assert_eq!(store.len(), 1);
        assert!(store.get(live).await.expect("get").is_some());
    }
}
