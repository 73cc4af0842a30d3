//! Job dispatch and lifecycle engine.
//!
//! Submission writes the `pending` record before the job id is handed back,
//! then spawns an execution task that owns the job for the rest of its life:
//! it is the only writer for that id, its store writes are strictly ordered
//! (`pending -> processing -> terminal`), and it performs exactly one
//! terminal write. If the process dies mid-render the record stays
//! `processing` until the TTL reclaims it; no other writer will touch it.

use std::{sync::Arc, time::Duration};

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    application::{
        backend::{BackendError, RenderedImage},
        pool::{PoolError, RenderPool},
        store::{JobStore, StoreError},
    },
    domain::RenderSpec,
    domain::jobs::{ArtifactMeta, JobId, JobRecord, JobState},
    infra::artifacts::ArtifactStorage,
};

pub const JOBS_SUBMITTED_COUNTER: &str = "pagelens_jobs_submitted_total";
pub const JOBS_COMPLETED_COUNTER: &str = "pagelens_jobs_completed_total";
pub const JOBS_FAILED_COUNTER: &str = "pagelens_jobs_failed_total";
pub const RENDER_DURATION_HISTOGRAM: &str = "pagelens_render_duration_ms";

/// Why a render attempt did not produce an image.
#[derive(Debug, Error)]
pub enum RenderFailure {
    #[error("render backend unavailable: {0}")]
    Unavailable(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
}

impl From<PoolError> for RenderFailure {
    fn from(err: PoolError) -> Self {
        // A saturated or closed pool reads as engine unavailability to callers.
        Self::Unavailable(err.to_string())
    }
}

impl From<BackendError> for RenderFailure {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(message) => Self::Unavailable(message),
            BackendError::Render(message) => Self::Render(message),
        }
    }
}

/// Download outcome for a completed job's artifact.
pub struct ArtifactDownload {
    pub bytes: bytes::Bytes,
    pub content_type: String,
    pub filename: String,
}

#[derive(Clone)]
pub struct JobDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    pool: Arc<RenderPool>,
    store: Arc<dyn JobStore>,
    artifacts: Arc<ArtifactStorage>,
    job_ttl: Duration,
    render_timeout: Duration,
}

impl JobDispatcher {
    pub fn new(
        pool: Arc<RenderPool>,
        store: Arc<dyn JobStore>,
        artifacts: Arc<ArtifactStorage>,
        job_ttl: Duration,
        render_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                pool,
                store,
                artifacts,
                job_ttl,
                render_timeout,
            }),
        }
    }

    /// Accept a render spec as an asynchronous job. The `pending` record is
    /// written before this returns, so an immediate status lookup always
    /// finds it. Identical specs always produce independent jobs.
    pub async fn submit(&self, spec: RenderSpec) -> Result<JobId, StoreError> {
        let id = JobId::new();
        let record = JobRecord::pending(id, spec);
        self.inner
            .store
            .put(id, &record, self.inner.job_ttl)
            .await?;
        counter!(JOBS_SUBMITTED_COUNTER).increment(1);
        info!(target = "pagelens::dispatch", job_id = %id, "job accepted");

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.execute(record).await;
        });

        Ok(id)
    }

    /// Render inline, sharing the same pool gate as async jobs. Used by the
    /// synchronous HTTP endpoints.
    pub async fn render_sync(&self, spec: &RenderSpec) -> Result<RenderedImage, RenderFailure> {
        self.run_render(spec).await
    }

    /// Current record for `id`, or `None` when unknown or expired.
    pub async fn status(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.inner.store.get(id).await
    }

    /// Artifact bytes for a completed job, or `None` for every other case:
    /// unknown id, expired, not yet terminal, failed, or missing file.
    pub async fn download(&self, id: JobId) -> Result<Option<ArtifactDownload>, StoreError> {
        let record = match self.inner.store.get(id).await? {
            Some(record) if record.state == JobState::Completed => record,
            _ => return Ok(None),
        };
        let Some(artifact) = record.artifact else {
            return Ok(None);
        };

        let bytes = self
            .inner
            .artifacts
            .read(&artifact.stored_path)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        Ok(bytes.map(|bytes| ArtifactDownload {
            bytes,
            filename: format!("rendered-{id}.{}", artifact.format.extension()),
            content_type: artifact.content_type,
        }))
    }

    /// Remove expired job records and delete the artifacts they point at.
    /// Driven by the periodic sweeper task; expired records are already
    /// invisible to reads, so deleting their files here is unobservable
    /// through the API.
    pub async fn reclaim_expired(&self) {
        let reclaimed = match self.inner.store.sweep().await {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    target = "pagelens::dispatch",
                    error = %err,
                    "job store sweep failed"
                );
                return;
            }
        };

        for record in reclaimed {
            let Some(artifact) = record.artifact else {
                continue;
            };
            if let Err(err) = self.inner.artifacts.delete(&artifact.stored_path).await {
                warn!(
                    target = "pagelens::dispatch",
                    job_id = %record.id,
                    error = %err,
                    "failed to delete expired artifact"
                );
            }
        }
    }

    /// Execution task body. This task transitioned the job to `processing`,
    /// so it alone may write the terminal state.
    async fn execute(&self, record: JobRecord) {
        let id = record.id;
        let processing = record.into_processing();
        if let Err(err) = self
            .inner
            .store
            .put(id, &processing, self.inner.job_ttl)
            .await
        {
            warn!(
                target = "pagelens::dispatch",
                job_id = %id,
                error = %err,
                "failed to mark job processing; continuing"
            );
        }

        let outcome = self.run_render(&processing.spec).await;

        let terminal = match outcome {
            Ok(image) => match self.persist_artifact(id, &processing, image).await {
                Ok(artifact) => processing.into_completed(artifact),
                Err(message) => processing.into_failed(message),
            },
            Err(failure) => processing.into_failed(failure.to_string()),
        };

        match terminal.state {
            JobState::Completed => {
                counter!(JOBS_COMPLETED_COUNTER).increment(1);
                info!(target = "pagelens::dispatch", job_id = %id, "job completed");
            }
            _ => {
                counter!(JOBS_FAILED_COUNTER).increment(1);
                warn!(
                    target = "pagelens::dispatch",
                    job_id = %id,
                    error = terminal.error.as_deref().unwrap_or(""),
                    "job failed"
                );
            }
        }

        // The one terminal write for this job.
        if let Err(err) = self.inner.store.put(id, &terminal, self.inner.job_ttl).await {
            error!(
                target = "pagelens::dispatch",
                job_id = %id,
                error = %err,
                "failed to persist terminal job state"
            );
        }
    }

    async fn persist_artifact(
        &self,
        id: JobId,
        record: &JobRecord,
        image: RenderedImage,
    ) -> Result<ArtifactMeta, String> {
        let stored = self
            .inner
            .artifacts
            .store(id, image.format, &image.bytes)
            .await
            .map_err(|err| format!("failed to persist artifact: {err}"))?;

        Ok(ArtifactMeta {
            content_type: image.content_type().to_string(),
            size_bytes: stored.size_bytes,
            width: image.width,
            height: image.height,
            format: record.spec.format,
            checksum: stored.checksum,
            stored_path: stored.stored_path,
        })
    }

    /// Acquire a slot, render under the configured timeout, release the slot
    /// on every path. The slot is dropped before this returns regardless of
    /// success, backend error, or timeout.
    ///
    /// On timeout the backend call is dropped, not cancelled: a capture
    /// already running on a blocking thread keeps that thread until the
    /// browser call returns, so browser-side work can briefly exceed the
    /// pool ceiling while the freed slot admits a new render.
    async fn run_render(&self, spec: &RenderSpec) -> Result<RenderedImage, RenderFailure> {
        let slot = self.inner.pool.acquire().await?;
        let started = Instant::now();
        let result = tokio::time::timeout(self.inner.render_timeout, slot.render(spec)).await;
        histogram!(RENDER_DURATION_HISTOGRAM).record(started.elapsed().as_millis() as f64);
        drop(slot);

        match result {
            Ok(rendered) => Ok(rendered?),
            Err(_) => Err(RenderFailure::Timeout(self.inner.render_timeout)),
        }
    }
}
