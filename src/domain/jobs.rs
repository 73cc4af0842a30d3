//! Job lifecycle: identifiers, state machine, and the persisted record.
//!
//! A job's state is monotonic through `pending -> processing -> {completed|failed}`.
//! Job ids are never reused, and only the dispatcher task that created a job
//! writes to it, so ordering is structural rather than lock-enforced.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ImageFormat, RenderSpec};

/// Opaque unique job identifier, generated at submission and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn permits(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
        )
    }
}

/// Metadata describing a persisted artifact. Raw bytes live in artifact
/// storage; the record only carries enough to serve status projections and
/// locate the file for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub content_type: String,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub checksum: String,
    pub stored_path: String,
}

/// Persisted job record. Full-record overwrites only; the store never merges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    pub spec: RenderSpec,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub failed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    /// Initial record, written synchronously at submission time so a lookup
    /// immediately after submission always finds it.
    pub fn pending(id: JobId, spec: RenderSpec) -> Self {
        Self {
            id,
            state: JobState::Pending,
            spec,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
            failed_at: None,
            artifact: None,
            error: None,
        }
    }

    pub fn into_processing(mut self) -> Self {
        debug_assert!(self.state.permits(JobState::Processing));
        self.state = JobState::Processing;
        self
    }

    pub fn into_completed(mut self, artifact: ArtifactMeta) -> Self {
        debug_assert!(self.state.permits(JobState::Completed));
        self.state = JobState::Completed;
        self.completed_at = Some(OffsetDateTime::now_utc());
        self.artifact = Some(artifact);
        self.error = None;
        self
    }

    pub fn into_failed(mut self, message: impl Into<String>) -> Self {
        debug_assert!(self.state.permits(JobState::Failed));
        self.state = JobState::Failed;
        self.failed_at = Some(OffsetDateTime::now_utc());
        self.artifact = None;
        self.error = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{RenderSource, Viewport};

    fn sample_spec() -> RenderSpec {
        RenderSpec::new(
            RenderSource::Html("<h1>x</h1>".into()),
            Viewport {
                width: 400,
                height: 300,
            },
            ImageFormat::Png,
            Duration::from_millis(10),
        )
    }

    fn sample_artifact() -> ArtifactMeta {
        ArtifactMeta {
            content_type: "image/png".into(),
            size_bytes: 128,
            width: 400,
            height: 300,
            format: ImageFormat::Png,
            checksum: "abc".into(),
            stored_path: "deadbeef.png".into(),
        }
    }

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn state_machine_is_monotonic() {
        assert!(JobState::Pending.permits(JobState::Processing));
        assert!(JobState::Processing.permits(JobState::Completed));
        assert!(JobState::Processing.permits(JobState::Failed));

        // No skipping pending -> terminal, no backwards edges, terminal absorbs.
        assert!(!JobState::Pending.permits(JobState::Completed));
        assert!(!JobState::Pending.permits(JobState::Failed));
        assert!(!JobState::Processing.permits(JobState::Pending));
        assert!(!JobState::Completed.permits(JobState::Failed));
        assert!(!JobState::Completed.permits(JobState::Processing));
        assert!(!JobState::Failed.permits(JobState::Completed));
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn completed_record_carries_artifact_and_clears_error() {
        let record = JobRecord::pending(JobId::new(), sample_spec())
            .into_processing()
            .into_completed(sample_artifact());

        assert_eq!(record.state, JobState::Completed);
        assert!(record.completed_at.is_some());
        assert!(record.failed_at.is_none());
        assert!(record.error.is_none());
        let artifact = record.artifact.expect("artifact present");
        assert_eq!(artifact.size_bytes, 128);
    }

    #[test]
    fn failed_record_carries_message_only() {
        let record = JobRecord::pending(JobId::new(), sample_spec())
            .into_processing()
            .into_failed("navigation timed out");

        assert_eq!(record.state, JobState::Failed);
        assert!(record.failed_at.is_some());
        assert!(record.artifact.is_none());
        assert_eq!(record.error.as_deref(), Some("navigation timed out"));
    }

    #[test]
    fn record_serializes_timestamps_as_rfc3339() {
        let record = JobRecord::pending(JobId::new(), sample_spec());
        let value = serde_json::to_value(&record).expect("serialize record");
        let created = value["created_at"].as_str().expect("created_at string");
        assert!(created.contains('T'), "expected rfc3339, got {created}");
        let back: JobRecord = serde_json::from_value(value).expect("deserialize record");
        assert_eq!(back.state, JobState::Pending);
    }
}
