//! Request and response bodies for the rendering API.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::domain::ImageFormat;
use crate::domain::jobs::{JobRecord, JobState};

/// Render options common to every endpoint. Unknown fields are ignored, all
/// fields are optional and fall back to per-endpoint defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<ImageFormat>,
    pub wait_for: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RenderHtmlRequest {
    pub html: Option<String>,
    #[serde(default)]
    pub options: RenderOptions,
}

#[derive(Debug, Deserialize)]
pub struct RenderUrlRequest {
    pub url: Option<String>,
    #[serde(default)]
    pub options: RenderOptions,
}

#[derive(Debug, Serialize)]
pub struct SyncRenderResponse {
    pub success: bool,
    pub data: SyncRenderData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRenderData {
    pub image_base64: String,
    pub content_type: &'static str,
    pub size: usize,
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncSubmitResponse {
    pub success: bool,
    pub job_id: String,
    pub status_url: String,
}

/// Lightweight status projection of a job record. Artifact bytes are never
/// included; completed jobs point at the download endpoint instead.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub status: &'static str,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusResponse {
    pub fn from_record(record: &JobRecord) -> Self {
        let mut projection = Self {
            status: record.state.as_str(),
            created_at: rfc3339(record.created_at),
            completed_at: record.completed_at.map(rfc3339),
            failed_at: record.failed_at.map(rfc3339),
            size: None,
            format: None,
            width: None,
            height: None,
            download_url: None,
            error: record.error.clone(),
        };

        if record.state == JobState::Completed
            && let Some(artifact) = record.artifact.as_ref()
        {
            projection.size = Some(artifact.size_bytes);
            projection.format = Some(artifact.format.as_str());
            projection.width = Some(artifact.width);
            projection.height = Some(artifact.height);
            projection.download_url = Some(format!("/download/{}", record.id));
        }

        projection
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceStatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: String,
}

pub fn rfc3339(instant: OffsetDateTime) -> String {
    instant.format(&Rfc3339).unwrap_or_default()
}
