use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::application::backend::RenderedImage;
use crate::application::dispatcher::RenderFailure;
use crate::domain::jobs::JobId;
use crate::domain::{
    DEFAULT_HEIGHT, DEFAULT_HTML_WAIT_MS, DEFAULT_URL_WAIT_MS, DEFAULT_WIDTH, DomainError,
    RenderSource, RenderSpec, Viewport,
};

use super::error::{ApiError, ApiJson};
use super::models::{
    AsyncSubmitResponse, HealthResponse, JobStatusResponse, RenderHtmlRequest, RenderOptions,
    RenderUrlRequest, ServiceStatusResponse, SyncRenderData, SyncRenderResponse, rfc3339,
};
use super::state::HttpState;

const SERVICE_NAME: &str = "Pagelens HTML Renderer";

pub async fn render_html(
    State(state): State<HttpState>,
    ApiJson(request): ApiJson<RenderHtmlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source = "infra::http::render_html";
    let html = request
        .html
        .ok_or_else(|| ApiError::bad_request(source, "HTML content is required"))?;

    let render_source = RenderSource::html(html).map_err(|err| domain_to_api(source, err))?;
    let spec = build_spec(source, render_source, &request.options, DEFAULT_HTML_WAIT_MS)?;

    let request_id = Uuid::new_v4().to_string();
    info!(
        target = "pagelens::http",
        request_id,
        format = spec.format.as_str(),
        "rendering html"
    );

    let image = state.dispatcher.render_sync(&spec).await.map_err(|err| {
        render_failure_to_api(source, "Failed to render HTML", err, &state)
    })?;

    Ok(Json(SyncRenderResponse {
        success: true,
        data: sync_data(image, request_id, None),
    }))
}

pub async fn render_url(
    State(state): State<HttpState>,
    ApiJson(request): ApiJson<RenderUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source = "infra::http::render_url";
    let url = request
        .url
        .ok_or_else(|| ApiError::bad_request(source, "URL is required"))?;

    let render_source = RenderSource::url(&url).map_err(|err| domain_to_api(source, err))?;
    let spec = build_spec(source, render_source, &request.options, DEFAULT_URL_WAIT_MS)?;

    let request_id = Uuid::new_v4().to_string();
    info!(
        target = "pagelens::http",
        request_id,
        url = %url,
        format = spec.format.as_str(),
        "rendering url"
    );

    let image = state.dispatcher.render_sync(&spec).await.map_err(|err| {
        render_failure_to_api(source, "Failed to render URL", err, &state)
    })?;

    Ok(Json(SyncRenderResponse {
        success: true,
        data: sync_data(image, request_id, Some(url)),
    }))
}

pub async fn submit_async(
    State(state): State<HttpState>,
    ApiJson(request): ApiJson<RenderHtmlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source = "infra::http::submit_async";
    let html = request
        .html
        .ok_or_else(|| ApiError::bad_request(source, "HTML content is required"))?;

    let render_source = RenderSource::html(html).map_err(|err| domain_to_api(source, err))?;
    let spec = build_spec(source, render_source, &request.options, DEFAULT_HTML_WAIT_MS)?;

    let job_id = state.dispatcher.submit(spec).await.map_err(|err| {
        ApiError::internal(
            source,
            "Failed to queue render job",
            err.to_string(),
            state.expose_internal_errors,
        )
    })?;

    Ok(Json(AsyncSubmitResponse {
        success: true,
        job_id: job_id.to_string(),
        status_url: format!("/render-async/{job_id}"),
    }))
}

pub async fn job_status(
    State(state): State<HttpState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let source = "infra::http::job_status";
    // An unparseable id can never have been issued, so it reads as missing.
    let Some(id) = JobId::parse(&job_id) else {
        return Err(ApiError::not_found(source, "Job not found or expired"));
    };

    let record = state.dispatcher.status(id).await.map_err(|err| {
        ApiError::internal(
            source,
            "Failed to get job status",
            err.to_string(),
            state.expose_internal_errors,
        )
    })?;

    match record {
        Some(record) => Ok(Json(JobStatusResponse::from_record(&record))),
        None => Err(ApiError::not_found(source, "Job not found or expired")),
    }
}

pub async fn download(
    State(state): State<HttpState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let source = "infra::http::download";
    let Some(id) = JobId::parse(&job_id) else {
        return Err(ApiError::not_found(source, "Image not found"));
    };

    let artifact = state.dispatcher.download(id).await.map_err(|err| {
        ApiError::internal(
            source,
            "Failed to download image",
            err.to_string(),
            state.expose_internal_errors,
        )
    })?;

    let Some(artifact) = artifact else {
        return Err(ApiError::not_found(source, "Image not found"));
    };

    let mut response = (StatusCode::OK, artifact.bytes).into_response();
    if let Ok(value) = HeaderValue::from_str(&artifact.content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    let disposition = format!("attachment; filename=\"{}\"", artifact.filename);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp: rfc3339(OffsetDateTime::now_utc()),
    })
}

pub async fn service_status() -> impl IntoResponse {
    Json(ServiceStatusResponse {
        status: "running",
        service: SERVICE_NAME,
        timestamp: rfc3339(OffsetDateTime::now_utc()),
    })
}

fn build_spec(
    source: &'static str,
    render_source: RenderSource,
    options: &RenderOptions,
    default_wait_ms: u64,
) -> Result<RenderSpec, ApiError> {
    let viewport = Viewport::new(
        options.width.unwrap_or(DEFAULT_WIDTH),
        options.height.unwrap_or(DEFAULT_HEIGHT),
    )
    .map_err(|err| domain_to_api(source, err))?;

    Ok(RenderSpec::new(
        render_source,
        viewport,
        options.format.unwrap_or_default(),
        Duration::from_millis(options.wait_for.unwrap_or(default_wait_ms)),
    ))
}

fn sync_data(image: RenderedImage, request_id: String, url: Option<String>) -> SyncRenderData {
    SyncRenderData {
        content_type: image.content_type(),
        size: image.bytes.len(),
        format: image.format.as_str(),
        width: image.width,
        height: image.height,
        image_base64: BASE64.encode(&image.bytes),
        request_id,
        url,
    }
}

fn domain_to_api(source: &'static str, err: DomainError) -> ApiError {
    ApiError::bad_request(source, err.to_string())
}

fn render_failure_to_api(
    source: &'static str,
    public: &'static str,
    failure: RenderFailure,
    state: &HttpState,
) -> ApiError {
    ApiError::internal(
        source,
        public,
        failure.to_string(),
        state.expose_internal_errors,
    )
}
