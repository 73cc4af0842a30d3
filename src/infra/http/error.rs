use axum::Json;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::application::error::ErrorReport;

/// Client-facing error body: a stable `error` string, plus `message` with
/// internal detail only when the deployment opts in.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    source: &'static str,
    error: String,
    message: Option<String>,
    /// Internal diagnostic for the logging middleware, never serialized.
    detail: String,
}

impl ApiError {
    pub fn bad_request(source: &'static str, error: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, source, error)
    }

    fn with_status(status: StatusCode, source: &'static str, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status,
            source,
            detail: error.clone(),
            error,
            message: None,
        }
    }

    /// Uniform 404. Callers pick the public wording; the body never reveals
    /// whether the id was unknown, expired, or simply not completed.
    pub fn not_found(source: &'static str, error: &'static str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            source,
            error: error.to_string(),
            message: None,
            detail: error.to_string(),
        }
    }

    pub fn internal(
        source: &'static str,
        error: &'static str,
        detail: impl Into<String>,
        expose_detail: bool,
    ) -> Self {
        let detail = detail.into();
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            source,
            error: error.to_string(),
            message: expose_detail.then(|| detail.clone()),
            detail,
        }
    }
}

/// `Json` extractor reporting malformed or mistyped request bodies as a 400
/// in the flat error shape, instead of axum's default 422.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                // A body that parses but does not fit the request type is a
                // client error like any other malformed input. Transport
                // rejections (too large, wrong content type) keep theirs.
                let status = match rejection.status() {
                    StatusCode::UNPROCESSABLE_ENTITY => StatusCode::BAD_REQUEST,
                    other => other,
                };
                Err(ApiError::with_status(
                    status,
                    "infra::http::body",
                    rejection.body_text(),
                ))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.error,
            message: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        // Attach a structured report so shared logging middleware can emit rich diagnostics.
        ErrorReport::from_message(self.source, self.status, self.detail).attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_detail_is_suppressed_by_default() {
        let err = ApiError::internal(
            "test",
            "Failed to render HTML",
            "chromium exited with signal 9",
            false,
        );
        let body = serde_json::to_value(ApiErrorBody {
            error: err.error,
            message: err.message,
        })
        .expect("serialize body");

        assert_eq!(body["error"], "Failed to render HTML");
        assert!(body.get("message").is_none());
    }

    #[test]
    fn internal_detail_is_exposed_when_enabled() {
        let err = ApiError::internal(
            "test",
            "Failed to render HTML",
            "chromium exited with signal 9",
            true,
        );
        assert_eq!(
            err.message.as_deref(),
            Some("chromium exited with signal 9")
        );
    }
}
