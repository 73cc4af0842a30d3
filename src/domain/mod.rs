//! Domain types: what to render, and the lifecycle of a tracked render job.

pub mod jobs;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default viewport width in CSS pixels.
pub const DEFAULT_WIDTH: u32 = 1280;
/// Default viewport height in CSS pixels.
pub const DEFAULT_HEIGHT: u32 = 720;
/// Default settle wait for HTML content renders, in milliseconds.
pub const DEFAULT_HTML_WAIT_MS: u64 = 1000;
/// Default settle wait for URL navigation renders, in milliseconds.
pub const DEFAULT_URL_WAIT_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed for `{field}`: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },
}

impl DomainError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Output image encoding, mirroring what headless Chromium can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// File extension used when persisting an artifact to disk.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

/// Rendering viewport in CSS pixels. Both dimensions must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Result<Self, DomainError> {
        if width == 0 {
            return Err(DomainError::validation(
                "width",
                "must be greater than zero",
            ));
        }
        if height == 0 {
            return Err(DomainError::validation(
                "height",
                "must be greater than zero",
            ));
        }
        Ok(Self { width, height })
    }
}

/// What the backend should load before capturing: inline markup or a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RenderSource {
    Html(String),
    Url(String),
}

impl RenderSource {
    pub fn html(content: impl Into<String>) -> Result<Self, DomainError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(DomainError::validation("html", "content must not be empty"));
        }
        Ok(Self::Html(content))
    }

    pub fn url(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let raw = raw.as_ref();
        let parsed = Url::parse(raw)
            .map_err(|err| DomainError::validation("url", format!("invalid url: {err}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(Self::Url(parsed.into())),
            other => Err(DomainError::validation(
                "url",
                format!("unsupported scheme `{other}`"),
            )),
        }
    }
}

/// Immutable description of a single render: source, viewport, format, and
/// how long to let dynamic content settle after navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSpec {
    pub source: RenderSource,
    pub viewport: Viewport,
    pub format: ImageFormat,
    pub wait_millis: u64,
}

impl RenderSpec {
    pub fn new(source: RenderSource, viewport: Viewport, format: ImageFormat, wait: Duration) -> Self {
        Self {
            source,
            viewport,
            format,
            wait_millis: wait.as_millis() as u64,
        }
    }

    /// Settle wait applied after navigation completes.
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_rejects_zero_dimensions() {
        assert!(Viewport::new(0, 300).is_err());
        assert!(Viewport::new(400, 0).is_err());
        let viewport = Viewport::new(400, 300).expect("valid viewport");
        assert_eq!(viewport.width, 400);
        assert_eq!(viewport.height, 300);
    }

    #[test]
    fn html_source_rejects_blank_content() {
        assert!(RenderSource::html("   ").is_err());
        assert!(RenderSource::html("<h1>x</h1>").is_ok());
    }

    #[test]
    fn url_source_requires_http_scheme() {
        assert!(RenderSource::url("https://example.com/page").is_ok());
        assert!(RenderSource::url("ftp://example.com").is_err());
        assert!(RenderSource::url("not a url").is_err());
    }

    #[test]
    fn format_content_types() {
        assert_eq!(ImageFormat::Png.content_type(), "image/png");
        assert_eq!(ImageFormat::Jpeg.content_type(), "image/jpeg");
        assert_eq!(ImageFormat::Webp.content_type(), "image/webp");
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = RenderSpec::new(
            RenderSource::Html("<p>hi</p>".into()),
            Viewport { width: 800, height: 600 },
            ImageFormat::Webp,
            Duration::from_millis(250),
        );
        let json = serde_json::to_string(&spec).expect("serialize spec");
        let back: RenderSpec = serde_json::from_str(&json).expect("deserialize spec");
        assert_eq!(back, spec);
        assert_eq!(back.wait(), Duration::from_millis(250));
    }
}
