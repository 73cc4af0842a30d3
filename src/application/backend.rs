//! Boundary to the external rendering capability.
//!
//! The dispatch core treats the browser engine as an opaque collaborator:
//! given a [`RenderSpec`], it either produces encoded image bytes or fails.
//! Production uses the headless Chromium adapter in `infra::browser`; tests
//! substitute in-memory implementations.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::{ImageFormat, RenderSpec};

/// One successful render: encoded bytes plus the metadata clients receive.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl RenderedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The engine could not be initialised or reached. Sticky: the adapter
    /// does not retry engine creation on every call.
    #[error("render backend unavailable: {0}")]
    Unavailable(String),
    /// Navigation, settling, or capture failed during an active render.
    #[error("render failed: {0}")]
    Render(String),
}

#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(&self, spec: &RenderSpec) -> Result<RenderedImage, BackendError>;
}
