//! Rendering backend over a shared headless Chromium process.
//!
//! The browser launches lazily on the first render. A failed launch is
//! sticky: the error is cached and every subsequent render reports the same
//! unavailability until the process restarts. Each capture runs in its own
//! incognito context so concurrent renders cannot observe each other's
//! cookies or storage.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use headless_chrome::{
    Browser, LaunchOptions,
    protocol::cdp::{Emulation, Page},
};
use tokio::sync::OnceCell;
use tracing::{debug, error};

use crate::application::backend::{BackendError, RenderBackend, RenderedImage};
use crate::config::BrowserSettings;
use crate::domain::{ImageFormat, RenderSource, RenderSpec, Viewport};

// The crate kills an idle browser after its default timeout; the process is
// meant to live for the lifetime of the server, so push that far out.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

pub struct ChromiumBackend {
    settings: BrowserSettings,
    browser: OnceCell<Result<Browser, String>>,
}

impl ChromiumBackend {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            browser: OnceCell::new(),
        }
    }

    /// Handle to the shared browser, launching it on first use. The launch
    /// outcome is cached either way.
    async fn browser(&self) -> Result<Browser, BackendError> {
        let outcome = self
            .browser
            .get_or_init(|| async {
                let settings = self.settings.clone();
                let launched = tokio::task::spawn_blocking(move || launch(&settings)).await;
                match launched {
                    Ok(Ok(browser)) => {
                        debug!(target = "pagelens::browser", "chromium launched");
                        Ok(browser)
                    }
                    Ok(Err(message)) => {
                        error!(
                            target = "pagelens::browser",
                            error = %message,
                            "chromium launch failed"
                        );
                        Err(message)
                    }
                    Err(join_err) => Err(format!("browser launch task failed: {join_err}")),
                }
            })
            .await;

        outcome.clone().map_err(BackendError::Unavailable)
    }
}

#[async_trait]
impl RenderBackend for ChromiumBackend {
    async fn render(&self, spec: &RenderSpec) -> Result<RenderedImage, BackendError> {
        let browser = self.browser().await?;
        let spec = spec.clone();
        // If the caller gives up (render timeout), the blocking task is
        // detached and the capture still runs to completion on its thread.
        tokio::task::spawn_blocking(move || capture(&browser, &spec))
            .await
            .map_err(|err| BackendError::Render(format!("capture task failed: {err}")))?
    }
}

fn launch(settings: &BrowserSettings) -> Result<Browser, String> {
    let mut builder = LaunchOptions::default_builder();
    builder
        .headless(true)
        .sandbox(settings.sandbox)
        .idle_browser_timeout(BROWSER_IDLE_TIMEOUT);
    if let Some(path) = settings.executable.as_ref() {
        builder.path(Some(path.clone()));
    }

    let options = builder
        .build()
        .map_err(|err| format!("invalid launch options: {err}"))?;

    Browser::new(options).map_err(|err| format!("failed to launch chromium: {err}"))
}

/// Blocking capture of a single render: isolated context, navigate, settle,
/// screenshot the requested viewport.
fn capture(browser: &Browser, spec: &RenderSpec) -> Result<RenderedImage, BackendError> {
    let context = browser
        .new_context()
        .map_err(|err| BackendError::Render(format!("failed to open browser context: {err}")))?;
    let tab = context
        .new_tab()
        .map_err(|err| BackendError::Render(format!("failed to open tab: {err}")))?;

    // Size the layout viewport to the request before loading anything, so
    // responsive pages render at the requested width rather than the default
    // window size. The screenshot clip below only crops; it does not resize.
    tab.call_method(device_metrics(spec.viewport))
        .map_err(|err| BackendError::Render(format!("failed to set viewport: {err}")))?;

    let target = navigation_target(&spec.source);
    tab.navigate_to(&target)
        .and_then(|tab| tab.wait_until_navigated())
        .map_err(|err| BackendError::Render(format!("navigation failed: {err}")))?;

    // Let dynamic content settle before capturing.
    let wait = spec.wait();
    if !wait.is_zero() {
        std::thread::sleep(wait);
    }

    let clip = Page::Viewport {
        x: 0.0,
        y: 0.0,
        width: f64::from(spec.viewport.width),
        height: f64::from(spec.viewport.height),
        scale: 1.0,
    };
    let data = tab
        .capture_screenshot(screenshot_format(spec.format), None, Some(clip), true)
        .map_err(|err| BackendError::Render(format!("screenshot failed: {err}")))?;

    // Close the tab eagerly instead of waiting on context teardown.
    let _ = tab.close(true);

    Ok(RenderedImage {
        bytes: Bytes::from(data),
        format: spec.format,
        width: spec.viewport.width,
        height: spec.viewport.height,
    })
}

/// Device metrics override pinning the layout viewport to the requested
/// dimensions at 1:1 scale.
fn device_metrics(viewport: Viewport) -> Emulation::SetDeviceMetricsOverride {
    Emulation::SetDeviceMetricsOverride {
        width: viewport.width,
        height: viewport.height,
        device_scale_factor: 1.0,
        mobile: false,
        scale: None,
        screen_width: None,
        screen_height: None,
        position_x: None,
        position_y: None,
        dont_set_visible_size: None,
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    }
}

/// Navigable URL for a render source. Inline markup goes through a base64
/// data URL so it needs no escaping and no temp files.
fn navigation_target(source: &RenderSource) -> String {
    match source {
        RenderSource::Html(html) => {
            format!("data:text/html;base64,{}", BASE64.encode(html))
        }
        RenderSource::Url(url) => url.clone(),
    }
}

fn screenshot_format(format: ImageFormat) -> Page::CaptureScreenshotFormatOption {
    match format {
        ImageFormat::Png => Page::CaptureScreenshotFormatOption::Png,
        ImageFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
        ImageFormat::Webp => Page::CaptureScreenshotFormatOption::Webp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_source_becomes_data_url() {
        let source = RenderSource::Html("<h1>hello</h1>".into());
        let target = navigation_target(&source);
        assert!(target.starts_with("data:text/html;base64,"));

        let encoded = target.trim_start_matches("data:text/html;base64,");
        let decoded = BASE64.decode(encoded).expect("valid base64");
        assert_eq!(decoded, b"<h1>hello</h1>");
    }

    #[test]
    fn device_metrics_match_requested_viewport() {
        let viewport = Viewport::new(2560, 1440).expect("valid viewport");
        let metrics = device_metrics(viewport);
        assert_eq!(metrics.width, 2560);
        assert_eq!(metrics.height, 1440);
        assert_eq!(metrics.device_scale_factor, 1.0);
        assert!(!metrics.mobile);
        // No screen or scale overrides beyond the layout viewport itself.
        assert_eq!(metrics.scale, None);
        assert_eq!(metrics.screen_width, None);
        assert_eq!(metrics.screen_height, None);
    }

    #[test]
    fn url_source_navigates_directly() {
        let source = RenderSource::url("https://example.com/page").expect("valid url");
        assert_eq!(navigation_target(&source), "https://example.com/page");
    }

    #[test]
    fn screenshot_format_covers_all_variants() {
        assert!(matches!(
            screenshot_format(ImageFormat::Png),
            Page::CaptureScreenshotFormatOption::Png
        ));
        assert!(matches!(
            screenshot_format(ImageFormat::Jpeg),
            Page::CaptureScreenshotFormatOption::Jpeg
        ));
        assert!(matches!(
            screenshot_format(ImageFormat::Webp),
            Page::CaptureScreenshotFormatOption::Webp
        ));
    }
}
