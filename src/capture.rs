//! The capture operation
//!
//! `Capturer` is the seam between the orchestration engine and the actual
//! rendering work; the scheduler only ever sees `CaptureOutcome`s.
//! `ChromeCapturer` implements it over the pooled Chrome instances: it
//! walks the candidate URLs in order, stops at the first render that
//! produces a usable artifact, and applies the minimum-size rule: an
//! artifact below the byte threshold is a failed render, not a success.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use tracing::debug;

use crate::{
    artifact_path, BrowserPool, Config, ErrorSinks, OutputFormat, RotatorError, TargetMetadata,
};

/// Result of one capture attempt over a target's full candidate list.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub target: String,
    pub success: bool,
    pub metadata: Option<TargetMetadata>,
    pub error: Option<RotatorError>,
    pub duration: Duration,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Capturer: Send + Sync {
    /// Try the candidate URLs in order and stop at the first success.
    /// Never fails the batch: an unreachable target comes back as an
    /// unsuccessful outcome.
    async fn capture(
        &self,
        target: &str,
        candidates: &[String],
        timeout: Duration,
    ) -> CaptureOutcome;
}

/// Chrome-backed capture engine.
pub struct ChromeCapturer {
    pool: BrowserPool,
    config: Config,
    output_dir: PathBuf,
    sinks: Arc<ErrorSinks>,
    http: Option<reqwest::Client>,
}

impl ChromeCapturer {
    pub async fn new(
        config: Config,
        output_dir: PathBuf,
        sinks: Arc<ErrorSinks>,
    ) -> Result<Self, RotatorError> {
        let pool = BrowserPool::new(&config, config.workers).await?;

        let http = if config.collect_metadata {
            let client = reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .timeout(config.capture_timeout)
                .build()
                .map_err(|e| RotatorError::Setup(format!("HTTP client: {e}")))?;
            Some(client)
        } else {
            None
        };

        Ok(Self {
            pool,
            config,
            output_dir,
            sinks,
            http,
        })
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn try_candidate(
        &self,
        target: &str,
        url: &str,
        timeout: Duration,
    ) -> Result<TargetMetadata, RotatorError> {
        let lease = self.pool.acquire().await?;
        // A timed-out page is abandoned to its browser and cleaned up at
        // pool shutdown.
        match tokio::time::timeout(timeout, self.render(&lease.browser, target, url)).await {
            Ok(result) => result,
            Err(_) => Err(RotatorError::Timeout(timeout)),
        }
    }

    async fn render(
        &self,
        browser: &Arc<tokio::sync::Mutex<chromiumoxide::browser::Browser>>,
        target: &str,
        url: &str,
    ) -> Result<TargetMetadata, RotatorError> {
        let page = {
            let browser = browser.lock().await;
            browser
                .new_page(url)
                .await
                .map_err(|e| RotatorError::UrlLoadFailed(e.to_string()))?
        };

        let result = self.capture_page(&page, target, url).await;
        let _ = page.close().await;
        result
    }

    async fn capture_page(
        &self,
        page: &Page,
        target: &str,
        url: &str,
    ) -> Result<TargetMetadata, RotatorError> {
        let viewport = &self.config.viewport;
        let emulation = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width)
            .height(viewport.height)
            .device_scale_factor(viewport.device_scale_factor)
            .mobile(viewport.mobile)
            .build()
            .map_err(|e| RotatorError::PageError(e.to_string()))?;
        page.execute(emulation)
            .await
            .map_err(|e| RotatorError::PageError(e.to_string()))?;

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let png_data = page
            .screenshot(params)
            .await
            .map_err(|e| RotatorError::CaptureFailed(e.to_string()))?;

        let data = convert_image_format(&self.config.output_format, png_data)?;
        if (data.len() as u64) < self.config.min_artifact_bytes {
            return Err(RotatorError::ArtifactTooSmall(data.len()));
        }

        let path = artifact_path(&self.output_dir, target, &self.config.output_format);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| RotatorError::IoError(e.to_string()))?;
        debug!("Saved artifact {} ({} bytes)", path.display(), data.len());

        let title = page
            .get_title()
            .await
            .ok()
            .flatten()
            .filter(|t| !t.is_empty());

        let (status_code, body_excerpt) = if self.config.collect_metadata {
            (self.probe_status(url).await, body_excerpt(page).await)
        } else {
            (None, None)
        };

        Ok(TargetMetadata {
            working_url: url.to_string(),
            title,
            status_code,
            body_excerpt,
        })
    }

    async fn probe_status(&self, url: &str) -> Option<u16> {
        let client = self.http.as_ref()?;
        client
            .get(url)
            .send()
            .await
            .ok()
            .map(|response| response.status().as_u16())
    }
}

async fn body_excerpt(page: &Page) -> Option<String> {
    page.evaluate("document.body ? document.body.innerText.slice(0, 200) : ''")
        .await
        .ok()
        .and_then(|value| value.into_value::<String>().ok())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn convert_image_format(
    format: &OutputFormat,
    png_data: Vec<u8>,
) -> Result<Vec<u8>, RotatorError> {
    let encode = |image_format: image::ImageFormat| {
        let img = image::load_from_memory(&png_data)
            .map_err(|e| RotatorError::CaptureFailed(e.to_string()))?;
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image_format)
            .map_err(|e| RotatorError::CaptureFailed(e.to_string()))?;
        Ok(out)
    };

    match format {
        OutputFormat::Png => Ok(png_data),
        OutputFormat::Jpeg => encode(image::ImageFormat::Jpeg),
        OutputFormat::Webp => encode(image::ImageFormat::WebP),
    }
}

#[async_trait]
impl Capturer for ChromeCapturer {
    async fn capture(
        &self,
        target: &str,
        candidates: &[String],
        timeout: Duration,
    ) -> CaptureOutcome {
        let start = Instant::now();
        let mut last_error = None;

        for url in candidates {
            if url::Url::parse(url).is_err() {
                self.sinks.domain_error(target, &format!("Invalid URL: {url}"));
                last_error = Some(RotatorError::InvalidUrl(url.clone()));
                continue;
            }

            match self.try_candidate(target, url, timeout).await {
                Ok(metadata) => {
                    return CaptureOutcome {
                        target: target.to_string(),
                        success: true,
                        metadata: Some(metadata),
                        error: None,
                        duration: start.elapsed(),
                    };
                }
                Err(e) => {
                    self.sinks
                        .domain_error(target, &format!("Failed to load {url}: {e}"));
                    last_error = Some(e);
                }
            }
        }

        CaptureOutcome {
            target: target.to_string(),
            success: false,
            metadata: None,
            error: last_error
                .or_else(|| Some(RotatorError::CaptureFailed("no candidate URLs".to_string()))),
            duration: start.elapsed(),
        }
    }
}
