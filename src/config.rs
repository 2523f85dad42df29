//! Configuration management with serde serialization/deserialization
//!
//! This module provides all configuration structures for the rotator,
//! including worker/batch settings, egress mode, capture options and the
//! Chrome launch parameters derived from them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the rotator
///
/// Controls the worker pool, batch/rotation behavior, per-capture timeout
/// and artifact settings.
///
/// # Examples
///
/// ```rust
/// use screenshot_rotator::Config;
///
/// // Use default configuration
/// let config = Config::default();
///
/// // Create custom configuration
/// let config = Config {
///     workers: 8,
///     batch_size: Some(50),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Size of the capture worker pool (default: CPU count)
    ///
    /// One batch is dispatched across this many concurrent capture units.
    pub workers: usize,

    /// Timeout for a single capture attempt (default: 30 seconds)
    ///
    /// Applies per candidate URL; a target with several candidates may take
    /// a multiple of this before being recorded as failed.
    pub capture_timeout: Duration,

    /// Targets per batch before the egress identity is rotated
    ///
    /// `None` disables batching: the whole remaining queue is dispatched as
    /// a single batch. Must be `Some(n > 0)` whenever an egress mode is
    /// active.
    pub batch_size: Option<usize>,

    /// Egress rotation mode (default: no rotation)
    pub egress: EgressMode,

    /// Extra delay applied before each rotation attempt (default: none)
    pub rotation_delay: Duration,

    /// Output image format for capture artifacts (default: PNG)
    pub output_format: OutputFormat,

    /// Minimum artifact size in bytes for a capture to count as a success
    ///
    /// Renders below this threshold (blank pages, error stubs) are treated
    /// as failures even though image data was produced.
    pub min_artifact_bytes: u64,

    /// Collect per-target metadata (title, status code, body excerpt) and
    /// export it as `metadata.csv` next to the artifacts (default: off)
    pub collect_metadata: bool,

    /// Browser viewport configuration for captures
    pub viewport: Viewport,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            capture_timeout: Duration::from_secs(30),
            batch_size: None,
            egress: EgressMode::None,
            rotation_delay: Duration::ZERO,
            output_format: OutputFormat::Png,
            min_artifact_bytes: 1024,
            collect_metadata: false,
            viewport: Viewport::default(),
            chrome_path: None,
        }
    }
}

/// How the process's outbound network identity is rotated between batches
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum EgressMode {
    /// No rotation; all batches share the host's own identity
    None,
    /// Drive the NordVPN CLI, connecting to a random country per batch
    NordVpn,
    /// Spawn an OpenVPN child process over a random profile from the
    /// given directory per batch
    OpenVpn { config_dir: PathBuf },
}

impl EgressMode {
    pub fn is_active(&self) -> bool {
        !matches!(self, EgressMode::None)
    }
}

/// Browser viewport configuration for captures
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1920)
    pub width: u32,

    /// Viewport height in pixels (default: 1080)
    pub height: u32,

    /// Device pixel ratio for high-DPI displays (default: 1.0)
    pub device_scale_factor: f64,

    /// Whether to emulate a mobile device (default: false)
    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

/// Supported output image formats for capture artifacts
///
/// PNG is lossless and the reconcile-friendly default; JPEG and WebP trade
/// fidelity for size on large target lists.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
        }
    }
}

/// Generate Chrome command-line arguments based on configuration
///
/// Mirrors the flags the capture engine needs for unattended operation:
/// headless rendering, certificate-error tolerance (targets are frequently
/// self-signed), and unique per-instance directories so pooled instances do
/// not trip over Chrome's process singleton.
pub fn get_chrome_args(config: &Config, instance_id: Option<usize>) -> Vec<String> {
    let unique_id = match instance_id {
        Some(id) => format!("{}-{}", std::process::id(), id),
        None => format!("{}-{}", std::process::id(), uuid::Uuid::new_v4()),
    };

    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--allow-running-insecure-content".to_string(),
        "--ignore-certificate-errors".to_string(),
        "--ignore-ssl-errors".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
        format!("--user-data-dir=/tmp/chromium-rotator-{}", unique_id),
        format!(
            "--remote-debugging-port={}",
            9222 + instance_id.unwrap_or(0)
        ),
    ]
}

pub fn create_browser_config(
    config: &Config,
    instance_id: Option<usize>,
) -> chromiumoxide::browser::BrowserConfig {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .args(get_chrome_args(config, instance_id));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder
        .build()
        .unwrap_or_else(|_| BrowserConfig::with_executable("/usr/sbin/chromium"))
}
