use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

#[derive(Debug, Clone, Error)]
pub enum RotatorError {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Browser instance unavailable")]
    BrowserUnavailable,

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("URL loading failed: {0}")]
    UrlLoadFailed(String),

    #[error("Screenshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Artifact below minimum size: {0} bytes")]
    ArtifactTooSmall(usize),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Egress provider error: {0}")]
    Egress(String),

    #[error("Egress acquisition exhausted after {0} attempts")]
    EgressExhausted(usize),

    #[error("Session persistence error: {0}")]
    Persistence(String),

    #[error("Report generation failed: {0}")]
    ReportFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Semaphore acquire error: {0}")]
    SemaphoreError(String),
}

impl RotatorError {
    /// Errors that end the run rather than a single target.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RotatorError::Setup(_) | RotatorError::EgressExhausted(_)
        )
    }
}

impl From<AcquireError> for RotatorError {
    fn from(err: AcquireError) -> Self {
        RotatorError::SemaphoreError(err.to_string())
    }
}

impl From<std::io::Error> for RotatorError {
    fn from(err: std::io::Error) -> Self {
        RotatorError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for RotatorError {
    fn from(err: serde_json::Error) -> Self {
        RotatorError::SerializationError(err.to_string())
    }
}
