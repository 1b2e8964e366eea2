//! Renderer error types.

use skin_core::SkinError;
use thiserror::Error;

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur while compositing, loading or exporting.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Error from the editing model.
    #[error(transparent)]
    Core(#[from] SkinError),

    /// The pixel worker has shut down.
    #[error("Pixel worker is closed")]
    WorkerClosed,

    /// The pixel worker thread could not be started.
    #[error("Failed to start pixel worker: {0}")]
    WorkerSpawn(String),

    /// Resource loading failed.
    #[error("Failed to load resource: {0}")]
    Resource(String),

    /// No surface is mounted for the requested key.
    #[error("No surface mounted for {0}")]
    MissingSurface(String),

    /// Export format other than `png` or `vl2`.
    #[error("Unknown export format: {0}")]
    UnknownExportFormat(String),

    /// Writing the skin archive failed.
    #[error("Archive error: {0}")]
    Archive(String),
}

impl From<zip::result::ZipError> for RenderError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}
