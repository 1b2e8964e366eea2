//! Error types for skin editing operations.

use thiserror::Error;

/// Result type for skin editing operations.
pub type SkinResult<T> = Result<T, SkinError>;

/// Errors that can occur in skin editing operations.
#[derive(Debug, Error)]
pub enum SkinError {
    /// A decoded image had no pixels along one axis.
    #[error("Zero-dimension image ({width}x{height})")]
    ZeroDimensionImage {
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
    },

    /// Image bytes could not be decoded.
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Pixel data could not be encoded.
    #[error("Failed to encode image: {0}")]
    Encode(String),

    /// A raw pixel buffer does not match its declared dimensions.
    #[error("Pixel buffer length mismatch: expected {expected} bytes, got {actual}")]
    BufferLength {
        /// Byte length implied by width and height.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },

    /// Surface not registered.
    #[error("Surface not found: {0}")]
    SurfaceNotFound(String),

    /// Layer not present on the surface.
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    /// The base layer cannot be selected, locked, moved or removed.
    #[error("The base layer is protected")]
    BaseLayerProtected,

    /// Transform edits are rejected on locked layers.
    #[error("Layer is locked: {0}")]
    Locked(String),

    /// Snapshot serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An animated material's frame-zero filename does not end in two digits.
    #[error("Did not match expected frame format: {0}")]
    UnexpectedFrameFilename(String),

    /// Model type other than player, weapon or vehicle.
    #[error("Unknown model type: {0}")]
    UnknownModelType(String),

    /// Channel other than color or metallic.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
