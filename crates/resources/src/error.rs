//! Error types for texture loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for texture loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Decoding failed.
    #[error("Failed to decode image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// A volume slice does not match the declared volume size.
    #[error(
        "Slice '{path}' is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}"
    )]
    SliceSizeMismatch {
        path: PathBuf,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// A volume was declared with a zero dimension.
    #[error("Volume '{0}' has a zero dimension")]
    EmptyVolume(String),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
