//! RHI error types.

use ash::vk;
use thiserror::Error;

/// Errors raised by the Vulkan abstraction layer.
///
/// Every variant except the presentation results handled by the caller is
/// treated as fatal by the renderer.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No physical device satisfies the renderer's requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader module loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// The device cannot create an image with this format and usage
    #[error("Format {format:?} does not support usage {usage:?}")]
    UnsupportedFormat {
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    },

    /// No barrier masks are defined for this layout pair
    #[error("Unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// A transition or bind assumed a layout the image is not in
    #[error("Image is in layout {actual:?}, expected {expected:?}")]
    LayoutMismatch {
        expected: vk::ImageLayout,
        actual: vk::ImageLayout,
    },

    /// Invalid handle or argument
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
