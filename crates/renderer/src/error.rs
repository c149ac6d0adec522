//! Renderer error types.

use ash::vk;
use cloud_resources::ResourceError;
use cloud_rhi::RhiError;
use thiserror::Error;

use crate::binding::{BindingSlot, PoolResource};

/// Errors raised by the binding layer.
///
/// Pool exhaustion is reported when the registry is built, never from an
/// individual allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("Descriptor pool exhausted: {resource:?} needs {required}, capacity is {capacity}")]
    PoolExhausted {
        resource: PoolResource,
        required: u32,
        capacity: u32,
    },

    #[error(
        "Binding {binding} of {slot:?} assumes layout {expected:?} but the image is in {actual:?}"
    )]
    LayoutMismatch {
        slot: BindingSlot,
        binding: u32,
        expected: vk::ImageLayout,
        actual: vk::ImageLayout,
    },

    #[error("Binding {binding} of {slot:?} is not a {expected:?} descriptor")]
    WrongDescriptorType {
        slot: BindingSlot,
        binding: u32,
        expected: vk::DescriptorType,
    },

    #[error("No descriptor set was allocated for {0:?}")]
    UnknownSlot(BindingSlot),
}

/// Errors raised while building or driving the renderer.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Core(#[from] cloud_core::Error),

    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("Overlay error: {0}")]
    Overlay(String),
}

/// Result type alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;
