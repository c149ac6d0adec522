//! Vulkan abstraction layer.
//!
//! Thin RAII wrappers over `ash` used by the cloud renderer:
//! - Instance, physical device selection and logical device
//! - Swapchain and synchronization primitives
//! - Command pools and command buffer recording
//! - Buffers, images, samplers and textures (the resource factory)
//! - Descriptor layouts and pools
//! - Shader modules, compute and graphics pipelines

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
