//! CPU-side texture loading.
//!
//! Decodes PNG files into tightly packed RGBA8 texels ready for a staging
//! upload:
//! - [`load_texture_2d`] reads a single image
//! - [`load_volume_slices`] stacks numbered z-slices into a 3D volume

mod error;
mod texture;

pub use error::{ResourceError, ResourceResult};
pub use texture::{TextureData, VolumeDims, load_texture_2d, load_volume_slices, slice_path};
