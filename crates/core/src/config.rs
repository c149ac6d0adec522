//! Compile-time renderer configuration.
//!
//! There is no configuration file or command line. The defaults below are the
//! values the application starts with; [`RendererConfig::validate`] guards
//! against values that would produce zero-sized GPU resources.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Window title shown by the application.
pub const WINDOW_TITLE: &str = "Vulkan Cloud Rendering";
/// Initial window width in pixels.
pub const INITIAL_WIDTH: u32 = 1920;
/// Initial window height in pixels.
pub const INITIAL_HEIGHT: u32 = 1080;
/// Voxel dimensions of the light-grid volume.
pub const LIGHT_GRID_DIMS: [u32; 3] = [512, 512, 64];

/// Startup settings for the renderer and its window.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Enables the Khronos validation layer and debug messenger.
    pub enable_validation: bool,
    /// Directory containing the compiled `.spv` shaders.
    pub shader_dir: PathBuf,
    /// Directory containing textures and noise volumes.
    pub asset_dir: PathBuf,
    pub light_grid_dims: [u32; 3],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: WINDOW_TITLE.to_string(),
            width: INITIAL_WIDTH,
            height: INITIAL_HEIGHT,
            enable_validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
            asset_dir: PathBuf::from("images"),
            light_grid_dims: LIGHT_GRID_DIMS,
        }
    }
}

impl RendererConfig {
    /// Checks that every extent is non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "initial resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.light_grid_dims.contains(&0) {
            return Err(Error::Config(format!(
                "light grid dimensions must be non-zero, got {:?}",
                self.light_grid_dims
            )));
        }
        Ok(())
    }

    /// Resolves a shader file name against [`RendererConfig::shader_dir`].
    pub fn shader_path(&self, file: &str) -> PathBuf {
        self.shader_dir.join(file)
    }

    /// Resolves an asset path against [`RendererConfig::asset_dir`].
    pub fn asset_path(&self, file: &str) -> PathBuf {
        self.asset_dir.join(file)
    }
}
