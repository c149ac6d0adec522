//! File-backed cloud textures.

use std::path::Path;

use ash::vk;
use cloud_resources::{TextureData, VolumeDims, load_texture_2d, load_volume_slices};
use cloud_rhi::image::LayoutTracker;
use cloud_rhi::texture::{Texture, UploadContext};
use tracing::info;

use crate::binding::{BindingRegistry, BindingSlot};
use crate::error::{BindingError, RendererResult};

/// Where a texture's pixels come from, relative to the asset directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetSource {
    Image(&'static str),
    /// Slices `{prefix}{z}.png` for `z` in `0..dims.depth`.
    Volume {
        prefix: &'static str,
        dims: VolumeDims,
    },
}

/// One texture and the binding it feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssetEntry {
    pub name: &'static str,
    pub source: AssetSource,
    pub slot: BindingSlot,
    pub binding: u32,
}

/// Every file-backed texture, in binding order per set.
pub const CLOUD_ASSETS: [AssetEntry; 7] = [
    AssetEntry {
        name: "low_res_shape",
        source: AssetSource::Volume {
            prefix: "lowResCloud",
            dims: VolumeDims::cube(128),
        },
        slot: BindingSlot::CloudNoise,
        binding: 0,
    },
    AssetEntry {
        name: "hi_res_detail",
        // The slice files carry a space before the index.
        source: AssetSource::Volume {
            prefix: "hiResClouds ",
            dims: VolumeDims::cube(32),
        },
        slot: BindingSlot::CloudNoise,
        binding: 1,
    },
    AssetEntry {
        name: "weather_map",
        source: AssetSource::Image("weather.png"),
        slot: BindingSlot::CloudNoise,
        binding: 2,
    },
    AssetEntry {
        name: "curl_noise",
        source: AssetSource::Image("curlNoise.png"),
        slot: BindingSlot::CloudNoise,
        binding: 3,
    },
    AssetEntry {
        name: "modeling_data",
        source: AssetSource::Volume {
            prefix: "modeling_data",
            dims: VolumeDims::cube(512).with_depth(64),
        },
        slot: BindingSlot::CloudModel,
        binding: 0,
    },
    AssetEntry {
        name: "field_data",
        source: AssetSource::Volume {
            prefix: "field_data",
            dims: VolumeDims::cube(512).with_depth(64),
        },
        slot: BindingSlot::CloudModel,
        binding: 1,
    },
    AssetEntry {
        name: "detail_noise",
        source: AssetSource::Volume {
            prefix: "NubisVoxelCloudNoise",
            dims: VolumeDims::cube(128),
        },
        slot: BindingSlot::CloudModel,
        binding: 2,
    },
];

impl AssetEntry {
    /// Reads the pixels from disk.
    pub fn load(&self, asset_dir: &Path) -> RendererResult<TextureData> {
        let data = match self.source {
            AssetSource::Image(file) => load_texture_2d(&asset_dir.join(file))?,
            AssetSource::Volume { prefix, dims } => {
                load_volume_slices(&asset_dir.join(prefix), dims)?
            }
        };
        Ok(data)
    }

    fn upload(
        &self,
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        data: &TextureData,
    ) -> RendererResult<Texture> {
        let texture = if data.is_volume() {
            Texture::sampled_3d_from_pixels(
                ctx,
                tracker,
                self.name,
                vk::Extent3D {
                    width: data.width,
                    height: data.height,
                    depth: data.depth,
                },
                &data.pixels,
            )?
        } else {
            Texture::sampled_2d_from_pixels(
                ctx,
                tracker,
                self.name,
                vk::Extent2D {
                    width: data.width,
                    height: data.height,
                },
                &data.pixels,
            )?
        };
        Ok(texture)
    }
}

/// Noise and modeling textures sampled by the raymarch passes.
///
/// Loaded once at startup; never recreated on resize.
pub struct CloudAssets {
    textures: Vec<(AssetEntry, Texture)>,
}

impl CloudAssets {
    /// Loads and uploads every entry of [`CLOUD_ASSETS`].
    pub fn load(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        asset_dir: &Path,
    ) -> RendererResult<Self> {
        let mut textures = Vec::with_capacity(CLOUD_ASSETS.len());
        for entry in CLOUD_ASSETS {
            let data = entry.load(asset_dir)?;
            let texture = entry.upload(ctx, tracker, &data)?;
            info!(
                "Loaded {} ({}x{}x{})",
                entry.name, data.width, data.height, data.depth
            );
            textures.push((entry, texture));
        }
        Ok(Self { textures })
    }

    /// Writes every texture into its noise or model set.
    pub fn write_bindings(&self, registry: &mut BindingRegistry) -> Result<(), BindingError> {
        for (entry, texture) in &self.textures {
            registry.write_sampled_image(entry.slot, entry.binding, texture)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::LayoutShape;

    #[test]
    fn test_assets_fill_every_sampler_binding() {
        for slot in [BindingSlot::CloudNoise, BindingSlot::CloudModel] {
            let mut bindings: Vec<u32> = CLOUD_ASSETS
                .iter()
                .filter(|entry| entry.slot == slot)
                .map(|entry| entry.binding)
                .collect();
            bindings.sort_unstable();
            let expected: Vec<u32> = slot.shape().bindings().iter().map(|b| b.binding).collect();
            assert_eq!(bindings, expected, "{:?}", slot);
        }
        assert!(CLOUD_ASSETS.iter().all(|entry| matches!(
            entry.slot.shape(),
            LayoutShape::CloudNoise | LayoutShape::CloudModel
        )));
    }

    #[test]
    fn test_volume_dimensions() {
        let dims = |name: &str| {
            CLOUD_ASSETS
                .iter()
                .find_map(|entry| match entry.source {
                    AssetSource::Volume { dims, .. } if entry.name == name => Some(dims),
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(dims("low_res_shape"), VolumeDims::cube(128));
        assert_eq!(dims("hi_res_detail"), VolumeDims::cube(32));
        assert_eq!(
            dims("modeling_data"),
            VolumeDims {
                width: 512,
                height: 512,
                depth: 64
            }
        );
    }

    #[test]
    fn test_missing_asset_is_an_error() {
        let dir = std::env::temp_dir().join("cloud_renderer_missing_assets");
        assert!(CLOUD_ASSETS[2].load(&dir).is_err());
    }
}
