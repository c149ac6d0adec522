//! Per-resolution images and per-slot uniform buffers.

use std::sync::Arc;

use ash::vk;
use cloud_rhi::buffer::UniformBuffer;
use cloud_rhi::device::Device;
use cloud_rhi::image::LayoutTracker;
use cloud_rhi::texture::{DEPTH_FORMAT, Texture, TextureKind, UploadContext};
use cloud_rhi::{RhiError, RhiResult};
use tracing::{debug, info};

use crate::dispatch::half_extent;
use crate::frame_loop::FrameSnapshot;
use crate::pingpong::PingPong;
use crate::ubo::{CameraParamsUbo, CameraUbo, TimeUbo, UiParamsUbo};

/// Format of the cloud storage pair and the near-field target.
pub const CLOUD_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Format of the light-grid volume.
pub const LIGHT_GRID_FORMAT: vk::Format = vk::Format::R32_SFLOAT;
/// Light-grid volume size.
pub const LIGHT_GRID_EXTENT: vk::Extent3D = vk::Extent3D {
    width: cloud_core::config::LIGHT_GRID_DIMS[0],
    height: cloud_core::config::LIGHT_GRID_DIMS[1],
    depth: cloud_core::config::LIGHT_GRID_DIMS[2],
};

/// What a frame image is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameRole {
    Depth,
    CloudA,
    CloudB,
    LightGrid,
    Near,
}

/// One image of [`FrameResourceLayout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameImageDesc {
    pub role: FrameRole,
    pub kind: TextureKind,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

impl FrameImageDesc {
    fn flat(role: FrameRole, kind: TextureKind, format: vk::Format, extent: vk::Extent2D) -> Self {
        Self {
            role,
            kind,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        }
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

/// Every per-resolution image for a swapchain extent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameResourceLayout {
    pub extent: vk::Extent2D,
    pub images: [FrameImageDesc; 5],
}

impl FrameResourceLayout {
    pub fn describe(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            images: [
                FrameImageDesc::flat(FrameRole::Depth, TextureKind::Depth, DEPTH_FORMAT, extent),
                FrameImageDesc::flat(FrameRole::CloudA, TextureKind::Storage2D, CLOUD_FORMAT, extent),
                FrameImageDesc::flat(FrameRole::CloudB, TextureKind::Storage2D, CLOUD_FORMAT, extent),
                FrameImageDesc {
                    role: FrameRole::LightGrid,
                    kind: TextureKind::Storage3D,
                    format: LIGHT_GRID_FORMAT,
                    extent: LIGHT_GRID_EXTENT,
                },
                FrameImageDesc::flat(
                    FrameRole::Near,
                    TextureKind::Storage2D,
                    CLOUD_FORMAT,
                    half_extent(extent),
                ),
            ],
        }
    }

    pub fn get(&self, role: FrameRole) -> &FrameImageDesc {
        // Every role is described exactly once.
        let index = match role {
            FrameRole::Depth => 0,
            FrameRole::CloudA => 1,
            FrameRole::CloudB => 2,
            FrameRole::LightGrid => 3,
            FrameRole::Near => 4,
        };
        &self.images[index]
    }

    /// Roles, kinds and formats, ignoring extents.
    pub fn shape(&self) -> Vec<(FrameRole, TextureKind, vk::Format)> {
        self.images
            .iter()
            .map(|image| (image.role, image.kind, image.format))
            .collect()
    }
}

/// Constructor a frame image is created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameConstructor {
    Depth,
    Storage2D,
    Storage3D,
}

impl FrameConstructor {
    /// Frame images are attachments or compute targets; file-backed and
    /// color kinds are rejected.
    fn for_image(desc: &FrameImageDesc) -> RhiResult<Self> {
        match desc.kind {
            TextureKind::Depth => Ok(FrameConstructor::Depth),
            TextureKind::Storage2D => Ok(FrameConstructor::Storage2D),
            TextureKind::Storage3D => Ok(FrameConstructor::Storage3D),
            TextureKind::Color | TextureKind::Sampled2D | TextureKind::Sampled3D => {
                Err(RhiError::InvalidHandle(format!(
                    "frame image {:?} cannot be a {:?} texture",
                    desc.role, desc.kind
                )))
            }
        }
    }
}

fn create_image(
    ctx: &UploadContext<'_>,
    tracker: &mut LayoutTracker,
    desc: &FrameImageDesc,
) -> RhiResult<Texture> {
    let name = match desc.role {
        FrameRole::Depth => "depth",
        FrameRole::CloudA => "cloud_a",
        FrameRole::CloudB => "cloud_b",
        FrameRole::LightGrid => "light_grid",
        FrameRole::Near => "near_field",
    };
    match FrameConstructor::for_image(desc)? {
        FrameConstructor::Depth => Texture::depth(ctx, tracker, desc.extent_2d()),
        FrameConstructor::Storage2D => {
            Texture::storage_2d(ctx, tracker, name, desc.extent_2d(), desc.format)
        }
        FrameConstructor::Storage3D => {
            Texture::storage_3d(ctx, tracker, name, desc.extent, desc.format)
        }
    }
}

/// Images sized from the swapchain extent. Recreated on resize.
pub struct FrameResources {
    layout: FrameResourceLayout,
    depth: Texture,
    clouds: PingPong<Texture>,
    light_grid: Texture,
    near: Texture,
}

impl FrameResources {
    pub fn create(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        layout: &FrameResourceLayout,
    ) -> RhiResult<Self> {
        let depth = create_image(ctx, tracker, layout.get(FrameRole::Depth))?;
        let clouds = PingPong::new(
            create_image(ctx, tracker, layout.get(FrameRole::CloudA))?,
            create_image(ctx, tracker, layout.get(FrameRole::CloudB))?,
        );
        let light_grid = create_image(ctx, tracker, layout.get(FrameRole::LightGrid))?;
        let near = create_image(ctx, tracker, layout.get(FrameRole::Near))?;

        info!(
            "Frame resources created at {}x{}",
            layout.extent.width, layout.extent.height
        );
        Ok(Self {
            layout: layout.clone(),
            depth,
            clouds,
            light_grid,
            near,
        })
    }

    /// Removes this set's images from `tracker` before it is dropped.
    pub fn forget(&self, tracker: &mut LayoutTracker) {
        for texture in self.textures() {
            tracker.forget(texture.image());
        }
    }

    fn textures(&self) -> impl Iterator<Item = &Texture> {
        [&self.depth, &self.light_grid, &self.near]
            .into_iter()
            .chain(self.clouds.iter())
    }

    pub fn layout(&self) -> &FrameResourceLayout {
        &self.layout
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.layout.extent
    }

    pub fn depth(&self) -> &Texture {
        &self.depth
    }

    pub fn clouds(&self) -> &PingPong<Texture> {
        &self.clouds
    }

    pub fn light_grid(&self) -> &Texture {
        &self.light_grid
    }

    pub fn near(&self) -> &Texture {
        &self.near
    }
}

/// Uniform buffers owned by one frame slot.
///
/// Written only after the slot's in-flight fence has signaled.
pub struct FrameUniforms {
    camera: UniformBuffer<CameraUbo>,
    previous_camera: UniformBuffer<CameraUbo>,
    camera_params: UniformBuffer<CameraParamsUbo>,
    time: UniformBuffer<TimeUbo>,
    ui: UniformBuffer<UiParamsUbo>,
}

impl FrameUniforms {
    pub fn new(device: &Arc<Device>, initial: &FrameSnapshot) -> RhiResult<Self> {
        Ok(Self {
            camera: UniformBuffer::new(device.clone(), &initial.camera)?,
            previous_camera: UniformBuffer::new(device.clone(), &initial.previous_camera)?,
            camera_params: UniformBuffer::new(device.clone(), &initial.camera_params)?,
            time: UniformBuffer::new(device.clone(), &initial.time)?,
            ui: UniformBuffer::new(device.clone(), &UiParamsUbo::from(&initial.ui))?,
        })
    }

    pub fn upload(&self, snapshot: &FrameSnapshot) -> RhiResult<()> {
        self.camera.write(&snapshot.camera)?;
        self.previous_camera.write(&snapshot.previous_camera)?;
        self.camera_params.write(&snapshot.camera_params)?;
        self.time.write(&snapshot.time)?;
        self.ui.write(&UiParamsUbo::from(&snapshot.ui))?;
        debug!("Uniforms uploaded, total time {:.2}", snapshot.time.total);
        Ok(())
    }

    pub fn view_projection_buffer(&self) -> vk::DescriptorBufferInfo {
        self.camera.descriptor_info()
    }

    pub fn previous_buffer(&self) -> vk::DescriptorBufferInfo {
        self.previous_camera.descriptor_info()
    }

    pub fn parameter_buffer(&self) -> vk::DescriptorBufferInfo {
        self.camera_params.descriptor_info()
    }

    pub fn time_buffer(&self) -> vk::DescriptorBufferInfo {
        self.time.descriptor_info()
    }

    pub fn ui_buffer(&self) -> vk::DescriptorBufferInfo {
        self.ui.descriptor_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_describe_resize_round_trip() {
        let full_hd = FrameResourceLayout::describe(extent(1920, 1080));
        let smaller = FrameResourceLayout::describe(extent(1280, 720));

        assert_eq!(full_hd.shape(), smaller.shape());
        assert_eq!(full_hd.images.len(), 5);

        assert_eq!(smaller.get(FrameRole::CloudA).extent_2d(), extent(1280, 720));
        assert_eq!(smaller.get(FrameRole::CloudB).extent_2d(), extent(1280, 720));
        assert_eq!(smaller.get(FrameRole::Depth).extent_2d(), extent(1280, 720));
        assert_eq!(smaller.get(FrameRole::Near).extent_2d(), extent(640, 360));
        assert_eq!(full_hd.get(FrameRole::Near).extent_2d(), extent(960, 540));

        // Back to the original size describes the original set.
        assert_eq!(FrameResourceLayout::describe(extent(1920, 1080)), full_hd);
    }

    #[test]
    fn test_light_grid_ignores_window_size() {
        let a = FrameResourceLayout::describe(extent(1920, 1080));
        let b = FrameResourceLayout::describe(extent(320, 200));
        assert_eq!(a.get(FrameRole::LightGrid), b.get(FrameRole::LightGrid));
        assert_eq!(
            a.get(FrameRole::LightGrid).extent,
            vk::Extent3D {
                width: 512,
                height: 512,
                depth: 64
            }
        );
    }

    #[test]
    fn test_get_matches_role() {
        let layout = FrameResourceLayout::describe(extent(800, 600));
        for image in &layout.images {
            assert_eq!(layout.get(image.role), image);
        }
    }

    #[test]
    fn test_only_attachment_and_storage_kinds_are_frame_images() {
        let layout = FrameResourceLayout::describe(extent(800, 600));
        for image in &layout.images {
            assert!(FrameConstructor::for_image(image).is_ok(), "{:?}", image.role);
        }
        assert_eq!(
            FrameConstructor::for_image(layout.get(FrameRole::LightGrid)).unwrap(),
            FrameConstructor::Storage3D
        );

        for kind in [TextureKind::Color, TextureKind::Sampled2D, TextureKind::Sampled3D] {
            let desc = FrameImageDesc {
                kind,
                ..*layout.get(FrameRole::CloudA)
            };
            assert!(matches!(
                FrameConstructor::for_image(&desc),
                Err(RhiError::InvalidHandle(_))
            ));
        }
    }

    #[test]
    fn test_described_images_end_in_steady_layout() {
        let layout = FrameResourceLayout::describe(extent(800, 600));
        let mut tracker = LayoutTracker::new();
        for (i, image) in layout.images.iter().enumerate() {
            let handle = vk::Image::from_raw(i as u64 + 1);
            let last = image.kind.plan().simulate(&mut tracker, handle).unwrap();
            assert_eq!(last, image.kind.steady_layout());
            assert_ne!(last, vk::ImageLayout::UNDEFINED);
        }
    }
}
