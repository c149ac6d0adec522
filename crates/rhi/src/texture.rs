//! Texture constructors built from images, samplers and transitions.
//!
//! Each constructor leaves its image in the steady-state layout of its
//! [`TextureKind`] before returning, and records that layout in the caller's
//! [`LayoutTracker`]. No caller ever receives an image in `UNDEFINED`.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use cloud_rhi::image::LayoutTracker;
//! use cloud_rhi::texture::{Texture, UploadContext};
//!
//! # fn example(ctx: &UploadContext<'_>) -> Result<(), cloud_rhi::RhiError> {
//! let mut tracker = LayoutTracker::new();
//! let target = Texture::storage_2d(
//!     ctx,
//!     &mut tracker,
//!     "cloud_a",
//!     vk::Extent2D { width: 1920, height: 1080 },
//!     vk::Format::R16G16B16A16_SFLOAT,
//! )?;
//! assert_eq!(tracker.layout(target.image()), vk::ImageLayout::GENERAL);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::buffer::{Buffer, BufferUsage};
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, ImageDesc, LayoutTracker, cmd_transition_layout};
use crate::sampler::{Sampler, SamplerDesc};

/// Depth format used by the composite pass.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Format of file-backed textures.
pub const SAMPLED_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Role of a texture, which fixes its usage and steady-state layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Depth,
    Storage2D,
    Storage3D,
    Color,
    Sampled2D,
    Sampled3D,
}

impl TextureKind {
    pub const ALL: [TextureKind; 6] = [
        TextureKind::Depth,
        TextureKind::Storage2D,
        TextureKind::Storage3D,
        TextureKind::Color,
        TextureKind::Sampled2D,
        TextureKind::Sampled3D,
    ];

    /// Layout the texture stays in between passes.
    pub fn steady_layout(self) -> vk::ImageLayout {
        match self {
            TextureKind::Depth => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            TextureKind::Storage2D | TextureKind::Storage3D => vk::ImageLayout::GENERAL,
            TextureKind::Color => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            TextureKind::Sampled2D | TextureKind::Sampled3D => {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            }
        }
    }

    /// Transitions recorded at creation.
    pub fn plan(self) -> TexturePlan {
        use vk::ImageLayout as L;
        let steps: &'static [(L, L)] = match self {
            TextureKind::Depth => &[(L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL)],
            TextureKind::Storage2D | TextureKind::Storage3D => &[(L::UNDEFINED, L::GENERAL)],
            TextureKind::Color => &[(L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL)],
            TextureKind::Sampled2D | TextureKind::Sampled3D => &[
                (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
                (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
            ],
        };
        TexturePlan { kind: self, steps }
    }

    pub fn usage(self) -> vk::ImageUsageFlags {
        match self {
            TextureKind::Depth => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            TextureKind::Storage2D | TextureKind::Storage3D => {
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED
            }
            TextureKind::Color => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
            }
            TextureKind::Sampled2D | TextureKind::Sampled3D => {
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED
            }
        }
    }

    /// Sampler attached to the texture, if it is ever sampled.
    pub fn sampler(self) -> Option<SamplerDesc> {
        match self {
            TextureKind::Depth => None,
            TextureKind::Storage2D | TextureKind::Storage3D | TextureKind::Color => {
                Some(SamplerDesc::linear_clamp())
            }
            TextureKind::Sampled2D | TextureKind::Sampled3D => Some(SamplerDesc::linear_repeat()),
        }
    }
}

/// Ordered layout transitions that take a new image to its steady layout.
#[derive(Clone, Copy, Debug)]
pub struct TexturePlan {
    pub kind: TextureKind,
    pub steps: &'static [(vk::ImageLayout, vk::ImageLayout)],
}

impl TexturePlan {
    /// Replays the plan on `tracker` and returns the final layout.
    pub fn simulate(
        &self,
        tracker: &mut LayoutTracker,
        image: vk::Image,
    ) -> RhiResult<vk::ImageLayout> {
        for &(old, new) in self.steps {
            tracker.apply(image, old, new)?;
        }
        Ok(tracker.layout(image))
    }
}

/// Device handles used while creating textures.
///
/// Creation blocks on `queue`, so it is only used at startup and on resize.
pub struct UploadContext<'a> {
    pub device: Arc<Device>,
    pub pool: &'a CommandPool,
    pub queue: vk::Queue,
    /// Queue families that access the textures.
    pub queue_families: &'a [u32],
}

/// Image, view and optional sampler.
pub struct Texture {
    image: Image,
    sampler: Option<Sampler>,
    kind: TextureKind,
}

impl Texture {
    /// Depth attachment at `extent`.
    pub fn depth(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let desc = ImageDesc::new_2d("depth", extent, DEPTH_FORMAT, TextureKind::Depth.usage());
        Self::create(ctx, tracker, desc, TextureKind::Depth, None)
    }

    /// 2D storage image that compute passes write and later passes sample.
    pub fn storage_2d(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        name: &'static str,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RhiResult<Self> {
        let kind = TextureKind::Storage2D;
        Self::create(
            ctx,
            tracker,
            ImageDesc::new_2d(name, extent, format, kind.usage()),
            kind,
            None,
        )
    }

    /// 3D storage volume.
    pub fn storage_3d(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        name: &'static str,
        extent: vk::Extent3D,
        format: vk::Format,
    ) -> RhiResult<Self> {
        let kind = TextureKind::Storage3D;
        Self::create(
            ctx,
            tracker,
            ImageDesc::new_3d(name, extent, format, kind.usage()),
            kind,
            None,
        )
    }

    /// Color attachment that can later be sampled.
    pub fn color(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        name: &'static str,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> RhiResult<Self> {
        let kind = TextureKind::Color;
        Self::create(
            ctx,
            tracker,
            ImageDesc::new_2d(name, extent, format, kind.usage()),
            kind,
            None,
        )
    }

    /// Sampled RGBA8 2D texture filled from `pixels`.
    ///
    /// # Errors
    ///
    /// Fails when `pixels` does not hold exactly `width * height` texels.
    pub fn sampled_2d_from_pixels(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        name: &'static str,
        extent: vk::Extent2D,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        let kind = TextureKind::Sampled2D;
        let desc = ImageDesc::new_2d(name, extent, SAMPLED_FORMAT, kind.usage());
        Self::create_sampled(ctx, tracker, desc, kind, pixels)
    }

    /// Sampled RGBA8 volume filled from `pixels`, slices in z order.
    pub fn sampled_3d_from_pixels(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        name: &'static str,
        extent: vk::Extent3D,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        let kind = TextureKind::Sampled3D;
        let desc = ImageDesc::new_3d(name, extent, SAMPLED_FORMAT, kind.usage());
        Self::create_sampled(ctx, tracker, desc, kind, pixels)
    }

    fn create_sampled(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        desc: ImageDesc,
        kind: TextureKind,
        pixels: &[u8],
    ) -> RhiResult<Self> {
        let extent = desc.extent;
        let expected = extent.width as usize * extent.height as usize * extent.depth as usize * 4;
        if pixels.len() != expected {
            return Err(RhiError::InvalidHandle(format!(
                "texture '{}' expects {} bytes, got {}",
                desc.name,
                expected,
                pixels.len()
            )));
        }
        let staging = Buffer::new(
            ctx.device.clone(),
            BufferUsage::Staging,
            pixels.len() as vk::DeviceSize,
        )?;
        staging.write_data(0, pixels)?;
        Self::create(ctx, tracker, desc, kind, Some(&staging))
    }

    /// Creates the image, runs the kind's transitions and, for sampled kinds,
    /// copies `staging` in between them.
    fn create(
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        desc: ImageDesc,
        kind: TextureKind,
        staging: Option<&Buffer>,
    ) -> RhiResult<Self> {
        let image = Image::new(ctx.device.clone(), desc, ctx.queue_families)?;
        let handle = image.handle();
        let aspect = desc.aspect();

        ctx.pool.one_time_submit(ctx.queue, |cmd| {
            for &(old, new) in kind.plan().steps {
                cmd_transition_layout(cmd, tracker, handle, aspect, old, new)?;
                if new == vk::ImageLayout::TRANSFER_DST_OPTIMAL
                    && let Some(staging) = staging
                {
                    cmd.copy_buffer_to_image(staging.handle(), handle, desc.extent);
                }
            }
            Ok(())
        })?;

        let sampler = kind
            .sampler()
            .map(|sampler| Sampler::new(ctx.device.clone(), sampler))
            .transpose()?;

        debug!("Texture '{}' ready in {:?}", desc.name, kind.steady_layout());
        Ok(Self {
            image,
            sampler,
            kind,
        })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Sampler handle, null for depth textures.
    #[inline]
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
            .as_ref()
            .map_or(vk::Sampler::null(), Sampler::handle)
    }

    #[inline]
    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        self.image.desc()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.image.desc().format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.image.extent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_every_plan_ends_in_steady_layout() {
        for (index, kind) in TextureKind::ALL.into_iter().enumerate() {
            let image = vk::Image::from_raw(index as u64 + 1);
            let mut tracker = LayoutTracker::new();
            let layout = kind.plan().simulate(&mut tracker, image).unwrap();
            assert_ne!(layout, vk::ImageLayout::UNDEFINED, "{kind:?}");
            assert_eq!(layout, kind.steady_layout(), "{kind:?}");
        }
    }

    #[test]
    fn test_plans_chain_from_undefined() {
        for kind in TextureKind::ALL {
            let steps = kind.plan().steps;
            assert_eq!(steps[0].0, vk::ImageLayout::UNDEFINED, "{kind:?}");
            for pair in steps.windows(2) {
                assert_eq!(pair[0].1, pair[1].0, "{kind:?}");
            }
        }
    }

    #[test]
    fn test_storage_kinds_are_sampleable() {
        for kind in [TextureKind::Storage2D, TextureKind::Storage3D] {
            assert!(kind.usage().contains(vk::ImageUsageFlags::STORAGE));
            assert!(kind.usage().contains(vk::ImageUsageFlags::SAMPLED));
            assert!(kind.sampler().is_some());
        }
        assert!(TextureKind::Depth.sampler().is_none());
    }
}
