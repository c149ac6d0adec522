//! Images, layout transitions and host-side layout tracking.
//!
//! Every layout change goes through [`cmd_transition_layout`], which looks up
//! the barrier masks in a fixed table and records the new layout in a
//! [`LayoutTracker`]. Pairs missing from the table are errors rather than a
//! catch-all barrier.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, trace};

use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Dimensionality of an image and its view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageDimension {
    D2,
    D3,
}

impl ImageDimension {
    fn image_type(self) -> vk::ImageType {
        match self {
            ImageDimension::D2 => vk::ImageType::TYPE_2D,
            ImageDimension::D3 => vk::ImageType::TYPE_3D,
        }
    }

    fn view_type(self) -> vk::ImageViewType {
        match self {
            ImageDimension::D2 => vk::ImageViewType::TYPE_2D,
            ImageDimension::D3 => vk::ImageViewType::TYPE_3D,
        }
    }
}

/// Everything needed to create an image and its view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub name: &'static str,
    pub dimension: ImageDimension,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

impl ImageDesc {
    pub fn new_2d(
        name: &'static str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            name,
            dimension: ImageDimension::D2,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            format,
            usage,
        }
    }

    pub fn new_3d(
        name: &'static str,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            name,
            dimension: ImageDimension::D3,
            extent,
            format,
            usage,
        }
    }

    /// Aspect implied by the format.
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_for_format(self.format)
    }
}

/// Aspect flags for views and barriers of `format`.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Format features an optimal-tiling image needs for `usage`.
pub fn required_format_features(usage: vk::ImageUsageFlags) -> vk::FormatFeatureFlags {
    let mut features = vk::FormatFeatureFlags::empty();
    if usage.contains(vk::ImageUsageFlags::STORAGE) {
        features |= vk::FormatFeatureFlags::STORAGE_IMAGE;
    }
    if usage.contains(vk::ImageUsageFlags::SAMPLED) {
        features |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
    }
    if usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        features |= vk::FormatFeatureFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
        features |= vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
        features |= vk::FormatFeatureFlags::TRANSFER_DST;
    }
    if usage.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
        features |= vk::FormatFeatureFlags::TRANSFER_SRC;
    }
    features
}

/// Device image with its allocation and default view.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: ImageDesc,
}

impl Image {
    /// Creates an image in `UNDEFINED` layout plus a view over all of it.
    ///
    /// `queue_families` lists the families that access the image; more than
    /// one selects concurrent sharing.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::UnsupportedFormat`] when the format lacks the
    /// features required by the usage, or an allocator error when memory runs
    /// out.
    pub fn new(device: Arc<Device>, desc: ImageDesc, queue_families: &[u32]) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 || desc.extent.depth == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "image '{}' has a zero extent {:?}",
                desc.name, desc.extent
            )));
        }
        if !device.supports_format(desc.format, required_format_features(desc.usage)) {
            return Err(RhiError::UnsupportedFormat {
                format: desc.format,
                usage: desc.usage,
            });
        }

        let sharing = if queue_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let image_info = vk::ImageCreateInfo::default()
            .image_type(desc.dimension.image_type())
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(sharing)
            .queue_family_indices(if sharing == vk::SharingMode::CONCURRENT {
                queue_families
            } else {
                &[]
            })
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            desc,
        };
        if let Some(allocation) = this.allocation.as_ref() {
            unsafe {
                this.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }
        this.view = this.create_view()?;

        debug!(
            "Created {:?} image '{}' {}x{}x{} {:?}",
            desc.dimension,
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.extent.depth,
            desc.format
        );
        Ok(this)
    }

    fn create_view(&self) -> RhiResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(self.desc.dimension.view_type())
            .format(self.desc.format)
            .subresource_range(full_range(self.desc.aspect()));
        Ok(unsafe { self.device.handle().create_image_view(&view_info, None)? })
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.desc.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image '{}': {:?}", self.desc.name, e);
                    }
                }
                Err(e) => error!("Leaking image '{}' allocation: {}", self.desc.name, e),
            }
        }
        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }
        debug!("Destroyed image '{}'", self.desc.name);
    }
}

fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Stage and access masks for one layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

/// Looks up barrier masks for `old -> new`.
///
/// `GENERAL -> GENERAL` is the compute write-to-read hazard between passes
/// and frames; it orders storage writes before any later shader access.
///
/// # Errors
///
/// Returns [`RhiError::UnsupportedTransition`] for pairs not in the table.
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RhiResult<TransitionMasks> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let shader_stages = S::COMPUTE_SHADER | S::FRAGMENT_SHADER;
    let masks = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (S::TOP_OF_PIPE, A::empty(), S::TRANSFER, A::TRANSFER_WRITE)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (S::TRANSFER, A::TRANSFER_WRITE, shader_stages, A::SHADER_READ)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        | (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (L::UNDEFINED, L::GENERAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            shader_stages,
            A::SHADER_READ | A::SHADER_WRITE,
        ),
        (L::GENERAL, L::GENERAL) => (
            S::COMPUTE_SHADER,
            A::SHADER_WRITE,
            shader_stages,
            A::SHADER_READ | A::SHADER_WRITE,
        ),
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::empty(),
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
            S::BOTTOM_OF_PIPE,
            A::empty(),
        ),
        _ => return Err(RhiError::UnsupportedTransition { old, new }),
    };

    Ok(TransitionMasks {
        src_stage: masks.0,
        src_access: masks.1,
        dst_stage: masks.2,
        dst_access: masks.3,
    })
}

/// Host-side record of each image's current layout.
///
/// Updated whenever a transition is recorded, so binding code can assert that
/// a descriptor's assumed layout is the image's real layout.
#[derive(Debug, Default, Clone)]
pub struct LayoutTracker {
    layouts: HashMap<vk::Image, vk::ImageLayout>,
}

impl LayoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current layout of `image`, `UNDEFINED` if never transitioned.
    pub fn layout(&self, image: vk::Image) -> vk::ImageLayout {
        self.layouts
            .get(&image)
            .copied()
            .unwrap_or(vk::ImageLayout::UNDEFINED)
    }

    /// Validates `old -> new` against the table and records `new`.
    ///
    /// A transition from `UNDEFINED` discards contents and is accepted from
    /// any tracked layout; otherwise `old` must equal the tracked layout.
    pub fn apply(
        &mut self,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RhiResult<TransitionMasks> {
        let actual = self.layout(image);
        if old != vk::ImageLayout::UNDEFINED && actual != old {
            return Err(RhiError::LayoutMismatch {
                expected: old,
                actual,
            });
        }
        let masks = transition_masks(old, new)?;
        self.layouts.insert(image, new);
        Ok(masks)
    }

    /// Overrides the recorded layout, for images whose layout changes outside
    /// recorded barriers (e.g. presentation).
    pub fn set(&mut self, image: vk::Image, layout: vk::ImageLayout) {
        self.layouts.insert(image, layout);
    }

    /// Drops the record for a destroyed image.
    pub fn forget(&mut self, image: vk::Image) {
        self.layouts.remove(&image);
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// Records a barrier moving `image` from `old` to `new` and updates `tracker`.
///
/// # Errors
///
/// Fails for transitions missing from [`transition_masks`].
pub fn cmd_transition_layout(
    cmd: &CommandBuffer,
    tracker: &mut LayoutTracker,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RhiResult<()> {
    let masks = tracker.apply(image, old, new)?;
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(full_range(aspect))
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);
    cmd.image_barriers(masks.src_stage, masks.dst_stage, &[barrier]);
    trace!("Transition {:?}: {:?} -> {:?}", image, old, new);
    Ok(())
}
