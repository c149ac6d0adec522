//! Descriptor binding layer.
//!
//! Every descriptor set the renderer uses is named by a [`BindingSlot`] and
//! has one of the fixed [`LayoutShape`]s. The full list of slots is known up
//! front as a [`BindingPlan`], which is tallied and checked against the
//! declared [`PoolCapacity`] before any Vulkan object is created. Sets are
//! written at startup and again only when per-resolution images change.
//!
//! Binding numbers within a shape are shared with the shaders and must not
//! be renumbered.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ash::vk;
use cloud_rhi::descriptor::{
    BindingDesc, DescriptorPool, DescriptorSetLayout, image_info, write_image,
    write_uniform_buffer,
};
use cloud_rhi::device::Device;
use cloud_rhi::image::LayoutTracker;
use cloud_rhi::texture::Texture;
use tracing::{debug, info};

use crate::error::{BindingError, RendererResult};

const ALL: vk::ShaderStageFlags = vk::ShaderStageFlags::ALL;
const COMPUTE: vk::ShaderStageFlags = vk::ShaderStageFlags::COMPUTE;
const COMPUTE_FRAGMENT: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::COMPUTE.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

const STORAGE_IMAGE_BINDINGS: [BindingDesc; 1] = [BindingDesc::storage_image(0, COMPUTE)];
const SAMPLED_IMAGE_BINDINGS: [BindingDesc; 1] = [BindingDesc::sampler(0, COMPUTE_FRAGMENT)];
const CAMERA_BINDINGS: [BindingDesc; 3] = [
    BindingDesc::uniform(0, ALL),
    BindingDesc::uniform(1, ALL),
    BindingDesc::uniform(2, ALL),
];
const SCENE_BINDINGS: [BindingDesc; 1] = [BindingDesc::uniform(0, ALL)];
const CLOUD_NOISE_BINDINGS: [BindingDesc; 4] = [
    BindingDesc::sampler(0, COMPUTE),
    BindingDesc::sampler(1, COMPUTE),
    BindingDesc::sampler(2, COMPUTE),
    BindingDesc::sampler(3, COMPUTE),
];
const CLOUD_MODEL_BINDINGS: [BindingDesc; 3] = [
    BindingDesc::sampler(0, COMPUTE),
    BindingDesc::sampler(1, COMPUTE),
    BindingDesc::sampler(2, COMPUTE),
];
const UI_PARAMS_BINDINGS: [BindingDesc; 1] = [BindingDesc::uniform(0, ALL)];

/// Fixed descriptor set layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayoutShape {
    /// 0: storage image.
    StorageImage,
    /// 0: combined image sampler.
    SampledImage,
    /// 0: camera, 1: previous camera, 2: camera parameters.
    Camera,
    /// 0: time and sun.
    Scene,
    /// 0: low-res shape, 1: hi-res detail, 2: weather map, 3: curl noise.
    CloudNoise,
    /// 0: modeling data, 1: field data, 2: detail noise.
    CloudModel,
    /// 0: overlay parameters.
    UiParams,
}

impl LayoutShape {
    pub const ALL: [LayoutShape; 7] = [
        LayoutShape::StorageImage,
        LayoutShape::SampledImage,
        LayoutShape::Camera,
        LayoutShape::Scene,
        LayoutShape::CloudNoise,
        LayoutShape::CloudModel,
        LayoutShape::UiParams,
    ];

    pub fn bindings(self) -> &'static [BindingDesc] {
        match self {
            LayoutShape::StorageImage => &STORAGE_IMAGE_BINDINGS,
            LayoutShape::SampledImage => &SAMPLED_IMAGE_BINDINGS,
            LayoutShape::Camera => &CAMERA_BINDINGS,
            LayoutShape::Scene => &SCENE_BINDINGS,
            LayoutShape::CloudNoise => &CLOUD_NOISE_BINDINGS,
            LayoutShape::CloudModel => &CLOUD_MODEL_BINDINGS,
            LayoutShape::UiParams => &UI_PARAMS_BINDINGS,
        }
    }

    /// Position in [`LayoutShape::ALL`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    fn descriptor_type(self, binding: u32) -> Option<vk::DescriptorType> {
        self.bindings()
            .iter()
            .find(|desc| desc.binding == binding)
            .map(|desc| desc.ty)
    }
}

/// A descriptor set instance.
///
/// Ping-pong members carry their pair index (0 or 1); per-frame uniforms
/// carry their frame-in-flight slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingSlot {
    CloudStorage(usize),
    CloudSampled(usize),
    LightGridStorage,
    LightGridSampled,
    NearStorage,
    CloudNoise,
    CloudModel,
    Camera(usize),
    Scene(usize),
    Ui(usize),
}

impl BindingSlot {
    pub fn shape(self) -> LayoutShape {
        match self {
            BindingSlot::CloudStorage(_)
            | BindingSlot::LightGridStorage
            | BindingSlot::NearStorage => LayoutShape::StorageImage,
            BindingSlot::CloudSampled(_) | BindingSlot::LightGridSampled => {
                LayoutShape::SampledImage
            }
            BindingSlot::CloudNoise => LayoutShape::CloudNoise,
            BindingSlot::CloudModel => LayoutShape::CloudModel,
            BindingSlot::Camera(_) => LayoutShape::Camera,
            BindingSlot::Scene(_) => LayoutShape::Scene,
            BindingSlot::Ui(_) => LayoutShape::UiParams,
        }
    }
}

/// Pool budget dimension that a plan can exceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolResource {
    Sets,
    Descriptors(vk::DescriptorType),
}

/// Summed demand of a plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolTally {
    pub storage_images: u32,
    pub combined_image_samplers: u32,
    pub uniform_buffers: u32,
    pub sets: u32,
}

impl PoolTally {
    fn add(&mut self, ty: vk::DescriptorType) {
        match ty {
            vk::DescriptorType::STORAGE_IMAGE => self.storage_images += 1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => self.combined_image_samplers += 1,
            vk::DescriptorType::UNIFORM_BUFFER => self.uniform_buffers += 1,
            _ => {}
        }
    }
}

/// Every slot that will ever be allocated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingPlan {
    slots: Vec<BindingSlot>,
}

impl BindingPlan {
    pub fn new(slots: Vec<BindingSlot>) -> Self {
        Self { slots }
    }

    /// Slots allocated at startup for `frames_in_flight` uniform slots.
    pub fn startup(frames_in_flight: usize) -> Self {
        let mut slots = vec![
            BindingSlot::CloudStorage(0),
            BindingSlot::CloudStorage(1),
            BindingSlot::CloudSampled(0),
            BindingSlot::CloudSampled(1),
            BindingSlot::LightGridStorage,
            BindingSlot::LightGridSampled,
            BindingSlot::NearStorage,
            BindingSlot::CloudNoise,
            BindingSlot::CloudModel,
        ];
        for frame in 0..frames_in_flight {
            slots.extend([
                BindingSlot::Camera(frame),
                BindingSlot::Scene(frame),
                BindingSlot::Ui(frame),
            ]);
        }
        Self { slots }
    }

    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    /// Descriptors per type and the set count.
    pub fn tally(&self) -> PoolTally {
        let mut tally = PoolTally::default();
        for slot in &self.slots {
            for desc in slot.shape().bindings() {
                tally.add(desc.ty);
            }
            tally.sets += 1;
        }
        tally
    }
}

/// Declared descriptor pool budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolCapacity {
    pub storage_images: u32,
    pub combined_image_samplers: u32,
    pub uniform_buffers: u32,
    pub max_sets: u32,
}

impl PoolCapacity {
    /// Budget the renderer's pool is created with.
    pub const fn declared() -> Self {
        Self {
            storage_images: 8,
            combined_image_samplers: 16,
            uniform_buffers: 16,
            max_sets: 24,
        }
    }

    /// Fails on the first dimension `tally` overflows.
    pub fn check(&self, tally: &PoolTally) -> Result<(), BindingError> {
        let dims = [
            (
                PoolResource::Descriptors(vk::DescriptorType::STORAGE_IMAGE),
                tally.storage_images,
                self.storage_images,
            ),
            (
                PoolResource::Descriptors(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
                tally.combined_image_samplers,
                self.combined_image_samplers,
            ),
            (
                PoolResource::Descriptors(vk::DescriptorType::UNIFORM_BUFFER),
                tally.uniform_buffers,
                self.uniform_buffers,
            ),
            (PoolResource::Sets, tally.sets, self.max_sets),
        ];
        for (resource, required, capacity) in dims {
            if required > capacity {
                return Err(BindingError::PoolExhausted {
                    resource,
                    required,
                    capacity,
                });
            }
        }
        Ok(())
    }

    pub fn pool_sizes(&self) -> [vk::DescriptorPoolSize; 3] {
        [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: self.storage_images,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: self.combined_image_samplers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: self.uniform_buffers,
            },
        ]
    }
}

/// Image layouts assumed by the image descriptors written so far.
#[derive(Clone, Debug, Default)]
pub struct AssumedLayouts {
    entries: HashMap<BindingSlot, BTreeMap<u32, (vk::Image, vk::ImageLayout)>>,
}

impl AssumedLayouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever `binding` of `slot` pointed at before.
    pub fn record(
        &mut self,
        slot: BindingSlot,
        binding: u32,
        image: vk::Image,
        layout: vk::ImageLayout,
    ) {
        self.entries
            .entry(slot)
            .or_default()
            .insert(binding, (image, layout));
    }

    pub fn get(&self, slot: BindingSlot, binding: u32) -> Option<(vk::Image, vk::ImageLayout)> {
        self.entries
            .get(&slot)
            .and_then(|bindings| bindings.get(&binding))
            .copied()
    }

    /// Checks every image behind `slot` against `tracker`.
    pub fn validate(&self, slot: BindingSlot, tracker: &LayoutTracker) -> Result<(), BindingError> {
        let Some(bindings) = self.entries.get(&slot) else {
            return Ok(());
        };
        for (&binding, &(image, expected)) in bindings {
            let actual = tracker.layout(image);
            if actual != expected {
                return Err(BindingError::LayoutMismatch {
                    slot,
                    binding,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Owns the set layouts, the pool and every allocated set.
///
/// Dropping the registry releases the pool (and with it every set) and then
/// the layouts. The owner must wait for the device to go idle first.
pub struct BindingRegistry {
    device: Arc<Device>,
    sets: HashMap<BindingSlot, vk::DescriptorSet>,
    assumed: AssumedLayouts,
    pool: DescriptorPool,
    layouts: Vec<DescriptorSetLayout>,
}

impl BindingRegistry {
    /// Checks `plan` against `capacity`, then creates one layout per shape
    /// and allocates one set per slot.
    pub fn build(
        device: Arc<Device>,
        plan: &BindingPlan,
        capacity: PoolCapacity,
    ) -> RendererResult<Self> {
        let tally = plan.tally();
        capacity.check(&tally)?;

        let layouts = LayoutShape::ALL
            .iter()
            .map(|shape| DescriptorSetLayout::new(device.clone(), shape.bindings()))
            .collect::<Result<Vec<_>, _>>()?;

        let pool = DescriptorPool::new(device.clone(), capacity.max_sets, &capacity.pool_sizes())?;
        let set_layouts: Vec<_> = plan
            .slots()
            .iter()
            .map(|slot| layouts[slot.shape().index()].handle())
            .collect();
        let sets = pool.allocate(&set_layouts)?;
        let sets = plan.slots().iter().copied().zip(sets).collect();

        info!(
            "Binding registry ready: {} sets ({} storage, {} sampled, {} uniform descriptors)",
            tally.sets, tally.storage_images, tally.combined_image_samplers, tally.uniform_buffers
        );

        Ok(Self {
            device,
            sets,
            assumed: AssumedLayouts::new(),
            pool,
            layouts,
        })
    }

    /// Shared layout for `shape`.
    pub fn layout(&self, shape: LayoutShape) -> vk::DescriptorSetLayout {
        self.layouts[shape.index()].handle()
    }

    pub fn set(&self, slot: BindingSlot) -> Result<vk::DescriptorSet, BindingError> {
        self.sets
            .get(&slot)
            .copied()
            .ok_or(BindingError::UnknownSlot(slot))
    }

    pub fn pool_capacity(&self) -> u32 {
        self.pool.max_sets()
    }

    pub fn write_uniform(
        &self,
        slot: BindingSlot,
        binding: u32,
        info: vk::DescriptorBufferInfo,
    ) -> Result<(), BindingError> {
        let set = self.checked_set(slot, binding, vk::DescriptorType::UNIFORM_BUFFER)?;
        write_uniform_buffer(&self.device, set, binding, info);
        Ok(())
    }

    /// Points a storage binding at `texture`, which must stay in `GENERAL`.
    pub fn write_storage_image(
        &mut self,
        slot: BindingSlot,
        binding: u32,
        texture: &Texture,
    ) -> Result<(), BindingError> {
        let ty = vk::DescriptorType::STORAGE_IMAGE;
        let set = self.checked_set(slot, binding, ty)?;
        let layout = vk::ImageLayout::GENERAL;
        write_image(
            &self.device,
            set,
            binding,
            ty,
            image_info(vk::Sampler::null(), texture.view(), layout),
        );
        self.assumed.record(slot, binding, texture.image(), layout);
        Ok(())
    }

    /// Points a sampler binding at `texture` in its steady layout.
    pub fn write_sampled_image(
        &mut self,
        slot: BindingSlot,
        binding: u32,
        texture: &Texture,
    ) -> Result<(), BindingError> {
        let ty = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let set = self.checked_set(slot, binding, ty)?;
        let layout = texture.kind().steady_layout();
        write_image(
            &self.device,
            set,
            binding,
            ty,
            image_info(texture.sampler(), texture.view(), layout),
        );
        self.assumed.record(slot, binding, texture.image(), layout);
        Ok(())
    }

    /// Fails if any image behind `slot` has left the layout it was written
    /// with.
    pub fn validate_bind(
        &self,
        slot: BindingSlot,
        tracker: &LayoutTracker,
    ) -> Result<(), BindingError> {
        self.assumed.validate(slot, tracker)
    }

    pub fn assumed_layouts(&self) -> &AssumedLayouts {
        &self.assumed
    }

    fn checked_set(
        &self,
        slot: BindingSlot,
        binding: u32,
        expected: vk::DescriptorType,
    ) -> Result<vk::DescriptorSet, BindingError> {
        if slot.shape().descriptor_type(binding) != Some(expected) {
            return Err(BindingError::WrongDescriptorType {
                slot,
                binding,
                expected,
            });
        }
        let set = self.set(slot)?;
        debug!("Writing binding {} of {:?}", binding, slot);
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_shape_binding_tables() {
        for shape in LayoutShape::ALL {
            for (i, desc) in shape.bindings().iter().enumerate() {
                assert_eq!(desc.binding, i as u32, "{:?}", shape);
            }
        }
        assert_eq!(LayoutShape::Camera.bindings().len(), 3);
        assert_eq!(LayoutShape::CloudNoise.bindings().len(), 4);
        assert_eq!(LayoutShape::CloudModel.bindings().len(), 3);
        assert!(
            LayoutShape::SampledImage.bindings()[0]
                .stages
                .contains(vk::ShaderStageFlags::FRAGMENT)
        );
        assert_eq!(
            LayoutShape::StorageImage.bindings()[0].ty,
            vk::DescriptorType::STORAGE_IMAGE
        );
        for (i, shape) in LayoutShape::ALL.iter().enumerate() {
            assert_eq!(shape.index(), i);
        }
    }

    #[test]
    fn test_startup_plan_tally() {
        let tally = BindingPlan::startup(2).tally();
        assert_eq!(
            tally,
            PoolTally {
                storage_images: 4,
                combined_image_samplers: 10,
                uniform_buffers: 10,
                sets: 15,
            }
        );
    }

    #[test]
    fn test_declared_capacity_covers_startup_plan() {
        let plan = BindingPlan::startup(crate::MAX_FRAMES_IN_FLIGHT);
        // Simulate allocation one slot at a time; every prefix must fit.
        for len in 1..=plan.slots().len() {
            let prefix = BindingPlan::new(plan.slots()[..len].to_vec());
            assert!(PoolCapacity::declared().check(&prefix.tally()).is_ok());
        }
    }

    #[test]
    fn test_undersized_capacity_fails_at_check() {
        let tally = BindingPlan::startup(2).tally();
        let capacity = PoolCapacity {
            combined_image_samplers: 9,
            ..PoolCapacity::declared()
        };
        assert_eq!(
            capacity.check(&tally),
            Err(BindingError::PoolExhausted {
                resource: PoolResource::Descriptors(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
                required: 10,
                capacity: 9,
            })
        );

        let capacity = PoolCapacity {
            max_sets: 14,
            ..PoolCapacity::declared()
        };
        assert!(matches!(
            capacity.check(&tally),
            Err(BindingError::PoolExhausted {
                resource: PoolResource::Sets,
                ..
            })
        ));
    }

    #[test]
    fn test_plan_slots_are_distinct() {
        let plan = BindingPlan::startup(2);
        let unique: std::collections::HashSet<_> = plan.slots().iter().collect();
        assert_eq!(unique.len(), plan.slots().len());
    }

    #[test]
    fn test_validate_detects_layout_mismatch() {
        let image = vk::Image::from_raw(7);
        let slot = BindingSlot::CloudStorage(0);
        let mut assumed = AssumedLayouts::new();
        assumed.record(slot, 0, image, vk::ImageLayout::GENERAL);

        let mut tracker = LayoutTracker::new();
        assert_eq!(
            assumed.validate(slot, &tracker),
            Err(BindingError::LayoutMismatch {
                slot,
                binding: 0,
                expected: vk::ImageLayout::GENERAL,
                actual: vk::ImageLayout::UNDEFINED,
            })
        );

        tracker
            .apply(image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL)
            .unwrap();
        assert!(assumed.validate(slot, &tracker).is_ok());
        // Slots with no image bindings always pass.
        assert!(assumed.validate(BindingSlot::Scene(0), &tracker).is_ok());
    }

    #[test]
    fn test_record_replaces_previous_image() {
        let slot = BindingSlot::LightGridSampled;
        let mut assumed = AssumedLayouts::new();
        assumed.record(slot, 0, vk::Image::from_raw(1), vk::ImageLayout::GENERAL);
        assumed.record(slot, 0, vk::Image::from_raw(2), vk::ImageLayout::GENERAL);
        assert_eq!(
            assumed.get(slot, 0),
            Some((vk::Image::from_raw(2), vk::ImageLayout::GENERAL))
        );
    }

    #[test]
    fn test_descriptor_type_lookup() {
        assert_eq!(
            LayoutShape::Camera.descriptor_type(2),
            Some(vk::DescriptorType::UNIFORM_BUFFER)
        );
        assert_eq!(LayoutShape::Camera.descriptor_type(3), None);
    }
}
