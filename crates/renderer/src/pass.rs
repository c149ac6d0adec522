//! Pass programs: a pipeline plus the ordered descriptor sets it binds.
//!
//! Each [`PassKind`] has a static set table. Entry `i` of the table is both
//! layout `i` of the pipeline layout and the set bound at index `i`, so the
//! two can never drift apart. Ping-pong entries are resolved through the
//! frame parity handed in by the caller; programs hold no per-frame state.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use cloud_rhi::command::CommandBuffer;
use cloud_rhi::device::Device;
use cloud_rhi::image::LayoutTracker;
use cloud_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use cloud_rhi::shader::{Shader, ShaderStage};
use cloud_rhi::texture::DEPTH_FORMAT;
use cloud_rhi::vertex::QuadVertex;
use tracing::{debug, info};

use crate::binding::{BindingRegistry, BindingSlot, LayoutShape};
use crate::error::RendererResult;
use crate::pingpong::FrameParity;
use crate::ui::CloudModel;

/// Double-buffered set families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairSet {
    /// Cloud targets as storage images.
    CloudStorage,
    /// Cloud targets as sampled images.
    CloudSampled,
}

impl PairSet {
    pub fn slot(self, index: usize) -> BindingSlot {
        match self {
            PairSet::CloudStorage => BindingSlot::CloudStorage(index),
            PairSet::CloudSampled => BindingSlot::CloudSampled(index),
        }
    }
}

/// Per-frame-slot uniform sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformSet {
    Camera,
    Scene,
    Ui,
}

impl UniformSet {
    pub fn slot(self, frame_slot: usize) -> BindingSlot {
        match self {
            UniformSet::Camera => BindingSlot::Camera(frame_slot),
            UniformSet::Scene => BindingSlot::Scene(frame_slot),
            UniformSet::Ui => BindingSlot::Ui(frame_slot),
        }
    }
}

/// Where the set at one index comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetSource {
    Fixed(BindingSlot),
    PerFrame(UniformSet),
    Current(PairSet),
    Previous(PairSet),
}

impl SetSource {
    pub fn shape(self) -> LayoutShape {
        self.resolve(0, FrameParity::Even).shape()
    }

    /// Concrete slot for a frame slot and parity.
    pub fn resolve(self, frame_slot: usize, parity: FrameParity) -> BindingSlot {
        match self {
            SetSource::Fixed(slot) => slot,
            SetSource::PerFrame(uniform) => uniform.slot(frame_slot),
            SetSource::Current(pair) => pair.slot(parity.current_index()),
            SetSource::Previous(pair) => pair.slot(parity.previous_index()),
        }
    }
}

use SetSource::{Current, Fixed, PerFrame, Previous};

const LIGHT_GRID_SETS: [SetSource; 3] = [
    Fixed(BindingSlot::LightGridStorage),
    PerFrame(UniformSet::Scene),
    Fixed(BindingSlot::CloudModel),
];

const NEAR_FIELD_SETS: [SetSource; 6] = [
    Fixed(BindingSlot::NearStorage),
    PerFrame(UniformSet::Camera),
    PerFrame(UniformSet::Scene),
    Fixed(BindingSlot::CloudNoise),
    Fixed(BindingSlot::LightGridSampled),
    PerFrame(UniformSet::Ui),
];

const FAR_FIELD_SETS: [SetSource; 8] = [
    Current(PairSet::CloudStorage),
    Previous(PairSet::CloudStorage),
    Fixed(BindingSlot::NearStorage),
    PerFrame(UniformSet::Camera),
    PerFrame(UniformSet::Scene),
    Fixed(BindingSlot::CloudNoise),
    Fixed(BindingSlot::LightGridSampled),
    PerFrame(UniformSet::Ui),
];

const LEGACY_COMBINED_SETS: [SetSource; 6] = [
    Current(PairSet::CloudStorage),
    PerFrame(UniformSet::Camera),
    Fixed(BindingSlot::CloudModel),
    PerFrame(UniformSet::Scene),
    Fixed(BindingSlot::LightGridSampled),
    PerFrame(UniformSet::Ui),
];

const REPROJECT_SETS: [SetSource; 3] = [
    Current(PairSet::CloudStorage),
    Previous(PairSet::CloudStorage),
    PerFrame(UniformSet::Camera),
];

const COMPOSITE_SETS: [SetSource; 2] = [Current(PairSet::CloudSampled), PerFrame(UniformSet::Ui)];

/// Shader files of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassShaders {
    Compute(&'static str),
    Graphics {
        vertex: &'static str,
        fragment: &'static str,
    },
}

/// Every GPU pass the renderer runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    LightGrid,
    NearField,
    FarField,
    LegacyCombined,
    Reproject,
    Composite,
}

impl PassKind {
    pub const ALL: [PassKind; 6] = [
        PassKind::LightGrid,
        PassKind::NearField,
        PassKind::FarField,
        PassKind::LegacyCombined,
        PassKind::Reproject,
        PassKind::Composite,
    ];

    /// Set sources in set-index order.
    pub fn set_table(self) -> &'static [SetSource] {
        match self {
            PassKind::LightGrid => &LIGHT_GRID_SETS,
            PassKind::NearField => &NEAR_FIELD_SETS,
            PassKind::FarField => &FAR_FIELD_SETS,
            PassKind::LegacyCombined => &LEGACY_COMBINED_SETS,
            PassKind::Reproject => &REPROJECT_SETS,
            PassKind::Composite => &COMPOSITE_SETS,
        }
    }

    /// Layout shapes in pipeline-layout order.
    pub fn shapes(self) -> Vec<LayoutShape> {
        self.set_table().iter().map(|source| source.shape()).collect()
    }

    pub fn shaders(self) -> PassShaders {
        match self {
            PassKind::LightGrid => PassShaders::Compute("lightGrid.comp.spv"),
            PassKind::NearField => PassShaders::Compute("cloudNear.comp.spv"),
            PassKind::FarField => PassShaders::Compute("cloudFar.comp.spv"),
            PassKind::LegacyCombined => PassShaders::Compute("computeNubisCubed.comp.spv"),
            PassKind::Reproject => PassShaders::Compute("reproject.comp.spv"),
            PassKind::Composite => PassShaders::Graphics {
                vertex: "post.vert.spv",
                fragment: "tone.frag.spv",
            },
        }
    }

    pub fn bind_point(self) -> vk::PipelineBindPoint {
        match self.shaders() {
            PassShaders::Compute(_) => vk::PipelineBindPoint::COMPUTE,
            PassShaders::Graphics { .. } => vk::PipelineBindPoint::GRAPHICS,
        }
    }
}

/// Compute passes of one frame, in recording order.
pub fn compute_schedule(model: CloudModel) -> &'static [PassKind] {
    match model {
        CloudModel::Split => &[
            PassKind::LightGrid,
            PassKind::NearField,
            PassKind::FarField,
            PassKind::Reproject,
        ],
        CloudModel::Legacy => &[
            PassKind::LightGrid,
            PassKind::LegacyCombined,
            PassKind::Reproject,
        ],
    }
}

/// A pipeline, its layout and the set table it binds.
pub struct PassProgram {
    kind: PassKind,
    pipeline: Pipeline,
    layout: PipelineLayout,
}

impl PassProgram {
    /// Builds the pipeline layout from the set table and the pipeline from
    /// the pass's shaders under `shader_dir`.
    ///
    /// `color_format` is the composite target format; compute passes ignore
    /// it.
    pub fn new(
        device: Arc<Device>,
        registry: &BindingRegistry,
        kind: PassKind,
        shader_dir: &Path,
        color_format: vk::Format,
    ) -> RendererResult<Self> {
        let set_layouts: Vec<_> = kind
            .shapes()
            .into_iter()
            .map(|shape| registry.layout(shape))
            .collect();
        let layout = PipelineLayout::new(device.clone(), &set_layouts)?;

        let pipeline = match kind.shaders() {
            PassShaders::Compute(file) => {
                let shader = Shader::from_spirv_file(
                    device.clone(),
                    &shader_dir.join(file),
                    ShaderStage::Compute,
                    "main",
                )?;
                Pipeline::compute(device, &shader, &layout)?
            }
            PassShaders::Graphics { vertex, fragment } => {
                let vertex_shader = Shader::from_spirv_file(
                    device.clone(),
                    &shader_dir.join(vertex),
                    ShaderStage::Vertex,
                    "main",
                )?;
                let fragment_shader = Shader::from_spirv_file(
                    device.clone(),
                    &shader_dir.join(fragment),
                    ShaderStage::Fragment,
                    "main",
                )?;
                GraphicsPipelineBuilder::new()
                    .vertex_shader(&vertex_shader)
                    .fragment_shader(&fragment_shader)
                    .vertex_binding(QuadVertex::binding_description())
                    .vertex_attributes(&QuadVertex::attribute_descriptions())
                    .cull_mode(vk::CullModeFlags::NONE)
                    .depth_test(true, true, vk::CompareOp::LESS)
                    .color_attachment_format(color_format)
                    .depth_attachment_format(DEPTH_FORMAT)
                    .build(device, &layout)?
            }
        };

        info!("{:?} pass ready ({} sets)", kind, layout.set_count());
        Ok(Self {
            kind,
            pipeline,
            layout,
        })
    }

    #[inline]
    pub fn kind(&self) -> PassKind {
        self.kind
    }

    /// Binds the pipeline and every set of the table.
    ///
    /// Each set's images are checked against `tracker` before binding.
    pub fn bind(
        &self,
        cmd: &CommandBuffer,
        registry: &BindingRegistry,
        tracker: &LayoutTracker,
        frame_slot: usize,
        parity: FrameParity,
    ) -> RendererResult<()> {
        let bind_point = self.pipeline.bind_point();
        cmd.bind_pipeline(bind_point, self.pipeline.handle());
        for (index, slot) in resolve_sets(self.kind, frame_slot, parity).into_iter().enumerate() {
            registry.validate_bind(slot, tracker)?;
            cmd.bind_descriptor_set(
                bind_point,
                self.layout.handle(),
                index as u32,
                registry.set(slot)?,
            );
        }
        debug!("Bound {:?} pass ({:?})", self.kind, parity);
        Ok(())
    }
}

/// Slots bound by `kind`, in set-index order.
pub fn resolve_sets(kind: PassKind, frame_slot: usize, parity: FrameParity) -> Vec<BindingSlot> {
    kind.set_table()
        .iter()
        .map(|source| source.resolve(frame_slot, parity))
        .collect()
}

/// The cloud raymarch passes selected for a frame.
pub enum CloudPasses<'a> {
    Split {
        near: &'a PassProgram,
        far: &'a PassProgram,
    },
    Legacy {
        combined: &'a PassProgram,
    },
}

/// All raymarch programs; one schedule is picked per frame.
pub struct CloudPrograms {
    pub near: PassProgram,
    pub far: PassProgram,
    pub combined: PassProgram,
}

impl CloudPrograms {
    pub fn select(&self, model: CloudModel) -> CloudPasses<'_> {
        match model {
            CloudModel::Split => CloudPasses::Split {
                near: &self.near,
                far: &self.far,
            },
            CloudModel::Legacy => CloudPasses::Legacy {
                combined: &self.combined,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_tables_match_pass_inputs() {
        use LayoutShape::{Camera, CloudNoise, SampledImage, Scene, StorageImage, UiParams};
        assert_eq!(
            PassKind::LightGrid.shapes(),
            vec![StorageImage, Scene, LayoutShape::CloudModel]
        );
        assert_eq!(
            PassKind::NearField.shapes(),
            vec![StorageImage, Camera, Scene, CloudNoise, SampledImage, UiParams]
        );
        assert_eq!(
            PassKind::FarField.shapes(),
            vec![
                StorageImage,
                StorageImage,
                StorageImage,
                Camera,
                Scene,
                CloudNoise,
                SampledImage,
                UiParams
            ]
        );
        assert_eq!(
            PassKind::LegacyCombined.shapes(),
            vec![
                StorageImage,
                Camera,
                LayoutShape::CloudModel,
                Scene,
                SampledImage,
                UiParams
            ]
        );
        assert_eq!(
            PassKind::Reproject.shapes(),
            vec![StorageImage, StorageImage, Camera]
        );
        assert_eq!(PassKind::Composite.shapes(), vec![SampledImage, UiParams]);
    }

    #[test]
    fn test_bind_order_matches_layout_order() {
        for kind in PassKind::ALL {
            for frame_slot in 0..crate::MAX_FRAMES_IN_FLIGHT {
                for parity in [FrameParity::Even, FrameParity::Odd] {
                    let bound: Vec<_> = resolve_sets(kind, frame_slot, parity)
                        .into_iter()
                        .map(BindingSlot::shape)
                        .collect();
                    assert_eq!(bound, kind.shapes(), "{:?}", kind);
                }
            }
        }
    }

    #[test]
    fn test_current_and_previous_resolve_to_distinct_sets() {
        for kind in PassKind::ALL {
            for frame in 0..4u64 {
                let parity = FrameParity::from_frame(frame);
                let table = kind.set_table();
                for (i, a) in table.iter().enumerate() {
                    for b in &table[i + 1..] {
                        if let (Current(x), Previous(y)) | (Previous(y), Current(x)) = (*a, *b)
                            && x == y
                        {
                            assert_ne!(a.resolve(0, parity), b.resolve(0, parity));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_ping_pong_roles_alternate() {
        let mut writes = Vec::new();
        for frame in 0..6u64 {
            let parity = FrameParity::from_frame(frame);
            writes.push(resolve_sets(PassKind::Reproject, 0, parity)[0]);
        }
        for pair in writes.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert_eq!(writes[0], BindingSlot::CloudStorage(0));
        assert_eq!(writes[2], writes[0]);
    }

    #[test]
    fn test_all_resolved_slots_are_planned() {
        let plan = crate::binding::BindingPlan::startup(crate::MAX_FRAMES_IN_FLIGHT);
        for kind in PassKind::ALL {
            for frame_slot in 0..crate::MAX_FRAMES_IN_FLIGHT {
                for parity in [FrameParity::Even, FrameParity::Odd] {
                    for slot in resolve_sets(kind, frame_slot, parity) {
                        assert!(plan.slots().contains(&slot), "{:?}", slot);
                    }
                }
            }
        }
    }

    #[test]
    fn test_compute_schedules() {
        assert_eq!(
            compute_schedule(CloudModel::Split),
            &[
                PassKind::LightGrid,
                PassKind::NearField,
                PassKind::FarField,
                PassKind::Reproject
            ]
        );
        assert!(!compute_schedule(CloudModel::Legacy).contains(&PassKind::NearField));
        for model in [CloudModel::Split, CloudModel::Legacy] {
            for kind in compute_schedule(model) {
                assert_eq!(kind.bind_point(), vk::PipelineBindPoint::COMPUTE);
            }
        }
        assert_eq!(
            PassKind::Composite.bind_point(),
            vk::PipelineBindPoint::GRAPHICS
        );
    }
}
