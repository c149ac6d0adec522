//! Vulkan frame orchestrator.
//!
//! [`Renderer`] owns every GPU object and implements [`FrameStages`]; the
//! order in which the stages run is decided by
//! [`FrameLoop`](crate::frame_loop::FrameLoop).
//!
//! # Resource destruction order
//!
//! Fields drop in declaration order after [`Drop::drop`] has waited for the
//! device to go idle:
//! 1. frame resources, assets, quad, overlay painter
//! 2. pass programs, then the binding registry
//! 3. uniforms and synchronization objects
//! 4. command pools, swapchain
//! 5. device, surface, instance

use std::sync::Arc;

use ash::vk;
use cloud_core::config::RendererConfig;
use cloud_platform::{Surface, Window};
use cloud_rhi::RhiError;
use cloud_rhi::command::{CommandBuffer, CommandPool};
use cloud_rhi::device::Device;
use cloud_rhi::image::{LayoutTracker, cmd_transition_layout};
use cloud_rhi::instance::Instance;
use cloud_rhi::physical_device::select_physical_device;
use cloud_rhi::rendering::RenderingTarget;
use cloud_rhi::swapchain::{Acquired, Presented, Swapchain};
use cloud_rhi::sync::{Fence, Semaphore};
use cloud_rhi::texture::{Texture, UploadContext};
use tracing::{debug, error, info, trace, warn};

use crate::assets::CloudAssets;
use crate::binding::{BindingPlan, BindingRegistry, BindingSlot, PoolCapacity};
use crate::dispatch::{CLOUD_WORKGROUP, DispatchSize, LIGHT_GRID_WORKGROUP, half_extent};
use crate::error::RendererResult;
use crate::frame_loop::{FrameSnapshot, FrameStages, MAX_FRAMES_IN_FLIGHT, PresentStatus};
use crate::frame_resources::{FrameResourceLayout, FrameResources, FrameUniforms, LIGHT_GRID_EXTENT};
use crate::overlay::OverlayPainter;
use crate::pass::{CloudPasses, CloudPrograms, PassKind, PassProgram, compute_schedule};
use crate::pingpong::FrameParity;
use crate::quad::BackgroundQuad;
use crate::ui::{CloudModel, Overlay};

/// Timeout for in-flight fences, in nanoseconds.
const FENCE_TIMEOUT: u64 = u64::MAX;

/// Group counts for `kind` when the swapchain is `extent`.
pub fn dispatch_size(kind: PassKind, extent: vk::Extent2D) -> DispatchSize {
    match kind {
        PassKind::LightGrid => DispatchSize::for_extent_3d(LIGHT_GRID_EXTENT, LIGHT_GRID_WORKGROUP),
        PassKind::NearField => DispatchSize::for_extent_2d(half_extent(extent), CLOUD_WORKGROUP),
        _ => DispatchSize::for_extent_2d(extent, CLOUD_WORKGROUP),
    }
}

/// Every pass program, built once at startup.
struct Passes {
    light_grid: PassProgram,
    clouds: CloudPrograms,
    reproject: PassProgram,
    composite: PassProgram,
}

impl Passes {
    fn new(
        device: &Arc<Device>,
        registry: &BindingRegistry,
        config: &RendererConfig,
        color_format: vk::Format,
    ) -> RendererResult<Self> {
        let build =
            |kind| PassProgram::new(device.clone(), registry, kind, &config.shader_dir, color_format);
        Ok(Self {
            light_grid: build(PassKind::LightGrid)?,
            clouds: CloudPrograms {
                near: build(PassKind::NearField)?,
                far: build(PassKind::FarField)?,
                combined: build(PassKind::LegacyCombined)?,
            },
            reproject: build(PassKind::Reproject)?,
            composite: build(PassKind::Composite)?,
        })
    }

    /// Compute programs for `model`, in recording order.
    fn compute(&self, model: CloudModel) -> Vec<&PassProgram> {
        let mut programs = vec![&self.light_grid];
        match self.clouds.select(model) {
            CloudPasses::Split { near, far } => programs.extend([near, far]),
            CloudPasses::Legacy { combined } => programs.push(combined),
        }
        programs.push(&self.reproject);
        programs
    }
}

/// Per-frame-slot command buffer and synchronization.
struct FrameSlot {
    compute: CommandBuffer,
    image_available: Semaphore,
    compute_finished: Semaphore,
    in_flight: Fence,
}

/// Per-swapchain-image command buffer and semaphore.
struct SwapchainImageSync {
    graphics: CommandBuffer,
    render_finished: Semaphore,
}

/// Frame slot whose fence guards each swapchain image's last submission.
///
/// Images can be acquired out of order, so the slot that last rendered an
/// image may differ from the slot rendering it now.
#[derive(Debug, Default)]
pub(crate) struct ImagesInFlight {
    owners: Vec<Option<usize>>,
}

impl ImagesInFlight {
    pub(crate) fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Records `slot` as the owner of `image`. Returns the previous owner when
    /// it is another slot, whose fence must be waited before the image's
    /// command buffer is reused.
    pub(crate) fn claim(&mut self, image: u32, slot: usize) -> Option<usize> {
        let owner = self.owners.get_mut(image as usize)?;
        owner.replace(slot).filter(|&previous| previous != slot)
    }
}

/// Owns all GPU state and records the compute and graphics work of a frame.
pub struct Renderer {
    frame_resources: FrameResources,
    assets: CloudAssets,
    quad: BackgroundQuad,
    overlay: OverlayPainter,

    passes: Passes,
    registry: BindingRegistry,

    uniforms: Vec<FrameUniforms>,
    slots: Vec<FrameSlot>,
    image_sync: Vec<SwapchainImageSync>,
    images_in_flight: ImagesInFlight,

    upload_pool: CommandPool,
    compute_pool: CommandPool,
    graphics_pool: CommandPool,
    swapchain: Swapchain,

    device: Arc<Device>,
    surface: Surface,
    instance: Instance,

    tracker: LayoutTracker,
    /// Window size the next rebuild targets.
    requested_extent: vk::Extent2D,
    rebuild_pending: bool,
}

impl Renderer {
    /// Creates every GPU object, loads the cloud assets and writes all
    /// descriptor sets. `initial` fills the uniform buffers.
    ///
    /// # Errors
    ///
    /// Any failure is fatal: a missing loader or GPU, a missing shader or
    /// asset file, or a descriptor pool too small for the binding plan.
    pub fn new(
        window: &Window,
        config: &RendererConfig,
        initial: &FrameSnapshot,
    ) -> RendererResult<Self> {
        config.validate()?;
        let extent = window.extent();
        info!(
            "Initializing cloud renderer ({}x{})",
            extent.width, extent.height
        );

        let instance = Instance::new(
            c"cloud_renderer",
            window.required_extensions()?,
            config.enable_validation,
        )?;
        let surface = window.create_surface(&instance)?;
        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;
        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), extent)?;

        let families = *device.queue_families();
        let upload_pool = CommandPool::new_transient(device.clone(), families.graphics)?;
        let compute_pool = CommandPool::new(device.clone(), families.compute)?;
        let graphics_pool = CommandPool::new(device.clone(), families.graphics)?;

        let mut tracker = LayoutTracker::new();
        let render_families = families.render_families();
        let (frame_resources, assets, quad) = {
            let ctx = UploadContext {
                device: device.clone(),
                pool: &upload_pool,
                queue: device.graphics_queue(),
                queue_families: &render_families,
            };
            (
                FrameResources::create(
                    &ctx,
                    &mut tracker,
                    &FrameResourceLayout::describe(swapchain.extent()),
                )?,
                CloudAssets::load(&ctx, &mut tracker, &config.asset_dir)?,
                BackgroundQuad::new(&ctx)?,
            )
        };

        let registry = BindingRegistry::build(
            device.clone(),
            &BindingPlan::startup(MAX_FRAMES_IN_FLIGHT),
            PoolCapacity::declared(),
        )?;
        let passes = Passes::new(&device, &registry, config, swapchain.format())?;
        let overlay = OverlayPainter::new(
            device.clone(),
            &config.shader_dir,
            swapchain.format(),
            MAX_FRAMES_IN_FLIGHT,
        )?;

        let uniforms = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameUniforms::new(&device, initial))
            .collect::<Result<Vec<_>, _>>()?;
        let slots = create_frame_slots(&device, &compute_pool)?;
        let image_sync = create_image_sync(&device, &graphics_pool, swapchain.image_count())?;
        let images_in_flight = ImagesInFlight::new(swapchain.image_count());

        let mut renderer = Self {
            frame_resources,
            assets,
            quad,
            overlay,
            passes,
            registry,
            uniforms,
            slots,
            image_sync,
            images_in_flight,
            upload_pool,
            compute_pool,
            graphics_pool,
            swapchain,
            device,
            surface,
            instance,
            tracker,
            requested_extent: extent,
            rebuild_pending: false,
        };
        renderer.write_static_descriptors()?;
        renderer.write_frame_descriptors()?;

        info!(
            "Renderer ready: {} swapchain images, async compute: {}",
            renderer.swapchain.image_count(),
            families.has_async_compute()
        );
        Ok(renderer)
    }

    /// Schedules a rebuild for the new window size at the end of the next
    /// frame. A zero-sized window is ignored; a minimized surface is detected
    /// by [`FrameStages::surface_ready`].
    pub fn request_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to zero dimensions");
            return;
        }
        let extent = vk::Extent2D { width, height };
        if extent != self.requested_extent {
            debug!(
                "Resize requested: {}x{} -> {}x{}",
                self.requested_extent.width, self.requested_extent.height, width, height
            );
            self.requested_extent = extent;
            self.rebuild_pending = true;
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Uniform buffers and file-backed textures. Never rewritten.
    fn write_static_descriptors(&mut self) -> RendererResult<()> {
        for (slot, uniforms) in self.uniforms.iter().enumerate() {
            let camera = BindingSlot::Camera(slot);
            self.registry
                .write_uniform(camera, 0, uniforms.view_projection_buffer())?;
            self.registry
                .write_uniform(camera, 1, uniforms.previous_buffer())?;
            self.registry
                .write_uniform(camera, 2, uniforms.parameter_buffer())?;
            self.registry
                .write_uniform(BindingSlot::Scene(slot), 0, uniforms.time_buffer())?;
            self.registry
                .write_uniform(BindingSlot::Ui(slot), 0, uniforms.ui_buffer())?;
        }
        self.assets.write_bindings(&mut self.registry)?;
        Ok(())
    }

    /// Sets that point at per-resolution images. Rewritten after a rebuild.
    fn write_frame_descriptors(&mut self) -> RendererResult<()> {
        let frame = &self.frame_resources;
        let registry = &mut self.registry;
        for (index, cloud) in frame.clouds().iter().enumerate() {
            registry.write_storage_image(BindingSlot::CloudStorage(index), 0, cloud)?;
            registry.write_sampled_image(BindingSlot::CloudSampled(index), 0, cloud)?;
        }
        registry.write_storage_image(BindingSlot::LightGridStorage, 0, frame.light_grid())?;
        registry.write_sampled_image(BindingSlot::LightGridSampled, 0, frame.light_grid())?;
        registry.write_storage_image(BindingSlot::NearStorage, 0, frame.near())?;
        debug!("Frame descriptors written");
        Ok(())
    }

    fn recreate_semaphores(&mut self) -> RendererResult<()> {
        for slot in &mut self.slots {
            slot.image_available = Semaphore::new(self.device.clone())?;
            slot.compute_finished = Semaphore::new(self.device.clone())?;
        }
        let old = std::mem::take(&mut self.image_sync);
        self.graphics_pool
            .free(old.into_iter().map(|sync| sync.graphics).collect());
        self.image_sync = create_image_sync(
            &self.device,
            &self.graphics_pool,
            self.swapchain.image_count(),
        )?;
        self.images_in_flight = ImagesInFlight::new(self.swapchain.image_count());
        Ok(())
    }

    fn surface_extent(&self) -> RendererResult<Option<vk::Extent2D>> {
        Ok(self.swapchain.surface_extent(
            &self.instance,
            self.surface.handle(),
            self.requested_extent,
        )?)
    }
}

fn create_frame_slots(device: &Arc<Device>, pool: &CommandPool) -> RendererResult<Vec<FrameSlot>> {
    let commands = pool.allocate_many(MAX_FRAMES_IN_FLIGHT as u32)?;
    let slots = commands
        .into_iter()
        .map(|compute| {
            Ok(FrameSlot {
                compute,
                image_available: Semaphore::new(device.clone())?,
                compute_finished: Semaphore::new(device.clone())?,
                // Signaled so the first wait on each slot returns at once.
                in_flight: Fence::new(device.clone(), true)?,
            })
        })
        .collect::<Result<Vec<_>, RhiError>>()?;
    Ok(slots)
}

fn create_image_sync(
    device: &Arc<Device>,
    pool: &CommandPool,
    image_count: usize,
) -> RendererResult<Vec<SwapchainImageSync>> {
    let commands = pool.allocate_many(image_count as u32)?;
    let render_finished = Semaphore::many(device, image_count)?;
    Ok(commands
        .into_iter()
        .zip(render_finished)
        .map(|(graphics, render_finished)| SwapchainImageSync {
            graphics,
            render_finished,
        })
        .collect())
}

/// Makes the previous pass's storage writes visible to the next one.
fn storage_barrier(
    cmd: &CommandBuffer,
    tracker: &mut LayoutTracker,
    frame: &FrameResources,
) -> RendererResult<()> {
    let textures: Vec<&Texture> = frame
        .clouds()
        .iter()
        .chain([frame.light_grid(), frame.near()])
        .collect();
    for texture in textures {
        cmd_transition_layout(
            cmd,
            tracker,
            texture.image(),
            texture.desc().aspect(),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::GENERAL,
        )?;
    }
    Ok(())
}

impl FrameStages for Renderer {
    type Error = crate::error::RendererError;

    /// Only a pending rebuild can be blocked by a zero-sized surface; the
    /// current swapchain stays valid until then.
    fn surface_ready(&mut self) -> RendererResult<bool> {
        if !self.rebuild_pending {
            return Ok(true);
        }
        Ok(self.surface_extent()?.is_some())
    }

    fn wait_for_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.slots[slot].in_flight.wait(FENCE_TIMEOUT)?;
        Ok(())
    }

    fn upload(&mut self, slot: usize, snapshot: &FrameSnapshot) -> RendererResult<()> {
        self.uniforms[slot].upload(snapshot)?;
        Ok(())
    }

    fn submit_compute(
        &mut self,
        slot: usize,
        parity: FrameParity,
        model: CloudModel,
    ) -> RendererResult<()> {
        let Self {
            slots,
            passes,
            registry,
            frame_resources,
            tracker,
            device,
            ..
        } = self;
        let frame_slot = &slots[slot];
        let cmd = &frame_slot.compute;
        let extent = frame_resources.extent();

        cmd.reset()?;
        cmd.begin()?;
        let programs = passes.compute(model);
        debug_assert!(
            programs
                .iter()
                .map(|program| program.kind())
                .eq(compute_schedule(model).iter().copied())
        );
        for program in programs {
            storage_barrier(cmd, tracker, frame_resources)?;
            program.bind(cmd, registry, tracker, slot, parity)?;
            let size = dispatch_size(program.kind(), extent);
            cmd.dispatch(size.x, size.y, size.z);
        }
        // Composite samples what the last pass wrote.
        storage_barrier(cmd, tracker, frame_resources)?;
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let signal = [frame_slot.compute_finished.handle()];
        let submit = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal);
        unsafe { device.submit(device.compute_queue(), &[submit], vk::Fence::null())? };
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> RendererResult<Option<u32>> {
        let semaphore = self.slots[slot].image_available.handle();
        match self.swapchain.acquire_next_image(semaphore)? {
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    debug!("Acquired image {} from a suboptimal swapchain", index);
                    self.rebuild_pending = true;
                }
                Ok(Some(index))
            }
            Acquired::OutOfDate => Ok(None),
        }
    }

    fn submit_graphics(
        &mut self,
        slot: usize,
        image: u32,
        parity: FrameParity,
        overlay: &mut dyn Overlay,
    ) -> RendererResult<()> {
        let Self {
            slots,
            image_sync,
            images_in_flight,
            passes,
            registry,
            frame_resources,
            quad,
            overlay: painter,
            swapchain,
            upload_pool,
            tracker,
            device,
            ..
        } = self;
        let (swapchain_image, view) = swapchain.image(image).ok_or_else(|| {
            RhiError::InvalidHandle(format!("swapchain image {image} does not exist"))
        })?;
        let sync = image_sync.get(image as usize).ok_or_else(|| {
            RhiError::InvalidHandle(format!("no command buffer for swapchain image {image}"))
        })?;
        let frame_slot = &slots[slot];
        let cmd = &sync.graphics;
        let extent = swapchain.extent();

        if let Some(owner) = images_in_flight.claim(image, slot) {
            trace!("Image {} still owned by slot {}, waiting", image, owner);
            slots[owner].in_flight.wait(FENCE_TIMEOUT)?;
        }

        let frame = overlay.take_frame();
        let render_families = device.queue_families().render_families();
        let ctx = UploadContext {
            device: device.clone(),
            pool: upload_pool,
            queue: device.graphics_queue(),
            queue_families: &render_families,
        };
        painter.update_textures(&ctx, tracker, &frame.textures)?;
        painter.upload(slot, &frame, extent)?;

        cmd.reset()?;
        cmd.begin()?;
        cmd_transition_layout(
            cmd,
            tracker,
            swapchain_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )?;

        let target = RenderingTarget::new(view, extent).with_depth(frame_resources.depth().view());
        cmd.begin_rendering(&target.info());
        passes.composite.bind(cmd, registry, tracker, slot, parity)?;
        cmd.set_viewport_and_scissor(extent);
        quad.draw(cmd);
        painter.record(cmd, slot, extent);
        cmd.end_rendering();

        cmd_transition_layout(
            cmd,
            tracker,
            swapchain_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;
        cmd.end()?;

        // Reset only once a submit that signals the fence is certain.
        frame_slot.in_flight.reset()?;

        let wait = [
            frame_slot.image_available.handle(),
            frame_slot.compute_finished.handle(),
        ];
        let wait_stages = [
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ];
        let command_buffers = [cmd.handle()];
        let signal = [sync.render_finished.handle()];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal);
        unsafe {
            device.submit(
                device.graphics_queue(),
                &[submit],
                frame_slot.in_flight.handle(),
            )?
        };
        Ok(())
    }

    fn present(&mut self, _slot: usize, image: u32) -> RendererResult<PresentStatus> {
        let render_finished = self
            .image_sync
            .get(image as usize)
            .map(|sync| sync.render_finished.handle())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("no semaphore for swapchain image {image}"))
            })?;
        let presented =
            self.swapchain
                .present(self.device.present_queue(), image, render_finished)?;
        if presented == Presented::Stale || self.rebuild_pending {
            Ok(PresentStatus::NeedsRebuild)
        } else {
            Ok(PresentStatus::Presented)
        }
    }

    fn rebuild(&mut self) -> RendererResult<()> {
        self.device.wait_idle()?;

        if self.surface_extent()?.is_none() {
            // Semaphores may be left signaled by the abandoned frame.
            self.recreate_semaphores()?;
            self.rebuild_pending = true;
            debug!("Surface has no area, deferring the rebuild");
            return Ok(());
        }

        for index in 0..self.swapchain.image_count() as u32 {
            if let Some((image, _)) = self.swapchain.image(index) {
                self.tracker.forget(image);
            }
        }
        self.swapchain
            .recreate(&self.instance, self.surface.handle(), self.requested_extent)?;

        self.frame_resources.forget(&mut self.tracker);
        let render_families = self.device.queue_families().render_families();
        let frame_resources = {
            let ctx = UploadContext {
                device: self.device.clone(),
                pool: &self.upload_pool,
                queue: self.device.graphics_queue(),
                queue_families: &render_families,
            };
            FrameResources::create(
                &ctx,
                &mut self.tracker,
                &FrameResourceLayout::describe(self.swapchain.extent()),
            )?
        };
        self.frame_resources = frame_resources;

        self.recreate_semaphores()?;
        self.write_frame_descriptors()?;
        self.rebuild_pending = false;

        let extent = self.swapchain.extent();
        info!("Rebuilt frame resources at {}x{}", extent.width, extent.height);
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during drop: {}", e);
        }
        if self.rebuild_pending {
            warn!("Renderer dropped with a rebuild pending");
        }
        info!("Renderer shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_size_per_pass() {
        let extent = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        assert_eq!(
            dispatch_size(PassKind::LightGrid, extent),
            DispatchSize { x: 64, y: 64, z: 8 }
        );
        assert_eq!(
            dispatch_size(PassKind::NearField, extent),
            DispatchSize { x: 30, y: 17, z: 1 }
        );
        for kind in [PassKind::FarField, PassKind::LegacyCombined, PassKind::Reproject] {
            assert_eq!(dispatch_size(kind, extent), DispatchSize { x: 60, y: 34, z: 1 });
        }
    }

    #[test]
    fn test_out_of_order_acquire_waits_for_previous_owner() {
        let mut images = ImagesInFlight::new(3);
        assert_eq!(images.claim(0, 0), None);
        assert_eq!(images.claim(1, 1), None);
        // MAILBOX hands image 1 back to slot 0 while slot 1 may still render it.
        assert_eq!(images.claim(1, 0), Some(1));
        // Slot 1 now takes image 0, last rendered by slot 0.
        assert_eq!(images.claim(0, 1), Some(0));
        // In-order reuse by the same slot needs no extra wait.
        assert_eq!(images.claim(0, 1), None);
        assert_eq!(images.claim(2, 0), None);
    }

    #[test]
    fn test_unknown_image_has_no_owner() {
        let mut images = ImagesInFlight::new(2);
        assert_eq!(images.claim(5, 0), None);
        assert_eq!(ImagesInFlight::default().claim(0, 1), None);
    }

    #[test]
    fn test_light_grid_dispatch_ignores_resolution() {
        let small = vk::Extent2D {
            width: 640,
            height: 360,
        };
        let large = vk::Extent2D {
            width: 3840,
            height: 2160,
        };
        assert_eq!(
            dispatch_size(PassKind::LightGrid, small),
            dispatch_size(PassKind::LightGrid, large)
        );
    }
}
