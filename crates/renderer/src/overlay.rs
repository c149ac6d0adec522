//! Paints the egui parameter panel into the composite rendering pass.
//!
//! Meshes are packed into one host-visible vertex and index stream per frame
//! slot, so a slot's geometry is only rewritten after its fence was waited.
//! Each egui texture owns a sampled image and a descriptor set; sets are
//! recycled through a free list and never returned to the pool.
//!
//! Shader interface: vertex locations 0 to 2 are position and uv in points
//! and the vertex color, a `vec2` push constant holds the screen size in
//! points, and set 0 binding 0 is the texture.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use cloud_rhi::buffer::{Buffer, BufferUsage};
use cloud_rhi::command::CommandBuffer;
use cloud_rhi::descriptor::{
    BindingDesc, DescriptorPool, DescriptorSetLayout, image_info, write_image,
};
use cloud_rhi::device::Device;
use cloud_rhi::image::LayoutTracker;
use cloud_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use cloud_rhi::shader::{Shader, ShaderStage};
use cloud_rhi::texture::{DEPTH_FORMAT, Texture, UploadContext};
use egui::epaint::{Primitive, Vertex};
use tracing::{debug, info, trace};

use crate::error::{RendererError, RendererResult};
use crate::ui::OverlayFrame;

pub const OVERLAY_VERTEX_SHADER: &str = "overlay.vert.spv";
pub const OVERLAY_FRAGMENT_SHADER: &str = "overlay.frag.spv";

/// Descriptor sets available to overlay textures.
pub const MAX_OVERLAY_TEXTURES: u32 = 8;

const MIN_VERTEX_BYTES: u64 = 64 * 1024;
const MIN_INDEX_BYTES: u64 = 32 * 1024;
const VERTEX_STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

/// One indexed draw into the packed streams.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayDraw {
    pub texture: egui::TextureId,
    pub scissor: vk::Rect2D,
    pub first_index: u32,
    pub index_count: u32,
    pub vertex_offset: i32,
}

/// All meshes of a frame in one vertex and one index stream.
#[derive(Debug, Default)]
pub struct OverlayGeometry {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub draws: Vec<OverlayDraw>,
}

impl OverlayGeometry {
    /// Packs the meshes of `primitives`. Empty meshes, meshes clipped away
    /// entirely and paint callbacks produce no draw.
    pub fn pack(
        primitives: &[egui::ClippedPrimitive],
        pixels_per_point: f32,
        extent: vk::Extent2D,
    ) -> Self {
        let mut geometry = Self::default();
        for clipped in primitives {
            let mesh = match &clipped.primitive {
                Primitive::Mesh(mesh) => mesh,
                Primitive::Callback(_) => {
                    trace!("Skipping overlay paint callback");
                    continue;
                }
            };
            if mesh.indices.is_empty() {
                continue;
            }
            let Some(scissor) = scissor_rect(clipped.clip_rect, pixels_per_point, extent) else {
                continue;
            };
            geometry.draws.push(OverlayDraw {
                texture: mesh.texture_id,
                scissor,
                first_index: geometry.indices.len() as u32,
                index_count: mesh.indices.len() as u32,
                vertex_offset: geometry.vertices.len() as i32,
            });
            geometry.vertices.extend_from_slice(&mesh.vertices);
            geometry.indices.extend_from_slice(&mesh.indices);
        }
        geometry
    }
}

/// Pixel rectangle of a clip rect given in points, clamped to `extent`.
/// `None` when nothing of it is on screen.
pub fn scissor_rect(
    clip: egui::Rect,
    pixels_per_point: f32,
    extent: vk::Extent2D,
) -> Option<vk::Rect2D> {
    let width = extent.width as f32;
    let height = extent.height as f32;
    let min_x = (clip.min.x * pixels_per_point).round().clamp(0.0, width);
    let min_y = (clip.min.y * pixels_per_point).round().clamp(0.0, height);
    let max_x = (clip.max.x * pixels_per_point).round().clamp(min_x, width);
    let max_y = (clip.max.y * pixels_per_point).round().clamp(min_y, height);
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: min_x as i32,
            y: min_y as i32,
        },
        extent: vk::Extent2D {
            width: (max_x - min_x) as u32,
            height: (max_y - min_y) as u32,
        },
    })
}

/// Buffer size that fits `needed` bytes, doubling past `current`.
pub fn grown_capacity(current: u64, needed: u64, minimum: u64) -> u64 {
    if needed <= current {
        current
    } else {
        needed.next_power_of_two().max(minimum)
    }
}

/// Copies a `size` RGBA8 region into `target` at `pos`.
pub fn patch_pixels(
    target: &mut [u8],
    target_size: [usize; 2],
    pos: [usize; 2],
    size: [usize; 2],
    pixels: &[u8],
) -> RendererResult<()> {
    let [target_width, target_height] = target_size;
    let [x, y] = pos;
    let [width, height] = size;
    if x + width > target_width || y + height > target_height {
        return Err(RendererError::Overlay(format!(
            "{}x{} patch at ({}, {}) exceeds {}x{} texture",
            width, height, x, y, target_width, target_height
        )));
    }
    if pixels.len() != width * height * 4 || target.len() != target_width * target_height * 4 {
        return Err(RendererError::Overlay(format!(
            "patch holds {} bytes for {}x{} texels",
            pixels.len(),
            width,
            height
        )));
    }
    let row = width * 4;
    for (line, source) in pixels.chunks_exact(row).enumerate() {
        let start = ((y + line) * target_width + x) * 4;
        target[start..start + row].copy_from_slice(source);
    }
    Ok(())
}

/// RGBA8 texels of an egui image.
pub fn image_rgba(image: &egui::ImageData) -> Vec<u8> {
    match image {
        egui::ImageData::Color(color) => color.pixels.iter().flat_map(|c| c.to_array()).collect(),
        egui::ImageData::Font(font) => font
            .srgba_pixels(None)
            .flat_map(|c| c.to_array())
            .collect(),
    }
}

struct OverlayTexture {
    pixels: Vec<u8>,
    size: [usize; 2],
    texture: Texture,
    set: vk::DescriptorSet,
}

/// Geometry of one frame slot.
struct SlotGeometry {
    vertices: Buffer,
    indices: Buffer,
    draws: Vec<OverlayDraw>,
    pixels_per_point: f32,
}

impl SlotGeometry {
    fn new(device: &Arc<Device>) -> RendererResult<Self> {
        Ok(Self {
            vertices: Buffer::new(device.clone(), BufferUsage::DynamicVertex, MIN_VERTEX_BYTES)?,
            indices: Buffer::new(device.clone(), BufferUsage::DynamicIndex, MIN_INDEX_BYTES)?,
            draws: Vec::new(),
            pixels_per_point: 1.0,
        })
    }
}

/// Pipeline, per-slot geometry and textures of the overlay.
pub struct OverlayPainter {
    device: Arc<Device>,
    textures: HashMap<egui::TextureId, OverlayTexture>,
    free_sets: Vec<vk::DescriptorSet>,
    /// Freed by egui last frame; released on the next update.
    pending_free: Vec<egui::TextureId>,
    slots: Vec<SlotGeometry>,
    pipeline: Pipeline,
    layout: PipelineLayout,
    pool: DescriptorPool,
    set_layout: DescriptorSetLayout,
}

impl OverlayPainter {
    pub fn new(
        device: Arc<Device>,
        shader_dir: &Path,
        color_format: vk::Format,
        frame_slots: usize,
    ) -> RendererResult<Self> {
        let set_layout = DescriptorSetLayout::new(
            device.clone(),
            &[BindingDesc::sampler(0, vk::ShaderStageFlags::FRAGMENT)],
        )?;
        let pool = DescriptorPool::new(
            device.clone(),
            MAX_OVERLAY_TEXTURES,
            &[vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: MAX_OVERLAY_TEXTURES,
            }],
        )?;
        // Screen size in points.
        let layout = PipelineLayout::with_push_constants(
            device.clone(),
            &[set_layout.handle()],
            &[vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: std::mem::size_of::<[f32; 2]>() as u32,
            }],
        )?;

        let vertex_shader = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join(OVERLAY_VERTEX_SHADER),
            ShaderStage::Vertex,
            "main",
        )?;
        let fragment_shader = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join(OVERLAY_FRAGMENT_SHADER),
            ShaderStage::Fragment,
            "main",
        )?;
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex_shader)
            .fragment_shader(&fragment_shader)
            .vertex_binding(vertex_binding())
            .vertex_attributes(&vertex_attributes())
            .cull_mode(vk::CullModeFlags::NONE)
            .depth_test(false, false, vk::CompareOp::ALWAYS)
            .alpha_blending(true)
            .color_attachment_format(color_format)
            .depth_attachment_format(DEPTH_FORMAT)
            .build(device.clone(), &layout)?;

        let slots = (0..frame_slots)
            .map(|_| SlotGeometry::new(&device))
            .collect::<RendererResult<Vec<_>>>()?;

        info!("Overlay painter ready ({} frame slots)", frame_slots);
        Ok(Self {
            device,
            textures: HashMap::new(),
            free_sets: Vec::new(),
            pending_free: Vec::new(),
            slots,
            pipeline,
            layout,
            pool,
            set_layout,
        })
    }

    /// Applies egui's texture changes.
    ///
    /// Replacing or releasing a texture waits for the device to go idle, which
    /// only happens when the font atlas changes.
    pub fn update_textures(
        &mut self,
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        delta: &egui::TexturesDelta,
    ) -> RendererResult<()> {
        if delta.set.is_empty() && self.pending_free.is_empty() {
            self.pending_free.extend_from_slice(&delta.free);
            return Ok(());
        }
        self.device.wait_idle()?;

        for id in std::mem::take(&mut self.pending_free) {
            if let Some(freed) = self.textures.remove(&id) {
                tracker.forget(freed.texture.image());
                self.free_sets.push(freed.set);
                debug!("Released overlay texture {:?}", id);
            }
        }

        for (id, image_delta) in &delta.set {
            let size = image_delta.image.size();
            let pixels = image_rgba(&image_delta.image);
            let (pixels, size) = match (image_delta.pos, self.textures.get(id)) {
                (None, _) => (pixels, size),
                (Some(pos), Some(existing)) => {
                    let mut patched = existing.pixels.clone();
                    patch_pixels(&mut patched, existing.size, pos, size, &pixels)?;
                    (patched, existing.size)
                }
                (Some(_), None) => {
                    return Err(RendererError::Overlay(format!(
                        "partial update of unknown texture {id:?}"
                    )));
                }
            };
            self.replace_texture(ctx, tracker, *id, pixels, size)?;
        }

        self.pending_free.extend_from_slice(&delta.free);
        Ok(())
    }

    fn replace_texture(
        &mut self,
        ctx: &UploadContext<'_>,
        tracker: &mut LayoutTracker,
        id: egui::TextureId,
        pixels: Vec<u8>,
        size: [usize; 2],
    ) -> RendererResult<()> {
        let extent = vk::Extent2D {
            width: size[0] as u32,
            height: size[1] as u32,
        };
        let texture = Texture::sampled_2d_from_pixels(ctx, tracker, "overlay", extent, &pixels)?;
        let set = match self.textures.remove(&id) {
            Some(old) => {
                tracker.forget(old.texture.image());
                old.set
            }
            None => self.allocate_set()?,
        };
        write_image(
            &self.device,
            set,
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            image_info(
                texture.sampler(),
                texture.view(),
                texture.kind().steady_layout(),
            ),
        );
        debug!(
            "Overlay texture {:?} uploaded ({}x{})",
            id, extent.width, extent.height
        );
        self.textures.insert(
            id,
            OverlayTexture {
                pixels,
                size,
                texture,
                set,
            },
        );
        Ok(())
    }

    fn allocate_set(&mut self) -> RendererResult<vk::DescriptorSet> {
        if let Some(set) = self.free_sets.pop() {
            return Ok(set);
        }
        if self.textures.len() as u32 >= MAX_OVERLAY_TEXTURES {
            return Err(RendererError::Overlay(format!(
                "more than {MAX_OVERLAY_TEXTURES} overlay textures"
            )));
        }
        let sets = self.pool.allocate(&[self.set_layout.handle()])?;
        sets.into_iter()
            .next()
            .ok_or_else(|| RendererError::Overlay("no overlay descriptor set allocated".into()))
    }

    /// Packs `frame` into the slot's buffers. The slot's fence must have been
    /// waited.
    pub fn upload(
        &mut self,
        slot: usize,
        frame: &OverlayFrame,
        extent: vk::Extent2D,
    ) -> RendererResult<()> {
        let geometry = OverlayGeometry::pack(&frame.primitives, frame.pixels_per_point, extent);
        let device = self.device.clone();
        let target = self.slots.get_mut(slot).ok_or_else(|| {
            RendererError::Overlay(format!("no overlay geometry for frame slot {slot}"))
        })?;

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&geometry.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&geometry.indices);
        let vertex_size =
            grown_capacity(target.vertices.size(), vertex_bytes.len() as u64, MIN_VERTEX_BYTES);
        if vertex_size != target.vertices.size() {
            debug!("Growing overlay vertex buffer to {} bytes", vertex_size);
            target.vertices = Buffer::new(device.clone(), BufferUsage::DynamicVertex, vertex_size)?;
        }
        let index_size =
            grown_capacity(target.indices.size(), index_bytes.len() as u64, MIN_INDEX_BYTES);
        if index_size != target.indices.size() {
            debug!("Growing overlay index buffer to {} bytes", index_size);
            target.indices = Buffer::new(device, BufferUsage::DynamicIndex, index_size)?;
        }

        target.vertices.write_data(0, vertex_bytes)?;
        target.indices.write_data(0, index_bytes)?;
        target.draws = geometry.draws;
        target.pixels_per_point = frame.pixels_per_point;
        Ok(())
    }

    /// Draws the slot's geometry. Must run inside the composite rendering
    /// pass, after the background quad.
    pub fn record(&self, cmd: &CommandBuffer, slot: usize, extent: vk::Extent2D) {
        let Some(geometry) = self.slots.get(slot) else {
            return;
        };
        if geometry.draws.is_empty() {
            return;
        }

        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
        cmd.bind_vertex_buffer(geometry.vertices.handle());
        cmd.bind_index_buffer(geometry.indices.handle(), vk::IndexType::UINT32);
        let screen_points = [
            extent.width as f32 / geometry.pixels_per_point,
            extent.height as f32 / geometry.pixels_per_point,
        ];
        cmd.push_constants(
            self.layout.handle(),
            vk::ShaderStageFlags::VERTEX,
            0,
            bytemuck::cast_slice(&screen_points),
        );
        cmd.set_viewport_and_scissor(extent);

        for draw in &geometry.draws {
            let Some(texture) = self.textures.get(&draw.texture) else {
                trace!("Overlay texture {:?} not uploaded yet", draw.texture);
                continue;
            };
            cmd.set_scissor(draw.scissor);
            cmd.bind_descriptor_set(
                vk::PipelineBindPoint::GRAPHICS,
                self.layout.handle(),
                0,
                texture.set,
            );
            cmd.draw_indexed_range(draw.index_count, draw.first_index, draw.vertex_offset);
        }
    }
}

/// Position and uv as two floats each, then premultiplied sRGBA bytes.
fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: VERTEX_STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            binding: 0,
            location: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            binding: 0,
            location: 1,
            format: vk::Format::R32G32_SFLOAT,
            offset: 8,
        },
        vk::VertexInputAttributeDescription {
            binding: 0,
            location: 2,
            format: vk::Format::R8G8B8A8_UNORM,
            offset: 16,
        },
    ]
}

#[cfg(test)]
mod tests {
    use egui::epaint::Mesh;
    use egui::{Color32, Pos2, Rect, TextureId, pos2, vec2};

    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    fn triangle(texture: TextureId) -> Mesh {
        let mut mesh = Mesh::with_texture(texture);
        for pos in [pos2(0.0, 0.0), pos2(10.0, 0.0), pos2(0.0, 10.0)] {
            mesh.vertices.push(Vertex {
                pos,
                uv: Pos2::ZERO,
                color: Color32::WHITE,
            });
        }
        mesh.add_triangle(0, 1, 2);
        mesh
    }

    fn clipped(clip_rect: Rect, mesh: Mesh) -> egui::ClippedPrimitive {
        egui::ClippedPrimitive {
            clip_rect,
            primitive: Primitive::Mesh(mesh),
        }
    }

    #[test]
    fn test_vertex_layout_matches_egui() {
        assert_eq!(VERTEX_STRIDE, 20);
        let attributes = vertex_attributes();
        assert_eq!(attributes[2].offset + 4, VERTEX_STRIDE);
    }

    #[test]
    fn test_scissor_scales_and_clamps() {
        let clip = Rect::from_min_max(pos2(-5.0, 10.0), pos2(500.0, 400.0));
        let scissor = scissor_rect(clip, 2.0, EXTENT).unwrap();
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 20 });
        assert_eq!(
            scissor.extent,
            vk::Extent2D {
                width: 800,
                height: 580,
            }
        );

        let off_screen = Rect::from_min_size(pos2(900.0, 0.0), vec2(10.0, 10.0));
        assert_eq!(scissor_rect(off_screen, 1.0, EXTENT), None);
        assert_eq!(scissor_rect(Rect::NOTHING, 1.0, EXTENT), None);
    }

    #[test]
    fn test_pack_offsets_each_mesh() {
        let everything = Rect::from_min_size(Pos2::ZERO, vec2(800.0, 600.0));
        let font = TextureId::default();
        let user = TextureId::User(3);
        let primitives = vec![
            clipped(everything, triangle(font)),
            clipped(everything, Mesh::with_texture(font)),
            clipped(Rect::from_min_size(pos2(2000.0, 0.0), vec2(5.0, 5.0)), triangle(font)),
            clipped(everything, triangle(user)),
        ];

        let geometry = OverlayGeometry::pack(&primitives, 1.0, EXTENT);
        assert_eq!(geometry.vertices.len(), 6);
        assert_eq!(geometry.indices, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(geometry.draws.len(), 2);
        assert_eq!(geometry.draws[0].texture, font);
        assert_eq!(
            (geometry.draws[1].first_index, geometry.draws[1].vertex_offset),
            (3, 3)
        );
        assert_eq!(geometry.draws[1].texture, user);
    }

    #[test]
    fn test_grown_capacity_doubles_past_current() {
        assert_eq!(grown_capacity(1024, 512, 256), 1024);
        assert_eq!(grown_capacity(1024, 1025, 256), 2048);
        assert_eq!(grown_capacity(1024, 10, 4096), 1024);
        assert_eq!(grown_capacity(0, 10, 4096), 4096);
    }

    #[test]
    fn test_patch_pixels_writes_rows() {
        let mut target = vec![0u8; 4 * 4 * 4];
        let patch = vec![9u8; 2 * 2 * 4];
        patch_pixels(&mut target, [4, 4], [1, 2], [2, 2], &patch).unwrap();

        let texel = |x: usize, y: usize| target[(y * 4 + x) * 4];
        assert_eq!(texel(1, 2), 9);
        assert_eq!(texel(2, 3), 9);
        assert_eq!(texel(0, 2), 0);
        assert_eq!(texel(3, 2), 0);
        assert_eq!(texel(1, 1), 0);
    }

    #[test]
    fn test_patch_outside_texture_is_rejected() {
        let mut target = vec![0u8; 4 * 4 * 4];
        let patch = vec![9u8; 2 * 2 * 4];
        assert!(patch_pixels(&mut target, [4, 4], [3, 0], [2, 2], &patch).is_err());
        assert!(target.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_color_image_becomes_rgba_bytes() {
        let image = egui::ImageData::Color(Arc::new(egui::ColorImage {
            size: [2, 1],
            pixels: vec![Color32::from_rgb(1, 2, 3), Color32::TRANSPARENT],
        }));
        assert_eq!(image_rgba(&image), vec![1, 2, 3, 255, 0, 0, 0, 0]);
    }
}
