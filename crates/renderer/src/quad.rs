use ash::vk;
use cloud_rhi::RhiResult;
use cloud_rhi::buffer::{Buffer, BufferUsage};
use cloud_rhi::command::CommandBuffer;
use cloud_rhi::texture::UploadContext;
use cloud_rhi::vertex::{BACKGROUND_QUAD_INDICES, BACKGROUND_QUAD_VERTICES};

/// Device-local vertex and index buffers of the composite quad.
pub struct BackgroundQuad {
    vertices: Buffer,
    indices: Buffer,
}

impl BackgroundQuad {
    pub fn new(ctx: &UploadContext<'_>) -> RhiResult<Self> {
        let vertices = Buffer::from_data_staged(
            ctx.device.clone(),
            ctx.pool,
            ctx.queue,
            BufferUsage::Vertex,
            bytemuck::cast_slice(&BACKGROUND_QUAD_VERTICES),
        )?;
        let indices = Buffer::from_data_staged(
            ctx.device.clone(),
            ctx.pool,
            ctx.queue,
            BufferUsage::Index,
            bytemuck::cast_slice(&BACKGROUND_QUAD_INDICES),
        )?;
        Ok(Self { vertices, indices })
    }

    /// Binds both buffers and draws. A composite pipeline must be bound.
    pub fn draw(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffer(self.vertices.handle());
        cmd.bind_index_buffer(self.indices.handle(), vk::IndexType::UINT32);
        cmd.draw_indexed(BACKGROUND_QUAD_INDICES.len() as u32);
    }
}
