//! GPU buffers backed by gpu-allocator.
//!
//! - [`Buffer`] wraps a `VkBuffer` and its allocation.
//! - [`UniformBuffer`] is a persistently mapped, host-coherent buffer holding
//!   one `Pod` value.
//! - [`Buffer::from_data_staged`] uploads startup data into device-local
//!   memory through a staging copy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cloud_rhi::buffer::{Buffer, BufferUsage};
//! use cloud_rhi::command::CommandPool;
//! use cloud_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> Result<(), cloud_rhi::RhiError> {
//! let indices: [u32; 6] = [0, 1, 2, 2, 3, 0];
//! let index_buffer = Buffer::from_data_staged(
//!     device.clone(),
//!     pool,
//!     device.graphics_queue(),
//!     BufferUsage::Index,
//!     bytemuck::cast_slice(&indices),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What a buffer is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Vertices rewritten by the host every frame.
    DynamicVertex,
    /// Indices rewritten by the host every frame.
    DynamicIndex,
    Uniform,
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::DynamicVertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::DynamicIndex => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Device-local for static geometry, host-visible otherwise.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::DynamicVertex
            | BufferUsage::DynamicIndex
            | BufferUsage::Uniform
            | BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::DynamicVertex => "dynamic vertex",
            BufferUsage::DynamicIndex => "dynamic index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Vulkan buffer with gpu-allocator memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates an uninitialized buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Fails for a zero size or when allocation fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "{} buffer size must be greater than 0",
                usage.name()
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: usage.name(),
                    requirements,
                    location: usage.memory_location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }
        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Uploads `data` into a new device-local buffer.
    ///
    /// Copies into a host-visible staging buffer, records a one-time copy on
    /// `queue` and waits for it. Blocking; meant for startup data only.
    pub fn from_data_staged(
        device: Arc<Device>,
        pool: &CommandPool,
        queue: vk::Queue,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let size = data.len() as vk::DeviceSize;
        let staging = Self::new(device.clone(), BufferUsage::Staging, size)?;
        staging.write_data(0, data)?;

        let buffer = Self::new(device, usage, size)?;
        pool.one_time_submit(queue, |cmd| {
            cmd.copy_buffer(staging.handle(), buffer.handle(), size);
            Ok(())
        })?;
        debug!("Uploaded {} bytes into {} buffer", size, usage.name());
        Ok(buffer)
    }

    /// Writes `data` at `offset` through the persistent mapping.
    ///
    /// # Errors
    ///
    /// Fails when the write overruns the buffer or the memory is not
    /// host-visible.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "write of {} bytes at offset {} exceeds {} buffer of {} bytes",
                data.len(),
                offset,
                self.usage.name(),
                self.size
            )));
        }

        let mapped = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("{} buffer is not mapped", self.usage.name()))
            })?;

        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} buffer allocation: {:?}", self.usage.name(), e);
                    }
                }
                Err(e) => error!("Leaking {} buffer allocation: {}", self.usage.name(), e),
            }
        }
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed {} buffer ({} bytes)", self.usage.name(), self.size);
    }
}

/// Persistently mapped uniform buffer holding one `T`.
///
/// The memory is host-coherent, so writes need no flush. The caller must not
/// write while a submission that reads the buffer is still executing.
pub struct UniformBuffer<T: Pod> {
    buffer: Buffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    /// Creates the buffer and writes `initial`.
    pub fn new(device: Arc<Device>, initial: &T) -> RhiResult<Self> {
        let buffer = Buffer::new(
            device,
            BufferUsage::Uniform,
            std::mem::size_of::<T>() as vk::DeviceSize,
        )?;
        buffer.write_data(0, bytemuck::bytes_of(initial))?;
        Ok(Self {
            buffer,
            _marker: PhantomData,
        })
    }

    /// Overwrites the whole contents.
    pub fn write(&self, value: &T) -> RhiResult<()> {
        self.buffer.write_data(0, bytemuck::bytes_of(value))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Descriptor info covering the whole value.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer.handle())
            .offset(0)
            .range(std::mem::size_of::<T>() as vk::DeviceSize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_written_buffers_are_host_visible() {
        for usage in [
            BufferUsage::Uniform,
            BufferUsage::Staging,
            BufferUsage::DynamicVertex,
            BufferUsage::DynamicIndex,
        ] {
            assert_eq!(usage.memory_location(), MemoryLocation::CpuToGpu, "{usage:?}");
        }
        assert!(
            BufferUsage::DynamicIndex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER)
        );
    }

    #[test]
    fn test_geometry_is_device_local_copy_target() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            assert_eq!(usage.memory_location(), MemoryLocation::GpuOnly);
            assert!(
                usage
                    .to_vk_usage()
                    .contains(vk::BufferUsageFlags::TRANSFER_DST)
            );
        }
        assert!(
            BufferUsage::Staging
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        );
    }
}
