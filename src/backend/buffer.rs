// Buffer utilities for vertex, index, and uniform buffers
//
// `Buffer` is one VkBuffer with its own dedicated allocation. `GpuBuffer`
// layers the upload policy on top: device-local buffers are filled through a
// staging copy, host-visible ones are written directly.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::commands::{submit_one_shot, SubmitSync};
use super::{memory, VulkanDevice};
use crate::error::VkCheck;

/// A buffer and the memory bound to it. Destroyed buffer first, memory second.
pub struct Buffer {
    device: Arc<VulkanDevice>,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

/// Create an exclusive buffer of exactly `size` bytes and bind fresh memory at offset 0
pub fn create_and_get_buffer(
    device: &Arc<VulkanDevice>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
) -> Result<Buffer> {
    let raw = device.raw();

    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { raw.create_buffer(&buffer_info, None) }
        .check("vkCreateBuffer")
        .context("Failed to create buffer")?;

    let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
    let memory = match memory::allocate(
        raw,
        &device.memory_properties,
        requirements,
        memory_properties,
    ) {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { raw.destroy_buffer(buffer, None) };
            return Err(e.context("Failed to allocate buffer memory"));
        }
    };

    // From here on Drop takes care of both handles
    let buffer = Buffer {
        device: device.clone(),
        buffer,
        memory,
        size,
    };

    unsafe { raw.bind_buffer_memory(buffer.buffer, buffer.memory, 0) }
        .check("vkBindBufferMemory")?;

    log::trace!("Created buffer of {} bytes ({:?})", size, usage);
    Ok(buffer)
}

impl Buffer {
    /// Map, copy `data` to offset 0, unmap. The memory must be host-visible.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let raw = self.device.raw();
        let len = (data.len() as vk::DeviceSize).min(self.size);
        if len == 0 {
            return Ok(());
        }

        unsafe {
            let ptr = raw
                .map_memory(self.memory, 0, len, vk::MemoryMapFlags::empty())
                .check("vkMapMemory")? as *mut u8;
            ptr.copy_from_nonoverlapping(data.as_ptr(), len as usize);
            raw.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_buffer(self.buffer, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}

/// Where a `GpuBuffer` lives and therefore how it is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Filled through a staging buffer and a transfer command
    DeviceLocal,
    /// Mapped and written directly
    HostVisible,
}

impl MemoryLocation {
    fn property_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryLocation::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryLocation::HostVisible => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }
}

/// The buffer must be (re)created when there is none yet or the byte count changed
pub fn needs_recreate(current_size: Option<vk::DeviceSize>, requested: vk::DeviceSize) -> bool {
    current_size != Some(requested)
}

/// Lazily allocated buffer that keeps its handle while the byte count stays the same
pub struct GpuBuffer {
    device: Arc<VulkanDevice>,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    raw: Option<Buffer>,
}

impl GpuBuffer {
    pub fn new(device: Arc<VulkanDevice>, usage: vk::BufferUsageFlags, location: MemoryLocation) -> Self {
        let usage = match location {
            MemoryLocation::DeviceLocal => usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::HostVisible => usage,
        };
        Self {
            device,
            usage,
            location,
            raw: None,
        }
    }

    pub fn vertex(device: Arc<VulkanDevice>) -> Self {
        Self::new(device, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::DeviceLocal)
    }

    pub fn index(device: Arc<VulkanDevice>) -> Self {
        Self::new(device, vk::BufferUsageFlags::INDEX_BUFFER, MemoryLocation::DeviceLocal)
    }

    pub fn uniform(device: Arc<VulkanDevice>) -> Self {
        Self::new(device, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::HostVisible)
    }

    /// Upload `data`, recreating the buffer only if the byte count changed.
    /// An empty slice is a no-op.
    pub fn copy_to_gpu(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let size = data.len() as vk::DeviceSize;

        if needs_recreate(self.size(), size) {
            // Replacement exists before the old handles are released, so the
            // driver cannot hand the freed values straight back
            let replacement = create_and_get_buffer(
                &self.device,
                size,
                self.usage,
                self.location.property_flags(),
            )?;
            self.raw = Some(replacement);
            log::debug!("(Re)created {:?} buffer of {} bytes", self.location, size);
        }

        let Some(target) = self.raw.as_ref() else {
            return Ok(());
        };

        match self.location {
            MemoryLocation::HostVisible => target.write(data),
            MemoryLocation::DeviceLocal => {
                let staging = create_and_get_buffer(
                    &self.device,
                    size,
                    vk::BufferUsageFlags::TRANSFER_SRC,
                    MemoryLocation::HostVisible.property_flags(),
                )
                .context("Failed to create staging buffer")?;
                staging.write(data)?;

                let region = vk::BufferCopy::default().size(size);
                submit_one_shot(&self.device, &SubmitSync::none(), |raw, cmd| {
                    unsafe { raw.cmd_copy_buffer(cmd, staging.buffer, target.buffer, &[region]) };
                    Ok(())
                })
                // staging drops here, after the queue went idle
            }
        }
    }

    /// Native handle, or null before the first upload
    pub fn handle(&self) -> vk::Buffer {
        self.raw
            .as_ref()
            .map_or(vk::Buffer::null(), |buffer| buffer.buffer)
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.raw
            .as_ref()
            .map_or(vk::DeviceMemory::null(), |buffer| buffer.memory)
    }

    pub fn size(&self) -> Option<vk::DeviceSize> {
        self.raw.as_ref().map(|buffer| buffer.size)
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Descriptor info covering the whole buffer
    pub fn descriptor_info(&self) -> Option<vk::DescriptorBufferInfo> {
        self.raw.as_ref().map(|buffer| {
            vk::DescriptorBufferInfo::default()
                .buffer(buffer.buffer)
                .offset(0)
                .range(buffer.size)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_upload_always_creates() {
        assert!(needs_recreate(None, 64));
    }

    #[test]
    fn same_size_keeps_buffer() {
        assert!(!needs_recreate(Some(64), 64));
    }

    #[test]
    fn size_change_recreates_in_both_directions() {
        assert!(needs_recreate(Some(64), 128));
        assert!(needs_recreate(Some(128), 64));
    }

    #[test]
    fn host_visible_memory_is_coherent() {
        let flags = MemoryLocation::HostVisible.property_flags();
        assert!(flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        assert_eq!(
            MemoryLocation::DeviceLocal.property_flags(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
    }
}
