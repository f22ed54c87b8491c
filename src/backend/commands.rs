// One-shot command submission
//
// Every transfer, layout transition and draw is recorded into a fresh primary
// command buffer, submitted, and waited on with queue_wait_idle before the
// buffer is freed. Nothing overlaps on the GPU.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;
use crate::error::VkCheck;

/// Semaphores and fence attached to a one-shot submission
#[derive(Debug, Default, Clone)]
pub struct SubmitSync {
    pub wait: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

impl SubmitSync {
    /// No semaphores, no fence
    pub fn none() -> Self {
        Self::default()
    }

    pub fn wait(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) -> Self {
        self.wait.push(semaphore);
        self.wait_stages.push(stage);
        self
    }

    pub fn signal(mut self, semaphore: vk::Semaphore) -> Self {
        self.signal.push(semaphore);
        self
    }

    pub fn fence(mut self, fence: vk::Fence) -> Self {
        self.fence = fence;
        self
    }
}

/// Record with `record`, submit on the graphics queue, block until idle.
///
/// The command buffer is freed even when recording or submission fails.
pub fn submit_one_shot<F>(device: &VulkanDevice, sync: &SubmitSync, record: F) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
{
    let raw = device.raw();

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(device.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffers = unsafe { raw.allocate_command_buffers(&alloc_info) }
        .check("vkAllocateCommandBuffers")?;
    let cmd = command_buffers[0];

    let result = record_and_submit(device, cmd, sync, record);

    unsafe {
        raw.free_command_buffers(device.command_pool, &command_buffers);
    }

    result
}

fn record_and_submit<F>(
    device: &VulkanDevice,
    cmd: vk::CommandBuffer,
    sync: &SubmitSync,
    record: F,
) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
{
    let raw = device.raw();

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { raw.begin_command_buffer(cmd, &begin_info) }.check("vkBeginCommandBuffer")?;

    record(raw, cmd)?;

    unsafe { raw.end_command_buffer(cmd) }.check("vkEndCommandBuffer")?;

    let command_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default()
        .wait_semaphores(&sync.wait)
        .wait_dst_stage_mask(&sync.wait_stages)
        .command_buffers(&command_buffers)
        .signal_semaphores(&sync.signal);

    unsafe {
        raw.queue_submit(device.graphics_queue, &[submit_info], sync.fence)
            .check("vkQueueSubmit")
            .context("Failed to submit one-shot command buffer")?;
        raw.queue_wait_idle(device.graphics_queue)
            .check("vkQueueWaitIdle")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn builder_keeps_waits_and_stages_paired() {
        let a = vk::Semaphore::from_raw(1);
        let b = vk::Semaphore::from_raw(2);
        let sync = SubmitSync::none()
            .wait(a, vk::PipelineStageFlags::TRANSFER)
            .wait(b, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .signal(b);

        assert_eq!(sync.wait, vec![a, b]);
        assert_eq!(sync.wait.len(), sync.wait_stages.len());
        assert_eq!(sync.wait_stages[1], vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(sync.fence, vk::Fence::null());
    }
}
