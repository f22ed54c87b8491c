// Synchronization primitives
//
// Semaphores order GPU work within a frame, the fence lets the CPU wait for
// a ring slot before reusing it.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::VkCheck;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    device: Arc<VulkanDevice>,
    /// Signaled by acquire, waited on by the present copy
    pub image_available: vk::Semaphore,
    /// Signaled by the first draw submission of the frame
    pub render_finished: vk::Semaphore,
    /// Signaled by the present copy, waited on by present
    pub color_target_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let raw = device.raw();
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait on this slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        // Build incrementally so Drop cleans up a partial set
        let mut sync = Self {
            device: device.clone(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            color_target_available: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
        };
        unsafe {
            sync.image_available = raw
                .create_semaphore(&semaphore_info, None)
                .check("vkCreateSemaphore")?;
            sync.render_finished = raw
                .create_semaphore(&semaphore_info, None)
                .check("vkCreateSemaphore")?;
            sync.color_target_available = raw
                .create_semaphore(&semaphore_info, None)
                .check("vkCreateSemaphore")?;
            sync.in_flight_fence = raw.create_fence(&fence_info, None).check("vkCreateFence")?;
        }
        Ok(sync)
    }

    /// Block until the slot's previous frame has finished on the GPU
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
        }
        .check("vkWaitForFences")
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.raw().reset_fences(&[self.in_flight_fence]) }.check("vkResetFences")
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        // Destroying a null handle is a no-op
        unsafe {
            let raw = self.device.raw();
            raw.destroy_semaphore(self.image_available, None);
            raw.destroy_semaphore(self.render_finished, None);
            raw.destroy_semaphore(self.color_target_available, None);
            raw.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Fixed-size round-robin of per-frame slots
pub struct FrameRing<T> {
    slots: Vec<T>,
    current: usize,
}

impl<T> FrameRing<T> {
    /// Panics on an empty slot list; callers build at least one slot
    pub fn new(slots: Vec<T>) -> Self {
        assert!(!slots.is_empty(), "frame ring needs at least one slot");
        Self { slots, current: 0 }
    }

    /// Build `count` slots with `make`, stopping at the first error
    pub fn try_new(count: usize, mut make: impl FnMut(usize) -> Result<T>) -> Result<Self> {
        let slots = (0..count.max(1)).map(&mut make).collect::<Result<Vec<_>>>()?;
        Ok(Self::new(slots))
    }

    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Move to the next slot, wrapping modulo the ring size
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_wraps_after_ring_size_frames() {
        let mut ring = FrameRing::new(vec!['a', 'b']);
        assert_eq!(ring.current_index(), 0);
        ring.advance();
        assert_eq!(ring.current_index(), 1);
        ring.advance();
        assert_eq!(ring.current_index(), 0);
    }

    #[test]
    fn slot_identity_is_stable_across_wraps() {
        let mut ring = FrameRing::try_new(2, |i| Ok(Box::new(i))).unwrap();
        let first: *const Box<usize> = ring.current();

        for _ in 0..ring.len() * 3 {
            ring.advance();
        }

        assert_eq!(ring.current_index(), 0);
        assert!(std::ptr::eq(first, ring.current()));
        assert_eq!(**ring.current(), 0);
    }

    #[test]
    fn zero_count_still_builds_one_slot() {
        let ring = FrameRing::try_new(0, |_| Ok(())).unwrap();
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn construction_error_propagates() {
        let result = FrameRing::<u32>::try_new(3, |i| {
            if i == 2 {
                anyhow::bail!("slot {} failed", i)
            }
            Ok(i as u32)
        });
        assert!(result.is_err());
    }
}
