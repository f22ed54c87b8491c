// Swapchain - Window presentation
//
// Manages the chain of images we present to the screen. Never mutated: on
// resize or out-of-date the whole thing is dropped and built again.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::SurfaceSupport;
use super::texture::create_and_get_image_view;
use super::VulkanDevice;
use crate::error::{FatalError, VkCheck};

/// B8G8R8A8_SRGB + SRGB_NONLINEAR when offered, otherwise the first format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Preference MAILBOX > IMMEDIATE > FIFO. An explicit request is honored when
/// supported and falls back to FIFO otherwise.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    requested: Option<vk::PresentModeKHR>,
) -> vk::PresentModeKHR {
    if let Some(requested) = requested {
        return if available.contains(&requested) {
            requested
        } else {
            log::warn!("Present mode {:?} unsupported, using FIFO", requested);
            vk::PresentModeKHR::FIFO
        };
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO) // FIFO is always supported
}

/// Surface extent, or the window size clamped when the surface leaves it to us
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// min + 1, clamped to max when the surface reports one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let requested = caps.min_image_count + 1;
    if caps.max_image_count > 0 && requested > caps.max_image_count {
        caps.max_image_count
    } else {
        requested
    }
}

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

pub struct Swapchain {
    device: Arc<VulkanDevice>,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        present_mode: Option<vk::PresentModeKHR>,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        } = device.surface_support()?;

        let surface_format = choose_surface_format(&formats).ok_or_else(|| {
            FatalError::NoSuitableDevice("surface reports no formats".to_string())
        })?;
        let present_mode = choose_present_mode(&present_modes, present_mode);
        let extent = choose_extent(&capabilities, width, height);
        let image_count = choose_image_count(&capabilities);

        let families = device.queue_families;
        let family_indices = [families.graphics, families.present];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain_fns = device.swapchain_fns();
        let swapchain = unsafe { swapchain_fns.create_swapchain(&create_info, None) }
            .check("vkCreateSwapchainKHR")
            .context("Failed to create swapchain")?;

        // Anything that fails from here is cleaned up by Drop
        let mut chain = Self {
            device: device.clone(),
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            present_mode,
            extent,
        };

        chain.images = unsafe { swapchain_fns.get_swapchain_images(swapchain) }
            .check("vkGetSwapchainImagesKHR")?;
        chain.create_image_views()?;

        log::info!(
            "Created swapchain with {} images ({:?}, {:?}, {}x{})",
            chain.images.len(),
            chain.format,
            present_mode,
            extent.width,
            extent.height
        );

        Ok(chain)
    }

    fn create_image_views(&mut self) -> Result<()> {
        for &image in &self.images {
            let view = create_and_get_image_view(
                &self.device,
                image,
                self.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.image_views.push(view);
        }
        Ok(())
    }

    /// Acquire the next presentable image, signaling `semaphore` when it is ready
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.device.swapchain_fns().acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(FatalError::Vulkan {
                call: "vkAcquireNextImageKHR",
                result,
            }
            .into()),
        }
    }

    /// Present rendered image to screen. Returns true when the chain should be rebuilt.
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.device.swapchain_fns().queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(result) => Err(FatalError::Vulkan {
                call: "vkQueuePresentKHR",
                result,
            }
            .into()),
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.raw().destroy_image_view(view, None);
            }
            self.device
                .swapchain_fns()
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_within_range_is_kept() {
        assert_eq!(choose_image_count(&caps(2, 3)), 3);
    }

    #[test]
    fn image_count_clamped_to_max() {
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn zero_max_means_unbounded() {
        assert_eq!(choose_image_count(&caps(4, 0)), 5);
    }

    #[test]
    fn prefers_srgb_bgra() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_preference_order() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE, M::MAILBOX], None), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO, M::IMMEDIATE], None), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO], None), M::FIFO);
    }

    #[test]
    fn explicit_present_mode_falls_back_to_fifo() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX], Some(M::MAILBOX)), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::FIFO], Some(M::IMMEDIATE)), M::FIFO);
    }

    #[test]
    fn extent_from_surface_or_clamped_window() {
        let mut fixed = caps(2, 3);
        fixed.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(choose_extent(&fixed, 1920, 1080), fixed.current_extent);

        let free = caps(2, 3);
        assert_eq!(
            choose_extent(&free, 8000, 0),
            vk::Extent2D { width: 4096, height: 1 }
        );
    }
}
