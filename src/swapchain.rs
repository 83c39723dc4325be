//! Swapchain creation, presentation, and regeneration.
//!
//! The swapchain is rebuilt wholesale whenever acquire or present reports it
//! out of date; frame-slot synchronization objects live in
//! [`frame`](crate::frame), not here. Rendering never targets swapchain
//! images directly - the frame pipeline blits the caller's backbuffer into
//! the acquired image before present.

use ash::vk;

use crate::error::{Error, Result};
use crate::types::{Extent2d, PresentMode};

/// Preferred surface format: UNORM images in an sRGB color space, so blits
/// from sRGB backbuffers do not double-encode.
const DESIRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;
const DESIRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

/// Swapchain plus its images and views.
pub(crate) struct Swapchain {
    device: ash::Device,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub(crate) fn create(
        instance: &ash::Instance,
        device: &ash::Device,
        surface_loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        desired_extent: Extent2d,
        present_mode: PresentMode,
    ) -> Result<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(|e| {
            Error::InitializationFailed(format!("Failed to query surface capabilities: {:?}", e))
        })?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(|e| {
            Error::InitializationFailed(format!("Failed to query surface formats: {:?}", e))
        })?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(|e| {
            Error::InitializationFailed(format!("Failed to query present modes: {:?}", e))
        })?;

        let surface_format = choose_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes, present_mode);
        let extent = choose_extent(&capabilities, desired_extent);
        let image_count = choose_image_count(&capabilities);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let loader = ash::khr::swapchain::Device::new(instance, device);
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }.map_err(|e| {
            Error::InitializationFailed(format!("Failed to create swapchain: {:?}", e))
        })?;

        let images = unsafe { loader.get_swapchain_images(swapchain) }.map_err(|e| {
            Error::InitializationFailed(format!("Failed to get swapchain images: {:?}", e))
        })?;

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { device.create_image_view(&view_info, None) }.map_err(|e| {
                Error::InitializationFailed(format!(
                    "Failed to create swapchain image view: {:?}",
                    e
                ))
            })?;
            image_views.push(view);
        }

        log::info!(
            "Created swapchain {}x{} with {} images ({:?})",
            extent.width,
            extent.height,
            images.len(),
            present_mode
        );

        Ok(Self {
            device: device.clone(),
            loader,
            swapchain,
            images,
            image_views,
            extent,
        })
    }

    /// Acquire the next image, signaling `semaphore` when it is usable.
    ///
    /// `Ok(Some(index))` on success (suboptimal counts as success),
    /// `Ok(None)` when the swapchain is out of date and must be regenerated.
    pub(crate) fn acquire(
        &self,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<Option<u32>> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, _suboptimal)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(Error::FenceTimeout),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(Error::DeviceLost),
            Err(e) => Err(Error::Internal(format!(
                "Failed to acquire swapchain image: {:?}",
                e
            ))),
        }
    }

    /// Present `image_index` after `wait_semaphore` signals.
    ///
    /// Returns true when the swapchain should be regenerated before the next
    /// frame (out of date or suboptimal); presentation itself never fails for
    /// those cases.
    pub(crate) fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };
        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(Error::DeviceLost),
            Err(e) => Err(Error::Internal(format!("Failed to present: {:?}", e))),
        }
    }

    pub(crate) fn extent(&self) -> Extent2d {
        Extent2d::new(self.extent.width, self.extent.height)
    }

    pub(crate) fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    /// Destroy the image views and the swapchain. Idempotent.
    ///
    /// # Safety
    ///
    /// The device must be idle or all work targeting the swapchain images
    /// must have completed.
    pub(crate) unsafe fn destroy(&mut self) {
        if self.swapchain == vk::SwapchainKHR::null() {
            return;
        }
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    if formats.is_empty() {
        return Err(Error::InitializationFailed(
            "Surface reports no formats".into(),
        ));
    }
    Ok(formats
        .iter()
        .find(|f| f.format == DESIRED_FORMAT && f.color_space == DESIRED_COLOR_SPACE)
        .copied()
        .unwrap_or(formats[0]))
}

fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    requested: PresentMode,
) -> vk::PresentModeKHR {
    let wanted = requested.to_vk();
    if available.contains(&wanted) {
        wanted
    } else {
        // Every conformant implementation supports FIFO.
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, desired: Extent2d) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let max = if capabilities.max_image_count > 0 {
        capabilities.max_image_count
    } else {
        u32::MAX
    };
    (capabilities.min_image_count + 1).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&available, PresentMode::Mailbox),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&available, PresentMode::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_extent_prefers_surface_current_extent() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(&capabilities, Extent2d::new(1920, 1080));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_extent_clamps_when_surface_leaves_it_free() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        capabilities.min_image_extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        capabilities.max_image_extent = vk::Extent2D {
            width: 1024,
            height: 1024,
        };
        let extent = choose_extent(&capabilities, Extent2d::new(4096, 16));
        assert_eq!((extent.width, extent.height), (1024, 64));
    }

    #[test]
    fn test_format_preference() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: DESIRED_FORMAT,
                color_space: DESIRED_COLOR_SPACE,
            },
        ];
        assert_eq!(choose_format(&formats).unwrap().format, DESIRED_FORMAT);

        // Falls back to the first advertised format.
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_format(&[]).is_err());
    }

    #[test]
    fn test_image_count_respects_caps() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.min_image_count = 2;
        capabilities.max_image_count = 0; // unlimited
        assert_eq!(choose_image_count(&capabilities), 3);

        capabilities.max_image_count = 2;
        assert_eq!(choose_image_count(&capabilities), 2);
    }
}
