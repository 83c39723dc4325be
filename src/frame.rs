//! Per-frame command recording and synchronization state.

use ash::vk;

use crate::deferred::DeletionQueue;
use crate::error::{Error, Result};

/// One slot of the frame rotation.
///
/// Each slot owns its command pool and primary command buffer, the fence and
/// semaphores tying its submission to the swapchain, and the batch of
/// resources retired during the slot's previous use (released once the fence
/// proves that use finished).
pub(crate) struct FrameSlot {
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) command_buffer: vk::CommandBuffer,
    /// Created signaled so the first wait on a fresh slot passes.
    pub(crate) fence: vk::Fence,
    /// Signaled when the acquired swapchain image is ready for writes.
    pub(crate) acquire_semaphore: vk::Semaphore,
    /// Signaled when this slot's submission finishes; present waits on it.
    pub(crate) render_semaphore: vk::Semaphore,
    /// Swapchain image acquired for the frame currently using this slot.
    pub(crate) image_index: u32,
    pub(crate) retired: DeletionQueue,
}

impl FrameSlot {
    pub(crate) fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(
            |e| Error::InitializationFailed(format!("Failed to create command pool: {:?}", e)),
        )?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| {
                Error::InitializationFailed(format!(
                    "Failed to allocate command buffer: {:?}",
                    e
                ))
            })?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::InitializationFailed("Command buffer allocation returned nothing".into())
            })?;

        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = unsafe { device.create_fence(&fence_info, None) }.map_err(|e| {
            Error::InitializationFailed(format!("Failed to create frame fence: {:?}", e))
        })?;

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let acquire_semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(|e| {
                Error::InitializationFailed(format!(
                    "Failed to create acquire semaphore: {:?}",
                    e
                ))
            })?;
        let render_semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }
            .map_err(|e| {
                Error::InitializationFailed(format!(
                    "Failed to create render semaphore: {:?}",
                    e
                ))
            })?;

        Ok(Self {
            command_pool,
            command_buffer,
            fence,
            acquire_semaphore,
            render_semaphore,
            image_index: 0,
            retired: DeletionQueue::default(),
        })
    }

    /// Destroy the slot's sync objects and command pool.
    ///
    /// # Safety
    ///
    /// The device must be idle, and the slot's retired batch must already
    /// have been released.
    pub(crate) unsafe fn destroy(&mut self, device: &ash::Device) {
        debug_assert!(self.retired.is_empty());
        unsafe {
            device.destroy_semaphore(self.acquire_semaphore, None);
            device.destroy_semaphore(self.render_semaphore, None);
            device.destroy_fence(self.fence, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}
