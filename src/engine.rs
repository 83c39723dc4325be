//! Engine: Vulkan ownership, resource pools, and the frame loop.
//!
//! [`Engine`] owns the instance, device, queue, allocator, binding table,
//! swapchain, and all resource pools. Frames run through
//! [`begin_frame`](Engine::begin_frame) and
//! [`submit_frame`](Engine::submit_frame) over [`FRAMES_IN_FLIGHT`] rotating
//! slots; destroyed resources ride the deferred deletion queue until the slot
//! that retired them has been fence-waited again.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::bindings::BindingTable;
use crate::commands::CommandBuffer;
use crate::deferred::DeletionQueue;
use crate::error::{Error, Result};
use crate::frame::FrameSlot;
use crate::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::pool::Pool;
use crate::resources::{
    free_allocation, BufferHandle, Mesh, MeshHandle, StagingBuffer, StagingHandle, StorageBuffer,
    Texture, TextureHandle,
};
use crate::swapchain::Swapchain;
use crate::types::{
    BufferUsage, Extent2d, FilterMode, PresentMode, TextureFormat, TextureUsage, FRAMES_IN_FLIGHT,
    MAX_MIP_LEVELS,
};
use crate::{allocator, device, instance};

/// Fence waits block this long before the frame is declared wedged.
const FENCE_TIMEOUT_NS: u64 = 10_000_000_000_000;

/// Startup options for [`Engine::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Swapchain present mode. FIFO is always available; the others fall
    /// back to FIFO when the surface does not support them.
    pub present_mode: PresentMode,
    /// Enable the Khronos validation layer and route its output to `log`.
    pub validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            present_mode: PresentMode::Fifo,
            validation: cfg!(debug_assertions),
        }
    }
}

/// Window-system surface the engine presents to.
///
/// The engine queries it for raw handles at startup and for the current
/// drawable size whenever the swapchain is rebuilt.
pub trait PresentationProvider: HasWindowHandle + HasDisplayHandle {
    /// Current drawable size in pixels.
    fn size(&self) -> Extent2d;
}

/// Explicit-control GPU context.
///
/// One engine per window. All methods take `&mut self` or `&self` from a
/// single thread; recorded [`CommandBuffer`]s carry their own device clone so
/// resource lookups and recording interleave freely within a frame.
pub struct Engine {
    provider: Arc<dyn PresentationProvider>,
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    /// Dropped explicitly before the device in [`Drop`].
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    bindings: BindingTable,
    swapchain: Swapchain,
    frames: [FrameSlot; FRAMES_IN_FLIGHT],
    /// Monotonic; `frame_counter % FRAMES_IN_FLIGHT` selects the slot.
    frame_counter: u64,
    swapchain_regen_needed: bool,
    present_mode: PresentMode,
    textures: Pool<Texture>,
    buffers: Pool<StorageBuffer>,
    staging: Pool<StagingBuffer>,
    meshes: Pool<Mesh>,
    /// Resources retired since the last `begin_frame`; swapped into the
    /// active slot at the next one.
    retired: DeletionQueue,
}

static_assertions::const_assert_eq!(FRAMES_IN_FLIGHT, 2);

impl Engine {
    /// Initialize Vulkan against `provider`'s surface.
    ///
    /// Creates the instance (with validation if requested), picks the best
    /// GPU that can present to the surface, creates the device and allocator,
    /// builds the global binding table, and sets up the swapchain and frame
    /// slots.
    pub fn new(provider: Arc<dyn PresentationProvider>, config: &EngineConfig) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            Error::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let display_handle = provider
            .display_handle()
            .map_err(|e| {
                Error::InitializationFailed(format!("Failed to get display handle: {}", e))
            })?
            .as_raw();
        let window_handle = provider
            .window_handle()
            .map_err(|e| {
                Error::InitializationFailed(format!("Failed to get window handle: {}", e))
            })?
            .as_raw();

        let (instance, debug_messenger, debug_utils) =
            instance::create_instance(&entry, display_handle, config.validation)?;

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(|e| Error::InitializationFailed(format!("Failed to create surface: {:?}", e)))?;

        let (physical_device, graphics_queue_family) =
            device::select_physical_device(&instance, &surface_loader, surface)?;
        let device = device::create_logical_device(&instance, physical_device, graphics_queue_family)?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        let allocator = Arc::new(Mutex::new(allocator::create_allocator(
            &instance,
            physical_device,
            device.clone(),
        )?));

        let limits = unsafe { instance.get_physical_device_properties(physical_device) }.limits;
        let bindings = BindingTable::new(&device, &limits)?;

        let swapchain = Swapchain::create(
            &instance,
            &device,
            &surface_loader,
            physical_device,
            surface,
            provider.size(),
            config.present_mode,
        )?;

        let frames = [
            FrameSlot::new(&device, graphics_queue_family)?,
            FrameSlot::new(&device, graphics_queue_family)?,
        ];

        log::info!("Engine initialized (validation: {})", config.validation);

        Ok(Self {
            provider,
            entry,
            instance,
            debug_utils,
            debug_messenger,
            surface_loader,
            surface,
            physical_device,
            device,
            graphics_queue,
            graphics_queue_family,
            allocator: ManuallyDrop::new(allocator),
            bindings,
            swapchain,
            frames,
            frame_counter: 0,
            swapchain_regen_needed: false,
            present_mode: config.present_mode,
            textures: Pool::new("textures"),
            buffers: Pool::new("storage buffers"),
            staging: Pool::new("staging buffers"),
            meshes: Pool::new("meshes"),
            retired: DeletionQueue::default(),
        })
    }

    // --- raw access ---------------------------------------------------------

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    pub(crate) fn binding_layout(&self) -> vk::DescriptorSetLayout {
        self.bindings.layout()
    }

    /// Current swapchain dimensions; tracks the surface after regeneration.
    pub fn swapchain_extent(&self) -> Extent2d {
        self.swapchain.extent()
    }

    /// Frames begun so far, including ones skipped for a stale surface.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    // --- frame loop ---------------------------------------------------------

    /// Start the next frame.
    ///
    /// Regenerates the swapchain first if the previous frame flagged it,
    /// waits on this slot's fence, then acquires a swapchain image. When the
    /// surface has gone out of date the frame is skipped: `Ok(None)` is
    /// returned, regeneration is deferred to the next call, and the frame
    /// counter still advances to keep slot rotation deterministic.
    ///
    /// On success the slot's retired resources from one full rotation ago are
    /// physically freed, everything destroyed since the previous frame is
    /// parked in this slot, and recording begins. The returned recorder must
    /// be passed to [`submit_frame`](Self::submit_frame) before the next
    /// `begin_frame`.
    pub fn begin_frame(&mut self) -> Result<Option<CommandBuffer>> {
        if self.swapchain_regen_needed {
            self.recreate_swapchain()?;
            self.swapchain_regen_needed = false;
        }

        let slot_index = (self.frame_counter as usize) % FRAMES_IN_FLIGHT;
        let fences = [self.frames[slot_index].fence];
        match unsafe { self.device.wait_for_fences(&fences, true, FENCE_TIMEOUT_NS) } {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => return Err(Error::FenceTimeout),
            Err(vk::Result::ERROR_DEVICE_LOST) => return Err(Error::DeviceLost),
            Err(e) => {
                return Err(Error::Internal(format!(
                    "Failed to wait for frame fence: {:?}",
                    e
                )))
            }
        }

        let acquired = self.swapchain.acquire(
            FENCE_TIMEOUT_NS,
            self.frames[slot_index].acquire_semaphore,
        )?;
        let image_index = match acquired {
            Some(index) => index,
            None => {
                self.swapchain_regen_needed = true;
                self.frame_counter += 1;
                return Ok(None);
            }
        };

        // Reset only after a successful acquire; a skipped frame submits
        // nothing, so its fence must stay signaled for the next rotation.
        unsafe { self.device.reset_fences(&fences) }.map_err(|e| {
            Error::Internal(format!("Failed to reset frame fence: {:?}", e))
        })?;

        let slot = &mut self.frames[slot_index];
        slot.image_index = image_index;

        // The fence wait proves the GPU finished the frame that parked this
        // batch, one full rotation ago.
        // SAFETY: see above; device and allocator outlive the batch.
        unsafe { slot.retired.release(&self.device, &self.allocator) };
        slot.retired = self.retired.take();

        let cmd = slot.command_buffer;
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| Error::Internal(format!("Failed to reset command buffer: {:?}", e)))?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| Error::Internal(format!("Failed to begin command buffer: {:?}", e)))?;

        Ok(Some(CommandBuffer::new(
            self.device.clone(),
            cmd,
            self.bindings.set(),
        )))
    }

    /// Finish the frame: composite, submit, present.
    ///
    /// With a `backbuffer`, its base mip is blitted over the whole swapchain
    /// image with nearest filtering (so the render target's resolution need
    /// not match the window). The swapchain image then transitions to present
    /// layout, recording ends, and the queue submission waits on the acquire
    /// semaphore at color-attachment-output and signals the render semaphore
    /// at all-graphics, fencing this slot. An out-of-date surface at present
    /// flags regeneration for the next `begin_frame` instead of failing.
    pub fn submit_frame(
        &mut self,
        cmd: CommandBuffer,
        backbuffer: Option<TextureHandle>,
    ) -> Result<()> {
        let slot_index = (self.frame_counter as usize) % FRAMES_IN_FLIGHT;
        let slot = &self.frames[slot_index];
        debug_assert_eq!(cmd.raw(), slot.command_buffer);
        let image_index = slot.image_index;
        let swapchain_image = self.swapchain.image(image_index);

        let mut blitted = false;
        if let Some(handle) = backbuffer {
            if let Some(texture) = self.textures.get(handle) {
                cmd.transition_texture(
                    texture,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );
                cmd.transition_image_raw(
                    swapchain_image,
                    vk::ImageAspectFlags::COLOR,
                    0,
                    1,
                    vk::REMAINING_MIP_LEVELS,
                    vk::ImageLayout::UNDEFINED,
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                );
                cmd.blit_image_raw(
                    texture.image,
                    texture.extent,
                    0,
                    swapchain_image,
                    self.swapchain.extent(),
                    0,
                    1,
                    vk::Filter::NEAREST,
                );
                blitted = true;
            } else {
                log::warn!("submit_frame: backbuffer was destroyed, presenting without it");
            }
        }

        let pre_present_layout = if blitted {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };
        cmd.transition_image_raw(
            swapchain_image,
            vk::ImageAspectFlags::COLOR,
            0,
            1,
            vk::REMAINING_MIP_LEVELS,
            pre_present_layout,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags2::ALL_COMMANDS,
        );

        unsafe { self.device.end_command_buffer(cmd.raw()) }
            .map_err(|e| Error::Internal(format!("Failed to end command buffer: {:?}", e)))?;

        let wait_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(slot.acquire_semaphore)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(slot.render_semaphore)
            .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS)];
        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd.raw())];
        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&cmd_infos)
            .signal_semaphore_infos(&signal_infos);

        unsafe {
            self.device
                .queue_submit2(self.graphics_queue, &[submit_info], slot.fence)
        }
        .map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost,
            e => Error::Internal(format!("Failed to submit frame: {:?}", e)),
        })?;

        if self
            .swapchain
            .present(self.graphics_queue, image_index, slot.render_semaphore)?
        {
            self.swapchain_regen_needed = true;
        }

        self.frame_counter += 1;
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        // Presented frames may still reference the old images.
        self.wait_idle()?;
        unsafe { self.swapchain.destroy() };
        self.swapchain = Swapchain::create(
            &self.instance,
            &self.device,
            &self.surface_loader,
            self.physical_device,
            self.surface,
            self.provider.size(),
            self.present_mode,
        )?;
        Ok(())
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost,
            e => Error::Internal(format!("Failed to wait for device idle: {:?}", e)),
        })
    }

    // --- resource creation --------------------------------------------------

    /// Create a 2D texture and bind it into the global table.
    ///
    /// Every texture can be sampled and copied both ways; it is additionally
    /// usable as a color or depth attachment according to its format, plus
    /// whatever `extra_usage` adds. Contents start undefined; upload through
    /// a [`BufferWriter`](crate::BufferWriter) or render to it.
    pub fn create_texture(
        &mut self,
        extent: Extent2d,
        format: TextureFormat,
        filter: FilterMode,
        mip_levels: u32,
        extra_usage: TextureUsage,
    ) -> Result<TextureHandle> {
        self.create_texture_inner(extent, format, filter, mip_levels, extra_usage, 1)
    }

    /// Create a 6-layer cube texture, bound as a cube view.
    pub fn create_cubemap(
        &mut self,
        extent: Extent2d,
        format: TextureFormat,
        filter: FilterMode,
        mip_levels: u32,
        extra_usage: TextureUsage,
    ) -> Result<TextureHandle> {
        self.create_texture_inner(extent, format, filter, mip_levels, extra_usage, 6)
    }

    fn create_texture_inner(
        &mut self,
        extent: Extent2d,
        format: TextureFormat,
        filter: FilterMode,
        mip_levels: u32,
        extra_usage: TextureUsage,
        layers: u32,
    ) -> Result<TextureHandle> {
        validate_texture_desc(extent, mip_levels)?;
        if self.textures.free_count() == 0 {
            return Err(Error::PoolExhausted("textures"));
        }

        let flags = if layers == 6 {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(format.to_vk())
            .extent(extent.to_vk_3d())
            .mip_levels(mip_levels)
            .array_layers(layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(texture_usage_flags(format, extra_usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(|e| {
            Error::ResourceCreationFailed(format!("Failed to create image: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                Error::AllocationFailed(format!("Failed to allocate texture memory: {}", e))
            })?;

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            Error::ResourceCreationFailed(format!("Failed to bind image memory: {:?}", e))
        })?;

        let view_type = if layers == 6 {
            vk::ImageViewType::CUBE
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format.to_vk())
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: format.aspect_mask(),
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: layers,
            });
        let view = unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            Error::ResourceCreationFailed(format!("Failed to create image view: {:?}", e))
        })?;

        let mut texture = Texture {
            image,
            view,
            allocation: Some(allocation),
            extent,
            format,
            filter,
            mip_levels,
            layers,
            bind_point: crate::bindings::BindPoint::UNBOUND,
        };

        texture.bind_point = match self.bindings.bind_texture(&self.device, view, filter) {
            Ok(bind) => bind,
            Err(e) => {
                // SAFETY: nothing has referenced the texture yet.
                unsafe { texture.release(&self.device, &self.allocator) };
                return Err(e);
            }
        };

        self.textures.insert(texture)
    }

    /// Create a device-local storage buffer and bind it into the global
    /// table. Always usable as a copy source/destination and from shaders via
    /// its bind point; `extra_usage` adds vertex/index/indirect roles.
    pub fn create_storage_buffer(
        &mut self,
        size: u64,
        extra_usage: BufferUsage,
    ) -> Result<BufferHandle> {
        if size == 0 {
            return Err(Error::InvalidParameter(
                "storage buffer size must be non-zero".into(),
            ));
        }
        if self.buffers.free_count() == 0 {
            return Err(Error::PoolExhausted("storage buffers"));
        }

        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST
            | extra_usage.to_vk();
        let (buffer, allocation) =
            self.create_device_buffer(size, usage, MemoryLocation::GpuOnly, "storage buffer")?;

        let mut storage = StorageBuffer {
            buffer,
            allocation: Some(allocation),
            size,
            bind_point: crate::bindings::BindPoint::UNBOUND,
        };

        storage.bind_point = match self.bindings.bind_storage_buffer(&self.device, buffer) {
            Ok(bind) => bind,
            Err(e) => {
                // SAFETY: nothing has referenced the buffer yet.
                unsafe { storage.release(&self.device, &self.allocator) };
                return Err(e);
            }
        };

        self.buffers.insert(storage)
    }

    /// Create a host-visible staging buffer, persistently mapped.
    pub fn create_staging_buffer(&mut self, size: u64) -> Result<StagingHandle> {
        if size == 0 {
            return Err(Error::InvalidParameter(
                "staging buffer size must be non-zero".into(),
            ));
        }
        if self.staging.free_count() == 0 {
            return Err(Error::PoolExhausted("staging buffers"));
        }

        let (buffer, allocation) = self.create_device_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging buffer",
        )?;

        self.staging.insert(StagingBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Create a mesh: a device-local vertex buffer of `vertex_bytes` and a
    /// `u32` index buffer of `index_count` entries.
    pub fn create_mesh(&mut self, vertex_bytes: u64, index_count: u32) -> Result<MeshHandle> {
        if vertex_bytes == 0 || index_count == 0 {
            return Err(Error::InvalidParameter(
                "mesh must have non-zero vertex and index data".into(),
            ));
        }
        if self.meshes.free_count() == 0 {
            return Err(Error::PoolExhausted("meshes"));
        }

        let vertex_usage = vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC;
        let (vertex_buffer, vertex_allocation) = self.create_device_buffer(
            vertex_bytes,
            vertex_usage,
            MemoryLocation::GpuOnly,
            "vertex buffer",
        )?;

        let index_usage = vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC;
        let index_size = u64::from(index_count) * std::mem::size_of::<u32>() as u64;
        let (index_buffer, index_allocation) = match self.create_device_buffer(
            index_size,
            index_usage,
            MemoryLocation::GpuOnly,
            "index buffer",
        ) {
            Ok(pair) => pair,
            Err(e) => {
                free_allocation(&self.allocator, Some(vertex_allocation), "vertex buffer");
                // SAFETY: the buffer was never handed out.
                unsafe { self.device.destroy_buffer(vertex_buffer, None) };
                return Err(e);
            }
        };

        self.meshes.insert(Mesh {
            vertex_buffer,
            vertex_allocation: Some(vertex_allocation),
            index_buffer,
            index_allocation: Some(index_allocation),
            vertex_bytes,
            index_count,
        })
    }

    fn create_device_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &'static str,
    ) -> Result<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            Error::ResourceCreationFailed(format!("Failed to create {}: {:?}", name, e))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                Error::AllocationFailed(format!("Failed to allocate {} memory: {}", name, e))
            })?;

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            Error::ResourceCreationFailed(format!("Failed to bind {} memory: {:?}", name, e))
        })?;

        Ok((buffer, allocation))
    }

    // --- resource access ----------------------------------------------------

    pub fn texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle)
    }

    pub fn storage_buffer(&self, handle: BufferHandle) -> Option<&StorageBuffer> {
        self.buffers.get(handle)
    }

    pub fn staging_buffer(&self, handle: StagingHandle) -> Option<&StagingBuffer> {
        self.staging.get(handle)
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle)
    }

    /// Write `data` into a staging buffer's mapping at `offset`.
    pub fn update_staging_buffer(
        &mut self,
        handle: StagingHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let staging = self.staging.get_mut(handle).ok_or_else(|| {
            Error::InvalidParameter("staging buffer handle is stale".into())
        })?;
        staging.write(offset, data)
    }

    // --- resource destruction -----------------------------------------------
    //
    // Destruction is logical and immediate: the handle dies, its slot and
    // bind point free up, and the GPU objects move into the deletion queue to
    // be physically released after a full frame-slot rotation. Destroying a
    // stale handle is a no-op.

    pub fn destroy_texture(&mut self, handle: TextureHandle) {
        if let Some(texture) = self.textures.take(handle) {
            self.bindings.remove_texture_bind(texture.bind_point);
            self.retired.retire_texture(texture);
        }
    }

    pub fn destroy_storage_buffer(&mut self, handle: BufferHandle) {
        if let Some(buffer) = self.buffers.take(handle) {
            self.bindings.remove_storage_bind(buffer.bind_point);
            self.retired.retire_buffer(buffer);
        }
    }

    pub fn destroy_staging_buffer(&mut self, handle: StagingHandle) {
        if let Some(staging) = self.staging.take(handle) {
            self.retired.retire_staging(staging);
        }
    }

    pub fn destroy_mesh(&mut self, handle: MeshHandle) {
        if let Some(mesh) = self.meshes.take(handle) {
            self.retired.retire_mesh(mesh);
        }
    }

    pub fn destroy_graphics_pipeline(&mut self, pipeline: GraphicsPipeline) {
        self.retired.retire_pipeline(pipeline.into_resource());
    }

    pub fn destroy_compute_pipeline(&mut self, pipeline: ComputePipeline) {
        self.retired.retire_pipeline(pipeline.into_resource());
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        unsafe {
            if self.device.device_wait_idle().is_err() {
                log::error!("Failed to wait for device idle during engine teardown");
            }

            for slot in &mut self.frames {
                slot.retired.release(&self.device, &self.allocator);
            }
            self.retired.release(&self.device, &self.allocator);

            for texture in self.textures.drain() {
                texture.release(&self.device, &self.allocator);
            }
            for buffer in self.buffers.drain() {
                buffer.release(&self.device, &self.allocator);
            }
            for staging in self.staging.drain() {
                staging.release(&self.device, &self.allocator);
            }
            for mesh in self.meshes.drain() {
                mesh.release(&self.device, &self.allocator);
            }

            self.bindings.destroy(&self.device);
            for slot in &mut self.frames {
                slot.destroy(&self.device);
            }
            self.swapchain.destroy();
            self.surface_loader.destroy_surface(self.surface, None);

            // The allocator frees its heaps through the device, so it must
            // go first.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);

            if let (Some(debug_utils), Some(messenger)) =
                (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn validate_texture_desc(extent: Extent2d, mip_levels: u32) -> Result<()> {
    if extent.width == 0 || extent.height == 0 {
        return Err(Error::InvalidParameter(format!(
            "texture extent must be non-zero, got {}x{}",
            extent.width, extent.height
        )));
    }
    if mip_levels == 0 || mip_levels > MAX_MIP_LEVELS {
        return Err(Error::InvalidParameter(format!(
            "mip levels must be between 1 and {}, got {}",
            MAX_MIP_LEVELS, mip_levels
        )));
    }
    Ok(())
}

fn texture_usage_flags(format: TextureFormat, extra: TextureUsage) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST
        | extra.to_vk();
    usage |= if format.is_depth() {
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
    } else {
        vk::ImageUsageFlags::COLOR_ATTACHMENT
    };
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_desc_validation() {
        let extent = Extent2d::new(64, 64);
        assert!(validate_texture_desc(extent, 1).is_ok());
        assert!(validate_texture_desc(extent, MAX_MIP_LEVELS).is_ok());

        assert!(matches!(
            validate_texture_desc(extent, 0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            validate_texture_desc(extent, MAX_MIP_LEVELS + 1),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            validate_texture_desc(Extent2d::new(0, 64), 1),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_usage_follows_format() {
        let color = texture_usage_flags(TextureFormat::Rgba8, TextureUsage::empty());
        assert!(color.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(color.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(color.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(color.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(!color.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));

        let depth = texture_usage_flags(TextureFormat::Depth32F, TextureUsage::empty());
        assert!(depth.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!depth.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));

        let storage = texture_usage_flags(TextureFormat::Rgba16F, TextureUsage::STORAGE);
        assert!(storage.contains(vk::ImageUsageFlags::STORAGE));
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.present_mode, PresentMode::Fifo);
        assert_eq!(config.validation, cfg!(debug_assertions));
    }
}
