//! GPU resource objects: textures, storage buffers, staging buffers, meshes.
//!
//! These structs own raw Vulkan handles plus their memory allocations. They
//! carry no destructor of their own; the engine moves them into the deferred
//! deletion queue on destroy and calls [`release`](Texture::release) once the
//! frame that retired them has provably finished.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

use crate::bindings::BindPoint;
use crate::error::{Error, Result};
use crate::pool::Handle;
use crate::types::{Extent2d, FilterMode, TextureFormat};

pub type TextureHandle = Handle<Texture>;
pub type BufferHandle = Handle<StorageBuffer>;
pub type StagingHandle = Handle<StagingBuffer>;
pub type MeshHandle = Handle<Mesh>;

/// A sampled/renderable image: `VkImage`, its view, its memory, and its slot
/// in the global binding table.
#[derive(Debug)]
pub struct Texture {
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) extent: Extent2d,
    pub(crate) format: TextureFormat,
    pub(crate) filter: FilterMode,
    pub(crate) mip_levels: u32,
    /// 1 for plain 2D textures, 6 for cubemaps.
    pub(crate) layers: u32,
    pub(crate) bind_point: BindPoint<Texture>,
}

impl Texture {
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn is_cubemap(&self) -> bool {
        self.layers == 6
    }

    /// Bind point shaders use to sample this texture.
    pub fn bind_point(&self) -> BindPoint<Texture> {
        self.bind_point
    }

    /// Tightly packed byte size of one layer at mip 0.
    pub fn layer_byte_size(&self) -> u64 {
        u64::from(self.extent.width) * u64::from(self.extent.height)
            * self.format.bytes_per_pixel()
    }

    /// Destroy the view, image, and memory.
    ///
    /// # Safety
    ///
    /// The GPU must have finished every command referencing this texture;
    /// the frame that retired it must have been fence-waited.
    pub(crate) unsafe fn release(mut self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        free_allocation(allocator, self.allocation.take(), "texture");
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
        }
    }
}

/// A device-local buffer addressable from shaders through the binding table.
#[derive(Debug)]
pub struct StorageBuffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) size: u64,
    pub(crate) bind_point: BindPoint<StorageBuffer>,
}

impl StorageBuffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bind point shaders use to address this buffer.
    pub fn bind_point(&self) -> BindPoint<StorageBuffer> {
        self.bind_point
    }

    /// # Safety
    ///
    /// The GPU must have finished every command referencing this buffer.
    pub(crate) unsafe fn release(mut self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        free_allocation(allocator, self.allocation.take(), "storage buffer");
        unsafe { device.destroy_buffer(self.buffer, None) };
    }
}

/// A host-visible, persistently mapped upload buffer. Transient: staging
/// buffers feed one frame's copies and then retire through the deletion
/// queue.
#[derive(Debug)]
pub struct StagingBuffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) size: u64,
}

impl StagingBuffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Copy `data` into the mapping at `offset`.
    pub(crate) fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset.checked_add(data.len() as u64).ok_or_else(|| {
            Error::InvalidParameter("staging write offset overflows".into())
        })?;
        if end > self.size {
            return Err(Error::InvalidParameter(format!(
                "staging write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                self.size
            )));
        }
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| Error::Internal("staging buffer is not host-mapped".into()))?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// # Safety
    ///
    /// The GPU must have finished every copy sourcing this buffer.
    pub(crate) unsafe fn release(mut self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        free_allocation(allocator, self.allocation.take(), "staging buffer");
        unsafe { device.destroy_buffer(self.buffer, None) };
    }
}

/// A vertex buffer paired with a `u32` index buffer.
#[derive(Debug)]
pub struct Mesh {
    pub(crate) vertex_buffer: vk::Buffer,
    pub(crate) vertex_allocation: Option<Allocation>,
    pub(crate) index_buffer: vk::Buffer,
    pub(crate) index_allocation: Option<Allocation>,
    pub(crate) vertex_bytes: u64,
    pub(crate) index_count: u32,
}

impl Mesh {
    /// Size of the vertex buffer in bytes.
    pub fn vertex_bytes(&self) -> u64 {
        self.vertex_bytes
    }

    /// Number of `u32` indices the index buffer holds.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// # Safety
    ///
    /// The GPU must have finished every draw referencing this mesh.
    pub(crate) unsafe fn release(mut self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        free_allocation(allocator, self.vertex_allocation.take(), "vertex buffer");
        free_allocation(allocator, self.index_allocation.take(), "index buffer");
        unsafe {
            device.destroy_buffer(self.vertex_buffer, None);
            device.destroy_buffer(self.index_buffer, None);
        }
    }
}

/// A pipeline with its layout, retired as a unit.
#[derive(Debug)]
pub struct PipelineResource {
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
}

impl PipelineResource {
    /// # Safety
    ///
    /// No submitted command buffer may still reference this pipeline.
    pub(crate) unsafe fn release(self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

pub(crate) fn free_allocation(
    allocator: &Mutex<Allocator>,
    allocation: Option<Allocation>,
    what: &str,
) {
    if let Some(alloc) = allocation {
        if let Err(e) = allocator.lock().free(alloc) {
            log::error!("Failed to free {} allocation: {}", what, e);
        }
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
static_assertions::assert_impl_all!(StorageBuffer: Send, Sync);
static_assertions::assert_impl_all!(Mesh: Send, Sync);

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle as _;

    pub(crate) fn fake_texture(width: u32, height: u32, format: TextureFormat) -> Texture {
        Texture {
            image: vk::Image::from_raw(12345),
            view: vk::ImageView::from_raw(67890),
            allocation: None,
            extent: Extent2d::new(width, height),
            format,
            filter: FilterMode::Nearest,
            mip_levels: 1,
            layers: 1,
            bind_point: BindPoint::new(1),
        }
    }

    #[test]
    fn test_layer_byte_size() {
        let tex = fake_texture(64, 64, TextureFormat::Rgba8);
        assert_eq!(tex.layer_byte_size(), 64 * 64 * 4);

        let tex = fake_texture(16, 8, TextureFormat::Rgba16F);
        assert_eq!(tex.layer_byte_size(), 16 * 8 * 8);
    }

    #[test]
    fn test_cubemap_layer_count() {
        let mut tex = fake_texture(32, 32, TextureFormat::Rgba8);
        assert!(!tex.is_cubemap());
        tex.layers = 6;
        assert!(tex.is_cubemap());
    }

    #[test]
    fn test_staging_write_rejects_out_of_bounds() {
        let mut staging = StagingBuffer {
            buffer: vk::Buffer::from_raw(12345),
            allocation: None,
            size: 16,
        };
        // Bounds are checked before the mapping is touched.
        let err = staging.write(12, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        let err = staging.write(u64::MAX, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
}
