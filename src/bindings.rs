//! Bindless binding table: one descriptor set shared by every pipeline.
//!
//! All sampled textures live in one `COMBINED_IMAGE_SAMPLER` array (binding 0)
//! and all storage buffers in one `STORAGE_BUFFER` array (binding 1) of a
//! single descriptor set allocated at startup. Shaders address resources by
//! integer [`BindPoint`], passed in via push constants, instead of per-draw
//! descriptor sets.
//!
//! Bind points are 1-based so that 0 can mean "unbound"; array element 0 of
//! each binding is never written. The two table halves are declared
//! `PARTIALLY_BOUND` and `UPDATE_AFTER_BIND`, so unwritten and stale entries
//! are legal as long as shaders do not index them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use ash::vk;

use crate::error::{Error, Result};
use crate::resources::{StorageBuffer, Texture};
use crate::types::{FilterMode, MAX_MIP_LEVELS};

pub(crate) const TEXTURE_BINDING: u32 = 0;
pub(crate) const STORAGE_BINDING: u32 = 1;

/// Ceiling on live bind points per table half.
pub const MAX_BINDS_PER_KIND: u32 = 4096;

/// 1-based index into one half of the global binding table.
///
/// `POD`, four bytes, and typed by the resource category it indexes, so it
/// can be embedded directly in push-constant structs:
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// struct DrawPush {
///     albedo: BindPoint<Texture>,
///     params: BindPoint<StorageBuffer>,
/// }
/// ```
///
/// The value 0 is the "unbound" sentinel and is never issued for a live
/// resource.
#[repr(transparent)]
pub struct BindPoint<T> {
    bind: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BindPoint<T> {
    /// Sentinel for "no resource bound".
    pub const UNBOUND: Self = Self {
        bind: 0,
        _marker: PhantomData,
    };

    pub(crate) fn new(bind: u32) -> Self {
        Self {
            bind,
            _marker: PhantomData,
        }
    }

    /// Raw array index as seen by shaders.
    pub fn index(&self) -> u32 {
        self.bind
    }

    pub fn is_bound(&self) -> bool {
        self.bind != 0
    }
}

// Manual impls: derives would bound T, which is only a category marker.
impl<T> Clone for BindPoint<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BindPoint<T> {}

impl<T> Default for BindPoint<T> {
    fn default() -> Self {
        Self::UNBOUND
    }
}

impl<T> PartialEq for BindPoint<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bind == other.bind
    }
}

impl<T> Eq for BindPoint<T> {}

impl<T> Hash for BindPoint<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bind.hash(state);
    }
}

impl<T> fmt::Debug for BindPoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindPoint({})", self.bind)
    }
}

// SAFETY: repr(transparent) over u32 with a zero-sized marker; every bit
// pattern is a valid bind value.
unsafe impl<T: 'static> bytemuck::Zeroable for BindPoint<T> {}
unsafe impl<T: 'static> bytemuck::Pod for BindPoint<T> {}

static_assertions::assert_eq_size!(BindPoint<Texture>, u32);
static_assertions::assert_impl_all!(BindPoint<Texture>: Send, Sync, Copy);

/// First-free scan over one table half's occupancy bits.
///
/// Returns the 1-based bind point. The vector only grows (by one) when every
/// tracked slot is occupied, so freed points are always reissued before the
/// high-water mark moves.
fn claim_slot(slots: &mut Vec<bool>, ceiling: u32) -> Option<u32> {
    for (index, used) in slots.iter_mut().enumerate() {
        if !*used {
            *used = true;
            return Some(index as u32 + 1);
        }
    }
    if (slots.len() as u32) < ceiling {
        slots.push(true);
        return Some(slots.len() as u32);
    }
    None
}

/// Free a previously claimed bind point. 0 and out-of-range values are
/// ignored.
fn release_slot(slots: &mut [bool], bind: u32) {
    if bind == 0 {
        return;
    }
    if let Some(used) = slots.get_mut(bind as usize - 1) {
        *used = false;
    }
}

/// The global descriptor set plus the CPU-side occupancy of both halves.
pub(crate) struct BindingTable {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    sampler_nearest: vk::Sampler,
    sampler_linear: vk::Sampler,
    /// Highest issuable texture bind point. One less than the array size,
    /// since element 0 is the unbound sentinel.
    texture_ceiling: u32,
    storage_ceiling: u32,
    /// Occupancy bits for binding 0; index i tracks bind point i + 1.
    texture_slots: Vec<bool>,
    /// Occupancy bits for binding 1; numbered independently of textures.
    storage_slots: Vec<bool>,
}

impl BindingTable {
    /// Create the descriptor layout, pool, set, and the two shared samplers.
    ///
    /// Array sizes come from the device's descriptor limits, clamped to
    /// [`MAX_BINDS_PER_KIND`].
    pub(crate) fn new(device: &ash::Device, limits: &vk::PhysicalDeviceLimits) -> Result<Self> {
        let texture_capacity = limits
            .max_descriptor_set_sampled_images
            .min(MAX_BINDS_PER_KIND);
        let storage_capacity = limits
            .max_descriptor_set_storage_buffers
            .min(MAX_BINDS_PER_KIND);

        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(TEXTURE_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(texture_capacity)
                .stage_flags(vk::ShaderStageFlags::ALL),
            vk::DescriptorSetLayoutBinding::default()
                .binding(STORAGE_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(storage_capacity)
                .stage_flags(vk::ShaderStageFlags::ALL),
        ];

        let flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND; 2];
        let mut binding_flags =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&flags);

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut binding_flags);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(
            |e| {
                Error::InitializationFailed(format!(
                    "Failed to create binding table layout: {:?}",
                    e
                ))
            },
        )?;

        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(texture_capacity),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(storage_capacity),
        ];
        // One set for the whole engine lifetime.
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
            Error::InitializationFailed(format!("Failed to create descriptor pool: {:?}", e))
        })?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| {
                Error::InitializationFailed(format!(
                    "Failed to allocate global descriptor set: {:?}",
                    e
                ))
            })?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::InitializationFailed("Descriptor set allocation returned nothing".into())
            })?;

        let sampler_nearest = create_sampler(device, vk::Filter::NEAREST)?;
        let sampler_linear = create_sampler(device, vk::Filter::LINEAR)?;

        Ok(Self {
            layout,
            pool,
            set,
            sampler_nearest,
            sampler_linear,
            texture_ceiling: texture_capacity.saturating_sub(1),
            storage_ceiling: storage_capacity.saturating_sub(1),
            texture_slots: Vec::new(),
            storage_slots: Vec::new(),
        })
    }

    /// Claim a bind point for a sampled texture and write its descriptor.
    pub(crate) fn bind_texture(
        &mut self,
        device: &ash::Device,
        view: vk::ImageView,
        filter: FilterMode,
    ) -> Result<BindPoint<Texture>> {
        let bind = claim_slot(&mut self.texture_slots, self.texture_ceiling)
            .ok_or(Error::BindingCapacityExceeded("sampled textures"))?;

        let sampler = match filter {
            FilterMode::Nearest => self.sampler_nearest,
            FilterMode::Linear => self.sampler_linear,
        };
        let image_info = [vk::DescriptorImageInfo::default()
            .sampler(sampler)
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(TEXTURE_BINDING)
            .dst_array_element(bind)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);

        unsafe { device.update_descriptor_sets(&[write], &[]) };

        Ok(BindPoint::new(bind))
    }

    /// Claim a bind point for a storage buffer and write its descriptor.
    pub(crate) fn bind_storage_buffer(
        &mut self,
        device: &ash::Device,
        buffer: vk::Buffer,
    ) -> Result<BindPoint<StorageBuffer>> {
        let bind = claim_slot(&mut self.storage_slots, self.storage_ceiling)
            .ok_or(Error::BindingCapacityExceeded("storage buffers"))?;

        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(vk::WHOLE_SIZE)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(STORAGE_BINDING)
            .dst_array_element(bind)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info);

        unsafe { device.update_descriptor_sets(&[write], &[]) };

        Ok(BindPoint::new(bind))
    }

    /// Free a texture bind point. The descriptor entry is left stale, which
    /// PARTIALLY_BOUND permits as long as shaders no longer index it.
    pub(crate) fn remove_texture_bind(&mut self, point: BindPoint<Texture>) {
        release_slot(&mut self.texture_slots, point.index());
    }

    /// Free a storage-buffer bind point.
    pub(crate) fn remove_storage_bind(&mut self, point: BindPoint<StorageBuffer>) {
        release_slot(&mut self.storage_slots, point.index());
    }

    pub(crate) fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub(crate) fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Destroy the samplers, pool, and layout.
    ///
    /// # Safety
    ///
    /// The device must be idle; no submitted work may still reference the
    /// global set.
    pub(crate) unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.sampler_nearest, None);
            device.destroy_sampler(self.sampler_linear, None);
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

fn create_sampler(device: &ash::Device, filter: vk::Filter) -> Result<vk::Sampler> {
    let mipmap_mode = match filter {
        vk::Filter::NEAREST => vk::SamplerMipmapMode::NEAREST,
        _ => vk::SamplerMipmapMode::LINEAR,
    };
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(mipmap_mode)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .min_lod(0.0)
        .max_lod(MAX_MIP_LEVELS as f32);

    unsafe { device.create_sampler(&info, None) }
        .map_err(|e| Error::InitializationFailed(format!("Failed to create sampler: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_points_are_one_based() {
        let mut slots = Vec::new();
        assert_eq!(claim_slot(&mut slots, 8), Some(1));
        assert_eq!(claim_slot(&mut slots, 8), Some(2));
        assert_eq!(claim_slot(&mut slots, 8), Some(3));
    }

    #[test]
    fn test_categories_number_independently() {
        // Each table half scans its own occupancy bits, so the first texture
        // and the first storage buffer both get bind point 1.
        let mut texture_slots = Vec::new();
        let mut storage_slots = Vec::new();
        assert_eq!(claim_slot(&mut texture_slots, 8), Some(1));
        assert_eq!(claim_slot(&mut storage_slots, 8), Some(1));
        assert_eq!(claim_slot(&mut storage_slots, 8), Some(2));
        assert_eq!(claim_slot(&mut texture_slots, 8), Some(2));
    }

    #[test]
    fn test_freed_slot_reused_before_growth() {
        let mut slots = Vec::new();
        for expected in 1..=3 {
            assert_eq!(claim_slot(&mut slots, 8), Some(expected));
        }
        release_slot(&mut slots, 2);
        assert_eq!(claim_slot(&mut slots, 8), Some(2));
        // High-water mark unchanged: next claim grows past it.
        assert_eq!(claim_slot(&mut slots, 8), Some(4));
        assert_eq!(slots.len(), 4);
    }

    #[test]
    fn test_ceiling_stops_growth() {
        let mut slots = Vec::new();
        assert_eq!(claim_slot(&mut slots, 2), Some(1));
        assert_eq!(claim_slot(&mut slots, 2), Some(2));
        assert_eq!(claim_slot(&mut slots, 2), None);
        release_slot(&mut slots, 1);
        assert_eq!(claim_slot(&mut slots, 2), Some(1));
    }

    #[test]
    fn test_release_ignores_unbound_and_out_of_range() {
        let mut slots = vec![true, true];
        release_slot(&mut slots, 0);
        release_slot(&mut slots, 99);
        assert_eq!(slots, vec![true, true]);
    }

    #[test]
    fn test_bind_point_pod_roundtrip() {
        let point: BindPoint<Texture> = BindPoint::new(42);
        let bytes = bytemuck::bytes_of(&point);
        assert_eq!(bytes, 42u32.to_ne_bytes());
        assert!(point.is_bound());
        assert!(!BindPoint::<Texture>::UNBOUND.is_bound());
        assert_eq!(BindPoint::<StorageBuffer>::default().index(), 0);
    }
}
