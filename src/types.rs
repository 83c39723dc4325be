//! Public value types: formats, modes, extents, and usage flags.

use ash::vk;
use bitflags::bitflags;

/// Number of frames the CPU may record ahead of the GPU.
///
/// Frame slots (command buffer, fence, semaphores, retired-resource batch)
/// rotate over this count; a resource retired during one frame is physically
/// freed only after a full rotation.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound on texture mip chain length (covers 2^31 texels per axis).
pub const MAX_MIP_LEVELS: u32 = 32;

/// Width/height pair in pixels.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub(crate) fn to_vk(self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub(crate) fn to_vk_3d(self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: 1,
        }
    }
}

/// Screen-space rectangle used for viewports and scissors.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect2d {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2d {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub(crate) fn to_vk(self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D {
                x: self.x,
                y: self.y,
            },
            extent: vk::Extent2D {
                width: self.width,
                height: self.height,
            },
        }
    }
}

/// Texture pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// 8-bit RGBA, sRGB encoded.
    #[default]
    Rgba8,
    /// 16-bit float RGBA.
    Rgba16F,
    /// 32-bit float depth.
    Depth32F,
}

impl TextureFormat {
    /// Returns true if this is a depth format.
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::Depth32F)
    }

    /// Size in bytes of a single pixel.
    pub fn bytes_per_pixel(&self) -> u64 {
        match self {
            Self::Rgba8 | Self::Depth32F => 4,
            Self::Rgba16F => 8,
        }
    }

    pub(crate) fn to_vk(self) -> vk::Format {
        match self {
            Self::Rgba8 => vk::Format::R8G8B8A8_SRGB,
            Self::Rgba16F => vk::Format::R16G16B16A16_SFLOAT,
            Self::Depth32F => vk::Format::D32_SFLOAT,
        }
    }

    pub(crate) fn aspect_mask(self) -> vk::ImageAspectFlags {
        if self.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

/// Sampling filter applied to a texture, also used when blitting its mip chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

impl FilterMode {
    pub(crate) fn to_vk(self) -> vk::Filter {
        match self {
            Self::Nearest => vk::Filter::NEAREST,
            Self::Linear => vk::Filter::LINEAR,
        }
    }
}

/// Presentation mode requested for the swapchain.
///
/// Falls back to [`PresentMode::Fifo`] when the surface does not support the
/// requested mode; FIFO support is guaranteed by the Vulkan specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No vertical sync, may tear.
    Immediate,
    /// Triple-buffered, low latency without tearing.
    Mailbox,
    /// Classic vsync.
    #[default]
    Fifo,
}

impl PresentMode {
    pub(crate) fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            Self::Immediate => vk::PresentModeKHR::IMMEDIATE,
            Self::Mailbox => vk::PresentModeKHR::MAILBOX,
            Self::Fifo => vk::PresentModeKHR::FIFO,
        }
    }
}

/// Programmable stage a SPIR-V module is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    TessellationControl,
    TessellationEvaluation,
}

impl ShaderStage {
    pub(crate) fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        }
    }
}

/// Per-attribute vertex input format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// Single 32-bit float.
    Float,
    /// Two 32-bit floats.
    Float2,
    /// Three 32-bit floats.
    Float3,
    /// Four 32-bit floats.
    Float4,
}

impl VertexFormat {
    /// Size of one attribute of this format in bytes.
    pub fn byte_size(&self) -> u32 {
        match self {
            Self::Float => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }

    pub(crate) fn to_vk(self) -> vk::Format {
        match self {
            Self::Float => vk::Format::R32_SFLOAT,
            Self::Float2 => vk::Format::R32G32_SFLOAT,
            Self::Float3 => vk::Format::R32G32B32_SFLOAT,
            Self::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

/// Triangle culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// No culling.
    #[default]
    None,
    /// Cull front-facing triangles.
    Front,
    /// Cull back-facing triangles.
    Back,
}

impl CullMode {
    pub(crate) fn to_vk(self) -> vk::CullModeFlags {
        match self {
            Self::None => vk::CullModeFlags::NONE,
            Self::Front => vk::CullModeFlags::FRONT,
            Self::Back => vk::CullModeFlags::BACK,
        }
    }
}

bitflags! {
    /// Extra usage flags for textures, combined with the defaults every
    /// texture gets (sampled, copy source, copy destination, attachment).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const SAMPLED = 1 << 2;
        /// Texture can be written as a storage image.
        const STORAGE = 1 << 3;
        /// Texture can be rendered to as a color attachment.
        const COLOR_ATTACHMENT = 1 << 4;
        /// Texture can be rendered to as a depth attachment.
        const DEPTH_ATTACHMENT = 1 << 5;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

impl TextureUsage {
    pub(crate) fn to_vk(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.contains(Self::COPY_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(Self::COPY_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(Self::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if self.contains(Self::COLOR_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(Self::DEPTH_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        flags
    }
}

bitflags! {
    /// Extra usage flags for storage buffers, combined with the defaults
    /// every storage buffer gets (storage, copy source, copy destination).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 0;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 1;
        /// Buffer can be bound in the storage-buffer binding table.
        const STORAGE = 1 << 2;
        /// Buffer can be bound as a vertex buffer.
        const VERTEX = 1 << 3;
        /// Buffer can be bound as an index buffer.
        const INDEX = 1 << 4;
        /// Buffer can source indirect draw arguments.
        const INDIRECT = 1 << 5;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

impl BufferUsage {
    pub(crate) fn to_vk(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if self.contains(Self::COPY_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(Self::COPY_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(Self::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(Self::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(Self::INDIRECT) {
            flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        flags
    }
}

/// CPU-side mirror of `VkDrawIndirectCommand`, for filling indirect buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndirectArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TextureFormat::Rgba8, 4)]
    #[case(TextureFormat::Rgba16F, 8)]
    #[case(TextureFormat::Depth32F, 4)]
    fn test_format_bytes_per_pixel(#[case] format: TextureFormat, #[case] expected: u64) {
        assert_eq!(format.bytes_per_pixel(), expected);
    }

    #[test]
    fn test_depth_format_aspect() {
        assert_eq!(
            TextureFormat::Depth32F.aspect_mask(),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            TextureFormat::Rgba8.aspect_mask(),
            vk::ImageAspectFlags::COLOR
        );
        assert!(TextureFormat::Depth32F.is_depth());
        assert!(!TextureFormat::Rgba16F.is_depth());
    }

    #[rstest]
    #[case(VertexFormat::Float, 4, vk::Format::R32_SFLOAT)]
    #[case(VertexFormat::Float2, 8, vk::Format::R32G32_SFLOAT)]
    #[case(VertexFormat::Float3, 12, vk::Format::R32G32B32_SFLOAT)]
    #[case(VertexFormat::Float4, 16, vk::Format::R32G32B32A32_SFLOAT)]
    fn test_vertex_format_mapping(
        #[case] format: VertexFormat,
        #[case] size: u32,
        #[case] vk_format: vk::Format,
    ) {
        assert_eq!(format.byte_size(), size);
        assert_eq!(format.to_vk(), vk_format);
    }

    #[test]
    fn test_usage_flag_conversion() {
        let usage = TextureUsage::SAMPLED | TextureUsage::COPY_DST;
        let vk_usage = usage.to_vk();
        assert!(vk_usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(vk_usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(!vk_usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));

        let usage = BufferUsage::STORAGE | BufferUsage::INDIRECT;
        let vk_usage = usage.to_vk();
        assert!(vk_usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(vk_usage.contains(vk::BufferUsageFlags::INDIRECT_BUFFER));
    }

    #[test]
    fn test_indirect_args_layout_matches_vulkan() {
        assert_eq!(
            std::mem::size_of::<DrawIndirectArgs>(),
            std::mem::size_of::<vk::DrawIndirectCommand>()
        );
    }
}
