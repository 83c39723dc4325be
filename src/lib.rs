//! Explicit-control Vulkan layer: pooled GPU resources, a bindless binding
//! table, and frame-pipelined submission.
//!
//! This crate is a thin ownership layer over `ash`, not a renderer. It hands
//! out typed slot handles from fixed-capacity pools, binds every texture and
//! storage buffer into one global descriptor set so shaders index resources
//! by integer, and runs frames through two rotating slots with deferred
//! deletion in between. Everything above that (passes, materials, scene
//! state) is the caller's business.
//!
//! # Features
//! - Fixed-capacity resource pools with typed slot handles
//! - Global bindless descriptor set for textures and storage buffers
//! - Deferred deletion keyed to frame-slot fences
//! - Double-buffered frame pipeline with swapchain regeneration on resize
//! - Graphics/compute pipeline builders over dynamic rendering
//! - Batched staging uploads for textures, buffers, and meshes

pub mod bindings;
pub mod commands;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod resources;
pub mod staging;
pub mod types;

mod allocator;
mod debug;
mod deferred;
mod device;
mod frame;
mod instance;
mod swapchain;

pub use bindings::BindPoint;
pub use commands::CommandBuffer;
pub use engine::{Engine, EngineConfig, PresentationProvider};
pub use error::{Error, Result};
pub use pipeline::{
    ComputePipeline, ComputePipelineBuilder, GraphicsPipeline, GraphicsPipelineBuilder,
};
pub use pool::{Handle, Pool};
pub use resources::{
    BufferHandle, Mesh, MeshHandle, StagingBuffer, StagingHandle, StorageBuffer, Texture,
    TextureHandle,
};
pub use staging::BufferWriter;
pub use types::{
    BufferUsage, CullMode, DrawIndirectArgs, Extent2d, FilterMode, PresentMode, Rect2d,
    ShaderStage, TextureFormat, TextureUsage, VertexFormat, FRAMES_IN_FLIGHT, MAX_MIP_LEVELS,
};

// Re-export ash for users; raw `vk` types appear in the public API.
pub use ash;
pub use ash::vk;
