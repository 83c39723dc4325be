//! Command buffer recorder: barriers, copies, passes, binds, and draws.
//!
//! [`CommandBuffer`] wraps the frame slot's primary command buffer for the
//! duration of one frame. It holds a device clone and the global descriptor
//! set, not a borrow of the engine, so resource lookups (`engine.texture(h)`)
//! and recording can interleave freely. All synchronization uses
//! synchronization2; render passes use dynamic rendering.
//!
//! Layout transitions use conservative access masks (`MEMORY_WRITE` before,
//! `MEMORY_READ | MEMORY_WRITE` after) and derive the image aspect from the
//! texture's format, so the same entry points work for color and depth
//! targets.

use ash::vk;

use crate::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::resources::{Mesh, StagingBuffer, StorageBuffer, Texture};
use crate::types::{Extent2d, Rect2d};

/// Records GPU work for the frame that produced it.
///
/// Obtained from `Engine::begin_frame` and consumed by `Engine::submit_frame`;
/// a recorder never outlives its frame.
pub struct CommandBuffer {
    device: ash::Device,
    cmd: vk::CommandBuffer,
    global_set: vk::DescriptorSet,
}

impl CommandBuffer {
    pub(crate) fn new(
        device: ash::Device,
        cmd: vk::CommandBuffer,
        global_set: vk::DescriptorSet,
    ) -> Self {
        Self {
            device,
            cmd,
            global_set,
        }
    }

    /// The underlying Vulkan handle, for interop with external recorders.
    pub fn raw(&self) -> vk::CommandBuffer {
        self.cmd
    }

    // --- barriers and layout transitions ------------------------------------

    /// Transition every mip and layer of `texture` between layouts, ordered
    /// against all commands on both sides.
    pub fn transition_texture(
        &self,
        texture: &Texture,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.transition_texture_stages(
            texture,
            old_layout,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            new_layout,
            vk::PipelineStageFlags2::ALL_COMMANDS,
        );
    }

    /// Transition all mips of one layer of `texture`.
    pub fn transition_texture_layer(
        &self,
        texture: &Texture,
        layer: u32,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.transition_image_raw(
            texture.image,
            texture.format.aspect_mask(),
            layer,
            1,
            texture.mip_levels,
            old_layout,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            new_layout,
            vk::PipelineStageFlags2::ALL_COMMANDS,
        );
    }

    /// Transition every mip and layer, with explicit stage masks on both
    /// sides.
    pub fn transition_texture_stages(
        &self,
        texture: &Texture,
        old_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags2,
        new_layout: vk::ImageLayout,
        dst_stage: vk::PipelineStageFlags2,
    ) {
        self.transition_image_raw(
            texture.image,
            texture.format.aspect_mask(),
            0,
            texture.layers,
            texture.mip_levels,
            old_layout,
            src_stage,
            new_layout,
            dst_stage,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn transition_image_raw(
        &self,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        base_layer: u32,
        layer_count: u32,
        level_count: u32,
        old_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags2,
        new_layout: vk::ImageLayout,
        dst_stage: vk::PipelineStageFlags2,
    ) {
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count,
                base_array_layer: base_layer,
                layer_count,
            });
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe { self.device.cmd_pipeline_barrier2(self.cmd, &dependency) };
    }

    /// Global execution + memory barrier.
    pub fn memory_barrier(
        &self,
        src_stage: vk::PipelineStageFlags2,
        src_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
    ) {
        let barrier = vk::MemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access);
        let barriers = [barrier];
        let dependency = vk::DependencyInfo::default().memory_barriers(&barriers);
        unsafe { self.device.cmd_pipeline_barrier2(self.cmd, &dependency) };
    }

    // --- copies and blits ---------------------------------------------------

    pub(crate) fn copy_buffer_raw(
        &self,
        src: vk::Buffer,
        src_offset: u64,
        dst: vk::Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        let region = vk::BufferCopy2::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size);
        let regions = [region];
        let info = vk::CopyBufferInfo2::default()
            .src_buffer(src)
            .dst_buffer(dst)
            .regions(&regions);
        unsafe { self.device.cmd_copy_buffer2(self.cmd, &info) };
    }

    /// Copy between storage buffers.
    pub fn copy_buffer_to_buffer(
        &self,
        src: &StorageBuffer,
        src_offset: u64,
        dst: &StorageBuffer,
        dst_offset: u64,
        size: u64,
    ) {
        self.copy_buffer_raw(src.buffer, src_offset, dst.buffer, dst_offset, size);
    }

    /// Copy from a staging buffer into a storage buffer.
    pub fn copy_staging_to_buffer(
        &self,
        src: &StagingBuffer,
        src_offset: u64,
        dst: &StorageBuffer,
        dst_offset: u64,
        size: u64,
    ) {
        self.copy_buffer_raw(src.buffer, src_offset, dst.buffer, dst_offset, size);
    }

    /// Copy a tightly packed staging buffer into mip 0 of one texture layer
    /// (the texture must be in TRANSFER_DST_OPTIMAL), then rebuild the mip
    /// chain.
    pub fn copy_staging_to_texture(&self, texture: &Texture, staging: &StagingBuffer, layer: u32) {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: texture.format.aspect_mask(),
                mip_level: 0,
                base_array_layer: layer,
                layer_count: 1,
            })
            .image_extent(texture.extent.to_vk_3d());
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.cmd,
                staging.buffer,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
        self.generate_mip_levels(texture, layer);
    }

    /// Blit one layer of `src` (TRANSFER_SRC_OPTIMAL) over one layer of `dst`
    /// (TRANSFER_DST_OPTIMAL) at full extent, then rebuild `dst`'s mip chain.
    pub fn copy_texture_to_texture(
        &self,
        src: &Texture,
        src_layer: u32,
        dst: &Texture,
        dst_layer: u32,
    ) {
        self.blit_image_raw(
            src.image,
            src.extent,
            src_layer,
            dst.image,
            dst.extent,
            dst_layer,
            1,
            vk::Filter::NEAREST,
        );
        self.generate_mip_levels(dst, dst_layer);
    }

    /// Copy both staging buffers of a mesh upload: vertices first, then
    /// indices, each at full staging size.
    pub fn copy_to_mesh(&self, mesh: &Mesh, vertices: &StagingBuffer, indices: &StagingBuffer) {
        self.copy_buffer_raw(vertices.buffer, 0, mesh.vertex_buffer, 0, vertices.size);
        self.copy_buffer_raw(indices.buffer, 0, mesh.index_buffer, 0, indices.size);
    }

    /// Clear every mip and layer of `texture` (TRANSFER_DST_OPTIMAL) to a
    /// constant color.
    pub fn clear_image(&self, texture: &Texture, color: [f32; 4]) {
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        };
        let clear = vk::ClearColorValue { float32: color };
        unsafe {
            self.device.cmd_clear_color_image(
                self.cmd,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear,
                &[range],
            )
        };
    }

    /// Regenerate mips 1..N of one layer from its mip 0 by successive halving
    /// blits. The layer must be in TRANSFER_DST_OPTIMAL; on return, its mips
    /// 0..N-1 are in TRANSFER_SRC_OPTIMAL and the last mip in
    /// TRANSFER_DST_OPTIMAL.
    pub fn generate_mip_levels(&self, texture: &Texture, layer: u32) {
        if texture.mip_levels <= 1 {
            return;
        }
        let aspect = texture.format.aspect_mask();
        for blit in mip_chain(texture.extent.width, texture.extent.height, texture.mip_levels) {
            // The previous level was just written; make it blit-readable.
            let barrier = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_access_mask(vk::AccessFlags2::MEMORY_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(texture.image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: blit.level - 1,
                    level_count: 1,
                    base_array_layer: layer,
                    layer_count: 1,
                });
            let barriers = [barrier];
            let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
            unsafe { self.device.cmd_pipeline_barrier2(self.cmd, &dependency) };

            let region = vk::ImageBlit2::default()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: blit.level - 1,
                    base_array_layer: layer,
                    layer_count: 1,
                })
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: blit.src_width as i32,
                        y: blit.src_height as i32,
                        z: 1,
                    },
                ])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: blit.level,
                    base_array_layer: layer,
                    layer_count: 1,
                })
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: blit.dst_width as i32,
                        y: blit.dst_height as i32,
                        z: 1,
                    },
                ]);
            let regions = [region];
            let info = vk::BlitImageInfo2::default()
                .src_image(texture.image)
                .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .dst_image(texture.image)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .regions(&regions)
                .filter(texture.filter.to_vk());
            unsafe { self.device.cmd_blit_image2(self.cmd, &info) };
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn blit_image_raw(
        &self,
        src: vk::Image,
        src_extent: Extent2d,
        src_layer: u32,
        dst: vk::Image,
        dst_extent: Extent2d,
        dst_layer: u32,
        layer_count: u32,
        filter: vk::Filter,
    ) {
        let region = vk::ImageBlit2::default()
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: src_layer,
                layer_count,
            })
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: src_extent.width as i32,
                    y: src_extent.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: dst_layer,
                layer_count,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: dst_extent.width as i32,
                    y: dst_extent.height as i32,
                    z: 1,
                },
            ]);
        let regions = [region];
        let info = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(&regions)
            .filter(filter);
        unsafe { self.device.cmd_blit_image2(self.cmd, &info) };
    }

    // --- dynamic rendering passes -------------------------------------------

    /// Begin a dynamic rendering pass over `color_targets` (loaded, stored,
    /// COLOR_ATTACHMENT_OPTIMAL) and an optional depth target.
    ///
    /// The render area comes from the last color target, or from the depth
    /// target for depth-only passes. `clear_depth` clears depth to 1.0;
    /// otherwise the existing depth is loaded. With no attachments at all
    /// nothing is recorded (a zero render area is not valid usage); skip the
    /// matching [`end_pass`](Self::end_pass) as well.
    pub fn begin_pass(
        &self,
        color_targets: &[&Texture],
        depth_target: Option<&Texture>,
        clear_depth: bool,
    ) {
        let area = match pass_render_area(color_targets, depth_target) {
            Some(area) => area,
            None => {
                log::warn!("begin_pass without color or depth targets, pass skipped");
                return;
            }
        };

        let color_infos: Vec<vk::RenderingAttachmentInfo> = color_targets
            .iter()
            .map(|target| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(target.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
            })
            .collect();

        let depth_info = depth_target.map(|depth| {
            let load_op = if clear_depth {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            };
            vk::RenderingAttachmentInfo::default()
                .image_view(depth.view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: area.to_vk(),
            })
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(ref depth_info) = depth_info {
            rendering_info = rendering_info.depth_attachment(depth_info);
        }

        unsafe { self.device.cmd_begin_rendering(self.cmd, &rendering_info) };
    }

    pub fn end_pass(&self) {
        unsafe { self.device.cmd_end_rendering(self.cmd) };
    }

    // --- pipeline state and draws -------------------------------------------

    /// Bind a graphics pipeline together with the global binding table.
    pub fn bind_graphics_pipeline(&self, pipeline: &GraphicsPipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.raw(),
            );
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                0,
                &[self.global_set],
                &[],
            );
        }
    }

    /// Bind a compute pipeline together with the global binding table.
    pub fn bind_compute_pipeline(&self, pipeline: &ComputePipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.raw(),
            );
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout(),
                0,
                &[self.global_set],
                &[],
            );
        }
    }

    /// Upload one push-constant struct, visible to all stages.
    ///
    /// `T` must match the type the pipeline was built with via
    /// `push_constant::<T>()`.
    pub fn push_constants<T: bytemuck::Pod>(&self, layout: vk::PipelineLayout, data: &T) {
        unsafe {
            self.device.cmd_push_constants(
                self.cmd,
                layout,
                vk::ShaderStageFlags::ALL,
                0,
                bytemuck::bytes_of(data),
            )
        };
    }

    /// Set viewport and scissor to the same rectangle, depth range 0..1.
    pub fn set_viewport(&self, rect: Rect2d) {
        let viewport = vk::Viewport {
            x: rect.x as f32,
            y: rect.y as f32,
            width: rect.width as f32,
            height: rect.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.device.cmd_set_viewport(self.cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(self.cmd, 0, &[rect.to_vk()]);
        }
    }

    /// Bind a mesh's index buffer (u32) and its vertex buffer at binding 0.
    pub fn bind_mesh(&self, mesh: &Mesh) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.cmd, mesh.index_buffer, 0, vk::IndexType::UINT32);
            self.device
                .cmd_bind_vertex_buffers(self.cmd, 0, &[mesh.vertex_buffer], &[0]);
        }
    }

    /// Bind a storage buffer as the vertex source at binding 0. The buffer
    /// must have been created with [`BufferUsage::VERTEX`].
    ///
    /// [`BufferUsage::VERTEX`]: crate::types::BufferUsage::VERTEX
    pub fn bind_vertex_buffer(&self, buffer: &StorageBuffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.cmd, 0, &[buffer.buffer], &[0]);
        }
    }

    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        };
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    /// Issue draws whose arguments live in `buffer` (created with
    /// [`BufferUsage::INDIRECT`]) as [`DrawIndirectArgs`] records.
    ///
    /// [`BufferUsage::INDIRECT`]: crate::types::BufferUsage::INDIRECT
    /// [`DrawIndirectArgs`]: crate::types::DrawIndirectArgs
    pub fn draw_indirect(&self, buffer: &StorageBuffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe {
            self.device
                .cmd_draw_indirect(self.cmd, buffer.buffer, offset, draw_count, stride)
        };
    }

    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe {
            self.device
                .cmd_dispatch(self.cmd, group_count_x, group_count_y, group_count_z)
        };
    }
}

/// Geometry of one mip-generation blit: level N-1 at its extent down to
/// level N at half extent, clamped at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MipBlit {
    pub(crate) level: u32,
    pub(crate) src_width: u32,
    pub(crate) src_height: u32,
    pub(crate) dst_width: u32,
    pub(crate) dst_height: u32,
}

/// Render area for a pass: the last color target's extent, the depth
/// target's when no color is attached, `None` with no attachments at all.
fn pass_render_area(
    color_targets: &[&Texture],
    depth_target: Option<&Texture>,
) -> Option<Extent2d> {
    color_targets
        .last()
        .map(|t| t.extent)
        .or_else(|| depth_target.map(|d| d.extent))
}

/// Blit list for a full mip chain: exactly `mip_levels - 1` entries.
pub(crate) fn mip_chain(width: u32, height: u32, mip_levels: u32) -> Vec<MipBlit> {
    let mut blits = Vec::new();
    let mut w = width;
    let mut h = height;
    for level in 1..mip_levels {
        let dst_width = (w / 2).max(1);
        let dst_height = (h / 2).max(1);
        blits.push(MipBlit {
            level,
            src_width: w,
            src_height: h,
            dst_width,
            dst_height,
        });
        w = dst_width;
        h = dst_height;
    }
    blits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::tests::fake_texture;
    use crate::types::TextureFormat;
    use rstest::rstest;

    #[test]
    fn test_render_area_follows_last_color_target() {
        let a = fake_texture(64, 64, TextureFormat::Rgba8);
        let b = fake_texture(32, 16, TextureFormat::Rgba8);
        let depth = fake_texture(128, 128, TextureFormat::Depth32F);

        let area = pass_render_area(&[&a, &b], Some(&depth)).unwrap();
        assert_eq!((area.width, area.height), (32, 16));
    }

    #[test]
    fn test_render_area_depth_only_and_empty() {
        let depth = fake_texture(128, 128, TextureFormat::Depth32F);

        let area = pass_render_area(&[], Some(&depth)).unwrap();
        assert_eq!((area.width, area.height), (128, 128));
        // No attachments: begin_pass refuses to record a zero render area.
        assert!(pass_render_area(&[], None).is_none());
    }

    #[test]
    fn test_single_mip_needs_no_blits() {
        assert!(mip_chain(64, 64, 1).is_empty());
        assert!(mip_chain(1, 1, 1).is_empty());
    }

    #[rstest]
    #[case(64, 64, 4)]
    #[case(256, 256, 9)]
    #[case(100, 40, 5)]
    fn test_chain_length_is_mips_minus_one(
        #[case] width: u32,
        #[case] height: u32,
        #[case] mips: u32,
    ) {
        assert_eq!(mip_chain(width, height, mips).len() as u32, mips - 1);
    }

    #[test]
    fn test_extents_halve_per_level() {
        let blits = mip_chain(64, 64, 4);
        assert_eq!(
            blits,
            vec![
                MipBlit {
                    level: 1,
                    src_width: 64,
                    src_height: 64,
                    dst_width: 32,
                    dst_height: 32
                },
                MipBlit {
                    level: 2,
                    src_width: 32,
                    src_height: 32,
                    dst_width: 16,
                    dst_height: 16
                },
                MipBlit {
                    level: 3,
                    src_width: 16,
                    src_height: 16,
                    dst_width: 8,
                    dst_height: 8
                },
            ]
        );
    }

    #[test]
    fn test_narrow_axis_clamps_at_one() {
        let blits = mip_chain(64, 4, 5);
        let dims: Vec<(u32, u32)> = blits.iter().map(|b| (b.dst_width, b.dst_height)).collect();
        assert_eq!(dims, vec![(32, 2), (16, 1), (8, 1), (4, 1)]);
    }

    #[test]
    fn test_non_power_of_two_rounds_down() {
        let blits = mip_chain(100, 40, 3);
        let dims: Vec<(u32, u32)> = blits.iter().map(|b| (b.dst_width, b.dst_height)).collect();
        assert_eq!(dims, vec![(50, 20), (25, 10)]);
    }
}
