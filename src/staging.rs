//! Batched resource uploads through transient staging buffers.
//!
//! [`BufferWriter`] records upload requests at any point between frames; each
//! request copies the data into a fresh host-visible staging buffer
//! immediately. [`flush`](BufferWriter::flush) then records all GPU-side
//! copies into the frame's command buffer, bracketed by two global barriers,
//! and retires the staging buffers through the deferred deletion queue.
//!
//! Upload sizes are validated against the destination at enqueue time, so a
//! flush never records a partial or out-of-bounds copy.

use ash::vk;

use crate::commands::CommandBuffer;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::resources::{BufferHandle, MeshHandle, StagingHandle, TextureHandle};

struct TextureWrite {
    texture: TextureHandle,
    staging: StagingHandle,
    layer: u32,
}

struct BufferWrite {
    buffer: BufferHandle,
    staging: StagingHandle,
    offset: u64,
    size: u64,
}

struct MeshWrite {
    mesh: MeshHandle,
    vertices: StagingHandle,
    indices: StagingHandle,
}

/// Accumulates uploads and replays them into a command buffer in one batch.
///
/// Writers are cheap; keep one per upload site or one for the whole app.
/// Pending writes survive until the next [`flush`](Self::flush), which clears
/// the writer whether or not the destination resources still exist.
#[derive(Default)]
pub struct BufferWriter {
    texture_writes: Vec<TextureWrite>,
    buffer_writes: Vec<BufferWrite>,
    mesh_writes: Vec<MeshWrite>,
}

impl BufferWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending upload requests across all kinds.
    pub fn pending_writes(&self) -> usize {
        self.texture_writes.len() + self.buffer_writes.len() + self.mesh_writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_writes() == 0
    }

    /// Queue a full upload of a 2D texture's base layer. `data` must be
    /// tightly packed and exactly one layer in size; mips are regenerated on
    /// flush.
    pub fn enqueue_texture_write(
        &mut self,
        engine: &mut Engine,
        texture: TextureHandle,
        data: &[u8],
    ) -> Result<()> {
        self.enqueue_texture_layer_write(engine, texture, 0, data)
    }

    /// Queue a full upload of one layer (for cubemap faces).
    pub fn enqueue_texture_layer_write(
        &mut self,
        engine: &mut Engine,
        texture: TextureHandle,
        layer: u32,
        data: &[u8],
    ) -> Result<()> {
        let expected = {
            let tex = engine.texture(texture).ok_or_else(|| {
                Error::InvalidParameter("texture upload targets a destroyed texture".into())
            })?;
            if layer >= tex.layers() {
                return Err(Error::InvalidParameter(format!(
                    "layer {} out of range for texture with {} layers",
                    layer,
                    tex.layers()
                )));
            }
            tex.layer_byte_size()
        };
        validate_upload_size("texture layer", expected, data.len() as u64)?;

        let staging = engine.create_staging_buffer(expected)?;
        if let Err(e) = engine.update_staging_buffer(staging, 0, data) {
            engine.destroy_staging_buffer(staging);
            return Err(e);
        }
        self.texture_writes.push(TextureWrite {
            texture,
            staging,
            layer,
        });
        Ok(())
    }

    /// Queue an upload into a storage buffer at `offset`. The copy lands at
    /// exactly that offset; the staging buffer is read from its start.
    pub fn enqueue_buffer_write(
        &mut self,
        engine: &mut Engine,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let buffer_size = engine.storage_buffer(buffer).map(|b| b.size()).ok_or_else(|| {
            Error::InvalidParameter("buffer upload targets a destroyed buffer".into())
        })?;
        validate_buffer_range(buffer_size, offset, data.len() as u64)?;

        let staging = engine.create_staging_buffer(data.len() as u64)?;
        if let Err(e) = engine.update_staging_buffer(staging, 0, data) {
            engine.destroy_staging_buffer(staging);
            return Err(e);
        }
        self.buffer_writes.push(BufferWrite {
            buffer,
            staging,
            offset,
            size: data.len() as u64,
        });
        Ok(())
    }

    /// Queue a full mesh upload. `vertices` must match the mesh's vertex
    /// buffer size and `indices` its index count.
    pub fn enqueue_mesh_write(
        &mut self,
        engine: &mut Engine,
        mesh: MeshHandle,
        vertices: &[u8],
        indices: &[u32],
    ) -> Result<()> {
        let (vertex_bytes, index_count) = {
            let m = engine.mesh(mesh).ok_or_else(|| {
                Error::InvalidParameter("mesh upload targets a destroyed mesh".into())
            })?;
            (m.vertex_bytes(), m.index_count())
        };
        validate_upload_size("mesh vertices", vertex_bytes, vertices.len() as u64)?;
        validate_upload_size("mesh indices", u64::from(index_count), indices.len() as u64)?;

        let vertex_staging = engine.create_staging_buffer(vertex_bytes)?;
        if let Err(e) = engine.update_staging_buffer(vertex_staging, 0, vertices) {
            engine.destroy_staging_buffer(vertex_staging);
            return Err(e);
        }

        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let index_staging = match engine.create_staging_buffer(index_bytes.len() as u64) {
            Ok(staging) => staging,
            Err(e) => {
                engine.destroy_staging_buffer(vertex_staging);
                return Err(e);
            }
        };
        if let Err(e) = engine.update_staging_buffer(index_staging, 0, index_bytes) {
            engine.destroy_staging_buffer(vertex_staging);
            engine.destroy_staging_buffer(index_staging);
            return Err(e);
        }

        self.mesh_writes.push(MeshWrite {
            mesh,
            vertices: vertex_staging,
            indices: index_staging,
        });
        Ok(())
    }

    /// Record every pending copy into `cmd` and retire the staging buffers.
    ///
    /// Destinations destroyed since enqueue are skipped. The batch is
    /// bracketed by global barriers so uploads order correctly against
    /// surrounding GPU work without per-resource tracking.
    pub fn flush(&mut self, engine: &mut Engine, cmd: &CommandBuffer) {
        if self.is_empty() {
            return;
        }

        cmd.memory_barrier(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::MEMORY_WRITE,
        );

        for write in self.texture_writes.drain(..) {
            if let (Some(texture), Some(staging)) = (
                engine.texture(write.texture),
                engine.staging_buffer(write.staging),
            ) {
                cmd.transition_texture_layer(
                    texture,
                    write.layer,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                cmd.copy_staging_to_texture(texture, staging, write.layer);
                cmd.transition_texture_layer(
                    texture,
                    write.layer,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
            engine.destroy_staging_buffer(write.staging);
        }

        for write in self.buffer_writes.drain(..) {
            if let (Some(buffer), Some(staging)) = (
                engine.storage_buffer(write.buffer),
                engine.staging_buffer(write.staging),
            ) {
                cmd.copy_staging_to_buffer(staging, 0, buffer, write.offset, write.size);
            }
            engine.destroy_staging_buffer(write.staging);
        }

        for write in self.mesh_writes.drain(..) {
            if let (Some(mesh), Some(vertices), Some(indices)) = (
                engine.mesh(write.mesh),
                engine.staging_buffer(write.vertices),
                engine.staging_buffer(write.indices),
            ) {
                cmd.copy_to_mesh(mesh, vertices, indices);
            }
            engine.destroy_staging_buffer(write.vertices);
            engine.destroy_staging_buffer(write.indices);
        }

        cmd.memory_barrier(
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::MEMORY_WRITE,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        );
    }
}

fn validate_upload_size(what: &'static str, expected: u64, got: u64) -> Result<()> {
    if got != expected {
        return Err(Error::InvalidParameter(format!(
            "{} upload of {} entries does not match destination size {}",
            what, got, expected
        )));
    }
    Ok(())
}

fn validate_buffer_range(buffer_size: u64, offset: u64, len: u64) -> Result<()> {
    let end = offset.checked_add(len).ok_or_else(|| {
        Error::InvalidParameter("buffer upload offset overflows".into())
    })?;
    if end > buffer_size {
        return Err(Error::InvalidParameter(format!(
            "buffer upload of {} bytes at offset {} exceeds buffer size {}",
            len, offset, buffer_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Handle;

    #[test]
    fn test_writer_counts_pending_across_kinds() {
        let mut writer = BufferWriter::new();
        assert!(writer.is_empty());

        writer.texture_writes.push(TextureWrite {
            texture: Handle::new(0),
            staging: Handle::new(0),
            layer: 0,
        });
        writer.buffer_writes.push(BufferWrite {
            buffer: Handle::new(1),
            staging: Handle::new(1),
            offset: 0,
            size: 16,
        });
        writer.mesh_writes.push(MeshWrite {
            mesh: Handle::new(0),
            vertices: Handle::new(2),
            indices: Handle::new(3),
        });

        assert_eq!(writer.pending_writes(), 3);
        assert!(!writer.is_empty());
    }

    #[test]
    fn test_upload_size_must_match_exactly() {
        assert!(validate_upload_size("texture layer", 4096, 4096).is_ok());
        assert!(matches!(
            validate_upload_size("texture layer", 4096, 4095),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            validate_upload_size("texture layer", 4096, 8192),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_buffer_range_checks() {
        assert!(validate_buffer_range(64, 0, 64).is_ok());
        assert!(validate_buffer_range(64, 32, 32).is_ok());
        assert!(matches!(
            validate_buffer_range(64, 33, 32),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            validate_buffer_range(64, u64::MAX, 2),
            Err(Error::InvalidParameter(_))
        ));
    }
}
