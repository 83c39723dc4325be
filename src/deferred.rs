//! Deferred deletion of GPU resources.
//!
//! Submitted GPU work runs behind the CPU, so a resource the caller destroys
//! cannot be freed on the spot: the frame in flight may still reference it.
//! Destroy calls only *retire* resources into the engine's accumulating
//! [`DeletionQueue`]. At the start of each frame the engine releases the
//! batch its frame slot held from that slot's previous use (the slot's fence
//! has just proven that use complete) and moves the accumulating queue into
//! the slot. With two slots in rotation, physical free happens at least one
//! full frame after logical destruction.

use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

use crate::resources::{Mesh, PipelineResource, StagingBuffer, StorageBuffer, Texture};

/// One batch of retired resources, freed together once the GPU is done with
/// the frame that retired them.
#[derive(Debug, Default)]
pub(crate) struct DeletionQueue {
    pub(crate) textures: Vec<Texture>,
    pub(crate) buffers: Vec<StorageBuffer>,
    pub(crate) staging: Vec<StagingBuffer>,
    pub(crate) meshes: Vec<Mesh>,
    pub(crate) pipelines: Vec<PipelineResource>,
}

impl DeletionQueue {
    pub(crate) fn retire_texture(&mut self, texture: Texture) {
        self.textures.push(texture);
    }

    pub(crate) fn retire_buffer(&mut self, buffer: StorageBuffer) {
        self.buffers.push(buffer);
    }

    pub(crate) fn retire_staging(&mut self, staging: StagingBuffer) {
        self.staging.push(staging);
    }

    pub(crate) fn retire_mesh(&mut self, mesh: Mesh) {
        self.meshes.push(mesh);
    }

    pub(crate) fn retire_pipeline(&mut self, pipeline: PipelineResource) {
        self.pipelines.push(pipeline);
    }

    /// Total retired resources across all kinds.
    pub(crate) fn len(&self) -> usize {
        self.textures.len()
            + self.buffers.len()
            + self.staging.len()
            + self.meshes.len()
            + self.pipelines.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the whole batch out, leaving this queue empty.
    pub(crate) fn take(&mut self) -> DeletionQueue {
        std::mem::take(self)
    }

    /// Physically free everything in the batch.
    ///
    /// # Safety
    ///
    /// The GPU must have finished the frame that retired these resources
    /// (fence observed signaled, or the device waited idle).
    pub(crate) unsafe fn release(&mut self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        let count = self.len();
        if count == 0 {
            return;
        }
        for staging in self.staging.drain(..) {
            unsafe { staging.release(device, allocator) };
        }
        for buffer in self.buffers.drain(..) {
            unsafe { buffer.release(device, allocator) };
        }
        for texture in self.textures.drain(..) {
            unsafe { texture.release(device, allocator) };
        }
        for mesh in self.meshes.drain(..) {
            unsafe { mesh.release(device, allocator) };
        }
        for pipeline in self.pipelines.drain(..) {
            unsafe { pipeline.release(device) };
        }
        log::debug!("Released {} retired GPU resources", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FRAMES_IN_FLIGHT;
    use ash::vk;
    use ash::vk::Handle;

    fn fake_staging() -> StagingBuffer {
        StagingBuffer {
            buffer: vk::Buffer::from_raw(12345),
            allocation: None,
            size: 64,
        }
    }

    #[test]
    fn test_queue_counts_across_kinds() {
        let mut queue = DeletionQueue::default();
        assert!(queue.is_empty());
        queue.retire_staging(fake_staging());
        queue.retire_staging(fake_staging());
        assert_eq!(queue.len(), 2);

        let taken = queue.take();
        assert!(queue.is_empty());
        assert_eq!(taken.len(), 2);
    }

    #[test]
    fn test_retired_batch_survives_one_full_rotation() {
        // Mirrors the engine's per-frame bookkeeping: slot K releases the
        // batch it held, then takes the accumulating queue. A batch retired
        // while slot 0 is current must not come up for release until slot 0
        // comes around again.
        let mut accumulating = DeletionQueue::default();
        let mut slots: [DeletionQueue; FRAMES_IN_FLIGHT] = Default::default();

        accumulating.retire_staging(fake_staging());

        // Frame 0: slot 0 had nothing; it takes the batch.
        let released = slots[0].take();
        assert!(released.is_empty());
        slots[0] = accumulating.take();

        // Frame 1: slot 1 rotates; slot 0 still holds the batch.
        let released = slots[1].take();
        assert!(released.is_empty());
        slots[1] = accumulating.take();
        assert_eq!(slots[0].len(), 1);

        // Frame 2: slot 0 again — only now is the batch handed out.
        let released = slots[0].take();
        assert_eq!(released.len(), 1);
    }
}
