//! Host-visible staging buffers for uploads.

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::backend::{Backend, BufferCreate};
use crate::error::{GpuError, Result};

/// A transfer-source buffer lent out by the [`StagingBufferPool`].
pub struct StagingBuffer<A> {
    pub buffer: vk::Buffer,
    pub allocation: A,
    /// Capacity in bytes; at least the requested size.
    pub size: u64,
}

/// Recycles staging buffers by capacity.
pub struct StagingBufferPool<A> {
    free: Vec<StagingBuffer<A>>,
    min_size: u64,
    allocated: usize,
}

impl<A> StagingBufferPool<A> {
    pub fn new(min_size: u64) -> Self {
        Self {
            free: Vec::new(),
            min_size: min_size.max(1),
            allocated: 0,
        }
    }

    /// Lend a buffer holding at least `size` bytes aligned to `alignment`.
    ///
    /// The smallest free buffer that fits is reused; otherwise a new one of
    /// `max(size.next_power_of_two(), min_size)` bytes is created.
    pub fn allocate_buffer<B>(
        &mut self,
        backend: &B,
        alignment: u64,
        size: u64,
    ) -> Result<StagingBuffer<A>>
    where
        B: Backend<Allocation = A>,
    {
        let size = align_up(size.max(1), alignment.max(1))
            .ok_or_else(|| GpuError::InvalidDescription(format!("staging size {size} overflows")))?;

        let best_fit = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, candidate)| candidate.size >= size)
            .min_by_key(|(_, candidate)| candidate.size)
            .map(|(index, _)| index);
        if let Some(index) = best_fit {
            return Ok(self.free.swap_remove(index));
        }

        let capacity = size.checked_next_power_of_two().unwrap_or(size).max(self.min_size);
        let (buffer, allocation) = backend.create_buffer(&BufferCreate {
            size: capacity,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            location: MemoryLocation::CpuToGpu,
            name: "staging",
        })?;
        self.allocated += 1;
        tracing::trace!(capacity, "created staging buffer");

        Ok(StagingBuffer {
            buffer,
            allocation,
            size: capacity,
        })
    }

    /// Return a whole buffer to the free list.
    pub fn reclaim_buffer(&mut self, buffer: StagingBuffer<A>) {
        self.free.push(buffer);
    }

    /// Staging buffers created and not yet destroyed.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Destroy every free buffer. Lent buffers must have been reclaimed first.
    pub fn destroy<B>(&mut self, backend: &B)
    where
        B: Backend<Allocation = A>,
    {
        let outstanding = self.allocated - self.free.len();
        if outstanding > 0 {
            tracing::warn!(outstanding, "staging buffers still lent out at destruction");
        }
        for staging in self.free.drain(..) {
            backend.destroy_buffer(staging.buffer, staging.allocation);
        }
        self.allocated = outstanding;
    }
}

fn align_up(value: u64, alignment: u64) -> Option<u64> {
    let rem = value % alignment;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(1, 256), Some(256));
        assert_eq!(align_up(256, 256), Some(256));
        assert_eq!(align_up(257, 4), Some(260));
        assert_eq!(align_up(u64::MAX, 2), None);
    }
}
