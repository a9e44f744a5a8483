//! Per-frame slot ring.

use ash::vk;

use crate::command::CommandBufferLease;
use crate::deferred::{DeferredQueue, PendingDeletion, Reclaim};

/// Command buffer recording into the slot's frame.
#[derive(Debug, Clone, Copy)]
pub struct OpenCommandBuffer {
    pub lease: CommandBufferLease,
    pub handle: vk::CommandBuffer,
}

/// State owned by one in-flight frame.
pub struct FrameSlot<A> {
    pub command_buffer: Option<OpenCommandBuffer>,
    /// Fences of every submission made while this slot was current.
    pub fences: Vec<vk::Fence>,
    pub deletions: DeferredQueue<PendingDeletion<A>>,
    pub reclaims: DeferredQueue<Reclaim<A>>,
    /// Frame index of the last `begin_frame` on this slot.
    pub frame: Option<u64>,
}

impl<A> Default for FrameSlot<A> {
    fn default() -> Self {
        Self {
            command_buffer: None,
            fences: Vec::new(),
            deletions: DeferredQueue::default(),
            reclaims: DeferredQueue::default(),
            frame: None,
        }
    }
}

impl<A> FrameSlot<A> {
    /// Move entries queued during the frame behind the next fence proof.
    pub fn rotate(&mut self) {
        self.deletions.rotate();
        self.reclaims.rotate();
    }

    pub fn pending_deletions(&self) -> usize {
        self.deletions.len()
    }

    pub fn pending_reclaims(&self) -> usize {
        self.reclaims.len()
    }
}

/// Fixed ring of frame slots indexed by `frame % len`.
pub struct FrameRing<A> {
    slots: Vec<FrameSlot<A>>,
    current: usize,
}

impl<A> FrameRing<A> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len.max(1)).map(|_| FrameSlot::default()).collect(),
            current: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &FrameSlot<A> {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameSlot<A> {
        &mut self.slots[self.current]
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn slots(&self) -> &[FrameSlot<A>] {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut [FrameSlot<A>] {
        &mut self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_wraps() {
        let mut ring: FrameRing<()> = FrameRing::new(3);
        let visited: Vec<_> = (0..5)
            .map(|_| {
                let index = ring.current_index();
                ring.advance();
                index
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn deletion_survives_until_the_slot_comes_back() {
        let mut ring: FrameRing<()> = FrameRing::new(2);

        ring.current_mut()
            .deletions
            .push(PendingDeletion::Sampler(vk::Sampler::null()));
        ring.current_mut().rotate();
        ring.advance();

        assert!(ring.current_mut().deletions.take_previous().is_empty());
        ring.current_mut().rotate();
        ring.advance();

        assert_eq!(ring.current_mut().deletions.take_previous().len(), 1);
    }

    #[test]
    fn zero_length_ring_has_one_slot() {
        let ring: FrameRing<()> = FrameRing::new(0);
        assert_eq!(ring.len(), 1);
    }
}
