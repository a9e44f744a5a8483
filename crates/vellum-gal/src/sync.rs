//! Fence and semaphore pools, and the bounded fence wait.

use std::time::Duration;

use ash::vk;

use crate::backend::{Backend, FenceWait};
use crate::error::{GpuError, Result};
use crate::lease::{Lease, LeasePool};

pub type FenceLease = Lease<vk::Fence>;
pub type SemaphoreLease = Lease<vk::Semaphore>;

/// Recycles unsignaled fences.
#[derive(Default)]
pub struct FencePool {
    fences: LeasePool<vk::Fence>,
}

impl FencePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out an unsignaled fence.
    pub fn request_fence<B: Backend>(&mut self, backend: &B) -> Result<FenceLease> {
        self.fences.acquire(|| backend.create_fence())
    }

    pub fn fence(&self, lease: FenceLease) -> Result<vk::Fence> {
        self.fences.get(lease)
    }

    /// Reset a signaled fence and make it available again.
    pub fn reclaim_fence<B: Backend>(&mut self, backend: &B, lease: FenceLease) -> Result<()> {
        self.fences.release(lease, |fence| backend.reset_fence(fence))
    }

    pub fn allocated(&self) -> usize {
        self.fences.allocated()
    }

    pub fn available(&self) -> usize {
        self.fences.available()
    }

    pub fn destroy<B: Backend>(&mut self, backend: &B) {
        for fence in self.fences.drain() {
            backend.destroy_fence(fence);
        }
    }
}

/// Recycles binary semaphores.
#[derive(Default)]
pub struct SemaphorePool {
    semaphores: LeasePool<vk::Semaphore>,
}

impl SemaphorePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_semaphore<B: Backend>(&mut self, backend: &B) -> Result<SemaphoreLease> {
        self.semaphores.acquire(|| backend.create_semaphore())
    }

    pub fn semaphore(&self, lease: SemaphoreLease) -> Result<vk::Semaphore> {
        self.semaphores.get(lease)
    }

    /// A binary semaphore is unsignaled again once its wait completed, so
    /// reclaiming only recycles it.
    pub fn reclaim_semaphore(&mut self, lease: SemaphoreLease) -> Result<()> {
        self.semaphores.release(lease, |_| Ok(()))
    }

    /// Drop a semaphore that may still be signaled with no wait pending.
    /// It is destroyed with the pool instead of being handed out again.
    pub fn retire_semaphore(&mut self, lease: SemaphoreLease) -> Result<()> {
        self.semaphores.retire(lease)
    }

    pub fn allocated(&self) -> usize {
        self.semaphores.allocated()
    }

    pub fn available(&self) -> usize {
        self.semaphores.available()
    }

    pub fn destroy<B: Backend>(&mut self, backend: &B) {
        for semaphore in self.semaphores.drain() {
            backend.destroy_semaphore(semaphore);
        }
    }
}

/// Wait for `fence`, polling once and then blocking in `slice` steps.
///
/// Every slice that expires logs a stall warning. Once `timeout` worth of
/// slices expired the wait gives up with [`GpuError::FenceTimeout`].
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn wait_for_fence<B: Backend>(
    backend: &B,
    fence: vk::Fence,
    slice: Duration,
    timeout: Duration,
) -> Result<()> {
    if backend.fence_signaled(fence)? {
        return Ok(());
    }

    let slices = slice_count(slice, timeout);
    let mut waited = Duration::ZERO;
    for attempt in 1..=slices {
        match backend.wait_for_fence(fence, slice)? {
            FenceWait::Signaled => return Ok(()),
            FenceWait::TimedOut => {
                waited += slice;
                tracing::warn!(
                    "GPU fence not signaled after {waited:?} ({attempt}/{slices} waits)"
                );
            }
        }
    }

    tracing::error!("GPU fence still pending after {waited:?}, treating the device as lost");
    Err(GpuError::FenceTimeout { waited })
}

fn slice_count(slice: Duration, timeout: Duration) -> u32 {
    let slice = slice.as_nanos().max(1);
    let count = timeout.as_nanos().div_ceil(slice).max(1);
    u32::try_from(count).unwrap_or(u32::MAX)
}
