//! Descriptor pool recycling.
//!
//! Sets are never freed individually. The device allocates from a current
//! pool until it runs dry, retires it into the frame's reclaim queue and
//! leases another one; a reclaimed pool is reset as a whole.

use ash::vk;

use crate::backend::Backend;
use crate::error::Result;
use crate::lease::{Lease, LeasePool};

pub type DescriptorPoolLease = Lease<vk::DescriptorPool>;

/// Descriptor counts per set used to size every native pool.
const DESCRIPTORS_PER_SET: [(vk::DescriptorType, u32); 6] = [
    (vk::DescriptorType::UNIFORM_BUFFER, 4),
    (vk::DescriptorType::STORAGE_BUFFER, 4),
    (vk::DescriptorType::SAMPLED_IMAGE, 8),
    (vk::DescriptorType::STORAGE_IMAGE, 2),
    (vk::DescriptorType::SAMPLER, 4),
    (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, 1),
];

pub struct DescriptorSetPool {
    pools: LeasePool<vk::DescriptorPool>,
    current: Option<DescriptorPoolLease>,
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl DescriptorSetPool {
    pub fn new(max_sets: u32) -> Self {
        let max_sets = max_sets.max(1);
        let pool_sizes = DESCRIPTORS_PER_SET
            .iter()
            .map(|&(ty, per_set)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: per_set.saturating_mul(max_sets),
            })
            .collect();
        Self {
            pools: LeasePool::new(),
            current: None,
            max_sets,
            pool_sizes,
        }
    }

    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// The pool sets are currently allocated from, leasing one if needed.
    pub fn current_pool<B: Backend>(&mut self, backend: &B) -> Result<vk::DescriptorPool> {
        let lease = match self.current {
            Some(lease) => lease,
            None => {
                let (max_sets, sizes) = (self.max_sets, &self.pool_sizes);
                let lease = self
                    .pools
                    .acquire(|| backend.create_descriptor_pool(max_sets, sizes))?;
                self.current = Some(lease);
                lease
            }
        };
        self.pools.get(lease)
    }

    /// Stop allocating from the current pool. The returned lease must be
    /// reclaimed once the GPU no longer reads its sets.
    pub fn retire_current(&mut self) -> Option<DescriptorPoolLease> {
        self.current.take()
    }

    /// Reset a retired pool and make it available again.
    pub fn reclaim_pool<B: Backend>(&mut self, backend: &B, lease: DescriptorPoolLease) -> Result<()> {
        self.pools
            .release(lease, |pool| backend.reset_descriptor_pool(pool))
    }

    pub fn allocated(&self) -> usize {
        self.pools.allocated()
    }

    pub fn available(&self) -> usize {
        self.pools.available()
    }

    pub fn destroy<B: Backend>(&mut self, backend: &B) {
        self.current = None;
        for pool in self.pools.drain() {
            backend.destroy_descriptor_pool(pool);
        }
    }
}
