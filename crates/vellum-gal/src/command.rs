//! Command buffer pooling.

use ash::vk;

use crate::backend::Backend;
use crate::error::Result;
use crate::lease::{Lease, LeasePool};

pub type CommandBufferLease = Lease<vk::CommandBuffer>;

/// Which of the device's command pools a command buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandPoolId {
    /// Per-frame rendering commands.
    Main,
    /// Resource initialization and uploads.
    Init,
}

/// Primary command buffers allocated from one resettable native pool.
pub struct CommandBufferPool {
    pool: vk::CommandPool,
    queue_family: u32,
    buffers: LeasePool<vk::CommandBuffer>,
}

impl CommandBufferPool {
    /// Create the native pool for `queue_family`.
    pub fn new<B: Backend>(backend: &B, queue_family: u32) -> Result<Self> {
        let pool = backend.create_command_pool(queue_family)?;
        Ok(Self {
            pool,
            queue_family,
            buffers: LeasePool::new(),
        })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Hand out a command buffer in the initial state.
    pub fn request_command_buffer<B: Backend>(&mut self, backend: &B) -> Result<CommandBufferLease> {
        let pool = self.pool;
        self.buffers
            .acquire(|| backend.allocate_command_buffer(pool))
    }

    pub fn command_buffer(&self, lease: CommandBufferLease) -> Result<vk::CommandBuffer> {
        self.buffers.get(lease)
    }

    /// Reset an executed command buffer and make it available again.
    pub fn reclaim_command_buffer<B: Backend>(
        &mut self,
        backend: &B,
        lease: CommandBufferLease,
    ) -> Result<()> {
        self.buffers
            .release(lease, |command_buffer| backend.reset_command_buffer(command_buffer))
    }

    pub fn allocated(&self) -> usize {
        self.buffers.allocated()
    }

    pub fn available(&self) -> usize {
        self.buffers.available()
    }

    /// Free every command buffer and destroy the native pool.
    pub fn destroy<B: Backend>(&mut self, backend: &B) {
        let buffers = self.buffers.drain();
        if !buffers.is_empty() {
            backend.free_command_buffers(self.pool, &buffers);
        }
        backend.destroy_command_pool(self.pool);
        self.pool = vk::CommandPool::null();
    }
}
