//! Deferred deletion and reclamation for multi-frame-in-flight rendering.
//!
//! Native objects released while the GPU may still reference them are queued
//! on the current frame slot. Each slot keeps a `current` queue that collects
//! entries during the frame and a `previous` queue that is only executed after
//! the slot's fences signaled on its next visit.

use std::fmt;
use std::sync::Arc;

use ash::vk;

use crate::backend::Backend;
use crate::command::{CommandBufferLease, CommandPoolId};
use crate::descriptors::DescriptorPoolLease;
use crate::query::QueryPoolLease;
use crate::staging::StagingBuffer;
use crate::surface::SurfaceProvider;
use crate::sync::{FenceLease, SemaphoreLease};

/// A native object awaiting destruction.
pub enum PendingDeletion<A> {
    ImageView(vk::ImageView),
    Image { image: vk::Image, allocation: A },
    Buffer { buffer: vk::Buffer, allocation: A },
    BufferView(vk::BufferView),
    Framebuffer(vk::Framebuffer),
    RenderPass(vk::RenderPass),
    Sampler(vk::Sampler),
    Swapchain(vk::SwapchainKHR),
    /// The window is released only after its surface is gone.
    Surface {
        surface: vk::SurfaceKHR,
        window: Option<Arc<dyn SurfaceProvider>>,
    },
    ShaderModule(vk::ShaderModule),
    Pipeline(vk::Pipeline),
}

impl<A> PendingDeletion<A> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ImageView(_) => "image view",
            Self::Image { .. } => "image",
            Self::Buffer { .. } => "buffer",
            Self::BufferView(_) => "buffer view",
            Self::Framebuffer(_) => "framebuffer",
            Self::RenderPass(_) => "render pass",
            Self::Sampler(_) => "sampler",
            Self::Swapchain(_) => "swapchain",
            Self::Surface { .. } => "surface",
            Self::ShaderModule(_) => "shader module",
            Self::Pipeline(_) => "pipeline",
        }
    }

    /// Issue the native destroy call.
    pub fn destroy<B>(self, backend: &B)
    where
        B: Backend<Allocation = A>,
    {
        match self {
            Self::ImageView(view) => backend.destroy_image_view(view),
            Self::Image { image, allocation } => backend.destroy_image(image, allocation),
            Self::Buffer { buffer, allocation } => backend.destroy_buffer(buffer, allocation),
            Self::BufferView(view) => backend.destroy_buffer_view(view),
            Self::Framebuffer(framebuffer) => backend.destroy_framebuffer(framebuffer),
            Self::RenderPass(render_pass) => backend.destroy_render_pass(render_pass),
            Self::Sampler(sampler) => backend.destroy_sampler(sampler),
            Self::Swapchain(swapchain) => backend.destroy_swapchain(swapchain),
            Self::Surface { surface, window } => {
                backend.destroy_surface(surface);
                drop(window);
            }
            Self::ShaderModule(module) => backend.destroy_shader_module(module),
            Self::Pipeline(pipeline) => backend.destroy_pipeline(pipeline),
        }
    }
}

impl<A> fmt::Debug for PendingDeletion<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// A pooled object returning to its pool.
pub enum Reclaim<A> {
    Semaphore(SemaphoreLease),
    Fence(FenceLease),
    CommandBuffer {
        lease: CommandBufferLease,
        pool: CommandPoolId,
    },
    DescriptorPool(DescriptorPoolLease),
    /// A filled timestamp pool, read back when reclaimed.
    QueryPool(QueryPoolLease),
    StagingBuffer(StagingBuffer<A>),
}

impl<A> Reclaim<A> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Semaphore(_) => "semaphore",
            Self::Fence(_) => "fence",
            Self::CommandBuffer { .. } => "command buffer",
            Self::DescriptorPool(_) => "descriptor pool",
            Self::QueryPool(_) => "query pool",
            Self::StagingBuffer(_) => "staging buffer",
        }
    }
}

impl<A> fmt::Debug for Reclaim<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Two-generation queue owned by a frame slot.
pub struct DeferredQueue<T> {
    current: Vec<T>,
    previous: Vec<T>,
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self {
            current: Vec::new(),
            previous: Vec::new(),
        }
    }
}

impl<T> DeferredQueue<T> {
    pub fn push(&mut self, entry: T) {
        self.current.push(entry);
    }

    /// Frame boundary: entries collected during the frame wait for the slot's
    /// next fence proof.
    pub fn rotate(&mut self) {
        self.previous.append(&mut self.current);
    }

    /// Entries whose fences have signaled.
    pub fn take_previous(&mut self) -> Vec<T> {
        std::mem::take(&mut self.previous)
    }

    /// Every entry, oldest first. Only valid once the device is idle.
    pub fn take_all(&mut self) -> Vec<T> {
        let mut all = std::mem::take(&mut self.previous);
        all.append(&mut self.current);
        all
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    pub fn previous_len(&self) -> usize {
        self.previous.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_wait_one_rotation() {
        let mut queue = DeferredQueue::default();
        queue.push(1);
        assert!(queue.take_previous().is_empty());

        queue.rotate();
        queue.push(2);
        assert_eq!(queue.take_previous(), vec![1]);
        assert_eq!(queue.current_len(), 1);
    }

    #[test]
    fn rotation_keeps_unexecuted_entries() {
        let mut queue = DeferredQueue::default();
        queue.push(1);
        queue.rotate();
        queue.push(2);
        queue.rotate();

        assert_eq!(queue.previous_len(), 2);
        assert_eq!(queue.take_all(), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn kinds_are_named() {
        let deletion: PendingDeletion<()> = PendingDeletion::Sampler(vk::Sampler::null());
        assert_eq!(deletion.kind(), "sampler");
        assert_eq!(format!("{deletion:?}"), "sampler");
    }
}
