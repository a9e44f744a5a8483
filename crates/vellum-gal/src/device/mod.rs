//! The device: owner of every native object, the frame ring and the pools.
//!
//! A [`Device`] moves through [`DeviceState`] during [`Device::initialize`]
//! and back to `Uninitialized` on [`Device::shutdown`]. Native objects that
//! recorded commands may still reference are never destroyed directly: they
//! are queued on the current frame slot and released once the slot's fences
//! prove the GPU is done with them.

mod frame;
mod init;
mod present;
mod resources;

use std::marker::PhantomData;

use ash::vk;
use crossbeam::channel::Receiver;

use crate::backend::{AdapterInfo, Backend};
use crate::barrier::PipelineBarrier;
use crate::cache::{PipelineKey, ResourceCache};
use crate::capabilities::GpuCapabilities;
use crate::command::{CommandBufferPool, CommandPoolId};
use crate::config::DeviceConfig;
use crate::deferred::{PendingDeletion, Reclaim};
use crate::descriptors::DescriptorSetPool;
use crate::error::{GpuError, Result};
use crate::format::FormatLookupTable;
use crate::frame::FrameRing;
use crate::handle::Arena;
use crate::init_context::InitContext;
use crate::pass::Pass;
use crate::query::QueryPool;
use crate::requests::{request_channel, DeviceRequest, DeviceRequests};
use crate::resources::{
    BlendState, BlendStateHandle, Buffer, BufferHandle, DepthStencilState,
    DepthStencilStateHandle, RasterizerState, RasterizerStateHandle, SamplerState,
    SamplerStateHandle, Shader, ShaderHandle, SwapChain, SwapChainHandle, Texture, TextureHandle,
};
use crate::staging::StagingBufferPool;
use crate::sync::{self, FencePool, SemaphoreLease, SemaphorePool};

pub use init::select_queue_families;

/// Bring-up progress of a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceState {
    Uninitialized,
    InstanceCreated,
    PhysicalDeviceSelected,
    LogicalDeviceCreated,
    PoolsInitialized,
    Ready,
}

/// A queue and the family it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueInfo {
    pub family: u32,
    pub queue: vk::Queue,
}

/// Native objects created by each pool, and how many are free for reuse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub fences_allocated: usize,
    pub fences_available: usize,
    pub semaphores_allocated: usize,
    pub semaphores_available: usize,
    pub command_buffers_allocated: usize,
    pub command_buffers_available: usize,
    pub descriptor_pools_allocated: usize,
    pub descriptor_pools_available: usize,
    pub staging_buffers_allocated: usize,
    pub staging_buffers_available: usize,
    pub query_pools_allocated: usize,
    pub query_pools_available: usize,
}

pub(crate) struct Pools<A> {
    fences: FencePool,
    semaphores: SemaphorePool,
    command_buffers: CommandBufferPool,
    descriptors: DescriptorSetPool,
    staging: StagingBufferPool<A>,
    init: InitContext<A>,
    queries: QueryPool,
}

impl<A> Pools<A> {
    fn new<B>(
        backend: &B,
        config: &DeviceConfig,
        queue_family: u32,
        queries: QueryPool,
    ) -> Result<Self>
    where
        B: Backend<Allocation = A>,
    {
        let mut command_buffers = CommandBufferPool::new(backend, queue_family)?;
        let init = match InitContext::new(backend, queue_family) {
            Ok(init) => init,
            Err(err) => {
                command_buffers.destroy(backend);
                return Err(err);
            }
        };

        Ok(Self {
            fences: FencePool::new(),
            semaphores: SemaphorePool::new(),
            command_buffers,
            descriptors: DescriptorSetPool::new(config.descriptor_sets_per_pool),
            staging: StagingBufferPool::new(config.staging_buffer_min_size),
            init,
            queries,
        })
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            fences_allocated: self.fences.allocated(),
            fences_available: self.fences.available(),
            semaphores_allocated: self.semaphores.allocated(),
            semaphores_available: self.semaphores.available(),
            command_buffers_allocated: self.command_buffers.allocated(),
            command_buffers_available: self.command_buffers.available(),
            descriptor_pools_allocated: self.descriptors.allocated(),
            descriptor_pools_available: self.descriptors.available(),
            staging_buffers_allocated: self.staging.allocated(),
            staging_buffers_available: self.staging.available(),
            query_pools_allocated: self.queries.allocated(),
            query_pools_available: self.queries.available(),
        }
    }

    fn destroy<B>(&mut self, backend: &B)
    where
        B: Backend<Allocation = A>,
    {
        for staging in self.init.destroy(backend) {
            self.staging.reclaim_buffer(staging);
        }
        self.command_buffers.destroy(backend);
        self.descriptors.destroy(backend);
        self.queries.destroy(backend);
        self.fences.destroy(backend);
        self.semaphores.destroy(backend);
        self.staging.destroy(backend);
    }
}

/// The graphics device.
///
/// Bound to the thread that created it; other threads reach it through
/// [`Device::requests`].
pub struct Device<B: Backend> {
    backend: B,
    config: DeviceConfig,
    state: DeviceState,
    debug_messenger: bool,
    allocator_created: bool,

    adapter: Option<AdapterInfo>,
    graphics_queue: QueueInfo,
    transfer_queue: QueueInfo,
    instance_extensions: Vec<String>,
    device_extensions: Vec<String>,
    formats: FormatLookupTable,
    capabilities: GpuCapabilities,

    pools: Option<Pools<B::Allocation>>,
    barrier: PipelineBarrier,
    pass: Pass,
    cache: ResourceCache,
    ring: FrameRing<B::Allocation>,
    frame_counter: u64,
    safe_frame: Option<u64>,
    in_frame: bool,
    /// Signaled by the most recent submission; the next one waits on it.
    last_submission: Option<SemaphoreLease>,
    lost: Option<String>,

    textures: Arena<TextureHandle, Texture<B::Allocation>>,
    buffers: Arena<BufferHandle, Buffer<B::Allocation>>,
    shaders: Arena<ShaderHandle, Shader>,
    blend_states: Arena<BlendStateHandle, BlendState>,
    depth_stencil_states: Arena<DepthStencilStateHandle, DepthStencilState>,
    rasterizer_states: Arena<RasterizerStateHandle, RasterizerState>,
    sampler_states: Arena<SamplerStateHandle, SamplerState>,
    swap_chains: Arena<SwapChainHandle, SwapChain>,

    requests: DeviceRequests,
    request_receiver: Receiver<DeviceRequest>,

    _not_send: PhantomData<*const ()>,
}

impl<B: Backend> Device<B> {
    /// Wrap `backend` without touching it. Call [`initialize`](Self::initialize) next.
    pub fn new(backend: B, config: DeviceConfig) -> Self {
        let (requests, request_receiver) = request_channel();
        let ring = FrameRing::new(config.ring_size());
        Self {
            backend,
            config,
            state: DeviceState::Uninitialized,
            debug_messenger: false,
            allocator_created: false,
            adapter: None,
            graphics_queue: QueueInfo::default(),
            transfer_queue: QueueInfo::default(),
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
            formats: FormatLookupTable::default(),
            capabilities: GpuCapabilities::default(),
            pools: None,
            barrier: PipelineBarrier::new(),
            pass: Pass::new(),
            cache: ResourceCache::new(),
            ring,
            frame_counter: 0,
            safe_frame: None,
            in_frame: false,
            last_submission: None,
            lost: None,
            textures: Arena::new(),
            buffers: Arena::new(),
            shaders: Arena::new(),
            blend_states: Arena::new(),
            depth_stencil_states: Arena::new(),
            rasterizer_states: Arena::new(),
            sampler_states: Arena::new(),
            swap_chains: Arena::new(),
            requests,
            request_receiver,
            _not_send: PhantomData,
        }
    }

    /// Create and initialize a device in one step.
    pub fn create(backend: B, config: DeviceConfig) -> Result<Self> {
        let mut device = Self::new(backend, config);
        device.initialize()?;
        Ok(device)
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    pub fn formats(&self) -> &FormatLookupTable {
        &self.formats
    }

    pub fn adapter(&self) -> Option<&AdapterInfo> {
        self.adapter.as_ref()
    }

    pub fn graphics_queue(&self) -> QueueInfo {
        self.graphics_queue
    }

    pub fn transfer_queue(&self) -> QueueInfo {
        self.transfer_queue
    }

    pub fn instance_extensions(&self) -> &[String] {
        &self.instance_extensions
    }

    /// Device extensions enabled on the logical device.
    pub fn device_extensions(&self) -> &[String] {
        &self.device_extensions
    }

    /// Index of the frame being recorded, or of the next one between frames.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Latest frame whose GPU work is known to be complete.
    pub fn safe_frame(&self) -> Option<u64> {
        self.safe_frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_some()
    }

    /// Sender for destroy and update requests from other threads.
    pub fn requests(&self) -> DeviceRequests {
        self.requests.clone()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pools.as_ref().map(Pools::stats).unwrap_or_default()
    }

    /// Native objects waiting in the ring for their fences.
    pub fn pending_deletions(&self) -> usize {
        self.ring.slots().iter().map(|slot| slot.pending_deletions()).sum()
    }

    /// Pooled objects waiting in the ring to be returned to their pools.
    pub fn pending_reclaims(&self) -> usize {
        self.ring.slots().iter().map(|slot| slot.pending_reclaims()).sum()
    }

    pub fn texture(&self, texture: TextureHandle) -> Option<&Texture<B::Allocation>> {
        self.textures.get(texture)
    }

    pub fn buffer(&self, buffer: BufferHandle) -> Option<&Buffer<B::Allocation>> {
        self.buffers.get(buffer)
    }

    pub fn shader(&self, shader: ShaderHandle) -> Option<&Shader> {
        self.shaders.get(shader)
    }

    pub fn blend_state(&self, state: BlendStateHandle) -> Option<&BlendState> {
        self.blend_states.get(state)
    }

    pub fn depth_stencil_state(&self, state: DepthStencilStateHandle) -> Option<&DepthStencilState> {
        self.depth_stencil_states.get(state)
    }

    pub fn rasterizer_state(&self, state: RasterizerStateHandle) -> Option<&RasterizerState> {
        self.rasterizer_states.get(state)
    }

    pub fn sampler_state(&self, state: SamplerStateHandle) -> Option<&SamplerState> {
        self.sampler_states.get(state)
    }

    pub fn swap_chain(&self, swap_chain: SwapChainHandle) -> Option<&SwapChain> {
        self.swap_chains.get(swap_chain)
    }

    /// Store a pipeline built from `key`. A pipeline it replaces is destroyed
    /// once the current frame retires.
    pub fn cache_pipeline(&mut self, key: PipelineKey, pipeline: vk::Pipeline) {
        if let Some(previous) = self.cache.insert(key, pipeline) {
            self.defer_deletion(PendingDeletion::Pipeline(previous));
        }
    }

    pub fn cached_pipeline(&self, key: &PipelineKey) -> Option<vk::Pipeline> {
        self.cache.get(key)
    }

    /// Fail unless the device is ready and not lost.
    fn check_usable(&self) -> Result<()> {
        if let Some(reason) = &self.lost {
            return Err(GpuError::DeviceLost(reason.clone()));
        }
        if self.state != DeviceState::Ready {
            return Err(GpuError::invalid_state(format!(
                "device is {:?}, not ready",
                self.state
            )));
        }
        Ok(())
    }

    /// Record that `err` ended the device's ability to run work.
    fn note_error(&mut self, err: &GpuError) {
        if err.is_device_lost() && self.lost.is_none() {
            tracing::error!("Device lost: {err}");
            self.lost = Some(err.to_string());
        }
    }

    fn tracked<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.note_error(err);
        }
        result
    }

    fn defer_deletion(&mut self, entry: PendingDeletion<B::Allocation>) {
        tracing::trace!(kind = entry.kind(), "deferring deletion");
        self.ring.current_mut().deletions.push(entry);
    }

    fn reclaim_later(&mut self, entry: Reclaim<B::Allocation>) {
        self.ring.current_mut().reclaims.push(entry);
    }

    /// Apply requests sent from other threads. Returns how many were handled.
    pub fn process_requests(&mut self) -> usize {
        let requests: Vec<_> = self.request_receiver.try_iter().collect();
        let count = requests.len();
        for request in requests {
            let outcome = match request {
                DeviceRequest::DestroyTexture(texture) => self.destroy_texture(texture),
                DeviceRequest::DestroyBuffer(buffer) => self.destroy_buffer(buffer),
                DeviceRequest::DestroySamplerState(sampler) => self.destroy_sampler_state(sampler),
                DeviceRequest::UpdateBuffer {
                    buffer,
                    offset,
                    data,
                } => self.update_buffer(buffer, offset, &data),
            };
            if let Err(err) = outcome {
                tracing::warn!("Dropping background request: {err}");
            }
        }
        count
    }

    /// Block until the GPU is idle and release everything the ring holds.
    ///
    /// Pending initialization work is submitted first.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&mut self) -> Result<()> {
        if self.state < DeviceState::LogicalDeviceCreated {
            return Ok(());
        }
        self.process_requests();

        let mut first_error = None;
        let init_pending = self
            .pools
            .as_ref()
            .is_some_and(|pools| pools.init.has_pending());
        if self.lost.is_none() && (init_pending || self.ring.current().command_buffer.is_some()) {
            if let Err(err) = self.submit(None, vk::PipelineStageFlags::empty(), None) {
                first_error.get_or_insert(err);
            }
        }

        if let Err(err) = self.backend.device_wait_idle() {
            self.note_error(&err);
            first_error.get_or_insert(err);
        }

        let (slice, timeout) = (self.config.fence_wait_slice, self.config.fence_timeout);
        let mut wait_error = None;
        for slot in self.ring.slots_mut() {
            for fence in slot.fences.drain(..) {
                if wait_error.is_none() && self.lost.is_none() {
                    if let Err(err) = sync::wait_for_fence(&self.backend, fence, slice, timeout) {
                        wait_error = Some(err);
                    }
                }
            }
        }
        if let Some(err) = wait_error {
            self.note_error(&err);
            first_error.get_or_insert(err);
        }

        let mut deletions = Vec::new();
        let mut reclaims = Vec::new();
        for slot in self.ring.slots_mut() {
            deletions.extend(slot.deletions.take_all());
            reclaims.extend(slot.reclaims.take_all());
        }
        delete_pending_resources(&self.backend, deletions);
        if let Some(pools) = self.pools.as_mut() {
            reclaim_resources(&self.backend, pools, reclaims);
        }
        self.safe_frame = self.ring.slots().iter().filter_map(|slot| slot.frame).max();

        first_error.map_or(Ok(()), Err)
    }

    /// Release every native object and return to `Uninitialized`.
    ///
    /// Safe to call more than once; also runs on drop.
    pub fn shutdown(&mut self) {
        match self.state {
            DeviceState::Uninitialized => return,
            state if state < DeviceState::LogicalDeviceCreated => {
                self.teardown();
                return;
            }
            _ => {}
        }

        tracing::info!("Shutting down device");
        if let Err(err) = self.wait_idle() {
            tracing::error!("Failed to idle the device during shutdown: {err}");
        }
        self.destroy_remaining_resources();
        self.teardown();
    }

    /// Destroy objects the application never released. Requires an idle GPU.
    fn destroy_remaining_resources(&mut self) {
        let backend = &self.backend;

        let textures = self.textures.drain();
        if !textures.is_empty() {
            tracing::warn!("{} textures still alive at shutdown", textures.len());
        }
        for (_, texture) in textures {
            for (_, view) in texture.extra_views {
                backend.destroy_image_view(view);
            }
            backend.destroy_image_view(texture.view);
            backend.destroy_image(texture.image, texture.allocation);
        }

        let buffers = self.buffers.drain();
        if !buffers.is_empty() {
            tracing::warn!("{} buffers still alive at shutdown", buffers.len());
        }
        for (_, buffer) in buffers {
            backend.destroy_buffer(buffer.buffer, buffer.allocation);
        }

        for (_, shader) in self.shaders.drain() {
            for (_, module) in shader.modules {
                backend.destroy_shader_module(module);
            }
        }
        for (_, sampler) in self.sampler_states.drain() {
            backend.destroy_sampler(sampler.sampler);
        }
        self.blend_states.drain();
        self.depth_stencil_states.drain();
        self.rasterizer_states.drain();

        for (_, swap_chain) in self.swap_chains.drain() {
            backend.destroy_swapchain(swap_chain.swapchain);
            backend.destroy_surface(swap_chain.surface);
        }

        for pipeline in self.cache.drain() {
            backend.destroy_pipeline(pipeline);
        }
    }
}

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn delete_pending_resources<B: Backend>(backend: &B, entries: Vec<PendingDeletion<B::Allocation>>) {
    for entry in entries {
        tracing::trace!(kind = entry.kind(), "destroying");
        entry.destroy(backend);
    }
}

fn reclaim_resources<B: Backend>(
    backend: &B,
    pools: &mut Pools<B::Allocation>,
    entries: Vec<Reclaim<B::Allocation>>,
) {
    for entry in entries {
        let kind = entry.kind();
        let outcome = match entry {
            Reclaim::Semaphore(lease) => pools.semaphores.reclaim_semaphore(lease),
            Reclaim::Fence(lease) => pools.fences.reclaim_fence(backend, lease),
            Reclaim::CommandBuffer {
                lease,
                pool: CommandPoolId::Main,
            } => pools.command_buffers.reclaim_command_buffer(backend, lease),
            Reclaim::CommandBuffer {
                lease,
                pool: CommandPoolId::Init,
            } => pools.init.reclaim_command_buffer(backend, lease),
            Reclaim::DescriptorPool(lease) => pools.descriptors.reclaim_pool(backend, lease),
            Reclaim::QueryPool(lease) => pools.queries.reclaim_pool(backend, lease),
            Reclaim::StagingBuffer(staging) => {
                pools.staging.reclaim_buffer(staging);
                Ok(())
            }
        };
        if let Err(err) = outcome {
            tracing::error!("Failed to reclaim {kind}: {err}");
        }
    }
}

fn not_ready() -> GpuError {
    GpuError::invalid_state("device pools are not initialized")
}
