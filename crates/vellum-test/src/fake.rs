//! A recording backend that checks what the device asks of it.
//!
//! Every native object gets a unique handle. The fake remembers which ones
//! are alive, which command buffers and submissions reference them, and the
//! order of creations, destructions, submissions and completions. Misuse a
//! real driver would reject or crash on is collected as a violation instead.
//!
//! Submissions complete when the device waits on their fence or idles the
//! device, in submission order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ash::vk::{self, Handle};
use parking_lot::{Mutex, MutexGuard};
use vellum_gal::backend::{
    AdapterInfo, Backend, BufferCreate, FenceWait, ImageCreate, ImageViewCreate, InstanceDesc,
    LogicalDeviceDesc, MemoryHeap, SubmitBatch, SwapchainCreate, SwapchainImages,
    DEBUG_UTILS_EXTENSION, IMAGE_FORMAT_LIST_EXTENSION, SURFACE_EXTENSION, SWAPCHAIN_EXTENSION,
    VALIDATION_LAYER, VIEWPORT_INDEX_LAYER_EXTENSION,
};
use vellum_gal::{BarrierBatch, GpuError, MemoryLocation, SurfaceProvider};

use crate::TestError;

/// Platform surface extension the fake reports.
pub const PLATFORM_SURFACE_EXTENSION: &str = "VK_KHR_xlib_surface";

type GpuResult<T> = vellum_gal::Result<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Instance,
    DebugMessenger,
    Device,
    Allocator,
    Buffer,
    BufferView,
    Image,
    ImageView,
    Sampler,
    ShaderModule,
    Pipeline,
    Framebuffer,
    RenderPass,
    Fence,
    Semaphore,
    CommandPool,
    CommandBuffer,
    DescriptorPool,
    QueryPool,
    Surface,
    Swapchain,
}

impl ObjectKind {
    fn outlives_device(self) -> bool {
        matches!(self, Self::Instance | Self::DebugMessenger | Self::Surface)
    }
}

/// Calls the fake can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateInstance,
    CreateDebugMessenger,
    EnumerateAdapters,
    CreateDevice,
    CreateAllocator,
    CreateCommandPool,
    CreateFence,
    CreateSemaphore,
    CreateBuffer,
    CreateImage,
    CreateImageView,
    CreateSampler,
    CreateShaderModule,
    CreateSurface,
    CreateSwapchain,
    EndCommandBuffer,
    QueueSubmit,
    /// Submission reports `VK_ERROR_DEVICE_LOST`.
    DeviceLostOnSubmit,
    AcquireOutOfDate,
    AcquireSuboptimal,
    PresentOutOfDate,
    PresentSuboptimal,
}

/// How submitted work completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuTiming {
    /// Work completes once the device waits for it.
    #[default]
    OnWait,
    /// Work never completes; fence waits time out and idling reports a lost device.
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created(ObjectKind, u64),
    Destroyed(ObjectKind, u64),
    Submitted(usize),
    Completed(usize),
    Presented { swapchain: u64, image_index: u32 },
    BeginLabel { command_buffer: u64, name: String },
    EndLabel { command_buffer: u64 },
}

/// One `queue_submit` call.
#[derive(Debug, Clone)]
pub struct Submission {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
    pub completed: bool,
    references: HashSet<u64>,
}

impl Submission {
    /// Whether the batch, or a command recorded into it, uses the object `raw`.
    pub fn references(&self, raw: u64) -> bool {
        self.references.contains(&raw)
    }
}

/// One `create_image` call.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub image: vk::Image,
    pub format: vk::Format,
    pub view_formats: Vec<vk::Format>,
    pub flags: vk::ImageCreateFlags,
    pub usage: vk::ImageUsageFlags,
    pub layers: u32,
}

/// Fake adapter, extension and limit configuration.
#[derive(Debug, Clone)]
pub struct FakeConfig {
    pub adapters: Vec<AdapterInfo>,
    pub instance_extensions: Vec<String>,
    pub instance_layers: Vec<String>,
    pub device_extensions: Vec<String>,
    /// Formats reported with no features at all.
    pub unsupported_formats: Vec<vk::Format>,
    /// Sets per descriptor pool regardless of the requested maximum.
    pub descriptor_pool_capacity: Option<u32>,
    pub swapchain_images: u32,
    pub timing: GpuTiming,
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            adapters: vec![fake_adapter(vec![universal_queue_family()])],
            instance_extensions: vec![
                SURFACE_EXTENSION.to_string(),
                PLATFORM_SURFACE_EXTENSION.to_string(),
                DEBUG_UTILS_EXTENSION.to_string(),
            ],
            instance_layers: vec![VALIDATION_LAYER.to_string()],
            device_extensions: vec![
                SWAPCHAIN_EXTENSION.to_string(),
                VIEWPORT_INDEX_LAYER_EXTENSION.to_string(),
                IMAGE_FORMAT_LIST_EXTENSION.to_string(),
            ],
            unsupported_formats: Vec::new(),
            descriptor_pool_capacity: None,
            swapchain_images: 3,
            timing: GpuTiming::OnWait,
        }
    }
}

/// A queue family with graphics, compute and transfer.
pub fn universal_queue_family() -> vk::QueueFamilyProperties {
    vk::QueueFamilyProperties {
        queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        queue_count: 1,
        timestamp_valid_bits: 64,
        ..Default::default()
    }
}

/// A discrete adapter with generous limits and the given queue families.
pub fn fake_adapter(queue_families: Vec<vk::QueueFamilyProperties>) -> AdapterInfo {
    AdapterInfo {
        name: "Fake GPU".to_string(),
        vendor_id: 0x10de,
        device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
        api_version: vk::API_VERSION_1_1,
        driver_version: 1,
        limits: vk::PhysicalDeviceLimits {
            max_image_dimension1_d: 16384,
            max_image_dimension2_d: 16384,
            max_image_dimension3_d: 2048,
            max_image_dimension_cube: 16384,
            max_image_array_layers: 2048,
            max_sampler_anisotropy: 16.0,
            max_color_attachments: 8,
            max_per_stage_descriptor_uniform_buffers: 15,
            max_per_stage_descriptor_storage_buffers: 16,
            max_per_stage_descriptor_storage_images: 8,
            timestamp_period: 1.0,
            ..Default::default()
        },
        features: vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            fill_mode_non_solid: vk::TRUE,
            geometry_shader: vk::TRUE,
            tessellation_shader: vk::TRUE,
            ..Default::default()
        },
        memory_heaps: vec![
            MemoryHeap {
                size: 8 << 30,
                device_local: true,
            },
            MemoryHeap {
                size: 16 << 30,
                device_local: false,
            },
        ],
        queue_families,
    }
}

#[derive(Debug)]
pub struct FakeAllocation {
    pub id: u64,
    pub host_visible: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending(usize),
    Signaled,
}

#[derive(Debug, Default)]
struct CommandBufferState {
    pool: u64,
    recording: bool,
    executable: bool,
    labels: u32,
    pending: Option<usize>,
    references: HashSet<u64>,
    queries: Vec<QueryOp>,
}

/// Query commands, applied when the submission carrying them completes.
#[derive(Debug, Clone, Copy)]
enum QueryOp {
    Reset { pool: u64, first: u32, count: u32 },
    Write { pool: u64, query: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    Unreset,
    Reset,
    Written(u64),
}

/// Ticks between two timestamps the fake GPU writes.
pub const FAKE_TIMESTAMP_STEP: u64 = 1000;

#[derive(Debug)]
struct SwapchainState {
    images: Vec<vk::Image>,
    next: usize,
}

#[derive(Default)]
struct FakeState {
    config: FakeConfig,
    failures: HashSet<FailPoint>,
    next_id: u64,
    live: HashMap<u64, ObjectKind>,
    events: Vec<Event>,
    violations: Vec<String>,
    lost: bool,

    instance: Option<u64>,
    messenger: Option<u64>,
    device: Option<u64>,
    allocator: Option<u64>,
    selected_adapter: Option<usize>,
    enabled_instance_extensions: Vec<String>,
    enabled_layers: Vec<String>,
    enabled_device_extensions: Vec<String>,

    command_buffers: HashMap<u64, CommandBufferState>,
    fences: HashMap<u64, FenceState>,
    signaled_semaphores: HashSet<u64>,
    submissions: Vec<Submission>,
    descriptor_pools: HashMap<u64, (u32, u32)>,
    query_pools: HashMap<u64, Vec<QueryState>>,
    ticks: u64,
    swapchains: HashMap<u64, SwapchainState>,

    barriers: Vec<(vk::CommandBuffer, BarrierBatch)>,
    buffer_copies: Vec<(vk::Buffer, vk::Buffer, Vec<vk::BufferCopy>)>,
    image_copies: Vec<(vk::Buffer, vk::Image, vk::ImageLayout)>,
    images: Vec<ImageRecord>,
    samplers: Vec<(vk::Sampler, Option<f32>)>,
}

impl FakeState {
    fn fail(&self, point: FailPoint) -> GpuResult<()> {
        if self.failures.contains(&point) {
            let code = match point {
                FailPoint::CreateBuffer | FailPoint::CreateImage | FailPoint::CreateAllocator => {
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                }
                FailPoint::DeviceLostOnSubmit => vk::Result::ERROR_DEVICE_LOST,
                FailPoint::QueueSubmit => vk::Result::ERROR_OUT_OF_HOST_MEMORY,
                _ => vk::Result::ERROR_INITIALIZATION_FAILED,
            };
            return Err(GpuError::Vulkan(code));
        }
        Ok(())
    }

    fn violation(&mut self, message: String) {
        tracing::error!("fake backend violation: {message}");
        self.violations.push(message);
    }

    fn create(&mut self, kind: ObjectKind) -> u64 {
        self.next_id += 1;
        let id = 0x1000 + self.next_id;
        self.live.insert(id, kind);
        self.events.push(Event::Created(kind, id));
        id
    }

    fn destroy(&mut self, kind: ObjectKind, id: u64) {
        if id == 0 {
            return;
        }
        match self.live.remove(&id) {
            Some(live) if live == kind => {}
            Some(live) => {
                self.live.insert(id, live);
                self.violation(format!("destroying {live:?} {id:#x} as {kind:?}"));
                return;
            }
            None => {
                self.violation(format!("destroying {kind:?} {id:#x} which is not alive"));
                return;
            }
        }
        let in_use: Vec<usize> = self
            .submissions
            .iter()
            .enumerate()
            .filter(|(_, submission)| !submission.completed && submission.references.contains(&id))
            .map(|(index, _)| index)
            .collect();
        for index in in_use {
            self.violation(format!(
                "{kind:?} {id:#x} destroyed while submission {index} is pending"
            ));
        }
        self.events.push(Event::Destroyed(kind, id));
    }

    fn require_live(&mut self, kind: ObjectKind, id: u64, action: &str) {
        if self.live.get(&id) != Some(&kind) {
            self.violation(format!("{action} on {kind:?} {id:#x} which is not alive"));
        }
    }

    fn recording(&mut self, command_buffer: vk::CommandBuffer, action: &str) -> Option<&mut CommandBufferState> {
        let raw = command_buffer.as_raw();
        let recording = self
            .command_buffers
            .get(&raw)
            .is_some_and(|state| state.recording);
        if !recording {
            self.violation(format!(
                "{action} into command buffer {raw:#x} which is not recording"
            ));
            return None;
        }
        self.command_buffers.get_mut(&raw)
    }

    fn complete_through(&mut self, index: usize) {
        for current in 0..=index {
            match self.submissions.get(current) {
                Some(submission) if !submission.completed => {}
                _ => continue,
            }
            self.submissions[current].completed = true;
            let submission = self.submissions[current].clone();
            if let Some(state) = self.fences.get_mut(&submission.fence.as_raw()) {
                *state = FenceState::Signaled;
            }
            for command_buffer in &submission.command_buffers {
                let queries = match self.command_buffers.get_mut(&command_buffer.as_raw()) {
                    Some(state) => {
                        state.pending = None;
                        state.queries.clone()
                    }
                    None => Vec::new(),
                };
                for op in queries {
                    self.run_query(op);
                }
            }
            self.events.push(Event::Completed(current));
        }
    }

    fn run_query(&mut self, op: QueryOp) {
        match op {
            QueryOp::Reset { pool, first, count } => {
                if let Some(queries) = self.query_pools.get_mut(&pool) {
                    for query in queries.iter_mut().skip(first as usize).take(count as usize) {
                        *query = QueryState::Reset;
                    }
                }
            }
            QueryOp::Write { pool, query } => {
                self.ticks += FAKE_TIMESTAMP_STEP;
                let ticks = self.ticks;
                let slot = self
                    .query_pools
                    .get_mut(&pool)
                    .and_then(|queries| queries.get_mut(query as usize));
                let written = match slot {
                    Some(slot) if *slot != QueryState::Unreset => {
                        *slot = QueryState::Written(ticks);
                        true
                    }
                    _ => false,
                };
                if !written {
                    self.violation(format!(
                        "timestamp written to query {query} of pool {pool:#x} without a reset"
                    ));
                }
            }
        }
    }

    /// Nothing submitted will run anymore; objects may be destroyed freely.
    fn lose_device(&mut self) {
        if !self.lost {
            tracing::warn!("fake device lost");
        }
        self.lost = true;
        for submission in &mut self.submissions {
            submission.completed = true;
        }
        for state in self.fences.values_mut() {
            if matches!(state, FenceState::Pending(_)) {
                *state = FenceState::Signaled;
            }
        }
        for buffer in self.command_buffers.values_mut() {
            buffer.pending = None;
        }
    }

    fn complete_all(&mut self) {
        if let Some(last) = self.submissions.len().checked_sub(1) {
            self.complete_through(last);
        }
    }

    fn free_command_buffer(&mut self, raw: u64) {
        if let Some(state) = self.command_buffers.remove(&raw) {
            if state.pending.is_some() {
                self.violation(format!("command buffer {raw:#x} freed while pending"));
            }
        }
        self.destroy(ObjectKind::CommandBuffer, raw);
    }
}

/// Recording [`Backend`]. Clones share state, so a test keeps one clone to
/// inspect what the device did with the other.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new(config: FakeConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                config,
                ..FakeState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }

    /// Make every later call at `point` fail.
    pub fn fail(&self, point: FailPoint) {
        self.lock().failures.insert(point);
    }

    pub fn clear_failure(&self, point: FailPoint) {
        self.lock().failures.remove(&point);
    }

    pub fn set_timing(&self, timing: GpuTiming) {
        self.lock().config.timing = timing;
    }

    /// Complete every submitted batch, as if the GPU caught up.
    pub fn complete_all(&self) {
        self.lock().complete_all();
    }

    /// Fail with every recorded violation, if any.
    pub fn check(&self) -> Result<(), TestError> {
        let violations = self.lock().violations.clone();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(TestError::Violations(violations))
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lock().lost
    }

    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    /// Objects of `kind` created and not destroyed.
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.lock().live.values().filter(|&&live| live == kind).count()
    }

    pub fn live_total(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_alive(&self, raw: u64) -> bool {
        self.lock().live.contains_key(&raw)
    }

    /// Objects of `kind` ever created.
    pub fn created(&self, kind: ObjectKind) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|event| matches!(event, Event::Created(created, _) if *created == kind))
            .count()
    }

    /// Raw handles of destroyed objects of `kind`, in destruction order.
    pub fn destroyed(&self, kind: ObjectKind) -> Vec<u64> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                Event::Destroyed(destroyed, raw) if *destroyed == kind => Some(*raw),
                _ => None,
            })
            .collect()
    }

    pub fn barriers(&self) -> Vec<(vk::CommandBuffer, BarrierBatch)> {
        self.lock().barriers.clone()
    }

    pub fn buffer_copies(&self) -> Vec<(vk::Buffer, vk::Buffer, Vec<vk::BufferCopy>)> {
        self.lock().buffer_copies.clone()
    }

    pub fn image_copies(&self) -> Vec<(vk::Buffer, vk::Image, vk::ImageLayout)> {
        self.lock().image_copies.clone()
    }

    pub fn images(&self) -> Vec<ImageRecord> {
        self.lock().images.clone()
    }

    /// Samplers with their enabled maximum anisotropy.
    pub fn samplers(&self) -> Vec<(vk::Sampler, Option<f32>)> {
        self.lock().samplers.clone()
    }

    pub fn enabled_instance_extensions(&self) -> Vec<String> {
        self.lock().enabled_instance_extensions.clone()
    }

    pub fn enabled_layers(&self) -> Vec<String> {
        self.lock().enabled_layers.clone()
    }

    pub fn enabled_device_extensions(&self) -> Vec<String> {
        self.lock().enabled_device_extensions.clone()
    }

    pub fn presents(&self) -> Vec<(u64, u32)> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                Event::Presented {
                    swapchain,
                    image_index,
                } => Some((*swapchain, *image_index)),
                _ => None,
            })
            .collect()
    }

    /// Labels begun on `command_buffer`, in order.
    pub fn labels(&self, command_buffer: vk::CommandBuffer) -> Vec<String> {
        let raw = command_buffer.as_raw();
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                Event::BeginLabel {
                    command_buffer,
                    name,
                } if *command_buffer == raw => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// A pipeline object for cache tests; pipelines are built outside the device.
    pub fn create_pipeline(&self) -> vk::Pipeline {
        vk::Pipeline::from_raw(self.lock().create(ObjectKind::Pipeline))
    }
}

impl Backend for FakeBackend {
    type Allocation = FakeAllocation;

    fn instance_extensions(&self) -> GpuResult<Vec<String>> {
        Ok(self.lock().config.instance_extensions.clone())
    }

    fn instance_layers(&self) -> GpuResult<Vec<String>> {
        Ok(self.lock().config.instance_layers.clone())
    }

    fn surface_extensions(&self) -> GpuResult<Vec<String>> {
        Ok(vec![PLATFORM_SURFACE_EXTENSION.to_string()])
    }

    fn create_instance(&mut self, desc: &InstanceDesc<'_>) -> GpuResult<()> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateInstance)?;
        if state.instance.is_some() {
            state.violation("instance created twice".to_string());
        }
        for extension in desc.extensions {
            if !state.config.instance_extensions.contains(extension) {
                return Err(GpuError::Vulkan(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
            }
        }
        for layer in desc.layers {
            if !state.config.instance_layers.contains(layer) {
                return Err(GpuError::Vulkan(vk::Result::ERROR_LAYER_NOT_PRESENT));
            }
        }
        state.enabled_instance_extensions = desc.extensions.to_vec();
        state.enabled_layers = desc.layers.to_vec();
        let id = state.create(ObjectKind::Instance);
        state.instance = Some(id);
        Ok(())
    }

    fn create_debug_messenger(&mut self) -> GpuResult<()> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateDebugMessenger)?;
        let id = state.create(ObjectKind::DebugMessenger);
        state.messenger = Some(id);
        Ok(())
    }

    fn destroy_debug_messenger(&mut self) {
        let mut state = self.lock();
        if let Some(id) = state.messenger.take() {
            state.destroy(ObjectKind::DebugMessenger, id);
        }
    }

    fn destroy_instance(&mut self) {
        let mut state = self.lock();
        let Some(id) = state.instance.take() else {
            state.violation("destroying an instance that was never created".to_string());
            return;
        };
        state.destroy(ObjectKind::Instance, id);
        let leaked: Vec<_> = state
            .live
            .iter()
            .map(|(raw, kind)| format!("{kind:?} {raw:#x}"))
            .collect();
        if !leaked.is_empty() {
            state.violation(format!("instance destroyed with live objects: {leaked:?}"));
        }
        state.selected_adapter = None;
    }

    fn enumerate_adapters(&mut self) -> GpuResult<Vec<AdapterInfo>> {
        let state = self.lock();
        state.fail(FailPoint::EnumerateAdapters)?;
        Ok(state.config.adapters.clone())
    }

    fn select_adapter(&mut self, index: usize) -> GpuResult<()> {
        let mut state = self.lock();
        if index >= state.config.adapters.len() {
            return Err(GpuError::NoPhysicalDevice);
        }
        state.selected_adapter = Some(index);
        Ok(())
    }

    fn device_extensions(&self) -> GpuResult<Vec<String>> {
        Ok(self.lock().config.device_extensions.clone())
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        if self.lock().config.unsupported_formats.contains(&format) {
            return vk::FormatProperties::default();
        }
        vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::empty(),
            optimal_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::STORAGE_IMAGE
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND
                | vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            buffer_features: vk::FormatFeatureFlags::UNIFORM_TEXEL_BUFFER
                | vk::FormatFeatureFlags::VERTEX_BUFFER,
        }
    }

    fn create_device(&mut self, desc: &LogicalDeviceDesc<'_>) -> GpuResult<()> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateDevice)?;
        if state.selected_adapter.is_none() {
            state.violation("device created before an adapter was selected".to_string());
        }
        let mut families = desc.queue_families.to_vec();
        families.sort_unstable();
        families.dedup();
        if families.len() != desc.queue_families.len() {
            state.violation(format!(
                "duplicate queue families requested: {:?}",
                desc.queue_families
            ));
        }
        state.enabled_device_extensions = desc.extensions.to_vec();
        let id = state.create(ObjectKind::Device);
        state.device = Some(id);
        Ok(())
    }

    fn queue(&self, family: u32, _index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x100 + u64::from(family))
    }

    fn create_allocator(&mut self) -> GpuResult<()> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateAllocator)?;
        let id = state.create(ObjectKind::Allocator);
        state.allocator = Some(id);
        Ok(())
    }

    fn destroy_allocator(&mut self) {
        let mut state = self.lock();
        if let Some(id) = state.allocator.take() {
            state.destroy(ObjectKind::Allocator, id);
        }
    }

    fn destroy_device(&mut self) {
        let mut state = self.lock();
        let Some(id) = state.device.take() else {
            state.violation("destroying a device that was never created".to_string());
            return;
        };
        state.destroy(ObjectKind::Device, id);
        let leaked: Vec<_> = state
            .live
            .iter()
            .filter(|(_, kind)| !kind.outlives_device())
            .map(|(raw, kind)| format!("{kind:?} {raw:#x}"))
            .collect();
        if !leaked.is_empty() {
            state.violation(format!("device destroyed with live objects: {leaked:?}"));
        }
    }

    fn device_wait_idle(&self) -> GpuResult<()> {
        let mut state = self.lock();
        if state.lost || state.config.timing == GpuTiming::Hang {
            state.lose_device();
            return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }
        state.complete_all();
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferCreate<'_>) -> GpuResult<(vk::Buffer, FakeAllocation)> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateBuffer)?;
        let id = state.create(ObjectKind::Buffer);
        let host_visible = desc.location != MemoryLocation::GpuOnly;
        #[allow(clippy::cast_possible_truncation)]
        let data = if host_visible {
            vec![0; desc.size as usize]
        } else {
            Vec::new()
        };
        Ok((
            vk::Buffer::from_raw(id),
            FakeAllocation {
                id,
                host_visible,
                data,
            },
        ))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, _allocation: FakeAllocation) {
        self.lock().destroy(ObjectKind::Buffer, buffer.as_raw());
    }

    fn write_allocation(
        &self,
        allocation: &mut FakeAllocation,
        offset: u64,
        data: &[u8],
    ) -> GpuResult<()> {
        if !allocation.host_visible {
            return Err(GpuError::InvalidState("allocation is not host visible".to_string()));
        }
        #[allow(clippy::cast_possible_truncation)]
        let start = offset as usize;
        let target = allocation
            .data
            .get_mut(start..start + data.len())
            .ok_or_else(|| GpuError::InvalidState("write range exceeds allocation".to_string()))?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn create_image(&self, desc: &ImageCreate<'_>) -> GpuResult<(vk::Image, FakeAllocation)> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateImage)?;
        let id = state.create(ObjectKind::Image);
        let image = vk::Image::from_raw(id);
        state.images.push(ImageRecord {
            image,
            format: desc.format,
            view_formats: desc.view_formats.to_vec(),
            flags: desc.flags,
            usage: desc.usage,
            layers: desc.array_layers,
        });
        Ok((
            image,
            FakeAllocation {
                id,
                host_visible: false,
                data: Vec::new(),
            },
        ))
    }

    fn destroy_image(&self, image: vk::Image, _allocation: FakeAllocation) {
        self.lock().destroy(ObjectKind::Image, image.as_raw());
    }

    fn create_image_view(&self, desc: &ImageViewCreate) -> GpuResult<vk::ImageView> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateImageView)?;
        if desc.format == vk::Format::UNDEFINED {
            state.violation("image view created with an undefined format".to_string());
        }
        Ok(vk::ImageView::from_raw(state.create(ObjectKind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.lock().destroy(ObjectKind::ImageView, view.as_raw());
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        self.lock().destroy(ObjectKind::BufferView, view.as_raw());
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> GpuResult<vk::Sampler> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateSampler)?;
        let sampler = vk::Sampler::from_raw(state.create(ObjectKind::Sampler));
        let anisotropy = (info.anisotropy_enable == vk::TRUE).then_some(info.max_anisotropy);
        state.samplers.push((sampler, anisotropy));
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.lock().destroy(ObjectKind::Sampler, sampler.as_raw());
    }

    fn create_shader_module(&self, code: &[u32]) -> GpuResult<vk::ShaderModule> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateShaderModule)?;
        if code.is_empty() {
            return Err(GpuError::Vulkan(vk::Result::ERROR_INVALID_SHADER_NV));
        }
        Ok(vk::ShaderModule::from_raw(state.create(ObjectKind::ShaderModule)))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.lock().destroy(ObjectKind::ShaderModule, module.as_raw());
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.lock().destroy(ObjectKind::Pipeline, pipeline.as_raw());
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.lock().destroy(ObjectKind::Framebuffer, framebuffer.as_raw());
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.lock().destroy(ObjectKind::RenderPass, render_pass.as_raw());
    }

    fn create_fence(&self) -> GpuResult<vk::Fence> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateFence)?;
        let id = state.create(ObjectKind::Fence);
        state.fences.insert(id, FenceState::Unsignaled);
        Ok(vk::Fence::from_raw(id))
    }

    fn reset_fence(&self, fence: vk::Fence) -> GpuResult<()> {
        let mut state = self.lock();
        let raw = fence.as_raw();
        match state.fences.get(&raw).copied() {
            Some(FenceState::Pending(index)) => {
                state.violation(format!("fence {raw:#x} reset while submission {index} is pending"));
            }
            Some(_) => {}
            None => state.violation(format!("reset of unknown fence {raw:#x}")),
        }
        state.fences.insert(raw, FenceState::Unsignaled);
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> GpuResult<bool> {
        Ok(self.lock().fences.get(&fence.as_raw()) == Some(&FenceState::Signaled))
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: Duration) -> GpuResult<FenceWait> {
        let mut state = self.lock();
        if state.lost {
            return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }
        let raw = fence.as_raw();
        match state.fences.get(&raw).copied() {
            Some(FenceState::Signaled) => Ok(FenceWait::Signaled),
            Some(FenceState::Pending(index)) => {
                if state.config.timing == GpuTiming::Hang {
                    return Ok(FenceWait::TimedOut);
                }
                state.complete_through(index);
                Ok(FenceWait::Signaled)
            }
            Some(FenceState::Unsignaled) => {
                state.violation(format!("waiting on fence {raw:#x} that was never submitted"));
                Ok(FenceWait::TimedOut)
            }
            None => Err(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN)),
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.lock();
        state.fences.remove(&fence.as_raw());
        state.destroy(ObjectKind::Fence, fence.as_raw());
    }

    fn create_semaphore(&self) -> GpuResult<vk::Semaphore> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateSemaphore)?;
        Ok(vk::Semaphore::from_raw(state.create(ObjectKind::Semaphore)))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.lock();
        state.signaled_semaphores.remove(&semaphore.as_raw());
        state.destroy(ObjectKind::Semaphore, semaphore.as_raw());
    }

    fn create_command_pool(&self, _queue_family: u32) -> GpuResult<vk::CommandPool> {
        let mut state = self.lock();
        state.fail(FailPoint::CreateCommandPool)?;
        Ok(vk::CommandPool::from_raw(state.create(ObjectKind::CommandPool)))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.lock();
        let raw = pool.as_raw();
        let owned: Vec<u64> = state
            .command_buffers
            .iter()
            .filter(|(_, buffer)| buffer.pool == raw)
            .map(|(&buffer, _)| buffer)
            .collect();
        for buffer in owned {
            state.free_command_buffer(buffer);
        }
        state.destroy(ObjectKind::CommandPool, raw);
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> GpuResult<vk::CommandBuffer> {
        let mut state = self.lock();
        state.require_live(ObjectKind::CommandPool, pool.as_raw(), "allocate");
        let id = state.create(ObjectKind::CommandBuffer);
        state.command_buffers.insert(
            id,
            CommandBufferState {
                pool: pool.as_raw(),
                ..CommandBufferState::default()
            },
        );
        Ok(vk::CommandBuffer::from_raw(id))
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.lock();
        for buffer in buffers {
            state.free_command_buffer(buffer.as_raw());
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GpuResult<()> {
        let mut state = self.lock();
        let raw = command_buffer.as_raw();
        let pending = state.command_buffers.get(&raw).and_then(|buffer| buffer.pending);
        if let Some(index) = pending {
            state.violation(format!(
                "command buffer {raw:#x} reset while submission {index} is pending"
            ));
        }
        match state.command_buffers.get_mut(&raw) {
            Some(buffer) => {
                buffer.recording = false;
                buffer.executable = false;
                buffer.labels = 0;
                buffer.references.clear();
                buffer.queries.clear();
            }
            None => state.violation(format!("reset of unknown command buffer {raw:#x}")),
        }
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GpuResult<()> {
        let mut state = self.lock();
        let raw = command_buffer.as_raw();
        let Some(buffer) = state.command_buffers.get(&raw) else {
            state.violation(format!("begin of unknown command buffer {raw:#x}"));
            return Ok(());
        };
        let problem = if buffer.recording {
            Some("begun twice")
        } else if buffer.pending.is_some() {
            Some("begun while pending")
        } else {
            None
        };
        if let Some(problem) = problem {
            state.violation(format!("command buffer {raw:#x} {problem}"));
        }
        if let Some(buffer) = state.command_buffers.get_mut(&raw) {
            buffer.recording = true;
            buffer.executable = false;
            buffer.labels = 0;
            buffer.references.clear();
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GpuResult<()> {
        let mut state = self.lock();
        state.fail(FailPoint::EndCommandBuffer)?;
        let raw = command_buffer.as_raw();
        let Some(buffer) = state.recording(command_buffer, "end") else {
            return Ok(());
        };
        let open_labels = buffer.labels;
        buffer.recording = false;
        buffer.executable = true;
        if open_labels != 0 {
            state.violation(format!(
                "command buffer {raw:#x} ended with {open_labels} open labels"
            ));
        }
        Ok(())
    }

    fn cmd_pipeline_barrier(&self, command_buffer: vk::CommandBuffer, batch: &BarrierBatch) {
        let mut state = self.lock();
        if let Some(buffer) = state.recording(command_buffer, "barrier") {
            buffer
                .references
                .extend(batch.images.iter().map(|barrier| barrier.image.as_raw()));
            buffer
                .references
                .extend(batch.buffers.iter().map(|barrier| barrier.buffer.as_raw()));
        }
        state.barriers.push((command_buffer, batch.clone()));
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        let mut state = self.lock();
        state.require_live(ObjectKind::Buffer, src.as_raw(), "copy");
        state.require_live(ObjectKind::Buffer, dst.as_raw(), "copy");
        if let Some(buffer) = state.recording(command_buffer, "copy") {
            buffer.references.extend([src.as_raw(), dst.as_raw()]);
        }
        state.buffer_copies.push((src, dst, regions.to_vec()));
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        let mut state = self.lock();
        state.require_live(ObjectKind::Buffer, src.as_raw(), "copy");
        state.require_live(ObjectKind::Image, dst.as_raw(), "copy");
        if layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL && layout != vk::ImageLayout::GENERAL {
            state.violation(format!("image copy destination in {layout:?}"));
        }
        if let Some(buffer) = state.recording(command_buffer, "copy") {
            buffer.references.extend([src.as_raw(), dst.as_raw()]);
        }
        state.image_copies.push((src, dst, layout));
    }

    fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, name: &str) {
        let mut state = self.lock();
        if let Some(buffer) = state.recording(command_buffer, "begin label") {
            buffer.labels += 1;
        }
        state.events.push(Event::BeginLabel {
            command_buffer: command_buffer.as_raw(),
            name: name.to_string(),
        });
    }

    fn cmd_end_label(&self, command_buffer: vk::CommandBuffer) {
        let mut state = self.lock();
        let raw = command_buffer.as_raw();
        let balanced = match state.recording(command_buffer, "end label") {
            Some(buffer) if buffer.labels > 0 => {
                buffer.labels -= 1;
                true
            }
            Some(_) => false,
            None => true,
        };
        if !balanced {
            state.violation(format!("label ended on {raw:#x} with none open"));
        }
        state.events.push(Event::EndLabel {
            command_buffer: raw,
        });
    }

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        batch: &SubmitBatch<'_>,
        fence: vk::Fence,
    ) -> GpuResult<()> {
        let mut state = self.lock();
        if state.lost || state.failures.contains(&FailPoint::DeviceLostOnSubmit) {
            state.lose_device();
            return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }
        state.fail(FailPoint::QueueSubmit)?;
        let index = state.submissions.len();

        if batch.wait_semaphores.len() != batch.wait_stages.len() {
            state.violation("wait semaphores and stages differ in length".to_string());
        }
        let mut references = HashSet::new();
        for command_buffer in batch.command_buffers {
            let raw = command_buffer.as_raw();
            let problem = match state.command_buffers.get(&raw) {
                None => Some("unknown"),
                Some(buffer) if !buffer.executable => Some("not ended"),
                Some(buffer) if buffer.pending.is_some() => Some("already pending"),
                Some(_) => None,
            };
            if let Some(problem) = problem {
                state.violation(format!("submitted command buffer {raw:#x} is {problem}"));
            }
            if let Some(buffer) = state.command_buffers.get_mut(&raw) {
                buffer.pending = Some(index);
                references.extend(buffer.references.iter().copied());
            }
            references.insert(raw);
        }
        for semaphore in batch.wait_semaphores {
            let raw = semaphore.as_raw();
            if !state.signaled_semaphores.remove(&raw) {
                state.violation(format!("submission {index} waits on unsignaled semaphore {raw:#x}"));
            }
            references.insert(raw);
        }
        for semaphore in batch.signal_semaphores {
            let raw = semaphore.as_raw();
            if !state.signaled_semaphores.insert(raw) {
                state.violation(format!(
                    "submission {index} signals semaphore {raw:#x} that is already signaled"
                ));
            }
            references.insert(raw);
        }
        let fence_raw = fence.as_raw();
        if fence_raw != 0 {
            match state.fences.get(&fence_raw).copied() {
                Some(FenceState::Unsignaled) => {}
                other => state.violation(format!(
                    "submission {index} uses fence {fence_raw:#x} in state {other:?}"
                )),
            }
            state.fences.insert(fence_raw, FenceState::Pending(index));
            references.insert(fence_raw);
        }

        state.submissions.push(Submission {
            command_buffers: batch.command_buffers.to_vec(),
            wait_semaphores: batch.wait_semaphores.to_vec(),
            wait_stages: batch.wait_stages.to_vec(),
            signal_semaphores: batch.signal_semaphores.to_vec(),
            fence,
            completed: false,
            references,
        });
        state.events.push(Event::Submitted(index));
        Ok(())
    }

    fn create_query_pool(&self, query_count: u32) -> GpuResult<vk::QueryPool> {
        let mut state = self.lock();
        let id = state.create(ObjectKind::QueryPool);
        state
            .query_pools
            .insert(id, vec![QueryState::Unreset; query_count as usize]);
        Ok(vk::QueryPool::from_raw(id))
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        let mut state = self.lock();
        state.query_pools.remove(&pool.as_raw());
        state.destroy(ObjectKind::QueryPool, pool.as_raw());
    }

    fn cmd_reset_query_pool(
        &self,
        command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) {
        let mut state = self.lock();
        let raw = pool.as_raw();
        state.require_live(ObjectKind::QueryPool, raw, "reset queries");
        if let Some(buffer) = state.recording(command_buffer, "reset queries") {
            buffer.references.insert(raw);
            buffer.queries.push(QueryOp::Reset {
                pool: raw,
                first: first_query,
                count: query_count,
            });
        }
    }

    fn cmd_write_timestamp(&self, command_buffer: vk::CommandBuffer, pool: vk::QueryPool, query: u32) {
        let mut state = self.lock();
        let raw = pool.as_raw();
        state.require_live(ObjectKind::QueryPool, raw, "write timestamp");
        if let Some(buffer) = state.recording(command_buffer, "write timestamp") {
            buffer.references.insert(raw);
            buffer.queries.push(QueryOp::Write { pool: raw, query });
        }
    }

    fn query_timestamps(
        &self,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) -> GpuResult<Vec<Option<u64>>> {
        let mut state = self.lock();
        let raw = pool.as_raw();
        let Some(queries) = state.query_pools.get(&raw) else {
            state.violation(format!("results of unknown query pool {raw:#x}"));
            return Err(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN));
        };
        Ok((first_query..first_query.saturating_add(query_count))
            .map(|query| match queries.get(query as usize) {
                Some(QueryState::Written(ticks)) => Some(*ticks),
                _ => None,
            })
            .collect())
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> GpuResult<vk::DescriptorPool> {
        let mut state = self.lock();
        let capacity = state.config.descriptor_pool_capacity.unwrap_or(max_sets);
        let id = state.create(ObjectKind::DescriptorPool);
        state.descriptor_pools.insert(id, (capacity, 0));
        Ok(vk::DescriptorPool::from_raw(id))
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> GpuResult<()> {
        let mut state = self.lock();
        match state.descriptor_pools.get_mut(&pool.as_raw()) {
            Some((_, used)) => *used = 0,
            None => state.violation(format!("reset of unknown descriptor pool {:#x}", pool.as_raw())),
        }
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.lock();
        state.descriptor_pools.remove(&pool.as_raw());
        state.destroy(ObjectKind::DescriptorPool, pool.as_raw());
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> GpuResult<vk::DescriptorSet> {
        let mut state = self.lock();
        let Some((capacity, used)) = state.descriptor_pools.get_mut(&pool.as_raw()) else {
            return Err(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN));
        };
        if *used >= *capacity {
            return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        *used += 1;
        state.next_id += 1;
        Ok(vk::DescriptorSet::from_raw(0x1000 + state.next_id))
    }

    fn create_surface(&self, provider: &dyn SurfaceProvider) -> GpuResult<vk::SurfaceKHR> {
        provider.raw_display_handle()?;
        provider.raw_window_handle()?;
        let mut state = self.lock();
        state.fail(FailPoint::CreateSurface)?;
        if state.instance.is_none() {
            state.violation("surface created without an instance".to_string());
        }
        Ok(vk::SurfaceKHR::from_raw(state.create(ObjectKind::Surface)))
    }

    fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        self.lock().destroy(ObjectKind::Surface, surface.as_raw());
    }

    fn create_swapchain(&self, desc: &SwapchainCreate) -> GpuResult<SwapchainImages> {
        let mut state = self.lock();
        state
            .fail(FailPoint::CreateSwapchain)
            .map_err(|err| GpuError::SwapchainCreation(err.to_string()))?;
        state.require_live(ObjectKind::Surface, desc.surface.as_raw(), "create swapchain");
        if desc.old_swapchain != vk::SwapchainKHR::null() {
            state.require_live(
                ObjectKind::Swapchain,
                desc.old_swapchain.as_raw(),
                "retire swapchain",
            );
        }

        let id = state.create(ObjectKind::Swapchain);
        let count = state.config.swapchain_images;
        let images: Vec<_> = (0..count)
            .map(|_| {
                state.next_id += 1;
                vk::Image::from_raw(0x1000 + state.next_id)
            })
            .collect();
        state.swapchains.insert(
            id,
            SwapchainState {
                images: images.clone(),
                next: 0,
            },
        );
        Ok(SwapchainImages {
            swapchain: vk::SwapchainKHR::from_raw(id),
            images,
            format: vk::Format::B8G8R8A8_SRGB,
            extent: vk::Extent2D {
                width: desc.extent.width.max(1),
                height: desc.extent.height.max(1),
            },
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.lock();
        state.swapchains.remove(&swapchain.as_raw());
        state.destroy(ObjectKind::Swapchain, swapchain.as_raw());
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> GpuResult<(u32, bool)> {
        let mut state = self.lock();
        state.fail(FailPoint::AcquireOutOfDate).map_err(|_| {
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)
        })?;
        let suboptimal = state.failures.contains(&FailPoint::AcquireSuboptimal);
        let raw = semaphore.as_raw();
        if !state.signaled_semaphores.insert(raw) {
            state.violation(format!("acquire signals semaphore {raw:#x} that is already signaled"));
        }
        let Some(chain) = state.swapchains.get_mut(&swapchain.as_raw()) else {
            return Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR));
        };
        let index = chain.next % chain.images.len().max(1);
        chain.next += 1;
        Ok((u32::try_from(index).unwrap_or_default(), suboptimal))
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> GpuResult<bool> {
        let mut state = self.lock();
        for semaphore in wait_semaphores {
            let raw = semaphore.as_raw();
            if !state.signaled_semaphores.remove(&raw) {
                state.violation(format!("present waits on unsignaled semaphore {raw:#x}"));
            }
        }
        state.require_live(ObjectKind::Swapchain, swapchain.as_raw(), "present");
        if state.failures.contains(&FailPoint::PresentOutOfDate) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
        state.events.push(Event::Presented {
            swapchain: swapchain.as_raw(),
            image_index,
        });
        Ok(state.failures.contains(&FailPoint::PresentSuboptimal))
    }
}
