//! The native API surface the device drives.
//!
//! [`Backend`] is implemented by [`VulkanBackend`](crate::vulkan::VulkanBackend)
//! and by recording fakes in tests. Methods returning handles create native
//! objects owned by the caller; `destroy_*` methods must only see handles
//! produced by the same backend that the GPU no longer references.

use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::barrier::BarrierBatch;
use crate::error::Result;
use crate::surface::SurfaceProvider;

pub const SURFACE_EXTENSION: &str = "VK_KHR_surface";
pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";
pub const DEBUG_UTILS_EXTENSION: &str = "VK_EXT_debug_utils";
pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
pub const VIEWPORT_INDEX_LAYER_EXTENSION: &str = "VK_EXT_shader_viewport_index_layer";
pub const IMAGE_FORMAT_LIST_EXTENSION: &str = "VK_KHR_image_format_list";

/// One memory heap of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeap {
    pub size: u64,
    pub device_local: bool,
}

/// Everything the device needs to know about a physical device.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor_id: u32,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub driver_version: u32,
    pub limits: vk::PhysicalDeviceLimits,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_heaps: Vec<MemoryHeap>,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

#[derive(Debug, Clone)]
pub struct InstanceDesc<'a> {
    pub app_name: &'a str,
    pub api_version: u32,
    pub extensions: &'a [String],
    pub layers: &'a [String],
}

#[derive(Debug, Clone)]
pub struct LogicalDeviceDesc<'a> {
    /// Unique queue family indices; one queue is created per family.
    pub queue_families: &'a [u32],
    pub extensions: &'a [String],
    pub features: vk::PhysicalDeviceFeatures,
}

#[derive(Debug, Clone)]
pub struct BufferCreate<'a> {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    pub name: &'a str,
}

#[derive(Debug, Clone)]
pub struct ImageCreate<'a> {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    /// Extra formats views may use; non-empty implies a mutable-format image.
    pub view_formats: &'a [vk::Format],
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
    pub name: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageViewCreate {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub range: vk::ImageSubresourceRange,
}

#[derive(Debug, Clone, Copy)]
pub struct SubmitBatch<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainCreate {
    pub surface: vk::SurfaceKHR,
    pub extent: vk::Extent2D,
    pub vsync: bool,
    pub old_swapchain: vk::SwapchainKHR,
    pub queue_family: u32,
}

#[derive(Debug, Clone)]
pub struct SwapchainImages {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Outcome of one bounded fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
}

/// Native GPU API used by the device.
pub trait Backend {
    /// Memory sub-allocation token returned with buffers and images.
    type Allocation: 'static;

    // Instance

    fn instance_extensions(&self) -> Result<Vec<String>>;
    fn instance_layers(&self) -> Result<Vec<String>>;
    /// Platform surface extensions that must be present besides `VK_KHR_surface`.
    fn surface_extensions(&self) -> Result<Vec<String>>;
    fn create_instance(&mut self, desc: &InstanceDesc<'_>) -> Result<()>;
    fn create_debug_messenger(&mut self) -> Result<()>;
    fn destroy_debug_messenger(&mut self);
    fn destroy_instance(&mut self);

    // Adapter

    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterInfo>>;
    fn select_adapter(&mut self, index: usize) -> Result<()>;
    fn device_extensions(&self) -> Result<Vec<String>>;
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    // Logical device

    fn create_device(&mut self, desc: &LogicalDeviceDesc<'_>) -> Result<()>;
    fn queue(&self, family: u32, index: u32) -> vk::Queue;
    fn create_allocator(&mut self) -> Result<()>;
    fn destroy_allocator(&mut self);
    fn destroy_device(&mut self);
    fn device_wait_idle(&self) -> Result<()>;

    // Memory-backed objects

    fn create_buffer(&self, desc: &BufferCreate<'_>) -> Result<(vk::Buffer, Self::Allocation)>;
    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Self::Allocation);
    /// Copy `data` into a host-visible allocation at `offset`.
    fn write_allocation(
        &self,
        allocation: &mut Self::Allocation,
        offset: u64,
        data: &[u8],
    ) -> Result<()>;
    fn create_image(&self, desc: &ImageCreate<'_>) -> Result<(vk::Image, Self::Allocation)>;
    fn destroy_image(&self, image: vk::Image, allocation: Self::Allocation);
    fn create_image_view(&self, desc: &ImageViewCreate) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_buffer_view(&self, view: vk::BufferView);
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);
    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    // Synchronization

    fn create_fence(&self) -> Result<vk::Fence>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<FenceWait>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Commands

    fn create_command_pool(&self, queue_family: u32) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn cmd_pipeline_barrier(&self, command_buffer: vk::CommandBuffer, batch: &BarrierBatch);
    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, name: &str);
    fn cmd_end_label(&self, command_buffer: vk::CommandBuffer);
    fn queue_submit(&self, queue: vk::Queue, batch: &SubmitBatch<'_>, fence: vk::Fence)
        -> Result<()>;

    // Queries

    /// Create a pool of `query_count` timestamp queries.
    fn create_query_pool(&self, query_count: u32) -> Result<vk::QueryPool>;
    fn destroy_query_pool(&self, pool: vk::QueryPool);
    fn cmd_reset_query_pool(
        &self,
        command_buffer: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    );
    /// Write a timestamp once all previously recorded commands completed.
    fn cmd_write_timestamp(&self, command_buffer: vk::CommandBuffer, pool: vk::QueryPool, query: u32);
    /// Raw timestamps of `query_count` queries without waiting; `None` for
    /// queries whose result is not available yet.
    fn query_timestamps(
        &self,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) -> Result<Vec<Option<u64>>>;

    // Descriptors

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool>;
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> Result<()>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet>;

    // Presentation

    fn create_surface(&self, provider: &dyn SurfaceProvider) -> Result<vk::SurfaceKHR>;
    fn destroy_surface(&self, surface: vk::SurfaceKHR);
    fn create_swapchain(&self, desc: &SwapchainCreate) -> Result<SwapchainImages>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Returns the image index and whether the swap chain is suboptimal.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool)>;
    /// Returns whether the swap chain should be recreated.
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool>;
}
