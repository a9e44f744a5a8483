//! Vulkan graphics abstraction layer.
//!
//! This crate provides:
//! - Device bring-up and teardown through explicit states
//! - A per-frame ring that defers destruction until the GPU is done
//! - Pools for fences, semaphores, command buffers, descriptors and staging memory
//! - Automatic pipeline barriers from tracked image layouts
//! - GPU timestamps read back once their frame retired
//! - A lookup table from abstract resource formats to native ones
//!
//! Everything native goes through the [`Backend`] trait; [`VulkanBackend`]
//! drives a real driver.

pub mod backend;
pub mod barrier;
pub mod cache;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod deferred;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod format;
pub mod frame;
pub mod handle;
mod init_context;
mod instance;
pub mod lease;
pub mod memory;
mod pass;
pub mod query;
pub mod requests;
pub mod resources;
pub mod staging;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use backend::{AdapterInfo, Backend, FenceWait, MemoryHeap};
pub use barrier::{BarrierBatch, PipelineBarrier};
pub use cache::{PipelineKey, ResourceId};
pub use capabilities::{GpuCapabilities, GpuVendor, ShaderStage};
pub use config::{DeviceConfig, MAX_FRAMES_IN_FLIGHT};
pub use device::{select_queue_families, Device, DeviceState, PoolStats, QueueInfo};
pub use error::{GpuError, InitStage, Result};
pub use format::{FormatLookupTable, FormatSupport, ResourceFormat};
pub use gpu_allocator::MemoryLocation;
pub use query::Timestamp;
pub use requests::{DeviceRequest, DeviceRequests};
pub use resources::{
    BlendStateDesc, BlendStateHandle, BufferDesc, BufferHandle, BufferUsage,
    DepthStencilStateDesc, DepthStencilStateHandle, RasterizerStateDesc, RasterizerStateHandle,
    SamplerStateDesc, SamplerStateHandle, ShaderDesc, ShaderHandle, StencilFaceDesc,
    SwapChainDesc, SwapChainHandle, TargetBlendDesc, TextureData, TextureDesc, TextureHandle,
    TextureKind, TextureUsage,
};
pub use surface::SurfaceProvider;
pub use vulkan::VulkanBackend;
