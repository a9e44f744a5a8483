//! GPU capability detection.

use ash::vk;
use hashbrown::HashMap;

use crate::backend::AdapterInfo;
use crate::format::{FormatLookupTable, FormatSupport, ResourceFormat};

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Programmable stages, named after their role in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
}

impl ShaderStage {
    pub const ALL: [Self; 6] = [
        Self::Vertex,
        Self::Hull,
        Self::Domain,
        Self::Geometry,
        Self::Pixel,
        Self::Compute,
    ];

    pub fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Hull => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            Self::Domain => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
            Self::Pixel => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    pub fn pipeline_stage(self) -> vk::PipelineStageFlags {
        match self {
            Self::Vertex => vk::PipelineStageFlags::VERTEX_SHADER,
            Self::Hull => vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER,
            Self::Domain => vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER,
            Self::Geometry => vk::PipelineStageFlags::GEOMETRY_SHADER,
            Self::Pixel => vk::PipelineStageFlags::FRAGMENT_SHADER,
            Self::Compute => vk::PipelineStageFlags::COMPUTE_SHADER,
        }
    }
}

/// Capabilities of the selected device, filled once during initialization.
#[derive(Debug, Clone, Default)]
pub struct GpuCapabilities {
    pub vendor: Option<GpuVendor>,
    pub adapter_name: String,
    pub api_version: u32,
    pub driver_version: u32,

    // Memory in bytes
    pub dedicated_video_memory: u64,
    pub shared_system_memory: u64,
    /// Discrete GPU.
    pub hardware_accelerated: bool,

    pub multithreaded_resource_creation: bool,
    pub supported_stages: Vec<ShaderStage>,
    /// Pipeline stages any shader stage may touch, used for barrier scopes.
    pub shader_pipeline_stages: vk::PipelineStageFlags,

    pub max_texture_1d_dimension: u32,
    pub max_texture_2d_dimension: u32,
    pub max_cubemap_dimension: u32,
    pub max_texture_3d_dimension: u32,
    pub max_array_layers: u32,
    pub max_anisotropy: f32,
    pub max_render_targets: u32,
    pub max_constant_buffers: u32,
    /// Storage buffers and storage images usable at once.
    pub uav_count: u32,
    pub vertex_shader_render_target_array_index: bool,

    pub format_support: HashMap<ResourceFormat, FormatSupport>,
}

impl GpuCapabilities {
    /// Derive capabilities from the adapter, the enabled device extensions and
    /// the filled format table.
    pub fn from_adapter(
        adapter: &AdapterInfo,
        viewport_index_layer: bool,
        formats: &FormatLookupTable,
    ) -> Self {
        let limits = &adapter.limits;
        let features = &adapter.features;

        let mut supported_stages = vec![ShaderStage::Vertex, ShaderStage::Pixel, ShaderStage::Compute];
        if features.tessellation_shader == vk::TRUE {
            supported_stages.extend([ShaderStage::Hull, ShaderStage::Domain]);
        }
        if features.geometry_shader == vk::TRUE {
            supported_stages.push(ShaderStage::Geometry);
        }
        let shader_pipeline_stages = supported_stages
            .iter()
            .fold(vk::PipelineStageFlags::empty(), |acc, stage| {
                acc | stage.pipeline_stage()
            });

        let dedicated_video_memory = adapter
            .memory_heaps
            .iter()
            .filter(|heap| heap.device_local)
            .map(|heap| heap.size)
            .sum();
        let shared_system_memory = adapter
            .memory_heaps
            .iter()
            .filter(|heap| !heap.device_local)
            .map(|heap| heap.size)
            .sum();

        Self {
            vendor: Some(GpuVendor::from_vendor_id(adapter.vendor_id)),
            adapter_name: adapter.name.clone(),
            api_version: adapter.api_version,
            driver_version: adapter.driver_version,
            dedicated_video_memory,
            shared_system_memory,
            hardware_accelerated: adapter.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
            multithreaded_resource_creation: true,
            supported_stages,
            shader_pipeline_stages,
            max_texture_1d_dimension: limits.max_image_dimension1_d,
            max_texture_2d_dimension: limits.max_image_dimension2_d,
            max_cubemap_dimension: limits.max_image_dimension_cube,
            max_texture_3d_dimension: limits.max_image_dimension3_d,
            max_array_layers: limits.max_image_array_layers,
            max_anisotropy: limits.max_sampler_anisotropy,
            max_render_targets: limits.max_color_attachments,
            max_constant_buffers: limits.max_per_stage_descriptor_uniform_buffers,
            uav_count: limits
                .max_per_stage_descriptor_storage_buffers
                .min(limits.max_per_stage_descriptor_storage_images),
            vertex_shader_render_target_array_index: viewport_index_layer,
            format_support: formats
                .iter()
                .map(|(format, entry)| (format, entry.support))
                .collect(),
        }
    }

    pub fn supports_stage(&self, stage: ShaderStage) -> bool {
        self.supported_stages.contains(&stage)
    }

    pub fn format_support(&self, format: ResourceFormat) -> FormatSupport {
        self.format_support.get(&format).copied().unwrap_or_default()
    }

    /// One-line description for logs.
    pub fn summary(&self) -> String {
        let api = format!(
            "{}.{}.{}",
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version)
        );
        format!(
            "{} ({:?}, Vulkan {}, {} MB VRAM, {})",
            self.adapter_name,
            self.vendor.unwrap_or(GpuVendor::Other(0)),
            api,
            self.dedicated_video_memory / (1024 * 1024),
            if self.hardware_accelerated {
                "discrete"
            } else {
                "integrated/other"
            }
        )
    }
}
