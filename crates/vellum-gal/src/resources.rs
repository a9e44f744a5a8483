//! Resource descriptions, handles and the device-side objects behind them.

use std::sync::Arc;

use ash::vk;
use bitflags::bitflags;

use crate::capabilities::ShaderStage;
use crate::error::{GpuError, Result};
use crate::format::ResourceFormat;
use crate::handle::define_handle;
use crate::surface::SurfaceProvider;
use crate::sync::SemaphoreLease;

define_handle!(
    /// A texture created by [`Device::create_texture`](crate::Device::create_texture).
    TextureHandle
);
define_handle!(
    /// A buffer created by [`Device::create_buffer`](crate::Device::create_buffer).
    BufferHandle
);
define_handle!(ShaderHandle);
define_handle!(BlendStateHandle);
define_handle!(DepthStencilStateHandle);
define_handle!(RasterizerStateHandle);
define_handle!(SamplerStateHandle);
define_handle!(SwapChainHandle);

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

// ---------------------------------------------------------------------------
// Textures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureKind {
    #[default]
    Texture2D,
    Texture3D,
    /// `array_layers` counts cubes; the image has six layers per cube.
    Cube,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const STORAGE = 1 << 2;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::SAMPLED
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub kind: TextureKind,
    pub format: ResourceFormat,
    pub usage: TextureUsage,
    pub samples: u32,
    pub debug_name: String,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            kind: TextureKind::Texture2D,
            format: ResourceFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED,
            samples: 1,
            debug_name: String::new(),
        }
    }
}

impl TextureDesc {
    pub fn texture_2d(width: u32, height: u32, format: ResourceFormat) -> Self {
        Self {
            width,
            height,
            format,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = name.into();
        self
    }

    /// Native array layer count.
    pub fn layer_count(&self) -> u32 {
        match self.kind {
            TextureKind::Cube => self.array_layers.saturating_mul(6),
            _ => self.array_layers,
        }
    }

    pub fn image_type(&self) -> vk::ImageType {
        match self.kind {
            TextureKind::Texture3D => vk::ImageType::TYPE_3D,
            _ => vk::ImageType::TYPE_2D,
        }
    }

    pub fn view_type(&self) -> vk::ImageViewType {
        match (self.kind, self.array_layers) {
            (TextureKind::Texture3D, _) => vk::ImageViewType::TYPE_3D,
            (TextureKind::Cube, 1) => vk::ImageViewType::CUBE,
            (TextureKind::Cube, _) => vk::ImageViewType::CUBE_ARRAY,
            (TextureKind::Texture2D, 1) => vk::ImageViewType::TYPE_2D,
            (TextureKind::Texture2D, _) => vk::ImageViewType::TYPE_2D_ARRAY,
        }
    }

    pub fn sample_count(&self) -> vk::SampleCountFlags {
        match self.samples {
            2 => vk::SampleCountFlags::TYPE_2,
            4 => vk::SampleCountFlags::TYPE_4,
            8 => vk::SampleCountFlags::TYPE_8,
            16 => vk::SampleCountFlags::TYPE_16,
            _ => vk::SampleCountFlags::TYPE_1,
        }
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.format.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }

    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.layer_count(),
        }
    }

    /// Extent of one mip level, never smaller than one texel.
    pub fn mip_extent(&self, mip_level: u32) -> vk::Extent3D {
        let shrink = |size: u32| size.checked_shr(mip_level).unwrap_or(0).max(1);
        vk::Extent3D {
            width: shrink(self.width),
            height: shrink(self.height),
            depth: shrink(self.depth),
        }
    }

    /// Tightly packed byte size of one layer of one mip level.
    pub fn mip_size(&self, mip_level: u32) -> u64 {
        let extent = self.mip_extent(mip_level);
        let block = self.format.block_extent();
        let blocks = |texels: u32| u64::from(texels.div_ceil(block));
        blocks(extent.width)
            * blocks(extent.height)
            * u64::from(extent.depth)
            * u64::from(self.format.block_size())
    }

    pub fn image_usage(&self) -> vk::ImageUsageFlags {
        let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        if self.usage.contains(TextureUsage::SAMPLED) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.usage.contains(TextureUsage::STORAGE) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if self.usage.contains(TextureUsage::RENDER_TARGET) {
            usage |= if self.format.is_depth() {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
            };
        }
        usage
    }

    pub(crate) fn validate(&self, max_dimension: u32) -> Result<()> {
        let invalid = |reason: String| Err(GpuError::InvalidDescription(reason));
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return invalid(format!("texture '{}' has a zero extent", self.debug_name));
        }
        if self.mip_levels == 0 || self.array_layers == 0 {
            return invalid(format!(
                "texture '{}' needs at least one mip level and layer",
                self.debug_name
            ));
        }
        if self.kind != TextureKind::Texture3D && self.depth != 1 {
            return invalid(format!("texture '{}' is not 3D but has depth", self.debug_name));
        }
        if self.kind == TextureKind::Cube && self.width != self.height {
            return invalid(format!("cube texture '{}' is not square", self.debug_name));
        }
        if max_dimension > 0 && self.width.max(self.height).max(self.depth) > max_dimension {
            return invalid(format!(
                "texture '{}' exceeds the device limit of {max_dimension}",
                self.debug_name
            ));
        }
        let max_mips = 32 - self.width.max(self.height).max(self.depth).leading_zeros();
        if self.mip_levels > max_mips {
            return invalid(format!(
                "texture '{}' requests {} mip levels, at most {max_mips} fit",
                self.debug_name, self.mip_levels
            ));
        }
        if self.format.is_compressed() && self.usage.contains(TextureUsage::RENDER_TARGET) {
            return invalid(format!(
                "compressed texture '{}' cannot be a render target",
                self.debug_name
            ));
        }
        Ok(())
    }

    /// Layout the texture rests in between uses, with the scope that reads it.
    pub fn preferred_state(
        &self,
        shader_stages: vk::PipelineStageFlags,
    ) -> (vk::ImageLayout, vk::PipelineStageFlags, vk::AccessFlags) {
        if self.usage.contains(TextureUsage::STORAGE) {
            (
                vk::ImageLayout::GENERAL,
                shader_stages,
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            )
        } else if self.usage.contains(TextureUsage::SAMPLED) {
            (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                shader_stages,
                vk::AccessFlags::SHADER_READ,
            )
        } else if self.format.is_depth() {
            (
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
        } else {
            (
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            )
        }
    }
}

/// Initial contents of one mip level of one array layer, tightly packed.
#[derive(Debug, Clone, Copy)]
pub struct TextureData<'a> {
    pub mip_level: u32,
    pub array_layer: u32,
    pub data: &'a [u8],
}

pub struct Texture<A> {
    pub desc: TextureDesc,
    pub image: vk::Image,
    pub allocation: A,
    pub format: vk::Format,
    /// View covering every mip and layer in the native format.
    pub view: vk::ImageView,
    /// Reinterpreting views created later, destroyed with the texture.
    pub extra_views: Vec<(vk::Format, vk::ImageView)>,
}

// ---------------------------------------------------------------------------
// Buffers
// ---------------------------------------------------------------------------

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const STORAGE = 1 << 3;
        const TEXEL = 1 << 4;
        const INDIRECT = 1 << 5;
    }
}

impl BufferUsage {
    pub fn vk_usage(self) -> vk::BufferUsageFlags {
        let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        let table = [
            (Self::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
            (Self::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
            (Self::CONSTANT, vk::BufferUsageFlags::UNIFORM_BUFFER),
            (Self::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
            (Self::TEXEL, vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER),
            (Self::INDIRECT, vk::BufferUsageFlags::INDIRECT_BUFFER),
        ];
        for (flag, vk_flag) in table {
            if self.contains(flag) {
                usage |= vk_flag;
            }
        }
        usage
    }

    /// Stages and accesses that consume a buffer with this usage.
    pub fn access_scope(
        self,
        shader_stages: vk::PipelineStageFlags,
    ) -> (vk::PipelineStageFlags, vk::AccessFlags) {
        let mut stages = vk::PipelineStageFlags::empty();
        let mut access = vk::AccessFlags::empty();
        if self.contains(Self::VERTEX) {
            stages |= vk::PipelineStageFlags::VERTEX_INPUT;
            access |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
        }
        if self.contains(Self::INDEX) {
            stages |= vk::PipelineStageFlags::VERTEX_INPUT;
            access |= vk::AccessFlags::INDEX_READ;
        }
        if self.contains(Self::CONSTANT) {
            stages |= shader_stages;
            access |= vk::AccessFlags::UNIFORM_READ;
        }
        if self.intersects(Self::STORAGE | Self::TEXEL) {
            stages |= shader_stages;
            access |= vk::AccessFlags::SHADER_READ;
        }
        if self.contains(Self::STORAGE) {
            access |= vk::AccessFlags::SHADER_WRITE;
        }
        if self.contains(Self::INDIRECT) {
            stages |= vk::PipelineStageFlags::DRAW_INDIRECT;
            access |= vk::AccessFlags::INDIRECT_COMMAND_READ;
        }
        if stages.is_empty() {
            stages = vk::PipelineStageFlags::TRANSFER;
            access = vk::AccessFlags::TRANSFER_READ;
        }
        (stages, access)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    /// Keep the buffer in host-visible memory.
    pub cpu_visible: bool,
    pub debug_name: String,
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            size,
            usage,
            cpu_visible: false,
            debug_name: String::new(),
        }
    }

    pub fn cpu_visible(mut self) -> Self {
        self.cpu_visible = true;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = name.into();
        self
    }
}

pub struct Buffer<A> {
    pub desc: BufferDesc,
    pub buffer: vk::Buffer,
    pub allocation: A,
}

// ---------------------------------------------------------------------------
// Shaders
// ---------------------------------------------------------------------------

/// Compiled SPIR-V per stage. Compilation happens elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderDesc {
    pub stages: Vec<(ShaderStage, Vec<u32>)>,
    pub debug_name: String,
}

impl ShaderDesc {
    pub fn with_stage(mut self, stage: ShaderStage, code: Vec<u32>) -> Self {
        self.stages.push((stage, code));
        self
    }

    /// Add a stage from a `.spv` file's bytes. SPIR-V is little-endian words,
    /// so the length must be a multiple of four.
    pub fn with_stage_bytes(self, stage: ShaderStage, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(GpuError::InvalidShader(format!(
                "{stage:?} code is {} bytes, not whole words",
                bytes.len()
            )));
        }
        let code: Vec<u32> = bytemuck::pod_collect_to_vec(bytes);
        Ok(self.with_stage(stage, code))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(GpuError::InvalidShader(format!(
                "shader '{}' has no stages",
                self.debug_name
            )));
        }
        for (index, (stage, code)) in self.stages.iter().enumerate() {
            if code.first() != Some(&SPIRV_MAGIC) {
                return Err(GpuError::InvalidShader(format!(
                    "{stage:?} code of '{}' is not SPIR-V",
                    self.debug_name
                )));
            }
            if self.stages[..index].iter().any(|(other, _)| other == stage) {
                return Err(GpuError::InvalidShader(format!(
                    "shader '{}' declares {stage:?} twice",
                    self.debug_name
                )));
            }
        }
        Ok(())
    }
}

pub struct Shader {
    pub name: String,
    pub modules: Vec<(ShaderStage, vk::ShaderModule)>,
}

impl Shader {
    pub fn module(&self, stage: ShaderStage) -> Option<vk::ShaderModule> {
        self.modules
            .iter()
            .find(|(candidate, _)| *candidate == stage)
            .map(|&(_, module)| module)
    }
}

// ---------------------------------------------------------------------------
// Fixed-function state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetBlendDesc {
    pub enabled: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub write_mask: vk::ColorComponentFlags,
}

impl Default for TargetBlendDesc {
    fn default() -> Self {
        Self {
            enabled: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl TargetBlendDesc {
    pub fn alpha_blended() -> Self {
        Self {
            enabled: true,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            ..Self::default()
        }
    }

    fn attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::Bool32::from(self.enabled),
            src_color_blend_factor: self.src_color,
            dst_color_blend_factor: self.dst_color,
            color_blend_op: self.color_op,
            src_alpha_blend_factor: self.src_alpha,
            dst_alpha_blend_factor: self.dst_alpha,
            alpha_blend_op: self.alpha_op,
            color_write_mask: self.write_mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlendStateDesc {
    pub alpha_to_coverage: bool,
    /// When false, `targets[0]` applies to every render target.
    pub independent_blend: bool,
    pub targets: Vec<TargetBlendDesc>,
}

impl Default for BlendStateDesc {
    fn default() -> Self {
        Self {
            alpha_to_coverage: false,
            independent_blend: false,
            targets: vec![TargetBlendDesc::default()],
        }
    }
}

pub struct BlendState {
    pub desc: BlendStateDesc,
    pub attachments: Vec<vk::PipelineColorBlendAttachmentState>,
}

impl BlendState {
    pub(crate) fn new(desc: BlendStateDesc, max_render_targets: u32) -> Result<Self> {
        if desc.targets.is_empty() {
            return Err(GpuError::InvalidDescription(
                "blend state without render targets".to_string(),
            ));
        }
        let count = desc.targets.len();
        if max_render_targets > 0 && count > max_render_targets as usize {
            return Err(GpuError::InvalidDescription(format!(
                "blend state describes {count} targets, the device supports {max_render_targets}"
            )));
        }
        let attachments = if desc.independent_blend {
            desc.targets.iter().map(TargetBlendDesc::attachment).collect()
        } else {
            vec![desc.targets[0].attachment(); count]
        };
        Ok(Self { desc, attachments })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilFaceDesc {
    pub fail: vk::StencilOp,
    pub depth_fail: vk::StencilOp,
    pub pass: vk::StencilOp,
    pub compare: vk::CompareOp,
}

impl Default for StencilFaceDesc {
    fn default() -> Self {
        Self {
            fail: vk::StencilOp::KEEP,
            depth_fail: vk::StencilOp::KEEP,
            pass: vk::StencilOp::KEEP,
            compare: vk::CompareOp::ALWAYS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilStateDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub stencil_test: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front: StencilFaceDesc,
    pub back: StencilFaceDesc,
}

impl Default for DepthStencilStateDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            stencil_test: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
            front: StencilFaceDesc::default(),
            back: StencilFaceDesc::default(),
        }
    }
}

pub struct DepthStencilState {
    pub desc: DepthStencilStateDesc,
    pub front: vk::StencilOpState,
    pub back: vk::StencilOpState,
}

impl DepthStencilState {
    pub(crate) fn new(desc: DepthStencilStateDesc) -> Self {
        let face = |face: &StencilFaceDesc| vk::StencilOpState {
            fail_op: face.fail,
            pass_op: face.pass,
            depth_fail_op: face.depth_fail,
            compare_op: face.compare,
            compare_mask: u32::from(desc.stencil_read_mask),
            write_mask: u32::from(desc.stencil_write_mask),
            reference: 0,
        };
        Self {
            front: face(&desc.front),
            back: face(&desc.back),
            desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerStateDesc {
    pub cull_mode: vk::CullModeFlags,
    pub wireframe: bool,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub scissor_test: bool,
    pub conservative_rasterization: bool,
}

impl Default for RasterizerStateDesc {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::BACK,
            wireframe: false,
            front_counter_clockwise: false,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            scissor_test: false,
            conservative_rasterization: false,
        }
    }
}

pub struct RasterizerState {
    pub desc: RasterizerStateDesc,
    pub polygon_mode: vk::PolygonMode,
    pub front_face: vk::FrontFace,
}

impl RasterizerState {
    pub(crate) fn new(desc: RasterizerStateDesc, fill_mode_non_solid: bool) -> Result<Self> {
        if desc.conservative_rasterization {
            return Err(GpuError::InvalidDescription(
                "conservative rasterization is not supported".to_string(),
            ));
        }
        if desc.wireframe && !fill_mode_non_solid {
            return Err(GpuError::InvalidDescription(
                "wireframe rasterization needs the fillModeNonSolid feature".to_string(),
            ));
        }
        Ok(Self {
            polygon_mode: if desc.wireframe {
                vk::PolygonMode::LINE
            } else {
                vk::PolygonMode::FILL
            },
            front_face: if desc.front_counter_clockwise {
                vk::FrontFace::COUNTER_CLOCKWISE
            } else {
                vk::FrontFace::CLOCKWISE
            },
            desc,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerStateDesc {
    pub min_filter: vk::Filter,
    pub mag_filter: vk::Filter,
    pub mip_filter: vk::SamplerMipmapMode,
    pub address_u: vk::SamplerAddressMode,
    pub address_v: vk::SamplerAddressMode,
    pub address_w: vk::SamplerAddressMode,
    pub mip_lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub max_anisotropy: f32,
    pub compare: Option<vk::CompareOp>,
    pub border_color: vk::BorderColor,
}

impl Default for SamplerStateDesc {
    fn default() -> Self {
        Self {
            min_filter: vk::Filter::LINEAR,
            mag_filter: vk::Filter::LINEAR,
            mip_filter: vk::SamplerMipmapMode::LINEAR,
            address_u: vk::SamplerAddressMode::REPEAT,
            address_v: vk::SamplerAddressMode::REPEAT,
            address_w: vk::SamplerAddressMode::REPEAT,
            mip_lod_bias: 0.0,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
            max_anisotropy: 1.0,
            compare: None,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        }
    }
}

impl SamplerStateDesc {
    /// Native create info with anisotropy clamped to `device_max`.
    pub fn create_info(&self, device_max: f32) -> vk::SamplerCreateInfo<'static> {
        let anisotropy = self.max_anisotropy.min(device_max).max(1.0);
        vk::SamplerCreateInfo::default()
            .min_filter(self.min_filter)
            .mag_filter(self.mag_filter)
            .mipmap_mode(self.mip_filter)
            .address_mode_u(self.address_u)
            .address_mode_v(self.address_v)
            .address_mode_w(self.address_w)
            .mip_lod_bias(self.mip_lod_bias)
            .min_lod(self.min_lod)
            .max_lod(self.max_lod)
            .anisotropy_enable(anisotropy > 1.0)
            .max_anisotropy(anisotropy)
            .compare_enable(self.compare.is_some())
            .compare_op(self.compare.unwrap_or(vk::CompareOp::NEVER))
            .border_color(self.border_color)
    }
}

pub struct SamplerState {
    pub desc: SamplerStateDesc,
    pub sampler: vk::Sampler,
}

// ---------------------------------------------------------------------------
// Swap chains
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub vsync: bool,
}

impl Default for SwapChainDesc {
    fn default() -> Self {
        Self { vsync: true }
    }
}

pub struct SwapChain {
    pub desc: SwapChainDesc,
    pub window: Arc<dyn SurfaceProvider>,
    pub surface: vk::SurfaceKHR,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Image acquired by `begin_pipeline`, with the semaphore its acquire signals.
    pub acquired: Option<(u32, SemaphoreLease)>,
    pub needs_recreate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_sizes_account_for_blocks() {
        let desc = TextureDesc::texture_2d(64, 32, ResourceFormat::Rgba8Unorm).with_mip_levels(7);
        assert_eq!(desc.mip_size(0), 64 * 32 * 4);
        assert_eq!(desc.mip_extent(6).width, 1);
        assert_eq!(desc.mip_size(6), 4);

        let bc = TextureDesc::texture_2d(6, 6, ResourceFormat::Bc1);
        assert_eq!(bc.mip_size(0), 2 * 2 * 8);
    }

    #[test]
    fn shader_bytes_must_be_whole_words() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 4]);
        let desc = ShaderDesc::default()
            .with_stage_bytes(ShaderStage::Compute, &bytes)
            .unwrap();
        assert_eq!(desc.stages[0].1, vec![SPIRV_MAGIC, 0]);
        assert!(desc.validate().is_ok());

        assert!(ShaderDesc::default()
            .with_stage_bytes(ShaderStage::Compute, &bytes[..6])
            .is_err());
    }

    #[test]
    fn texture_validation() {
        let max = 16384;
        assert!(TextureDesc::texture_2d(4, 4, ResourceFormat::Rgba8Unorm)
            .validate(max)
            .is_ok());
        assert!(TextureDesc::texture_2d(0, 4, ResourceFormat::Rgba8Unorm)
            .validate(max)
            .is_err());
        assert!(TextureDesc::texture_2d(4, 4, ResourceFormat::Rgba8Unorm)
            .with_mip_levels(4)
            .validate(max)
            .is_err());
        assert!(TextureDesc::texture_2d(4, 4, ResourceFormat::Bc3)
            .with_usage(TextureUsage::RENDER_TARGET)
            .validate(max)
            .is_err());
        assert!(TextureDesc::texture_2d(32768, 4, ResourceFormat::R8Unorm)
            .validate(max)
            .is_err());
    }

    #[test]
    fn preferred_layouts() {
        let stages = vk::PipelineStageFlags::FRAGMENT_SHADER;
        let sampled = TextureDesc::texture_2d(4, 4, ResourceFormat::Rgba8Unorm);
        assert_eq!(
            sampled.preferred_state(stages).0,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );

        let depth = TextureDesc::texture_2d(4, 4, ResourceFormat::DFloat)
            .with_usage(TextureUsage::RENDER_TARGET);
        assert_eq!(
            depth.preferred_state(stages).0,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            depth.image_usage() & vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        );

        let storage = sampled.clone().with_usage(TextureUsage::STORAGE | TextureUsage::SAMPLED);
        assert_eq!(storage.preferred_state(stages).0, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn shader_validation() {
        let good = ShaderDesc::default().with_stage(ShaderStage::Vertex, vec![SPIRV_MAGIC, 0]);
        assert!(good.validate().is_ok());

        let not_spirv = ShaderDesc::default().with_stage(ShaderStage::Pixel, vec![0xdead_beef]);
        assert!(matches!(not_spirv.validate(), Err(GpuError::InvalidShader(_))));

        let twice = good.clone().with_stage(ShaderStage::Vertex, vec![SPIRV_MAGIC]);
        assert!(twice.validate().is_err());
        assert!(ShaderDesc::default().validate().is_err());
    }

    #[test]
    fn shared_blend_applies_to_every_target() {
        let desc = BlendStateDesc {
            targets: vec![TargetBlendDesc::alpha_blended(), TargetBlendDesc::default()],
            ..BlendStateDesc::default()
        };
        let state = BlendState::new(desc, 8).unwrap();
        assert_eq!(state.attachments.len(), 2);
        assert_eq!(state.attachments[1].blend_enable, vk::TRUE);
    }

    #[test]
    fn sampler_anisotropy_is_clamped() {
        let desc = SamplerStateDesc {
            max_anisotropy: 64.0,
            ..SamplerStateDesc::default()
        };
        let info = desc.create_info(16.0);
        assert_eq!(info.max_anisotropy, 16.0);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(SamplerStateDesc::default().create_info(16.0).anisotropy_enable, vk::FALSE);
    }

    #[test]
    fn buffer_scope_covers_usage() {
        let (stages, access) =
            (BufferUsage::VERTEX | BufferUsage::INDEX).access_scope(vk::PipelineStageFlags::empty());
        assert_eq!(stages, vk::PipelineStageFlags::VERTEX_INPUT);
        assert!(access.contains(vk::AccessFlags::INDEX_READ | vk::AccessFlags::VERTEX_ATTRIBUTE_READ));
    }
}
