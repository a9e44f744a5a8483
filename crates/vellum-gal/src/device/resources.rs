//! Resource creation and destruction.
//!
//! Creation either returns a fully built object or nothing: native objects
//! made before a failing step are destroyed on the spot, or deferred when
//! initialization commands may already reference them. Destruction always
//! goes through the current frame slot.

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::{not_ready, Device};
use crate::backend::{Backend, BufferCreate, ImageCreate, ImageViewCreate};
use crate::cache::ResourceId;
use crate::deferred::PendingDeletion;
use crate::error::{GpuError, Result};
use crate::format::{FormatSupport, ResourceFormat};
use crate::resources::{
    BlendState, BlendStateDesc, BlendStateHandle, Buffer, BufferDesc, BufferHandle,
    DepthStencilState, DepthStencilStateDesc, DepthStencilStateHandle, RasterizerState,
    RasterizerStateDesc, RasterizerStateHandle, SamplerState, SamplerStateDesc,
    SamplerStateHandle, Shader, ShaderDesc, ShaderHandle, Texture, TextureData, TextureDesc,
    TextureHandle, TextureKind, TextureUsage,
};

impl<B: Backend> Device<B> {
    /// Create a texture, optionally filled with `initial_data`.
    ///
    /// Every upload must cover one whole mip level of one layer, tightly
    /// packed. The texture is usable by commands recorded after this call.
    pub fn create_texture(
        &mut self,
        desc: TextureDesc,
        initial_data: &[TextureData<'_>],
    ) -> Result<TextureHandle> {
        self.check_usable()?;
        let name = desc.debug_name.clone();
        let created = self.build_texture(desc, initial_data);
        self.tracked(created)
            .inspect_err(|err| tracing::error!("Failed to create texture '{name}': {err}"))
    }

    fn build_texture(
        &mut self,
        desc: TextureDesc,
        initial_data: &[TextureData<'_>],
    ) -> Result<TextureHandle> {
        let caps = &self.capabilities;
        let max_dimension = match desc.kind {
            TextureKind::Texture2D => caps.max_texture_2d_dimension,
            TextureKind::Texture3D => caps.max_texture_3d_dimension,
            TextureKind::Cube => caps.max_cubemap_dimension,
        };
        desc.validate(max_dimension)?;
        if caps.max_array_layers > 0 && desc.layer_count() > caps.max_array_layers {
            return Err(GpuError::InvalidDescription(format!(
                "texture '{}' has {} layers, the device supports {}",
                desc.debug_name,
                desc.layer_count(),
                caps.max_array_layers
            )));
        }
        validate_uploads(&desc, initial_data)?;

        let entry = self.formats.get(desc.format);
        if !entry.is_supported() || !supports_usage(desc.format, desc.usage, entry.support) {
            return Err(GpuError::UnsupportedFormat(desc.format));
        }
        let format = entry.format;
        let mut view_formats = Vec::new();
        let mut flags = vk::ImageCreateFlags::empty();
        if !entry.alternatives.is_empty() {
            view_formats.push(format);
            view_formats.extend_from_slice(&entry.alternatives);
            flags |= vk::ImageCreateFlags::MUTABLE_FORMAT;
        }
        if desc.kind == TextureKind::Cube {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        let (image, allocation) = self.backend.create_image(&ImageCreate {
            image_type: desc.image_type(),
            format,
            view_formats: &view_formats,
            extent: desc.mip_extent(0),
            mip_levels: desc.mip_levels,
            array_layers: desc.layer_count(),
            samples: desc.sample_count(),
            usage: desc.image_usage(),
            flags,
            name: &desc.debug_name,
        })?;
        let view = match self.backend.create_image_view(&ImageViewCreate {
            image,
            view_type: desc.view_type(),
            format,
            range: desc.full_range(),
        }) {
            Ok(view) => view,
            Err(err) => {
                self.backend.destroy_image(image, allocation);
                return Err(err);
            }
        };

        let texture = Texture {
            desc,
            image,
            allocation,
            format,
            view,
            extra_views: Vec::new(),
        };
        let preferred = texture
            .desc
            .preferred_state(self.capabilities.shader_pipeline_stages);

        let pools = self.pools.as_mut().ok_or_else(not_ready)?;
        if let Err(err) = pools.init.init_texture(
            &self.backend,
            &mut pools.staging,
            &texture,
            initial_data,
            preferred,
        ) {
            pools.init.texture_destroyed(image);
            self.defer_deletion(PendingDeletion::ImageView(texture.view));
            self.defer_deletion(PendingDeletion::Image {
                image,
                allocation: texture.allocation,
            });
            return Err(err);
        }

        let (layout, stages, access) = preferred;
        self.barrier
            .register_image(image, texture.desc.full_range(), layout, stages, access);
        tracing::debug!(
            "Created texture '{}' {}x{}x{} {:?}",
            texture.desc.debug_name,
            texture.desc.width,
            texture.desc.height,
            texture.desc.depth,
            format
        );
        Ok(self.textures.insert(texture))
    }

    /// View of `texture` reinterpreted as `format`.
    ///
    /// The format must be view-compatible with the texture's. Views live as
    /// long as the texture; asking twice returns the same view.
    pub fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        format: ResourceFormat,
    ) -> Result<vk::ImageView> {
        self.check_usable()?;
        let native = self.formats.native(format);
        let texture = self
            .textures
            .get_mut(texture)
            .ok_or(GpuError::StaleHandle("TextureHandle"))?;

        if native == texture.format {
            return Ok(texture.view);
        }
        if let Some(&(_, view)) = texture.extra_views.iter().find(|(f, _)| *f == native) {
            return Ok(view);
        }
        if native == vk::Format::UNDEFINED
            || !self.formats.get(texture.desc.format).is_view_compatible(native)
        {
            return Err(GpuError::InvalidDescription(format!(
                "{format:?} cannot view texture '{}' of format {:?}",
                texture.desc.debug_name, texture.desc.format
            )));
        }

        let view = self
            .backend
            .create_image_view(&ImageViewCreate {
                image: texture.image,
                view_type: texture.desc.view_type(),
                format: native,
                range: texture.desc.full_range(),
            })
            .inspect_err(|err| tracing::error!("Failed to create texture view: {err}"))?;
        texture.extra_views.push((native, view));
        Ok(view)
    }

    pub fn destroy_texture(&mut self, texture: TextureHandle) -> Result<()> {
        let texture = self
            .textures
            .remove(texture)
            .ok_or(GpuError::StaleHandle("TextureHandle"))?;

        self.barrier.texture_destroyed(texture.image);
        if let Some(pools) = self.pools.as_mut() {
            pools.init.texture_destroyed(texture.image);
        }
        for (_, view) in texture.extra_views {
            self.defer_deletion(PendingDeletion::ImageView(view));
        }
        self.defer_deletion(PendingDeletion::ImageView(texture.view));
        self.defer_deletion(PendingDeletion::Image {
            image: texture.image,
            allocation: texture.allocation,
        });
        Ok(())
    }

    /// Create a buffer, optionally filled with `initial_data` from offset 0.
    pub fn create_buffer(
        &mut self,
        desc: BufferDesc,
        initial_data: Option<&[u8]>,
    ) -> Result<BufferHandle> {
        self.check_usable()?;
        let name = desc.debug_name.clone();
        let created = self.build_buffer(desc, initial_data);
        self.tracked(created)
            .inspect_err(|err| tracing::error!("Failed to create buffer '{name}': {err}"))
    }

    fn build_buffer(&mut self, desc: BufferDesc, initial_data: Option<&[u8]>) -> Result<BufferHandle> {
        if desc.size == 0 {
            return Err(GpuError::InvalidDescription(format!(
                "buffer '{}' has zero size",
                desc.debug_name
            )));
        }
        let initial_data = initial_data.filter(|data| !data.is_empty());
        if let Some(data) = initial_data {
            if data.len() as u64 > desc.size {
                return Err(GpuError::InvalidDescription(format!(
                    "{} bytes of initial data do not fit buffer '{}' of {} bytes",
                    data.len(),
                    desc.debug_name,
                    desc.size
                )));
            }
        }

        let location = if desc.cpu_visible {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };
        let (buffer, mut allocation) = self.backend.create_buffer(&BufferCreate {
            size: desc.size,
            usage: desc.usage.vk_usage(),
            location,
            name: &desc.debug_name,
        })?;

        if let Some(data) = initial_data {
            if desc.cpu_visible {
                if let Err(err) = self.backend.write_allocation(&mut allocation, 0, data) {
                    self.backend.destroy_buffer(buffer, allocation);
                    return Err(err);
                }
            } else {
                let (stages, access) = desc
                    .usage
                    .access_scope(self.capabilities.shader_pipeline_stages);
                let pools = self.pools.as_mut().ok_or_else(not_ready)?;
                if let Err(err) = pools.init.upload_buffer(
                    &self.backend,
                    &mut pools.staging,
                    buffer,
                    0,
                    data,
                    stages,
                    access,
                ) {
                    pools.init.buffer_destroyed(buffer);
                    self.defer_deletion(PendingDeletion::Buffer { buffer, allocation });
                    return Err(err);
                }
            }
        }

        tracing::debug!("Created buffer '{}' of {} bytes", desc.debug_name, desc.size);
        Ok(self.buffers.insert(Buffer {
            desc,
            buffer,
            allocation,
        }))
    }

    pub fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        let buffer = self
            .buffers
            .remove(buffer)
            .ok_or(GpuError::StaleHandle("BufferHandle"))?;

        self.barrier.buffer_destroyed(buffer.buffer);
        if let Some(pools) = self.pools.as_mut() {
            pools.init.buffer_destroyed(buffer.buffer);
        }
        self.defer_deletion(PendingDeletion::Buffer {
            buffer: buffer.buffer,
            allocation: buffer.allocation,
        });
        Ok(())
    }

    /// Create one shader module per stage of `desc`.
    pub fn create_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderHandle> {
        self.check_usable()?;
        let created = self.build_shader(desc);
        self.tracked(created).inspect_err(|err| {
            tracing::error!("Failed to create shader '{}': {err}", desc.debug_name);
        })
    }

    fn build_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderHandle> {
        desc.validate()?;
        if let Some((stage, _)) = desc
            .stages
            .iter()
            .find(|(stage, _)| !self.capabilities.supports_stage(*stage))
        {
            return Err(GpuError::InvalidShader(format!(
                "{stage:?} shaders are not supported by this device"
            )));
        }

        let mut modules = Vec::with_capacity(desc.stages.len());
        for (stage, code) in &desc.stages {
            match self.backend.create_shader_module(code) {
                Ok(module) => modules.push((*stage, module)),
                Err(err) => {
                    for (_, module) in modules {
                        self.backend.destroy_shader_module(module);
                    }
                    return Err(err);
                }
            }
        }

        Ok(self.shaders.insert(Shader {
            name: desc.debug_name.clone(),
            modules,
        }))
    }

    pub fn destroy_shader(&mut self, shader: ShaderHandle) -> Result<()> {
        let removed = self
            .shaders
            .remove(shader)
            .ok_or(GpuError::StaleHandle("ShaderHandle"))?;
        self.evict_pipelines(ResourceId::Shader(shader));
        for (_, module) in removed.modules {
            self.defer_deletion(PendingDeletion::ShaderModule(module));
        }
        Ok(())
    }

    pub fn create_blend_state(&mut self, desc: BlendStateDesc) -> Result<BlendStateHandle> {
        self.check_usable()?;
        let state = BlendState::new(desc, self.capabilities.max_render_targets)
            .inspect_err(|err| tracing::error!("Failed to create blend state: {err}"))?;
        Ok(self.blend_states.insert(state))
    }

    pub fn destroy_blend_state(&mut self, state: BlendStateHandle) -> Result<()> {
        self.blend_states
            .remove(state)
            .ok_or(GpuError::StaleHandle("BlendStateHandle"))?;
        self.evict_pipelines(ResourceId::Blend(state));
        Ok(())
    }

    pub fn create_depth_stencil_state(
        &mut self,
        desc: DepthStencilStateDesc,
    ) -> Result<DepthStencilStateHandle> {
        self.check_usable()?;
        Ok(self
            .depth_stencil_states
            .insert(DepthStencilState::new(desc)))
    }

    pub fn destroy_depth_stencil_state(&mut self, state: DepthStencilStateHandle) -> Result<()> {
        self.depth_stencil_states
            .remove(state)
            .ok_or(GpuError::StaleHandle("DepthStencilStateHandle"))?;
        self.evict_pipelines(ResourceId::DepthStencil(state));
        Ok(())
    }

    pub fn create_rasterizer_state(
        &mut self,
        desc: RasterizerStateDesc,
    ) -> Result<RasterizerStateHandle> {
        self.check_usable()?;
        let fill_mode_non_solid = self
            .adapter
            .as_ref()
            .is_some_and(|adapter| adapter.features.fill_mode_non_solid == vk::TRUE);
        let state = RasterizerState::new(desc, fill_mode_non_solid)
            .inspect_err(|err| tracing::error!("Failed to create rasterizer state: {err}"))?;
        Ok(self.rasterizer_states.insert(state))
    }

    pub fn destroy_rasterizer_state(&mut self, state: RasterizerStateHandle) -> Result<()> {
        self.rasterizer_states
            .remove(state)
            .ok_or(GpuError::StaleHandle("RasterizerStateHandle"))?;
        self.evict_pipelines(ResourceId::Rasterizer(state));
        Ok(())
    }

    /// Create a sampler. Anisotropy is clamped to what the device supports.
    pub fn create_sampler_state(&mut self, desc: SamplerStateDesc) -> Result<SamplerStateHandle> {
        self.check_usable()?;
        let anisotropy_supported = self
            .adapter
            .as_ref()
            .is_some_and(|adapter| adapter.features.sampler_anisotropy == vk::TRUE);
        let device_max = if anisotropy_supported {
            self.capabilities.max_anisotropy
        } else {
            1.0
        };

        let created = self.backend.create_sampler(&desc.create_info(device_max));
        let sampler = self
            .tracked(created)
            .inspect_err(|err| tracing::error!("Failed to create sampler state: {err}"))?;
        Ok(self.sampler_states.insert(SamplerState { desc, sampler }))
    }

    pub fn destroy_sampler_state(&mut self, state: SamplerStateHandle) -> Result<()> {
        let state = self
            .sampler_states
            .remove(state)
            .ok_or(GpuError::StaleHandle("SamplerStateHandle"))?;
        self.defer_deletion(PendingDeletion::Sampler(state.sampler));
        Ok(())
    }

    fn evict_pipelines(&mut self, id: ResourceId) {
        for pipeline in self.cache.resource_deleted(id) {
            self.defer_deletion(PendingDeletion::Pipeline(pipeline));
        }
    }
}

fn validate_uploads(desc: &TextureDesc, uploads: &[TextureData<'_>]) -> Result<()> {
    if uploads.is_empty() {
        return Ok(());
    }
    if desc.samples > 1 || desc.format.is_depth() {
        return Err(GpuError::InvalidDescription(format!(
            "texture '{}' cannot be created with initial data",
            desc.debug_name
        )));
    }
    for upload in uploads {
        if upload.mip_level >= desc.mip_levels || upload.array_layer >= desc.layer_count() {
            return Err(GpuError::InvalidDescription(format!(
                "upload to mip {} layer {} is outside texture '{}'",
                upload.mip_level, upload.array_layer, desc.debug_name
            )));
        }
        let expected = desc.mip_size(upload.mip_level);
        if upload.data.len() as u64 != expected {
            return Err(GpuError::InvalidDescription(format!(
                "mip {} of texture '{}' needs {expected} tightly packed bytes, got {}",
                upload.mip_level,
                desc.debug_name,
                upload.data.len()
            )));
        }
    }
    Ok(())
}

fn supports_usage(format: ResourceFormat, usage: TextureUsage, support: FormatSupport) -> bool {
    let mut required = FormatSupport::empty();
    if usage.contains(TextureUsage::SAMPLED) {
        required |= FormatSupport::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE) {
        required |= FormatSupport::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_TARGET) {
        required |= if format.is_depth() {
            FormatSupport::DEPTH_STENCIL
        } else {
            FormatSupport::RENDER_TARGET
        };
    }
    support.contains(required)
}
