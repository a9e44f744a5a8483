//! Resource creation, validation, destruction and the pipeline cache.

use std::thread;

use ash::vk::{self, Handle};
use vellum_gal::{
    BlendStateDesc, BufferDesc, BufferUsage, DepthStencilStateDesc, Device, GpuError,
    PipelineKey, RasterizerStateDesc, ResourceFormat, SamplerStateDesc, ShaderDesc, ShaderStage,
    TargetBlendDesc, TextureDesc, TextureKind,
};
use vellum_test::{
    fake_adapter, ready_device, spirv, universal_queue_family, FailPoint, FakeBackend, FakeConfig,
    ObjectKind,
};

fn pipeline_key(device: &mut Device<FakeBackend>) -> PipelineKey {
    let shader = device
        .create_shader(
            &ShaderDesc::default()
                .with_stage(ShaderStage::Vertex, spirv(8))
                .with_stage(ShaderStage::Pixel, spirv(8)),
        )
        .unwrap();
    PipelineKey {
        shader,
        blend: device.create_blend_state(BlendStateDesc::default()).unwrap(),
        depth_stencil: device
            .create_depth_stencil_state(DepthStencilStateDesc::default())
            .unwrap(),
        rasterizer: device
            .create_rasterizer_state(RasterizerStateDesc::default())
            .unwrap(),
    }
}

#[test]
fn destroyed_handles_go_stale() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    let texture = device
        .create_texture(TextureDesc::texture_2d(4, 4, ResourceFormat::R8Unorm), &[])
        .unwrap();
    let buffer = device
        .create_buffer(BufferDesc::new(16, BufferUsage::INDEX), None)
        .unwrap();
    let sampler = device.create_sampler_state(SamplerStateDesc::default()).unwrap();
    let key = pipeline_key(&mut device);

    device.destroy_texture(texture).unwrap();
    device.destroy_buffer(buffer).unwrap();
    device.destroy_sampler_state(sampler).unwrap();
    device.destroy_shader(key.shader).unwrap();
    device.destroy_blend_state(key.blend).unwrap();

    assert!(matches!(device.destroy_texture(texture), Err(GpuError::StaleHandle(_))));
    assert!(matches!(device.destroy_buffer(buffer), Err(GpuError::StaleHandle(_))));
    assert!(matches!(
        device.destroy_sampler_state(sampler),
        Err(GpuError::StaleHandle(_))
    ));
    assert!(matches!(device.destroy_shader(key.shader), Err(GpuError::StaleHandle(_))));
    assert!(matches!(
        device.destroy_blend_state(key.blend),
        Err(GpuError::StaleHandle(_))
    ));
    assert!(matches!(
        device.update_buffer(buffer, 0, &[1]),
        Err(GpuError::StaleHandle(_))
    ));
    assert!(matches!(
        device.create_texture_view(texture, ResourceFormat::R8Uint),
        Err(GpuError::StaleHandle(_))
    ));

    // A new resource in the freed slot does not answer to the old handle.
    let reused = device
        .create_buffer(BufferDesc::new(16, BufferUsage::INDEX), None)
        .unwrap();
    assert_ne!(reused, buffer);
    assert!(device.buffer(buffer).is_none());
    drop(device);
    backend.check().unwrap();
}

#[test]
fn shader_code_is_validated() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    let cases = [
        ShaderDesc::default(),
        ShaderDesc::default().with_stage(ShaderStage::Vertex, vec![0xdead_beef, 0]),
        ShaderDesc::default().with_stage(ShaderStage::Compute, Vec::new()),
        ShaderDesc::default()
            .with_stage(ShaderStage::Vertex, spirv(4))
            .with_stage(ShaderStage::Vertex, spirv(4)),
    ];
    for desc in &cases {
        assert!(
            matches!(device.create_shader(desc), Err(GpuError::InvalidShader(_))),
            "{desc:?}"
        );
    }
    assert_eq!(backend.created(ObjectKind::ShaderModule), 0);

    let shader = device
        .create_shader(
            &ShaderDesc::default()
                .with_stage(ShaderStage::Vertex, spirv(4))
                .with_stage(ShaderStage::Pixel, spirv(4)),
        )
        .unwrap();
    let created = device.shader(shader).unwrap();
    assert!(created.module(ShaderStage::Vertex).is_some());
    assert!(created.module(ShaderStage::Compute).is_none());
    assert_eq!(backend.live(ObjectKind::ShaderModule), 2);
}

#[test]
fn unsupported_stages_are_refused() {
    let mut adapter = fake_adapter(vec![universal_queue_family()]);
    adapter.features.geometry_shader = vk::FALSE;
    adapter.features.tessellation_shader = vk::FALSE;
    let backend = FakeBackend::new(FakeConfig {
        adapters: vec![adapter],
        ..FakeConfig::default()
    });
    let mut device = ready_device(&backend).unwrap();

    for stage in [ShaderStage::Geometry, ShaderStage::Hull, ShaderStage::Domain] {
        let desc = ShaderDesc::default()
            .with_stage(ShaderStage::Vertex, spirv(4))
            .with_stage(stage, spirv(4));
        assert!(matches!(
            device.create_shader(&desc),
            Err(GpuError::InvalidShader(_))
        ));
    }
    assert_eq!(backend.created(ObjectKind::ShaderModule), 0);
}

#[test]
fn failed_shader_module_leaks_nothing() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    backend.fail(FailPoint::CreateShaderModule);

    let desc = ShaderDesc::default().with_stage(ShaderStage::Compute, spirv(4));
    assert!(device.create_shader(&desc).is_err());
    assert_eq!(backend.live(ObjectKind::ShaderModule), 0);
}

#[test]
fn sampler_anisotropy_is_clamped_to_the_device() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    for requested in [64.0, 8.0, 1.0] {
        device
            .create_sampler_state(SamplerStateDesc {
                max_anisotropy: requested,
                ..SamplerStateDesc::default()
            })
            .unwrap();
    }
    let anisotropy: Vec<_> = backend.samplers().into_iter().map(|(_, a)| a).collect();
    assert_eq!(anisotropy, vec![Some(16.0), Some(8.0), None]);
}

#[test]
fn sampler_anisotropy_needs_the_feature() {
    let mut adapter = fake_adapter(vec![universal_queue_family()]);
    adapter.features.sampler_anisotropy = vk::FALSE;
    let backend = FakeBackend::new(FakeConfig {
        adapters: vec![adapter],
        ..FakeConfig::default()
    });
    let mut device = ready_device(&backend).unwrap();

    device
        .create_sampler_state(SamplerStateDesc {
            max_anisotropy: 16.0,
            ..SamplerStateDesc::default()
        })
        .unwrap();
    assert_eq!(backend.samplers()[0].1, None);
}

#[test]
fn state_descriptions_are_checked_against_limits() {
    let mut adapter = fake_adapter(vec![universal_queue_family()]);
    adapter.features.fill_mode_non_solid = vk::FALSE;
    let backend = FakeBackend::new(FakeConfig {
        adapters: vec![adapter],
        ..FakeConfig::default()
    });
    let mut device = ready_device(&backend).unwrap();

    let too_many = BlendStateDesc {
        independent_blend: true,
        targets: vec![TargetBlendDesc::alpha_blended(); 9],
        ..BlendStateDesc::default()
    };
    assert!(matches!(
        device.create_blend_state(too_many),
        Err(GpuError::InvalidDescription(_))
    ));
    assert!(matches!(
        device.create_rasterizer_state(RasterizerStateDesc {
            wireframe: true,
            ..RasterizerStateDesc::default()
        }),
        Err(GpuError::InvalidDescription(_))
    ));
    assert!(matches!(
        device.create_rasterizer_state(RasterizerStateDesc {
            conservative_rasterization: true,
            ..RasterizerStateDesc::default()
        }),
        Err(GpuError::InvalidDescription(_))
    ));

    let blend = device
        .create_blend_state(BlendStateDesc {
            targets: vec![TargetBlendDesc::alpha_blended()],
            ..BlendStateDesc::default()
        })
        .unwrap();
    assert_eq!(device.blend_state(blend).unwrap().attachments.len(), 1);
}

#[test]
fn invalid_buffers_and_textures_create_nothing() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    assert!(matches!(
        device.create_buffer(BufferDesc::new(0, BufferUsage::VERTEX), None),
        Err(GpuError::InvalidDescription(_))
    ));
    assert!(matches!(
        device.create_buffer(BufferDesc::new(4, BufferUsage::VERTEX), Some(&[0; 8])),
        Err(GpuError::InvalidDescription(_))
    ));
    assert!(matches!(
        device.create_texture(TextureDesc::texture_2d(0, 4, ResourceFormat::R8Unorm), &[]),
        Err(GpuError::InvalidDescription(_))
    ));
    assert!(matches!(
        device.create_texture(
            TextureDesc::texture_2d(32_768, 4, ResourceFormat::R8Unorm),
            &[]
        ),
        Err(GpuError::InvalidDescription(_))
    ));
    assert!(matches!(
        device.create_texture(
            TextureDesc::texture_2d(4, 4, ResourceFormat::R8Unorm).with_mip_levels(4),
            &[]
        ),
        Err(GpuError::InvalidDescription(_))
    ));
    assert_eq!(backend.live(ObjectKind::Buffer), 0);
    assert_eq!(backend.live(ObjectKind::Image), 0);
}

#[test]
fn host_visible_buffers_are_written_directly() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    let buffer = device
        .create_buffer(
            BufferDesc::new(64, BufferUsage::CONSTANT)
                .cpu_visible()
                .with_name("constants"),
            Some(&[9; 32]),
        )
        .unwrap();
    assert_eq!(device.buffer(buffer).unwrap().allocation.data[..32], [9; 32]);
    assert_eq!(device.pool_stats().staging_buffers_allocated, 0);

    device.begin_frame(0).unwrap();
    device.end_frame().unwrap();
    // Only the frame's own command buffer was submitted.
    assert_eq!(backend.submissions()[0].command_buffers.len(), 1);
}

#[test]
fn failed_view_releases_the_image() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    backend.fail(FailPoint::CreateImageView);

    assert!(device
        .create_texture(TextureDesc::texture_2d(4, 4, ResourceFormat::Rgba8Unorm), &[])
        .is_err());
    assert_eq!(backend.created(ObjectKind::Image), 1);
    assert_eq!(backend.live(ObjectKind::Image), 0);

    backend.clear_failure(FailPoint::CreateImageView);
    backend.fail(FailPoint::CreateImage);
    assert!(matches!(
        device.create_texture(TextureDesc::texture_2d(4, 4, ResourceFormat::Rgba8Unorm), &[]),
        Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
    ));
    assert!(!device.is_lost());
    drop(device);
    backend.check().unwrap();
}

#[test]
fn cube_textures_get_six_layers_per_cube() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    device
        .create_texture(
            TextureDesc {
                width: 16,
                height: 16,
                kind: TextureKind::Cube,
                ..TextureDesc::default()
            },
            &[],
        )
        .unwrap();
    let record = backend.images().pop().unwrap();
    assert_eq!(record.layers, 6);
    assert!(record.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));

    assert!(matches!(
        device.create_texture(
            TextureDesc {
                width: 16,
                height: 8,
                kind: TextureKind::Cube,
                ..TextureDesc::default()
            },
            &[],
        ),
        Err(GpuError::InvalidDescription(_))
    ));
}

#[test]
fn destroying_a_shader_evicts_its_pipelines_after_the_frame() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let key = pipeline_key(&mut device);
    let pipeline = backend.create_pipeline();
    device.cache_pipeline(key, pipeline);
    assert_eq!(device.cached_pipeline(&key), Some(pipeline));

    device.begin_frame(0).unwrap();
    device.destroy_shader(key.shader).unwrap();
    assert_eq!(device.cached_pipeline(&key), None);
    device.end_frame().unwrap();

    device.begin_frame(1).unwrap();
    assert!(backend.is_alive(pipeline.as_raw()));
    device.end_frame().unwrap();
    device.begin_frame(2).unwrap();
    assert!(!backend.is_alive(pipeline.as_raw()));
    device.end_frame().unwrap();

    // Destroying a state no pipeline uses evicts nothing.
    device.destroy_rasterizer_state(key.rasterizer).unwrap();
    drop(device);
    backend.check().unwrap();
}

#[test]
fn replacing_a_cached_pipeline_retires_the_old_one() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let key = pipeline_key(&mut device);
    let (old, new) = (backend.create_pipeline(), backend.create_pipeline());

    device.cache_pipeline(key, old);
    device.cache_pipeline(key, old);
    device.cache_pipeline(key, new);
    assert_eq!(device.cached_pipeline(&key), Some(new));
    assert_eq!(device.pending_deletions(), 1);

    device.wait_idle().unwrap();
    assert!(!backend.is_alive(old.as_raw()));
    assert!(backend.is_alive(new.as_raw()));

    device.shutdown();
    assert!(!backend.is_alive(new.as_raw()));
    assert_eq!(backend.live_total(), 0);
    backend.check().unwrap();
}

#[test]
fn background_requests_apply_at_the_next_frame() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let texture = device
        .create_texture(TextureDesc::texture_2d(4, 4, ResourceFormat::Rgba8Unorm), &[])
        .unwrap();
    let buffer = device
        .create_buffer(BufferDesc::new(64, BufferUsage::STORAGE), None)
        .unwrap();
    let sampler = device.create_sampler_state(SamplerStateDesc::default()).unwrap();

    let requests = device.requests();
    thread::spawn(move || {
        requests.update_buffer(buffer, 0, vec![5; 16]).unwrap();
        requests.destroy_texture(texture).unwrap();
        requests.destroy_sampler_state(sampler).unwrap();
        requests.destroy_buffer(buffer).unwrap();
        // Arrives after the buffer is gone and is dropped.
        requests.update_buffer(buffer, 0, vec![6; 16]).unwrap();
    })
    .join()
    .unwrap();

    assert!(device.texture(texture).is_some());
    device.begin_frame(0).unwrap();
    assert!(device.texture(texture).is_none());
    assert!(device.buffer(buffer).is_none());
    assert!(device.sampler_state(sampler).is_none());
    assert_eq!(backend.buffer_copies().len(), 1);
    assert_eq!(device.process_requests(), 0);
    device.end_frame().unwrap();
    drop(device);
    backend.check().unwrap();
}
