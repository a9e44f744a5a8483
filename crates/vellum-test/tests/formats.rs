//! Format table contents and the images and views it drives.

use ash::vk;
use vellum_gal::format::FormatSupport;
use vellum_gal::{GpuError, ResourceFormat, TextureData, TextureDesc, TextureUsage};
use vellum_test::{ready_device, FakeBackend, FakeConfig, ObjectKind};

#[test]
fn every_format_resolves_on_a_capable_device() {
    let backend = FakeBackend::default();
    let device = ready_device(&backend).unwrap();
    let formats = device.formats();

    assert_eq!(formats.len(), ResourceFormat::COUNT);
    for (format, entry) in formats.iter() {
        assert!(entry.is_supported(), "{format:?}");
        assert!(entry.support.contains(FormatSupport::SAMPLED), "{format:?}");
        assert!(!entry.alternatives.contains(&entry.format), "{format:?}");
    }
    assert_eq!(formats.native(ResourceFormat::D16), vk::Format::D16_UNORM);
    assert_eq!(formats.native(ResourceFormat::D24S8), vk::Format::D24_UNORM_S8_UINT);
    assert_eq!(formats.native(ResourceFormat::DFloat), vk::Format::D32_SFLOAT);
    assert_eq!(
        formats.native(ResourceFormat::Bgra8UnormSrgb),
        vk::Format::B8G8R8A8_SRGB
    );
}

#[test]
fn depth_formats_fall_back_to_the_next_candidate() {
    let backend = FakeBackend::new(FakeConfig {
        unsupported_formats: vec![vk::Format::D24_UNORM_S8_UINT, vk::Format::D16_UNORM],
        ..FakeConfig::default()
    });
    let device = ready_device(&backend).unwrap();
    let formats = device.formats();

    assert_eq!(
        formats.native(ResourceFormat::D24S8),
        vk::Format::D32_SFLOAT_S8_UINT
    );
    assert_eq!(formats.native(ResourceFormat::D16), vk::Format::D32_SFLOAT);
}

#[test]
fn unsupported_format_is_refused_at_creation() {
    let backend = FakeBackend::new(FakeConfig {
        unsupported_formats: vec![vk::Format::R16G16B16A16_SFLOAT],
        ..FakeConfig::default()
    });
    let mut device = ready_device(&backend).unwrap();

    let err = device
        .create_texture(
            TextureDesc::texture_2d(8, 8, ResourceFormat::Rgba16Float),
            &[],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        GpuError::UnsupportedFormat(ResourceFormat::Rgba16Float)
    ));
    assert_eq!(backend.created(ObjectKind::Image), 0);
}

#[test]
fn format_families_create_mutable_images() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    device
        .create_texture(TextureDesc::texture_2d(8, 8, ResourceFormat::Rgba8Unorm), &[])
        .unwrap();
    device
        .create_texture(TextureDesc::texture_2d(8, 8, ResourceFormat::Bc4Unorm), &[])
        .unwrap();

    let images = backend.images();
    let rgba = &images[0];
    assert_eq!(rgba.format, vk::Format::R8G8B8A8_UNORM);
    assert!(rgba.flags.contains(vk::ImageCreateFlags::MUTABLE_FORMAT));
    assert_eq!(rgba.view_formats[0], vk::Format::R8G8B8A8_UNORM);
    assert!(rgba.view_formats.contains(&vk::Format::R8G8B8A8_SRGB));

    let bc4 = &images[1];
    assert!(!bc4.flags.contains(vk::ImageCreateFlags::MUTABLE_FORMAT));
    assert!(bc4.view_formats.is_empty());
}

#[test]
fn texture_views_are_cached_per_format() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let texture = device
        .create_texture(TextureDesc::texture_2d(8, 8, ResourceFormat::Rgba8Unorm), &[])
        .unwrap();
    let default_view = device.texture(texture).unwrap().view;

    assert_eq!(
        device
            .create_texture_view(texture, ResourceFormat::Rgba8Unorm)
            .unwrap(),
        default_view
    );
    let srgb = device
        .create_texture_view(texture, ResourceFormat::Rgba8UnormSrgb)
        .unwrap();
    assert_ne!(srgb, default_view);
    assert_eq!(
        device
            .create_texture_view(texture, ResourceFormat::Rgba8UnormSrgb)
            .unwrap(),
        srgb
    );
    assert!(matches!(
        device.create_texture_view(texture, ResourceFormat::R32Float),
        Err(GpuError::InvalidDescription(_))
    ));
    assert_eq!(device.texture(texture).unwrap().extra_views.len(), 1);
    assert_eq!(backend.live(ObjectKind::ImageView), 2);

    device.destroy_texture(texture).unwrap();
    device.wait_idle().unwrap();
    assert_eq!(backend.live(ObjectKind::ImageView), 0);
    backend.check().unwrap();
}

#[test]
fn depth_textures_reject_initial_data() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let depth = TextureDesc::texture_2d(4, 4, ResourceFormat::D16).with_usage(TextureUsage::RENDER_TARGET);

    let data = [0_u8; 32];
    let upload = TextureData {
        mip_level: 0,
        array_layer: 0,
        data: &data,
    };
    assert!(matches!(
        device.create_texture(depth.clone(), &[upload]),
        Err(GpuError::InvalidDescription(_))
    ));

    device.create_texture(depth, &[]).unwrap();
    let record = backend.images().pop().unwrap();
    assert_eq!(record.format, vk::Format::D16_UNORM);
    assert!(record
        .usage
        .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
}

#[test]
fn compressed_uploads_are_sized_in_blocks() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let desc = TextureDesc::texture_2d(8, 8, ResourceFormat::Bc1).with_mip_levels(2);

    // 2x2 blocks of 8 bytes, then a single block for the 4x4 mip.
    let mip0 = [0_u8; 32];
    let mip1 = [0_u8; 8];
    let uploads = [
        TextureData {
            mip_level: 0,
            array_layer: 0,
            data: &mip0,
        },
        TextureData {
            mip_level: 1,
            array_layer: 0,
            data: &mip1,
        },
    ];
    device.create_texture(desc.clone(), &uploads).unwrap();
    assert_eq!(backend.image_copies().len(), 2);

    let short = [TextureData {
        mip_level: 0,
        array_layer: 0,
        data: &mip1,
    }];
    assert!(matches!(
        device.create_texture(desc, &short),
        Err(GpuError::InvalidDescription(_))
    ));
    drop(device);
    backend.check().unwrap();
}
