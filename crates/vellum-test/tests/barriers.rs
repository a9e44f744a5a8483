//! Barriers recorded by the device on behalf of its callers.

use ash::vk;
use vellum_gal::{
    BufferDesc, BufferUsage, ResourceFormat, TextureData, TextureDesc, TextureUsage,
};
use vellum_test::{ready_device, FakeBackend};

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[test]
fn texture_upload_is_bracketed_by_transitions() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let pixels = vec![0_u8; 8 * 8 * 4];

    device.begin_frame(0).unwrap();
    let texture = device
        .create_texture(
            TextureDesc::texture_2d(8, 8, ResourceFormat::Rgba8Unorm),
            &[TextureData {
                mip_level: 0,
                array_layer: 0,
                data: &pixels,
            }],
        )
        .unwrap();
    let image = device.texture(texture).unwrap().image;
    device.end_frame().unwrap();

    let transitions: Vec<_> = backend
        .barriers()
        .into_iter()
        .flat_map(|(_, batch)| batch.images)
        .filter(|barrier| barrier.image == image)
        .map(|barrier| (barrier.old_layout, barrier.new_layout))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            ),
        ]
    );
    let copies = backend.image_copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].1, image);
    assert_eq!(copies[0].2, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

    // Init commands run before the frame's own commands in one batch.
    let submission = &backend.submissions()[0];
    assert_eq!(submission.command_buffers.len(), 2);
    drop(device);
    backend.check().unwrap();
}

#[test]
fn requested_transitions_land_in_the_frame_command_buffer() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let texture = device
        .create_texture(
            TextureDesc::texture_2d(32, 32, ResourceFormat::Rgba16Float)
                .with_usage(TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET),
            &[],
        )
        .unwrap();
    let image = device.texture(texture).unwrap().image;

    device.begin_frame(0).unwrap();
    let command_buffer = device.current_command_buffer().unwrap();
    let barrier = device.current_pipeline_barrier();
    assert_eq!(
        barrier.image_layout(image),
        Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    );
    barrier.ensure_image_layout(
        image,
        color_range(),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    );
    assert!(barrier.is_image_pending(image));

    let before = backend.barriers().len();
    device.flush_barriers().unwrap();
    let recorded = backend.barriers();
    assert_eq!(recorded.len(), before + 1);
    let (target, batch) = recorded.last().unwrap();
    assert_eq!(*target, command_buffer);
    assert_eq!(batch.images[0].new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    device.flush_barriers().unwrap();
    assert_eq!(backend.barriers().len(), before + 1);
    assert!(device.current_pipeline_barrier().flush().is_empty());
    device.end_frame().unwrap();
    drop(device);
    backend.check().unwrap();
}

#[test]
fn pending_transitions_are_flushed_at_submit() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let texture = device
        .create_texture(
            TextureDesc::texture_2d(4, 4, ResourceFormat::Rgba8Unorm)
                .with_usage(TextureUsage::SAMPLED | TextureUsage::STORAGE),
            &[],
        )
        .unwrap();
    let image = device.texture(texture).unwrap().image;

    device.begin_frame(0).unwrap();
    device.current_pipeline_barrier().ensure_image_layout(
        image,
        color_range(),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_READ,
    );
    device.end_frame().unwrap();

    let frame_buffer = backend.submissions()[0]
        .command_buffers
        .last()
        .copied()
        .unwrap();
    assert!(backend.barriers().iter().any(|(command_buffer, batch)| {
        *command_buffer == frame_buffer
            && batch.images.iter().any(|barrier| {
                barrier.image == image
                    && barrier.old_layout == vk::ImageLayout::GENERAL
                    && barrier.new_layout == vk::ImageLayout::TRANSFER_SRC_OPTIMAL
            })
    }));
    drop(device);
    backend.check().unwrap();
}

#[test]
fn buffer_copy_waits_for_earlier_writes() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let src = device
        .create_buffer(BufferDesc::new(256, BufferUsage::STORAGE), None)
        .unwrap();
    let dst = device
        .create_buffer(BufferDesc::new(256, BufferUsage::VERTEX), None)
        .unwrap();
    let (src_raw, dst_raw) = (
        device.buffer(src).unwrap().buffer,
        device.buffer(dst).unwrap().buffer,
    );

    device.begin_frame(0).unwrap();
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 64,
        size: 128,
    };
    device.copy_buffer(src, dst, &[region]).unwrap();
    device.copy_buffer(src, dst, &[]).unwrap();
    device.end_frame().unwrap();

    let copies = backend.buffer_copies();
    assert_eq!(copies.len(), 1);
    let (from, to, regions) = &copies[0];
    assert_eq!((*from, *to), (src_raw, dst_raw));
    assert_eq!(
        regions
            .iter()
            .map(|r| (r.src_offset, r.dst_offset, r.size))
            .collect::<Vec<_>>(),
        vec![(0, 64, 128)]
    );
    let batches = backend.barriers();
    let before_copy = batches
        .iter()
        .find(|(_, batch)| batch.buffers.iter().any(|b| b.buffer == dst_raw))
        .map(|(_, batch)| batch.clone())
        .unwrap();
    assert!(before_copy
        .dst_stages
        .contains(vk::PipelineStageFlags::TRANSFER));
    let write = before_copy
        .buffers
        .iter()
        .find(|b| b.buffer == dst_raw)
        .unwrap();
    assert_eq!(write.dst_access, vk::AccessFlags::TRANSFER_WRITE);
    assert_eq!((write.offset, write.size), (64, 128));

    // The copy is made visible to vertex input before the frame ends.
    assert!(batches.iter().any(|(_, batch)| {
        batch.dst_stages.contains(vk::PipelineStageFlags::VERTEX_INPUT)
            && batch.buffers.iter().any(|b| {
                b.buffer == dst_raw && b.src_access == vk::AccessFlags::TRANSFER_WRITE
            })
    }));
    drop(device);
    backend.check().unwrap();
}

#[test]
fn mip_chain_generation_tracks_each_level() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let texture = device
        .create_texture(
            TextureDesc::texture_2d(64, 64, ResourceFormat::Rgba8Unorm).with_mip_levels(4),
            &[],
        )
        .unwrap();
    let image = device.texture(texture).unwrap().image;
    let level = |mip| vk::ImageSubresourceRange {
        base_mip_level: mip,
        ..color_range()
    };

    device.begin_frame(0).unwrap();
    let barrier = device.current_pipeline_barrier();
    for mip in 1..4 {
        barrier.ensure_image_layout(
            image,
            level(mip - 1),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        );
        barrier.ensure_image_layout(
            image,
            level(mip),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        );
    }
    assert_eq!(
        barrier.subresource_layout(image, 0, 0),
        Some(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
    );
    assert_eq!(
        barrier.subresource_layout(image, 3, 0),
        Some(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
    );
    device.end_frame().unwrap();

    // Every transition names the layout its own level was actually in.
    let transitions: Vec<_> = backend
        .barriers()
        .into_iter()
        .flat_map(|(_, batch)| batch.images)
        .filter(|barrier| barrier.image == image)
        .map(|barrier| {
            (
                barrier.range.base_mip_level,
                barrier.old_layout,
                barrier.new_layout,
            )
        })
        .collect();
    let dst = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
    let src = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
    let sampled = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    assert_eq!(
        transitions,
        vec![
            (0, vk::ImageLayout::UNDEFINED, sampled),
            (0, sampled, src),
            (1, sampled, dst),
            (1, dst, src),
            (2, sampled, dst),
            (2, dst, src),
            (3, sampled, dst),
        ]
    );
    drop(device);
    backend.check().unwrap();
}
