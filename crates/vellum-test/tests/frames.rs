//! Frame ring, deferred deletion and the submission chain.

use std::collections::HashSet;

use ash::vk::{self, Handle};
use vellum_gal::{
    BufferDesc, BufferHandle, BufferUsage, GpuError, ResourceFormat, TextureData, TextureDesc,
    TextureHandle,
};
use vellum_test::{ready_device, Event, FailPoint, FakeBackend, ObjectKind, XorShift};

/// Every destroyed object must not be referenced by a submission that had
/// not completed when it was destroyed.
fn assert_destroyed_after_completion(backend: &FakeBackend) {
    let submissions = backend.submissions();
    let mut submitted = Vec::new();
    let mut completed = HashSet::new();
    for event in backend.events() {
        match event {
            Event::Submitted(index) => submitted.push(index),
            Event::Completed(index) => {
                completed.insert(index);
            }
            Event::Destroyed(kind, raw) => {
                for &index in &submitted {
                    assert!(
                        completed.contains(&index) || !submissions[index].references(raw),
                        "{kind:?} {raw:#x} destroyed before submission {index} completed"
                    );
                }
            }
            _ => {}
        }
    }
}

#[test]
fn random_workload_never_destroys_in_use_objects() {
    for seed in [1, 7, 42, 1234, 0xdead_beef] {
        let backend = FakeBackend::default();
        let mut device = ready_device(&backend).unwrap();
        let mut rng = XorShift::new(seed);

        let mut textures: Vec<TextureHandle> = Vec::new();
        let mut buffers: Vec<BufferHandle> = Vec::new();
        let mut frame = 0;
        let mut in_frame = false;
        let pixels = vec![0x7f_u8; 4 * 4 * 4];

        for _ in 0..300 {
            match rng.below(8) {
                0 => {
                    let desc = TextureDesc::texture_2d(4, 4, ResourceFormat::Rgba8Unorm);
                    let uploads = [TextureData {
                        mip_level: 0,
                        array_layer: 0,
                        data: &pixels,
                    }];
                    let initial: &[TextureData<'_>] = if rng.below(2) == 0 { &uploads } else { &[] };
                    textures.push(device.create_texture(desc, initial).unwrap());
                }
                1 => {
                    let mut desc = BufferDesc::new(256, BufferUsage::VERTEX | BufferUsage::STORAGE);
                    if rng.below(3) == 0 {
                        desc = desc.cpu_visible();
                    }
                    let data = vec![1_u8; 64];
                    let initial = (rng.below(2) == 0).then_some(data.as_slice());
                    buffers.push(device.create_buffer(desc, initial).unwrap());
                }
                2 if !textures.is_empty() => {
                    let index = rng.below(textures.len() as u64) as usize;
                    device.destroy_texture(textures.swap_remove(index)).unwrap();
                }
                3 if !buffers.is_empty() => {
                    let index = rng.below(buffers.len() as u64) as usize;
                    device.destroy_buffer(buffers.swap_remove(index)).unwrap();
                }
                4 if in_frame && !buffers.is_empty() => {
                    let buffer = buffers[rng.below(buffers.len() as u64) as usize];
                    let len = rng.below(64) + 1;
                    let offset = rng.below(256 - len);
                    let data = vec![2_u8; len as usize];
                    device.update_buffer(buffer, offset, &data).unwrap();
                }
                5 if in_frame && buffers.len() >= 2 => {
                    let src = buffers[0];
                    let dst = buffers[buffers.len() - 1];
                    let region = vk::BufferCopy {
                        src_offset: rng.below(128),
                        dst_offset: rng.below(128),
                        size: 64,
                    };
                    device.copy_buffer(src, dst, &[region]).unwrap();
                }
                6 | 7 => {
                    if in_frame {
                        device.end_frame().unwrap();
                        frame += 1;
                    } else {
                        device.begin_frame(frame).unwrap();
                    }
                    in_frame = !in_frame;
                }
                _ => {}
            }
        }
        if in_frame {
            device.end_frame().unwrap();
        }
        for texture in textures.drain(..).step_by(2) {
            device.destroy_texture(texture).unwrap();
        }

        device.shutdown();
        backend.check().unwrap();
        assert_eq!(backend.live_total(), 0, "seed {seed}");
        assert_destroyed_after_completion(&backend);
    }
}

#[test]
fn texture_destroyed_in_frame_zero_outlives_frame_one() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    device.begin_frame(0).unwrap();
    let texture = device
        .create_texture(
            TextureDesc::texture_2d(16, 16, ResourceFormat::Rgba8Unorm).with_name("doomed"),
            &[],
        )
        .unwrap();
    let image = device.texture(texture).unwrap().image.as_raw();
    device.destroy_texture(texture).unwrap();
    assert!(device.texture(texture).is_none());
    device.end_frame().unwrap();

    device.begin_frame(1).unwrap();
    assert!(backend.is_alive(image));
    assert!(device.pending_deletions() > 0);
    device.end_frame().unwrap();

    device.begin_frame(2).unwrap();
    assert!(!backend.is_alive(image));
    device.end_frame().unwrap();

    let destroyed = backend.destroyed(ObjectKind::Image);
    assert_eq!(destroyed.iter().filter(|&&raw| raw == image).count(), 1);
    assert!(matches!(
        device.destroy_texture(texture),
        Err(GpuError::StaleHandle(_))
    ));
    drop(device);
    backend.check().unwrap();
}

#[test]
fn each_submission_waits_on_the_previous_one() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    for frame in 0..3 {
        device.begin_frame(frame).unwrap();
        device.end_frame().unwrap();
    }

    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 3);
    assert!(submissions[0].wait_semaphores.is_empty());
    for pair in submissions.windows(2) {
        let chain = pair[0].signal_semaphores[0];
        assert!(pair[1].wait_semaphores.contains(&chain));
        assert_eq!(
            pair[1].wait_stages,
            vec![vk::PipelineStageFlags::ALL_COMMANDS]
        );
    }
    drop(device);
    backend.check().unwrap();
}

#[test]
fn frame_labels_follow_the_frame_index() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    device.begin_frame(0).unwrap();
    assert_eq!(device.open_scopes(), ["Frame 0".to_string()]);
    device.begin_pass("Shadows").unwrap();
    assert_eq!(device.open_scopes().len(), 2);
    device.end_pass();
    device.end_frame().unwrap();
    assert!(device.open_scopes().is_empty());

    for frame in 1..3 {
        device.begin_frame(frame).unwrap();
        device.end_frame().unwrap();
    }

    // The slot's command buffer is recycled two frames later.
    let first = backend.submissions()[0].command_buffers[0];
    assert_eq!(
        backend.labels(first),
        ["Frame 0", "Shadows", "Frame 2"].map(String::from)
    );
    drop(device);
    backend.check().unwrap();
}

#[test]
fn safe_frame_trails_by_the_ring_length() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    assert_eq!(device.frames_in_flight(), 2);

    for frame in 0..2 {
        device.begin_frame(frame).unwrap();
        assert_eq!(device.safe_frame(), None);
        device.end_frame().unwrap();
    }
    device.begin_frame(2).unwrap();
    assert_eq!(device.safe_frame(), Some(0));
    device.end_frame().unwrap();
    device.begin_frame(3).unwrap();
    assert_eq!(device.safe_frame(), Some(1));
    device.end_frame().unwrap();
    assert_eq!(device.frame_counter(), 4);

    device.wait_idle().unwrap();
    assert_eq!(device.safe_frame(), Some(3));
    assert_eq!(device.pending_deletions(), 0);
    assert_eq!(device.pending_reclaims(), 0);
}

#[test]
fn frame_calls_out_of_order_are_rejected() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    assert!(matches!(device.end_frame(), Err(GpuError::InvalidState(_))));
    device.begin_frame(0).unwrap();
    assert!(matches!(
        device.begin_frame(0),
        Err(GpuError::InvalidState(_))
    ));
    device.end_frame().unwrap();
    assert_eq!(device.frame_counter(), 1);
    drop(device);
    backend.check().unwrap();
}

#[test]
fn wait_idle_releases_everything_queued() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    device.begin_frame(0).unwrap();
    let buffer = device
        .create_buffer(BufferDesc::new(64, BufferUsage::CONSTANT), Some(&[3; 64]))
        .unwrap();
    let raw = device.buffer(buffer).unwrap().buffer.as_raw();
    device.destroy_buffer(buffer).unwrap();
    assert!(backend.is_alive(raw));

    // Idling mid-frame submits the open work first.
    device.wait_idle().unwrap();
    assert!(!backend.is_alive(raw));
    assert_eq!(device.pending_deletions(), 0);
    assert!(backend.submissions().iter().all(|submission| submission.completed));
    device.end_frame().unwrap();
    drop(device);
    backend.check().unwrap();
}

#[test]
fn failed_frame_close_keeps_uploads_for_the_next_submission() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let pixels = vec![7_u8; 4 * 4 * 4];
    let texture = device
        .create_texture(
            TextureDesc::texture_2d(4, 4, ResourceFormat::Rgba8Unorm),
            &[TextureData {
                mip_level: 0,
                array_layer: 0,
                data: &pixels,
            }],
        )
        .unwrap();
    let image = device.texture(texture).unwrap().image;

    device.begin_frame(0).unwrap();
    backend.fail(FailPoint::EndCommandBuffer);
    let err = device.end_frame().unwrap_err();
    assert!(matches!(
        err,
        GpuError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
    ));
    assert!(!device.is_lost());
    assert!(backend.submissions().is_empty());
    backend.clear_failure(FailPoint::EndCommandBuffer);

    device.begin_frame(1).unwrap();
    device.end_frame().unwrap();
    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].command_buffers.len(), 2);
    let upload_buffer = backend
        .barriers()
        .into_iter()
        .find(|(_, batch)| {
            batch.images.iter().any(|barrier| {
                barrier.image == image
                    && barrier.new_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL
            })
        })
        .map(|(command_buffer, _)| command_buffer)
        .unwrap();
    assert_eq!(submissions[0].command_buffers[0], upload_buffer);
    assert_eq!(backend.image_copies().len(), 1);

    device.wait_idle().unwrap();
    device.destroy_texture(texture).unwrap();
    drop(device);
    assert_eq!(backend.live_total(), 0);
    backend.check().unwrap();
}
