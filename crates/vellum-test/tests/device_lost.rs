//! Behavior once the GPU stops answering.

use ash::vk;
use vellum_gal::{BufferDesc, BufferUsage, GpuError, ResourceFormat, TextureDesc};
use vellum_test::{ready_device, FailPoint, FakeBackend, GpuTiming};

#[test]
fn hung_gpu_times_out_and_loses_the_device() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let texture = device
        .create_texture(TextureDesc::texture_2d(8, 8, ResourceFormat::Rgba8Unorm), &[])
        .unwrap();
    backend.set_timing(GpuTiming::Hang);

    for frame in 0..2 {
        device.begin_frame(frame).unwrap();
        device.end_frame().unwrap();
    }
    let err = device.begin_frame(2).unwrap_err();
    assert!(matches!(err, GpuError::FenceTimeout { .. }));
    assert!(err.is_device_lost());
    assert!(device.is_lost());

    assert!(matches!(
        device.create_buffer(BufferDesc::new(16, BufferUsage::VERTEX), None),
        Err(GpuError::DeviceLost(_))
    ));
    assert!(matches!(device.begin_frame(2), Err(GpuError::DeviceLost(_))));
    device.destroy_texture(texture).unwrap();

    device.shutdown();
    assert_eq!(backend.live_total(), 0);
    backend.check().unwrap();
}

#[test]
fn lost_device_on_submit_ends_the_frame() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let buffer = device
        .create_buffer(BufferDesc::new(64, BufferUsage::CONSTANT), None)
        .unwrap();

    device.begin_frame(0).unwrap();
    device.update_buffer(buffer, 0, &[1; 64]).unwrap();
    backend.fail(FailPoint::DeviceLostOnSubmit);
    let err = device.end_frame().unwrap_err();
    assert!(matches!(
        err,
        GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)
    ));
    assert!(device.is_lost());
    assert!(backend.is_lost());
    assert_eq!(device.frame_counter(), 1);

    // The frame still closed; later frames report the loss.
    assert!(matches!(device.begin_frame(1), Err(GpuError::DeviceLost(_))));
    assert!(matches!(
        device.create_texture(TextureDesc::texture_2d(4, 4, ResourceFormat::R8Unorm), &[]),
        Err(GpuError::DeviceLost(_))
    ));
    device.destroy_buffer(buffer).unwrap();

    drop(device);
    assert_eq!(backend.live_total(), 0);
    backend.check().unwrap();
}

#[test]
fn wait_idle_on_a_hung_gpu_reports_the_loss() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    device.begin_frame(0).unwrap();
    device.end_frame().unwrap();
    backend.set_timing(GpuTiming::Hang);

    let err = device.wait_idle().unwrap_err();
    assert!(err.is_device_lost());
    assert!(device.is_lost());
    assert_eq!(device.pending_reclaims(), 0);

    device.shutdown();
    device.shutdown();
    assert_eq!(backend.live_total(), 0);
    backend.check().unwrap();
}
