//! Pool recycling across frames.

use ash::vk;
use vellum_gal::{BufferDesc, BufferUsage, Device, PoolStats};
use vellum_test::{ready_device, ready_device_with, test_config, FakeBackend, FakeConfig, ObjectKind};

fn run_frames(device: &mut Device<FakeBackend>, frames: std::ops::Range<u64>) {
    for frame in frames {
        device.begin_frame(frame).unwrap();
        device.end_frame().unwrap();
    }
}

#[test]
fn steady_state_allocates_nothing_new() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();

    run_frames(&mut device, 0..4);
    let warm = device.pool_stats();
    run_frames(&mut device, 4..20);
    let stats = device.pool_stats();

    assert_eq!(warm, stats);
    assert_eq!(stats.fences_allocated, 2);
    assert_eq!(stats.command_buffers_allocated, 2);
    assert!(stats.semaphores_allocated <= 3, "{stats:?}");
    assert_eq!(backend.created(ObjectKind::Fence), stats.fences_allocated);
    assert_eq!(backend.created(ObjectKind::Semaphore), stats.semaphores_allocated);
    drop(device);
    backend.check().unwrap();
}

#[test]
fn uninitialized_device_reports_empty_pools() {
    let device = Device::new(FakeBackend::default(), test_config());
    assert_eq!(device.pool_stats(), PoolStats::default());
}

#[test]
fn init_creates_the_main_and_init_command_pools() {
    let backend = FakeBackend::default();
    let _device = ready_device(&backend).unwrap();
    assert_eq!(backend.live(ObjectKind::CommandPool), 2);
    assert_eq!(backend.live(ObjectKind::Fence), 0);
    assert_eq!(backend.live(ObjectKind::Semaphore), 0);
}

#[test]
fn staging_buffer_returns_to_the_pool_after_its_frame() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let target = device
        .create_buffer(BufferDesc::new(1024, BufferUsage::CONSTANT), None)
        .unwrap();

    device.begin_frame(0).unwrap();
    device.update_buffer(target, 0, &[1; 128]).unwrap();
    device.end_frame().unwrap();
    run_frames(&mut device, 1..2);

    device.begin_frame(2).unwrap();
    assert_eq!(device.pool_stats().staging_buffers_available, 1);
    device.update_buffer(target, 512, &[2; 128]).unwrap();
    device.end_frame().unwrap();

    let stats = device.pool_stats();
    assert_eq!(stats.staging_buffers_allocated, 1);
    assert_eq!(backend.buffer_copies().len(), 2);
    drop(device);
    backend.check().unwrap();
}

#[test]
fn update_buffer_checks_bounds() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    let target = device
        .create_buffer(BufferDesc::new(64, BufferUsage::STORAGE), None)
        .unwrap();

    device.begin_frame(0).unwrap();
    assert!(device.update_buffer(target, 60, &[0; 8]).is_err());
    assert!(device.update_buffer(target, u64::MAX, &[0; 1]).is_err());
    device.update_buffer(target, 56, &[0; 8]).unwrap();
    device.update_buffer(target, 64, &[]).unwrap();
    device.end_frame().unwrap();
    assert_eq!(backend.buffer_copies().len(), 1);
}

#[test]
fn exhausted_descriptor_pool_is_retired_and_reused() {
    let backend = FakeBackend::new(FakeConfig {
        descriptor_pool_capacity: Some(1),
        ..FakeConfig::default()
    });
    let mut device = ready_device_with(&backend, test_config().with_descriptor_sets_per_pool(1))
        .unwrap();
    let layout = vk::DescriptorSetLayout::null();

    device.begin_frame(0).unwrap();
    let first = device.allocate_descriptor_set(layout).unwrap();
    let second = device.allocate_descriptor_set(layout).unwrap();
    assert_ne!(first, second);
    assert_eq!(device.pool_stats().descriptor_pools_allocated, 2);
    device.end_frame().unwrap();
    run_frames(&mut device, 1..2);

    // Frame 0's retired pool is back and takes over once the current one fills.
    device.begin_frame(2).unwrap();
    assert_eq!(device.pool_stats().descriptor_pools_available, 1);
    device.allocate_descriptor_set(layout).unwrap();
    device.end_frame().unwrap();

    assert_eq!(device.pool_stats().descriptor_pools_allocated, 2);
    assert_eq!(backend.created(ObjectKind::DescriptorPool), 2);
    drop(device);
    assert_eq!(backend.live(ObjectKind::DescriptorPool), 0);
    backend.check().unwrap();
}
