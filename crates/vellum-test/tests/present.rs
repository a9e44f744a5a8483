//! Swap chain creation, presentation and recreation.

use ash::vk::{self, Handle};
use vellum_gal::{Device, GpuError, SwapChainDesc, SwapChainHandle};
use vellum_test::{ready_device, FailPoint, FakeBackend, FakeWindow, ObjectKind};

fn with_swap_chain(
    backend: &FakeBackend,
    window: &std::sync::Arc<FakeWindow>,
) -> (Device<FakeBackend>, SwapChainHandle) {
    let mut device = ready_device(backend).unwrap();
    let swap_chain = device
        .create_swap_chain(window.clone(), SwapChainDesc { vsync: true })
        .unwrap();
    (device, swap_chain)
}

fn present_frame(
    device: &mut Device<FakeBackend>,
    swap_chain: SwapChainHandle,
    frame: u64,
) -> vellum_gal::Result<()> {
    device.begin_frame(frame)?;
    let outcome = device
        .begin_pipeline("Main", Some(swap_chain))
        .and_then(|()| device.end_pipeline(Some(swap_chain)));
    device.end_frame()?;
    outcome
}

#[test]
fn presenting_waits_for_the_acquired_image() {
    let backend = FakeBackend::default();
    let window = FakeWindow::new(640, 480);
    let (mut device, swap_chain) = with_swap_chain(&backend, &window);
    assert_eq!(
        device.swap_chain(swap_chain).unwrap().extent,
        vk::Extent2D {
            width: 640,
            height: 480
        }
    );

    device.begin_frame(0).unwrap();
    device.begin_pipeline("Main", Some(swap_chain)).unwrap();
    let image = device.swap_chain_image(swap_chain).unwrap();
    assert_eq!(device.open_scopes().last().map(String::as_str), Some("Main"));
    device.end_pipeline(Some(swap_chain)).unwrap();
    device.end_frame().unwrap();

    let raw_swapchain = device.swap_chain(swap_chain).unwrap().swapchain.as_raw();
    assert_eq!(backend.presents(), vec![(raw_swapchain, 0)]);
    // One submission: the frame's commands go out with the present.
    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].wait_semaphores.len(), 1);
    assert_eq!(
        submissions[0].wait_stages,
        vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
    );
    assert_eq!(submissions[0].signal_semaphores.len(), 2);

    let to_present = backend
        .barriers()
        .into_iter()
        .flat_map(|(_, batch)| batch.images)
        .find(|barrier| barrier.image == image)
        .unwrap();
    assert_eq!(to_present.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    assert!(device.swap_chain_image(swap_chain).is_err());
    drop(device);
    backend.check().unwrap();
}

#[test]
fn presents_cycle_through_the_images() {
    let backend = FakeBackend::default();
    let window = FakeWindow::new(320, 240);
    let (mut device, swap_chain) = with_swap_chain(&backend, &window);

    for frame in 0..6 {
        present_frame(&mut device, swap_chain, frame).unwrap();
    }
    let indices: Vec<_> = backend.presents().into_iter().map(|(_, index)| index).collect();
    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    assert!(device.pool_stats().semaphores_allocated <= 8);
    assert!(!device.needs_recreate(swap_chain).unwrap());
    drop(device);
    backend.check().unwrap();
}

#[test]
fn out_of_date_acquire_marks_the_swap_chain() {
    let backend = FakeBackend::default();
    let window = FakeWindow::new(320, 240);
    let (mut device, swap_chain) = with_swap_chain(&backend, &window);
    backend.fail(FailPoint::AcquireOutOfDate);

    device.begin_frame(0).unwrap();
    let err = device.begin_pipeline("Main", Some(swap_chain)).unwrap_err();
    assert!(matches!(
        err,
        GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)
    ));
    assert!(!device.is_lost());
    assert!(device.needs_recreate(swap_chain).unwrap());
    device.end_frame().unwrap();

    backend.clear_failure(FailPoint::AcquireOutOfDate);
    window.resize(800, 600);
    device.resize_swap_chain(swap_chain).unwrap();
    assert!(!device.needs_recreate(swap_chain).unwrap());
    present_frame(&mut device, swap_chain, 1).unwrap();
    assert_eq!(backend.presents().len(), 1);
    drop(device);
    backend.check().unwrap();
}

#[test]
fn out_of_date_present_is_not_an_error() {
    let backend = FakeBackend::default();
    let window = FakeWindow::new(320, 240);
    let (mut device, swap_chain) = with_swap_chain(&backend, &window);
    backend.fail(FailPoint::PresentOutOfDate);

    present_frame(&mut device, swap_chain, 0).unwrap();
    assert!(backend.presents().is_empty());
    assert!(device.needs_recreate(swap_chain).unwrap());
    drop(device);
    backend.check().unwrap();
}

#[test]
fn suboptimal_images_still_present() {
    for point in [FailPoint::AcquireSuboptimal, FailPoint::PresentSuboptimal] {
        let backend = FakeBackend::default();
        let window = FakeWindow::new(320, 240);
        let (mut device, swap_chain) = with_swap_chain(&backend, &window);
        backend.fail(point);

        present_frame(&mut device, swap_chain, 0).unwrap();
        assert_eq!(backend.presents().len(), 1, "{point:?}");
        assert!(device.needs_recreate(swap_chain).unwrap(), "{point:?}");
        drop(device);
        backend.check().unwrap();
    }
}

#[test]
fn failed_submit_never_reuses_the_acquire_semaphore() {
    let backend = FakeBackend::default();
    let window = FakeWindow::new(320, 240);
    let (mut device, swap_chain) = with_swap_chain(&backend, &window);

    device.begin_frame(0).unwrap();
    device.begin_pipeline("Main", Some(swap_chain)).unwrap();
    backend.fail(FailPoint::QueueSubmit);
    let err = device.end_pipeline(Some(swap_chain)).unwrap_err();
    assert!(matches!(
        err,
        GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    ));
    assert!(!device.is_lost());
    assert!(device.needs_recreate(swap_chain).unwrap());
    assert!(device.swap_chain_image(swap_chain).is_err());
    backend.clear_failure(FailPoint::QueueSubmit);
    device.end_frame().unwrap();

    device.resize_swap_chain(swap_chain).unwrap();
    for frame in 1..6 {
        present_frame(&mut device, swap_chain, frame).unwrap();
    }
    assert_eq!(backend.presents().len(), 5);
    device.wait_idle().unwrap();
    drop(device);
    assert_eq!(backend.live(ObjectKind::Semaphore), 0);
    backend.check().unwrap();
}

#[test]
fn resize_retires_the_old_swapchain() {
    let backend = FakeBackend::default();
    let window = FakeWindow::new(320, 240);
    let (mut device, swap_chain) = with_swap_chain(&backend, &window);
    present_frame(&mut device, swap_chain, 0).unwrap();
    let old = device.swap_chain(swap_chain).unwrap().swapchain.as_raw();

    window.resize(1024, 768);
    device.resize_swap_chain(swap_chain).unwrap();
    let resized = device.swap_chain(swap_chain).unwrap();
    assert_ne!(resized.swapchain.as_raw(), old);
    assert_eq!(resized.extent.width, 1024);
    assert!(backend.is_alive(old));

    // Retired with frame 1, so it goes once that frame's slot comes round.
    present_frame(&mut device, swap_chain, 1).unwrap();
    present_frame(&mut device, swap_chain, 2).unwrap();
    assert!(backend.is_alive(old));
    present_frame(&mut device, swap_chain, 3).unwrap();
    assert!(!backend.is_alive(old));
    assert_eq!(backend.live(ObjectKind::Swapchain), 1);
    drop(device);
    backend.check().unwrap();
}

#[test]
fn resize_is_postponed_while_the_window_has_no_area() {
    let backend = FakeBackend::default();
    let window = FakeWindow::new(320, 240);
    let (mut device, swap_chain) = with_swap_chain(&backend, &window);

    window.resize(0, 240);
    device.resize_swap_chain(swap_chain).unwrap();
    assert_eq!(backend.created(ObjectKind::Swapchain), 1);
    assert_eq!(device.swap_chain(swap_chain).unwrap().extent.width, 320);
}

#[test]
fn resize_while_acquired_is_rejected() {
    let backend = FakeBackend::default();
    let window = FakeWindow::new(320, 240);
    let (mut device, swap_chain) = with_swap_chain(&backend, &window);

    device.begin_frame(0).unwrap();
    device.begin_pipeline("Main", Some(swap_chain)).unwrap();
    window.resize(640, 480);
    assert!(matches!(
        device.resize_swap_chain(swap_chain),
        Err(GpuError::InvalidState(_))
    ));
    device.end_pipeline(Some(swap_chain)).unwrap();
    device.end_frame().unwrap();
    device.resize_swap_chain(swap_chain).unwrap();
    drop(device);
    backend.check().unwrap();
}

#[test]
fn destroyed_swap_chain_releases_its_surface_last() {
    let backend = FakeBackend::default();
    let window = FakeWindow::new(320, 240);
    let (mut device, swap_chain) = with_swap_chain(&backend, &window);
    present_frame(&mut device, swap_chain, 0).unwrap();

    device.begin_frame(1).unwrap();
    device.destroy_swap_chain(swap_chain).unwrap();
    assert!(matches!(
        device.swap_chain_image(swap_chain),
        Err(GpuError::StaleHandle(_))
    ));
    assert_eq!(backend.live(ObjectKind::Surface), 1);
    device.end_frame().unwrap();

    device.wait_idle().unwrap();
    assert_eq!(backend.live(ObjectKind::Swapchain), 0);
    assert_eq!(backend.live(ObjectKind::Surface), 0);
    let order: Vec<_> = backend
        .events()
        .into_iter()
        .filter_map(|event| match event {
            vellum_test::Event::Destroyed(kind @ (ObjectKind::Swapchain | ObjectKind::Surface), _) => {
                Some(kind)
            }
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![ObjectKind::Swapchain, ObjectKind::Surface]);
    drop(device);
    backend.check().unwrap();
}

#[test]
fn failed_swap_chain_creation_releases_the_surface() {
    let backend = FakeBackend::default();
    let mut device = ready_device(&backend).unwrap();
    backend.fail(FailPoint::CreateSwapchain);

    let err = device
        .create_swap_chain(FakeWindow::new(64, 64), SwapChainDesc::default())
        .unwrap_err();
    assert!(matches!(err, GpuError::SwapchainCreation(_)));
    assert_eq!(backend.created(ObjectKind::Surface), 1);
    assert_eq!(backend.live(ObjectKind::Surface), 0);
}
