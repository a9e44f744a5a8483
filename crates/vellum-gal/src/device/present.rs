//! Swap chains and the pipeline scopes that present into them.

use std::sync::Arc;

use ash::vk;

use super::{not_ready, Device};
use crate::backend::{Backend, SwapchainCreate};
use crate::deferred::{PendingDeletion, Reclaim};
use crate::error::{GpuError, Result};
use crate::resources::{SwapChain, SwapChainDesc, SwapChainHandle};
use crate::surface::SurfaceProvider;
use crate::sync::SemaphoreLease;

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

fn is_out_of_date(err: &GpuError) -> bool {
    matches!(err, GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
}

impl<B: Backend> Device<B> {
    /// Create a surface for `window` and a swap chain sized to it.
    pub fn create_swap_chain(
        &mut self,
        window: Arc<dyn SurfaceProvider>,
        desc: SwapChainDesc,
    ) -> Result<SwapChainHandle> {
        self.check_usable()?;
        let created = self.build_swap_chain(window, desc);
        self.tracked(created)
            .inspect_err(|err| tracing::error!("Failed to create swap chain: {err}"))
    }

    fn build_swap_chain(
        &mut self,
        window: Arc<dyn SurfaceProvider>,
        desc: SwapChainDesc,
    ) -> Result<SwapChainHandle> {
        let surface = self.backend.create_surface(window.as_ref())?;
        let (width, height) = window.inner_size();
        let created = self.backend.create_swapchain(&SwapchainCreate {
            surface,
            extent: vk::Extent2D { width, height },
            vsync: desc.vsync,
            old_swapchain: vk::SwapchainKHR::null(),
            queue_family: self.graphics_queue.family,
        });
        let images = match created {
            Ok(images) => images,
            Err(err) => {
                self.backend.destroy_surface(surface);
                return Err(err);
            }
        };

        tracing::info!(
            "Created swap chain {}x{} {:?} with {} images",
            images.extent.width,
            images.extent.height,
            images.format,
            images.images.len()
        );
        Ok(self.swap_chains.insert(SwapChain {
            desc,
            window,
            surface,
            swapchain: images.swapchain,
            images: images.images,
            format: images.format,
            extent: images.extent,
            acquired: None,
            needs_recreate: false,
        }))
    }

    /// Recreate the swap chain at the window's current size.
    ///
    /// Does nothing while the window has no area; the swap chain stays
    /// marked for recreation.
    pub fn resize_swap_chain(&mut self, handle: SwapChainHandle) -> Result<()> {
        self.check_usable()?;
        let swap_chain = self
            .swap_chains
            .get(handle)
            .ok_or(GpuError::StaleHandle("SwapChainHandle"))?;
        if swap_chain.acquired.is_some() {
            return Err(GpuError::invalid_state(
                "cannot resize a swap chain while an image is acquired",
            ));
        }
        let (width, height) = swap_chain.window.inner_size();
        if width == 0 || height == 0 {
            tracing::debug!("Window has no area, postponing swap chain resize");
            return Ok(());
        }

        let created = self.backend.create_swapchain(&SwapchainCreate {
            surface: swap_chain.surface,
            extent: vk::Extent2D { width, height },
            vsync: swap_chain.desc.vsync,
            old_swapchain: swap_chain.swapchain,
            queue_family: self.graphics_queue.family,
        });
        let images = self
            .tracked(created)
            .inspect_err(|err| tracing::error!("Failed to resize swap chain: {err}"))?;

        let Some(swap_chain) = self.swap_chains.get_mut(handle) else {
            return Err(GpuError::StaleHandle("SwapChainHandle"));
        };
        let old_swapchain = std::mem::replace(&mut swap_chain.swapchain, images.swapchain);
        let old_images = std::mem::replace(&mut swap_chain.images, images.images);
        swap_chain.format = images.format;
        swap_chain.extent = images.extent;
        swap_chain.needs_recreate = false;

        for image in old_images {
            self.barrier.texture_destroyed(image);
        }
        self.defer_deletion(PendingDeletion::Swapchain(old_swapchain));
        tracing::info!("Resized swap chain to {width}x{height}");
        Ok(())
    }

    /// Destroy the swap chain, then its surface, once the frame retires.
    pub fn destroy_swap_chain(&mut self, handle: SwapChainHandle) -> Result<()> {
        let swap_chain = self
            .swap_chains
            .remove(handle)
            .ok_or(GpuError::StaleHandle("SwapChainHandle"))?;

        if let Some((_, semaphore)) = swap_chain.acquired {
            self.reclaim_later(Reclaim::Semaphore(semaphore));
        }
        for &image in &swap_chain.images {
            self.barrier.texture_destroyed(image);
        }
        self.defer_deletion(PendingDeletion::Swapchain(swap_chain.swapchain));
        self.defer_deletion(PendingDeletion::Surface {
            surface: swap_chain.surface,
            window: Some(swap_chain.window),
        });
        Ok(())
    }

    /// The image acquired by the open pipeline scope.
    pub fn swap_chain_image(&self, handle: SwapChainHandle) -> Result<vk::Image> {
        let swap_chain = self
            .swap_chains
            .get(handle)
            .ok_or(GpuError::StaleHandle("SwapChainHandle"))?;
        swap_chain
            .acquired
            .and_then(|(index, _)| swap_chain.images.get(index as usize).copied())
            .ok_or_else(|| GpuError::invalid_state("no swap chain image is acquired"))
    }

    /// Whether acquire or present reported the swap chain out of date or suboptimal.
    pub fn needs_recreate(&self, handle: SwapChainHandle) -> Result<bool> {
        self.swap_chains
            .get(handle)
            .map(|swap_chain| swap_chain.needs_recreate)
            .ok_or(GpuError::StaleHandle("SwapChainHandle"))
    }

    /// Open a named scope; with a swap chain, acquire the image it renders to.
    pub fn begin_pipeline(&mut self, name: &str, swap_chain: Option<SwapChainHandle>) -> Result<()> {
        self.check_usable()?;
        if let Some(handle) = swap_chain {
            let acquired = self.acquire_image(handle);
            self.tracked(acquired)?;
        }
        self.current_command_buffer()?;
        self.pass.begin_scope(&self.backend, name);
        Ok(())
    }

    fn acquire_image(&mut self, handle: SwapChainHandle) -> Result<()> {
        let pools = self.pools.as_mut().ok_or_else(not_ready)?;
        let swap_chain = self
            .swap_chains
            .get_mut(handle)
            .ok_or(GpuError::StaleHandle("SwapChainHandle"))?;
        if swap_chain.acquired.is_some() {
            return Err(GpuError::invalid_state("swap chain image is already acquired"));
        }

        let lease = pools.semaphores.request_semaphore(&self.backend)?;
        let semaphore = pools.semaphores.semaphore(lease)?;
        match self.backend.acquire_next_image(swap_chain.swapchain, semaphore) {
            Ok((index, suboptimal)) => {
                swap_chain.needs_recreate |= suboptimal;
                swap_chain.acquired = Some((index, lease));
                Ok(())
            }
            Err(err) => {
                // A failed acquire leaves the semaphore unsignaled.
                if let Err(reclaim) = pools.semaphores.reclaim_semaphore(lease) {
                    tracing::error!("Failed to recycle semaphore: {reclaim}");
                }
                if is_out_of_date(&err) {
                    swap_chain.needs_recreate = true;
                }
                Err(err)
            }
        }
    }

    /// Close the scope opened by [`begin_pipeline`](Self::begin_pipeline).
    ///
    /// With a swap chain, the acquired image is moved to the present layout,
    /// the frame's commands are submitted and the image is presented.
    pub fn end_pipeline(&mut self, swap_chain: Option<SwapChainHandle>) -> Result<()> {
        self.pass.end_scope(&self.backend);
        let Some(handle) = swap_chain else {
            return Ok(());
        };
        self.check_usable()?;

        let (swapchain, index, acquire_lease) = {
            let swap_chain = self
                .swap_chains
                .get_mut(handle)
                .ok_or(GpuError::StaleHandle("SwapChainHandle"))?;
            let (index, lease) = swap_chain
                .acquired
                .take()
                .ok_or_else(|| GpuError::invalid_state("no swap chain image to present"))?;
            (swap_chain.swapchain, index, lease)
        };
        let submitted = self.submit_acquired(handle, index, acquire_lease);
        let present = match submitted {
            Ok(present) => {
                self.reclaim_later(Reclaim::Semaphore(acquire_lease));
                present
            }
            Err(err) => {
                // Nothing consumed the acquire signal, so the semaphore must
                // never be handed to another acquire.
                if let Some(pools) = self.pools.as_mut() {
                    if let Err(retire) = pools.semaphores.retire_semaphore(acquire_lease) {
                        tracing::error!("Failed to retire semaphore: {retire}");
                    }
                }
                // The layout change to present never ran either.
                let image = self
                    .swap_chains
                    .get(handle)
                    .and_then(|swap_chain| swap_chain.images.get(index as usize).copied());
                if let Some(image) = image {
                    self.barrier.texture_destroyed(image);
                }
                self.mark_for_recreation(handle);
                return Err(err);
            }
        };

        let presented =
            self.backend
                .queue_present(self.graphics_queue.queue, swapchain, index, &[present]);
        match self.tracked(presented) {
            Ok(recreate) => {
                if recreate {
                    self.mark_for_recreation(handle);
                }
                Ok(())
            }
            Err(err) if is_out_of_date(&err) => {
                self.mark_for_recreation(handle);
                Ok(())
            }
            Err(err) => {
                tracing::error!("Present failed: {err}");
                Err(err)
            }
        }
    }

    /// Move the acquired image to the present layout and submit the frame's
    /// commands, waiting on the acquire semaphore. Returns the semaphore the
    /// present waits on.
    fn submit_acquired(
        &mut self,
        handle: SwapChainHandle,
        index: u32,
        acquire_lease: SemaphoreLease,
    ) -> Result<vk::Semaphore> {
        let image = self
            .swap_chains
            .get(handle)
            .and_then(|swap_chain| swap_chain.images.get(index as usize).copied())
            .ok_or_else(|| GpuError::invalid_state("acquired image index out of range"))?;

        self.current_command_buffer()?;
        self.barrier.ensure_image_layout(
            image,
            COLOR_RANGE,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        );

        let pools = self.pools.as_mut().ok_or_else(not_ready)?;
        let acquire = pools.semaphores.semaphore(acquire_lease)?;
        let present_lease = pools.semaphores.request_semaphore(&self.backend)?;
        self.reclaim_later(Reclaim::Semaphore(present_lease));
        let present = self
            .pools
            .as_ref()
            .ok_or_else(not_ready)?
            .semaphores
            .semaphore(present_lease)?;

        self.submit(
            Some(acquire),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            Some(present),
        )?;
        Ok(present)
    }

    fn mark_for_recreation(&mut self, handle: SwapChainHandle) {
        if let Some(swap_chain) = self.swap_chains.get_mut(handle) {
            tracing::debug!("Swap chain marked for recreation");
            swap_chain.needs_recreate = true;
        }
    }
}
