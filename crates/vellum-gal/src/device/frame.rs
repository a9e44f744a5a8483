//! Frame lifecycle, submission and command recording helpers.

use ash::vk;

use super::{delete_pending_resources, not_ready, reclaim_resources, Device, DeviceState};
use crate::backend::{Backend, SubmitBatch};
use crate::barrier::PipelineBarrier;
use crate::command::CommandPoolId;
use crate::deferred::Reclaim;
use crate::error::{GpuError, Result};
use crate::frame::OpenCommandBuffer;
use crate::init_context::record_buffer_upload;
use crate::query::Timestamp;
use crate::resources::BufferHandle;
use crate::sync;

impl<B: Backend> Device<B> {
    /// Start recording frame `frame_index`.
    ///
    /// Waits for the fences of the last frame that used the current slot,
    /// then destroys and recycles everything that frame left behind.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn begin_frame(&mut self, frame_index: u64) -> Result<()> {
        self.check_usable()?;
        if self.in_frame {
            return Err(GpuError::invalid_state("begin_frame called twice without end_frame"));
        }
        self.process_requests();

        let (slice, timeout) = (self.config.fence_wait_slice, self.config.fence_timeout);
        let fences = std::mem::take(&mut self.ring.current_mut().fences);
        let waited = fences
            .iter()
            .try_for_each(|&fence| sync::wait_for_fence(&self.backend, fence, slice, timeout));
        if let Err(err) = waited {
            self.ring.current_mut().fences = fences;
            self.note_error(&err);
            return Err(err);
        }

        let slot = self.ring.current_mut();
        let deletions = slot.deletions.take_previous();
        let reclaims = slot.reclaims.take_previous();
        let completed = slot.frame.replace(self.frame_counter);
        if !deletions.is_empty() {
            tracing::trace!("Destroying {} objects retired by frame {completed:?}", deletions.len());
        }
        delete_pending_resources(&self.backend, deletions);
        if let Some(pools) = self.pools.as_mut() {
            reclaim_resources(&self.backend, pools, reclaims);
        }
        if completed > self.safe_frame {
            self.safe_frame = completed;
        }

        self.in_frame = true;
        self.current_command_buffer()?;
        self.pass
            .begin_scope(&self.backend, &format!("Frame {frame_index}"));
        Ok(())
    }

    /// Submit the frame's commands and move on to the next slot.
    ///
    /// The slot advances even when submission fails.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn end_frame(&mut self) -> Result<()> {
        if self.state != DeviceState::Ready {
            return Err(GpuError::invalid_state("end_frame on an uninitialized device"));
        }
        if !self.in_frame {
            return Err(GpuError::invalid_state("end_frame without begin_frame"));
        }

        self.pass.close_scopes(&self.backend);
        let init_pending = self
            .pools
            .as_ref()
            .is_some_and(|pools| pools.init.has_pending());
        let outcome = if self.lost.is_some() {
            self.discard_open_command_buffer();
            Ok(())
        } else if init_pending || self.ring.current().command_buffer.is_some() {
            self.submit(None, vk::PipelineStageFlags::empty(), None)
                .map(|_| ())
        } else {
            Ok(())
        };

        self.ring.current_mut().rotate();
        self.ring.advance();
        self.frame_counter += 1;
        self.in_frame = false;
        outcome
    }

    /// Submit the init commands and the current command buffer in one batch.
    ///
    /// The batch waits on the previous submission and on `wait` (at
    /// `wait_stage`), and signals `signal` when given. Returns the fence that
    /// signals on completion; it belongs to the current slot.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit(
        &mut self,
        wait: Option<vk::Semaphore>,
        wait_stage: vk::PipelineStageFlags,
        signal: Option<vk::Semaphore>,
    ) -> Result<vk::Fence> {
        self.check_usable()?;

        let mut retire = Vec::new();
        let outcome = self.record_submission(&mut retire, wait, wait_stage, signal);
        if outcome.is_err() {
            // A query pool reset recorded in the lost commands never ran.
            if let Some(pools) = self.pools.as_mut() {
                retire.extend(pools.queries.retire_current().map(Reclaim::QueryPool));
            }
        }
        for entry in retire {
            self.reclaim_later(entry);
        }
        if let Err(err) = &outcome {
            tracing::error!("Queue submission failed: {err}");
        }
        self.tracked(outcome)
    }

    /// Everything pushed to `retire` is reclaimed after the current slot's
    /// fences, whether or not the submission went through.
    fn record_submission(
        &mut self,
        retire: &mut Vec<Reclaim<B::Allocation>>,
        wait: Option<vk::Semaphore>,
        wait_stage: vk::PipelineStageFlags,
        signal: Option<vk::Semaphore>,
    ) -> Result<vk::Fence> {
        let backend = &self.backend;
        let pools = self.pools.as_mut().ok_or_else(not_ready)?;

        // The frame's buffer is closed first so a failure leaves the init
        // work queued for the next submission.
        let mut main = None;
        if let Some(open) = self.ring.current_mut().command_buffer.take() {
            retire.push(Reclaim::CommandBuffer {
                lease: open.lease,
                pool: CommandPoolId::Main,
            });
            for batch in self.barrier.flush() {
                backend.cmd_pipeline_barrier(open.handle, &batch);
            }
            self.barrier.set_command_buffer(None);
            self.pass.detach(backend);
            backend.end_command_buffer(open.handle)?;
            main = Some(open.handle);
        }

        let init = match pools.init.take_finished(backend) {
            Ok(init) => init,
            Err(err) => {
                for staging in pools.init.take_orphaned_staging() {
                    pools.staging.reclaim_buffer(staging);
                }
                return Err(err);
            }
        };

        let mut command_buffers = Vec::with_capacity(2);
        if let Some(init) = init {
            command_buffers.push(init.command_buffer);
            retire.push(Reclaim::CommandBuffer {
                lease: init.lease,
                pool: CommandPoolId::Init,
            });
            retire.extend(init.staging.into_iter().map(Reclaim::StagingBuffer));
        }
        command_buffers.extend(main);

        let mut wait_semaphores = Vec::with_capacity(2);
        let mut wait_stages = Vec::with_capacity(2);
        let previous = self.last_submission;
        if let Some(previous) = previous {
            wait_semaphores.push(pools.semaphores.semaphore(previous)?);
            wait_stages.push(vk::PipelineStageFlags::ALL_COMMANDS);
        }
        if let Some(wait) = wait {
            wait_semaphores.push(wait);
            wait_stages.push(if wait_stage.is_empty() {
                vk::PipelineStageFlags::ALL_COMMANDS
            } else {
                wait_stage
            });
        }

        let fence_lease = pools.fences.request_fence(backend)?;
        retire.push(Reclaim::Fence(fence_lease));
        let fence = pools.fences.fence(fence_lease)?;

        let chain_lease = pools.semaphores.request_semaphore(backend)?;
        let submitted = pools.semaphores.semaphore(chain_lease).and_then(|chain| {
            let mut signal_semaphores = vec![chain];
            signal_semaphores.extend(signal);
            backend.queue_submit(
                self.graphics_queue.queue,
                &SubmitBatch {
                    command_buffers: &command_buffers,
                    wait_semaphores: &wait_semaphores,
                    wait_stages: &wait_stages,
                    signal_semaphores: &signal_semaphores,
                },
                fence,
            )
        });
        if let Err(err) = submitted {
            // The previous semaphore was not waited on and stays the chain head.
            retire.push(Reclaim::Semaphore(chain_lease));
            return Err(err);
        }

        retire.extend(previous.map(Reclaim::Semaphore));
        self.last_submission = Some(chain_lease);
        self.ring.current_mut().fences.push(fence);
        tracing::trace!(
            command_buffers = command_buffers.len(),
            waits = wait_semaphores.len(),
            "submitted"
        );
        Ok(fence)
    }

    /// Hand the open command buffer back unsubmitted.
    fn discard_open_command_buffer(&mut self) {
        if let Some(open) = self.ring.current_mut().command_buffer.take() {
            self.reclaim_later(Reclaim::CommandBuffer {
                lease: open.lease,
                pool: CommandPoolId::Main,
            });
            let abandoned = self
                .pools
                .as_mut()
                .and_then(|pools| pools.queries.retire_current());
            if let Some(lease) = abandoned {
                self.reclaim_later(Reclaim::QueryPool(lease));
            }
        }
        self.barrier.discard_pending();
        self.barrier.set_command_buffer(None);
        self.pass.reset();
    }

    /// The current slot's command buffer, begun on first use.
    pub fn current_command_buffer(&mut self) -> Result<vk::CommandBuffer> {
        self.check_usable()?;
        if let Some(open) = self.ring.current().command_buffer {
            return Ok(open.handle);
        }

        let pools = self.pools.as_mut().ok_or_else(not_ready)?;
        let lease = pools.command_buffers.request_command_buffer(&self.backend)?;
        let handle = pools.command_buffers.command_buffer(lease)?;
        if let Err(err) = self.backend.begin_command_buffer(handle) {
            if let Err(reclaim) = pools
                .command_buffers
                .reclaim_command_buffer(&self.backend, lease)
            {
                tracing::error!("Failed to recycle command buffer: {reclaim}");
            }
            return self.tracked(Err(err));
        }

        self.ring.current_mut().command_buffer = Some(OpenCommandBuffer { lease, handle });
        self.barrier.set_command_buffer(Some(handle));
        self.pass.attach(&self.backend, handle);
        Ok(handle)
    }

    /// Barrier tracker of the current command buffer.
    pub fn current_pipeline_barrier(&mut self) -> &mut PipelineBarrier {
        &mut self.barrier
    }

    /// Record every pending transition into the current command buffer.
    pub fn flush_barriers(&mut self) -> Result<()> {
        if !self.barrier.is_pending() {
            return Ok(());
        }
        let command_buffer = self.current_command_buffer()?;
        for batch in self.barrier.flush() {
            self.backend.cmd_pipeline_barrier(command_buffer, &batch);
        }
        Ok(())
    }

    /// Copy regions between two buffers on the current command buffer.
    pub fn copy_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[vk::BufferCopy],
    ) -> Result<()> {
        self.check_usable()?;
        let stages = self.capabilities.shader_pipeline_stages;
        let (src_buffer, src_scope) = {
            let buffer = self
                .buffers
                .get(src)
                .ok_or(GpuError::StaleHandle("BufferHandle"))?;
            (buffer.buffer, buffer.desc.usage.access_scope(stages))
        };
        let (dst_buffer, dst_scope) = {
            let buffer = self
                .buffers
                .get(dst)
                .ok_or(GpuError::StaleHandle("BufferHandle"))?;
            (buffer.buffer, buffer.desc.usage.access_scope(stages))
        };
        if regions.is_empty() {
            return Ok(());
        }

        let command_buffer = self.current_command_buffer()?;
        for region in regions {
            self.barrier.access_buffer(
                src_buffer,
                region.src_offset,
                region.size,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_READ,
                src_scope.0,
                src_scope.1,
            );
            self.barrier.access_buffer(
                dst_buffer,
                region.dst_offset,
                region.size,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
                dst_scope.0,
                dst_scope.1,
            );
        }
        for batch in self.barrier.flush() {
            self.backend.cmd_pipeline_barrier(command_buffer, &batch);
        }
        self.backend
            .cmd_copy_buffer(command_buffer, src_buffer, dst_buffer, regions);
        for region in regions {
            self.barrier.access_buffer(
                dst_buffer,
                region.dst_offset,
                region.size,
                dst_scope.0,
                dst_scope.1,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
            );
        }
        Ok(())
    }

    /// Overwrite part of a buffer through a staging copy on the current
    /// command buffer. The new contents are visible to commands recorded after
    /// this call.
    pub fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        self.check_usable()?;
        let (native, size, usage) = {
            let buffer = self
                .buffers
                .get(buffer)
                .ok_or(GpuError::StaleHandle("BufferHandle"))?;
            (buffer.buffer, buffer.desc.size, buffer.desc.usage)
        };
        match offset.checked_add(data.len() as u64) {
            Some(end) if end <= size => {}
            _ => {
                return Err(GpuError::InvalidDescription(format!(
                    "update of {} bytes at {offset} overflows a buffer of {size} bytes",
                    data.len()
                )))
            }
        }
        if data.is_empty() {
            return Ok(());
        }

        let command_buffer = self.current_command_buffer()?;
        let consumer = usage.access_scope(self.capabilities.shader_pipeline_stages);
        let pools = self.pools.as_mut().ok_or_else(not_ready)?;
        let staging = record_buffer_upload(
            &self.backend,
            &mut pools.staging,
            &mut self.barrier,
            command_buffer,
            native,
            offset,
            data,
            consumer,
        );
        let staging = self.tracked(staging)?;
        self.reclaim_later(Reclaim::StagingBuffer(staging));
        Ok(())
    }

    /// Allocate a descriptor set valid until the current frame retires.
    ///
    /// A full pool is retired and a fresh one takes over.
    pub fn allocate_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        self.check_usable()?;
        let pools = self.pools.as_mut().ok_or_else(not_ready)?;
        let pool = pools.descriptors.current_pool(&self.backend)?;
        match self.backend.allocate_descriptor_set(pool, layout) {
            Err(GpuError::Vulkan(
                vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL,
            )) => {
                tracing::debug!("Descriptor pool exhausted, retiring it");
                if let Some(retired) = pools.descriptors.retire_current() {
                    self.ring
                        .current_mut()
                        .reclaims
                        .push(Reclaim::DescriptorPool(retired));
                }
                let pool = pools.descriptors.current_pool(&self.backend)?;
                self.backend.allocate_descriptor_set(pool, layout)
            }
            other => other,
        }
    }

    /// Whether [`get_timestamp`](Self::get_timestamp) can be used.
    pub fn supports_timestamps(&self) -> bool {
        self.pools
            .as_ref()
            .is_some_and(|pools| pools.queries.is_supported())
    }

    /// Write a GPU timestamp after everything recorded so far.
    pub fn get_timestamp(&mut self) -> Result<Timestamp> {
        let command_buffer = self.current_command_buffer()?;
        let pools = self.pools.as_mut().ok_or_else(not_ready)?;
        let (timestamp, full) =
            pools
                .queries
                .write_timestamp(&self.backend, command_buffer, self.frame_counter)?;
        if let Some(full) = full {
            tracing::trace!("Timestamp pool filled, retiring it");
            self.reclaim_later(Reclaim::QueryPool(full));
        }
        Ok(timestamp)
    }

    /// GPU time of `timestamp` on the device's clock.
    ///
    /// `None` until the frame that carried the write retired; only the
    /// difference between two timestamps is meaningful.
    pub fn timestamp_result(&self, timestamp: Timestamp) -> Result<Option<std::time::Duration>> {
        self.check_usable()?;
        let pools = self.pools.as_ref().ok_or_else(not_ready)?;
        pools
            .queries
            .result(&self.backend, timestamp, self.safe_frame)
    }

    /// Open a debug-label scope on the default pass.
    pub fn begin_pass(&mut self, name: &str) -> Result<()> {
        self.current_command_buffer()?;
        self.pass.begin_scope(&self.backend, name);
        Ok(())
    }

    pub fn end_pass(&mut self) {
        self.pass.end_scope(&self.backend);
    }

    /// Names of the open label scopes, outermost first.
    pub fn open_scopes(&self) -> &[String] {
        self.pass.scopes()
    }
}
