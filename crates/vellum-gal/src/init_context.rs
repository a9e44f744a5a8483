//! Recording of resource initialization work.
//!
//! Initial layout transitions and uploads go into a command buffer of their
//! own. The device submits it ahead of the frame's main command buffer, so
//! rendering code can assume every new resource already rests in its
//! preferred state.

use ash::vk;

use crate::backend::Backend;
use crate::barrier::PipelineBarrier;
use crate::command::{CommandBufferLease, CommandBufferPool};
use crate::error::Result;
use crate::frame::OpenCommandBuffer;
use crate::resources::{Texture, TextureData};
use crate::staging::{StagingBuffer, StagingBufferPool};

/// Initialization commands ready for submission.
pub struct FinishedInit<A> {
    pub lease: CommandBufferLease,
    pub command_buffer: vk::CommandBuffer,
    /// Staging buffers the commands read from.
    pub staging: Vec<StagingBuffer<A>>,
}

pub struct InitContext<A> {
    pool: CommandBufferPool,
    barrier: PipelineBarrier,
    open: Option<OpenCommandBuffer>,
    staging: Vec<StagingBuffer<A>>,
}

impl<A> InitContext<A> {
    pub fn new<B: Backend>(backend: &B, queue_family: u32) -> Result<Self> {
        Ok(Self {
            pool: CommandBufferPool::new(backend, queue_family)?,
            barrier: PipelineBarrier::new(),
            open: None,
            staging: Vec::new(),
        })
    }

    pub fn has_pending(&self) -> bool {
        self.open.is_some()
    }

    fn command_buffer<B: Backend>(&mut self, backend: &B) -> Result<vk::CommandBuffer> {
        if let Some(open) = self.open {
            return Ok(open.handle);
        }

        let lease = self.pool.request_command_buffer(backend)?;
        let handle = self.pool.command_buffer(lease)?;
        if let Err(err) = backend.begin_command_buffer(handle) {
            self.pool.reclaim_command_buffer(backend, lease)?;
            return Err(err);
        }
        self.barrier.set_command_buffer(Some(handle));
        self.open = Some(OpenCommandBuffer { lease, handle });
        Ok(handle)
    }

    fn flush_barriers<B: Backend>(&mut self, backend: &B, command_buffer: vk::CommandBuffer) {
        for batch in self.barrier.flush() {
            backend.cmd_pipeline_barrier(command_buffer, &batch);
        }
    }

    /// Record the first transition of `texture` and the upload of `uploads`.
    ///
    /// The texture ends in `preferred` (layout, stages, access).
    pub fn init_texture<B>(
        &mut self,
        backend: &B,
        staging_pool: &mut StagingBufferPool<A>,
        texture: &Texture<A>,
        uploads: &[TextureData<'_>],
        preferred: (vk::ImageLayout, vk::PipelineStageFlags, vk::AccessFlags),
    ) -> Result<()>
    where
        B: Backend<Allocation = A>,
    {
        let command_buffer = self.command_buffer(backend)?;
        let range = texture.desc.full_range();

        if !uploads.is_empty() {
            self.barrier.ensure_image_layout(
                texture.image,
                range,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE,
            );
            self.flush_barriers(backend, command_buffer);

            let alignment = u64::from(texture.desc.format.block_size()).max(4);
            for upload in uploads {
                let mut staging =
                    staging_pool.allocate_buffer(backend, alignment, upload.data.len() as u64)?;
                if let Err(err) = backend.write_allocation(&mut staging.allocation, 0, upload.data) {
                    staging_pool.reclaim_buffer(staging);
                    return Err(err);
                }

                let region = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: range.aspect_mask,
                        mip_level: upload.mip_level,
                        base_array_layer: upload.array_layer,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D::default(),
                    image_extent: texture.desc.mip_extent(upload.mip_level),
                };
                backend.cmd_copy_buffer_to_image(
                    command_buffer,
                    staging.buffer,
                    texture.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                self.staging.push(staging);
            }
        }

        let (layout, stages, access) = preferred;
        self.barrier
            .ensure_image_layout(texture.image, range, layout, stages, access);
        Ok(())
    }

    /// Record a copy of `data` into `buffer` at `offset`, made visible to the
    /// buffer's consumers (`stages`, `access`).
    #[allow(clippy::too_many_arguments)]
    pub fn upload_buffer<B>(
        &mut self,
        backend: &B,
        staging_pool: &mut StagingBufferPool<A>,
        buffer: vk::Buffer,
        offset: u64,
        data: &[u8],
        stages: vk::PipelineStageFlags,
        access: vk::AccessFlags,
    ) -> Result<()>
    where
        B: Backend<Allocation = A>,
    {
        let command_buffer = self.command_buffer(backend)?;
        let staging = record_buffer_upload(
            backend,
            staging_pool,
            &mut self.barrier,
            command_buffer,
            buffer,
            offset,
            data,
            (stages, access),
        )?;
        self.staging.push(staging);
        Ok(())
    }

    /// Close the command buffer for submission, if anything was recorded.
    pub fn take_finished<B: Backend>(&mut self, backend: &B) -> Result<Option<FinishedInit<A>>> {
        let Some(open) = self.open.take() else {
            return Ok(None);
        };
        self.flush_barriers(backend, open.handle);
        self.barrier.set_command_buffer(None);
        let staging = std::mem::take(&mut self.staging);

        if let Err(err) = backend.end_command_buffer(open.handle) {
            // Never submitted; the staging buffers can be recycled right away.
            self.staging = staging;
            self.pool.reclaim_command_buffer(backend, open.lease)?;
            return Err(err);
        }

        Ok(Some(FinishedInit {
            lease: open.lease,
            command_buffer: open.handle,
            staging,
        }))
    }

    /// Staging buffers left behind by a failed [`take_finished`](Self::take_finished).
    pub fn take_orphaned_staging(&mut self) -> Vec<StagingBuffer<A>> {
        if self.open.is_some() {
            return Vec::new();
        }
        std::mem::take(&mut self.staging)
    }

    pub fn texture_destroyed(&mut self, image: vk::Image) {
        self.barrier.texture_destroyed(image);
    }

    pub fn buffer_destroyed(&mut self, buffer: vk::Buffer) {
        self.barrier.buffer_destroyed(buffer);
    }

    pub fn reclaim_command_buffer<B: Backend>(
        &mut self,
        backend: &B,
        lease: CommandBufferLease,
    ) -> Result<()> {
        self.pool.reclaim_command_buffer(backend, lease)
    }

    /// Destroy the command pool, handing back staging buffers still held.
    pub fn destroy<B: Backend>(&mut self, backend: &B) -> Vec<StagingBuffer<A>> {
        if self.open.take().is_some() {
            tracing::warn!("Discarding unsubmitted initialization commands");
        }
        self.barrier.discard_pending();
        self.pool.destroy(backend);
        std::mem::take(&mut self.staging)
    }
}

/// Stage `data`, record a copy into `buffer` and the barriers around it.
///
/// Returns the staging buffer, which must outlive the recorded commands.
#[allow(clippy::too_many_arguments)]
pub(crate) fn record_buffer_upload<B>(
    backend: &B,
    staging_pool: &mut StagingBufferPool<B::Allocation>,
    barrier: &mut PipelineBarrier,
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    offset: u64,
    data: &[u8],
    consumer: (vk::PipelineStageFlags, vk::AccessFlags),
) -> Result<StagingBuffer<B::Allocation>>
where
    B: Backend,
{
    let size = data.len() as u64;
    let mut staging = staging_pool.allocate_buffer(backend, 4, size)?;
    if let Err(err) = backend.write_allocation(&mut staging.allocation, 0, data) {
        staging_pool.reclaim_buffer(staging);
        return Err(err);
    }

    let (stages, access) = consumer;
    barrier.access_buffer(
        buffer,
        offset,
        size,
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_WRITE,
        stages,
        access,
    );
    for batch in barrier.flush() {
        backend.cmd_pipeline_barrier(command_buffer, &batch);
    }
    backend.cmd_copy_buffer(
        command_buffer,
        staging.buffer,
        buffer,
        &[vk::BufferCopy {
            src_offset: 0,
            dst_offset: offset,
            size,
        }],
    );
    barrier.access_buffer(
        buffer,
        offset,
        size,
        stages,
        access,
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_WRITE,
    );
    Ok(staging)
}
