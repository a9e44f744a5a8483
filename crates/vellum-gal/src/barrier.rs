//! Pipeline barrier tracking.
//!
//! Transitions are accumulated while commands are recorded and emitted in
//! batches by [`PipelineBarrier::flush`]. The tracker remembers the last known
//! layout and access scope of every image it has seen, so callers only state
//! where a resource needs to be next.

use ash::vk;
use hashbrown::HashMap;

/// One image transition inside a batch.
#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub range: vk::ImageSubresourceRange,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// One buffer range visibility change inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub size: u64,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl BufferBarrier {
    fn overlaps(&self, buffer: vk::Buffer, offset: u64, size: u64) -> bool {
        let end = |start: u64, len: u64| {
            if len == vk::WHOLE_SIZE {
                u64::MAX
            } else {
                start.saturating_add(len)
            }
        };
        self.buffer == buffer
            && self.offset < end(offset, size)
            && offset < end(self.offset, self.size)
    }
}

/// Transitions emitted together as a single barrier command.
#[derive(Debug, Clone, Default)]
pub struct BarrierBatch {
    pub src_stages: vk::PipelineStageFlags,
    pub dst_stages: vk::PipelineStageFlags,
    pub images: Vec<ImageBarrier>,
    pub buffers: Vec<BufferBarrier>,
}

impl BarrierBatch {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ImageState {
    layout: vk::ImageLayout,
    stages: vk::PipelineStageFlags,
    access: vk::AccessFlags,
}

impl ImageState {
    const UNKNOWN: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        stages: vk::PipelineStageFlags::TOP_OF_PIPE,
        access: vk::AccessFlags::empty(),
    };
}

/// Mip levels and array layers a range covers, with the remaining-count
/// sentinels resolved against what is known of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    base_mip: u32,
    levels: u32,
    base_layer: u32,
    layers: u32,
}

impl Span {
    fn resolve(range: &vk::ImageSubresourceRange, known_levels: u32, known_layers: u32) -> Self {
        let count = |base: u32, count: u32, remaining: u32, known: u32| {
            if count == remaining {
                known.saturating_sub(base).max(1)
            } else {
                count.max(1)
            }
        };
        Self {
            base_mip: range.base_mip_level,
            levels: count(
                range.base_mip_level,
                range.level_count,
                vk::REMAINING_MIP_LEVELS,
                known_levels,
            ),
            base_layer: range.base_array_layer,
            layers: count(
                range.base_array_layer,
                range.layer_count,
                vk::REMAINING_ARRAY_LAYERS,
                known_layers,
            ),
        }
    }

    fn of(range: &vk::ImageSubresourceRange) -> Self {
        Self::resolve(range, 0, 0)
    }

    fn mip_end(self) -> u32 {
        self.base_mip.saturating_add(self.levels)
    }

    fn layer_end(self) -> u32 {
        self.base_layer.saturating_add(self.layers)
    }

    fn overlaps(self, other: Self) -> bool {
        self.base_mip < other.mip_end()
            && other.base_mip < self.mip_end()
            && self.base_layer < other.layer_end()
            && other.base_layer < self.layer_end()
    }
}

/// Last known state of every mip level and array layer of one image.
#[derive(Debug, Clone)]
struct ImageTrack {
    levels: u32,
    layers: u32,
    // Indexed by `layer * levels + mip`.
    states: Vec<ImageState>,
}

impl ImageTrack {
    fn new(levels: u32, layers: u32, state: ImageState) -> Self {
        Self {
            levels,
            layers,
            states: vec![state; (levels as usize) * (layers as usize)],
        }
    }

    /// Extend the track so `span` is covered; new subresources start unknown.
    fn cover(&mut self, span: Span) {
        let levels = self.levels.max(span.mip_end());
        let layers = self.layers.max(span.layer_end());
        if levels == self.levels && layers == self.layers {
            return;
        }
        let mut grown = Self::new(levels, layers, ImageState::UNKNOWN);
        for layer in 0..self.layers {
            for mip in 0..self.levels {
                let state = self.states[self.index(mip, layer)];
                let index = grown.index(mip, layer);
                grown.states[index] = state;
            }
        }
        *self = grown;
    }

    fn index(&self, mip: u32, layer: u32) -> usize {
        (layer as usize) * (self.levels as usize) + mip as usize
    }

    fn get(&self, mip: u32, layer: u32) -> ImageState {
        self.states[self.index(mip, layer)]
    }

    fn get_mut(&mut self, mip: u32, layer: u32) -> &mut ImageState {
        let index = self.index(mip, layer);
        &mut self.states[index]
    }

    fn common_layout(&self) -> Option<vk::ImageLayout> {
        let first = self.states.first()?.layout;
        self.states
            .iter()
            .all(|state| state.layout == first)
            .then_some(first)
    }
}

const WRITE_ACCESS: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::SHADER_WRITE.as_raw()
        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags::HOST_WRITE.as_raw()
        | vk::AccessFlags::MEMORY_WRITE.as_raw(),
);

fn is_read_only(access: vk::AccessFlags) -> bool {
    !access.intersects(WRITE_ACCESS)
}

fn source_stages(stages: vk::PipelineStageFlags) -> vk::PipelineStageFlags {
    if stages.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        stages
    }
}

/// Accumulates resource transitions for one command buffer.
#[derive(Debug, Default)]
pub struct PipelineBarrier {
    command_buffer: Option<vk::CommandBuffer>,
    image_states: HashMap<vk::Image, ImageTrack>,
    pending: BarrierBatch,
    sealed: Vec<BarrierBatch>,
}

impl PipelineBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command buffer the next flush is recorded into.
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        self.command_buffer
    }

    pub fn set_command_buffer(&mut self, command_buffer: Option<vk::CommandBuffer>) {
        self.command_buffer = command_buffer;
    }

    /// Declare the state `range` of an image is in without recording a
    /// transition.
    pub fn register_image(
        &mut self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        layout: vk::ImageLayout,
        stages: vk::PipelineStageFlags,
        access: vk::AccessFlags,
    ) {
        let state = ImageState {
            layout,
            stages,
            access,
        };
        let track = self
            .image_states
            .entry(image)
            .or_insert_with(|| ImageTrack::new(0, 0, ImageState::UNKNOWN));
        let span = Span::resolve(&range, track.levels, track.layers);
        track.cover(span);
        for layer in span.base_layer..span.layer_end() {
            for mip in span.base_mip..span.mip_end() {
                *track.get_mut(mip, layer) = state;
            }
        }
    }

    /// Layout shared by every known subresource of `image`.
    ///
    /// `None` when the image is unknown or its subresources differ.
    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.image_states.get(&image)?.common_layout()
    }

    pub fn subresource_layout(
        &self,
        image: vk::Image,
        mip_level: u32,
        array_layer: u32,
    ) -> Option<vk::ImageLayout> {
        let track = self.image_states.get(&image)?;
        (mip_level < track.levels && array_layer < track.layers)
            .then(|| track.get(mip_level, array_layer).layout)
    }

    /// Make sure `range` of `image` is in `layout` and visible to
    /// `stages`/`access`.
    ///
    /// Subresources already there for reading are left alone. The rest get
    /// one transition per run of subresources sharing the same prior state.
    pub fn ensure_image_layout(
        &mut self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        layout: vk::ImageLayout,
        stages: vk::PipelineStageFlags,
        access: vk::AccessFlags,
    ) {
        let mut track = self
            .image_states
            .remove(&image)
            .unwrap_or_else(|| ImageTrack::new(0, 0, ImageState::UNKNOWN));
        let span = Span::resolve(&range, track.levels, track.layers);
        track.cover(span);

        let shared_read = |state: &ImageState| {
            state.layout == layout && is_read_only(state.access) && is_read_only(access)
        };

        // Runs of consecutive layers with the same state, per mip level.
        let runs_of = |track: &ImageTrack, mip: u32| {
            let mut runs: Vec<(u32, u32, ImageState)> = Vec::new();
            for layer in span.base_layer..span.layer_end() {
                let state = track.get(mip, layer);
                match runs.last_mut() {
                    Some((_, count, last)) if *last == state => *count += 1,
                    _ => runs.push((layer, 1, state)),
                }
            }
            runs
        };

        let mut transitions: Vec<(ImageBarrier, ImageState)> = Vec::new();
        let mut previous: Option<(Vec<(u32, u32, ImageState)>, usize)> = None;
        for mip in span.base_mip..span.mip_end() {
            let runs = runs_of(&track, mip);
            if let Some((previous_runs, first)) = &previous {
                if *previous_runs == runs {
                    for (barrier, _) in &mut transitions[*first..] {
                        barrier.range.level_count += 1;
                    }
                    continue;
                }
            }
            let first = transitions.len();
            for &(base_layer, layer_count, state) in &runs {
                if shared_read(&state) {
                    continue;
                }
                transitions.push((
                    ImageBarrier {
                        image,
                        range: vk::ImageSubresourceRange {
                            aspect_mask: range.aspect_mask,
                            base_mip_level: mip,
                            level_count: 1,
                            base_array_layer: base_layer,
                            layer_count,
                        },
                        old_layout: state.layout,
                        new_layout: layout,
                        src_access: state.access,
                        dst_access: access,
                    },
                    state,
                ));
            }
            previous = Some((runs, first));
        }

        for layer in span.base_layer..span.layer_end() {
            for mip in span.base_mip..span.mip_end() {
                let state = track.get_mut(mip, layer);
                if shared_read(&*state) {
                    state.stages |= stages;
                    state.access |= access;
                } else {
                    *state = ImageState {
                        layout,
                        stages,
                        access,
                    };
                }
            }
        }
        self.image_states.insert(image, track);

        if transitions.is_empty() {
            let mut widened = false;
            for barrier in &mut self.pending.images {
                if barrier.image == image && Span::of(&barrier.range).overlaps(span) {
                    barrier.dst_access |= access;
                    widened = true;
                }
            }
            if widened {
                self.pending.dst_stages |= stages;
            }
            return;
        }

        if self
            .pending
            .images
            .iter()
            .any(|barrier| barrier.image == image && Span::of(&barrier.range).overlaps(span))
        {
            self.seal();
        }

        self.pending.dst_stages |= stages;
        for (barrier, state) in transitions {
            self.pending.src_stages |= source_stages(state.stages);
            self.pending.images.push(barrier);
        }
    }

    /// Make `size` bytes at `offset` written or read under `previous_*`
    /// visible to `stages`/`access`.
    #[allow(clippy::too_many_arguments)]
    pub fn access_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
        stages: vk::PipelineStageFlags,
        access: vk::AccessFlags,
        previous_stages: vk::PipelineStageFlags,
        previous_access: vk::AccessFlags,
    ) {
        if self
            .pending
            .buffers
            .iter()
            .any(|barrier| barrier.overlaps(buffer, offset, size))
        {
            self.seal();
        }

        self.pending.src_stages |= source_stages(previous_stages);
        self.pending.dst_stages |= stages;
        self.pending.buffers.push(BufferBarrier {
            buffer,
            offset,
            size,
            src_access: previous_access,
            dst_access: access,
        });
    }

    /// Whether any transition is waiting to be flushed.
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty() || !self.sealed.is_empty()
    }

    pub fn is_image_pending(&self, image: vk::Image) -> bool {
        self.batches()
            .any(|batch| batch.images.iter().any(|barrier| barrier.image == image))
    }

    pub fn is_buffer_pending(&self, buffer: vk::Buffer) -> bool {
        self.batches()
            .any(|batch| batch.buffers.iter().any(|barrier| barrier.buffer == buffer))
    }

    /// Take every accumulated transition, one batch per barrier command.
    ///
    /// Returns an empty list when nothing was recorded since the last flush.
    pub fn flush(&mut self) -> Vec<BarrierBatch> {
        self.seal();
        std::mem::take(&mut self.sealed)
    }

    /// Forget pending transitions and known states of `image`.
    pub fn texture_destroyed(&mut self, image: vk::Image) {
        self.image_states.remove(&image);
        self.retain(|batch| batch.images.retain(|barrier| barrier.image != image));
    }

    /// Forget pending transitions of `buffer`.
    pub fn buffer_destroyed(&mut self, buffer: vk::Buffer) {
        self.retain(|batch| batch.buffers.retain(|barrier| barrier.buffer != buffer));
    }

    /// Drop pending transitions, keeping known image states.
    pub fn discard_pending(&mut self) {
        self.pending = BarrierBatch::default();
        self.sealed.clear();
    }

    fn seal(&mut self) {
        if !self.pending.is_empty() {
            self.sealed.push(std::mem::take(&mut self.pending));
        }
    }

    fn batches(&self) -> impl Iterator<Item = &BarrierBatch> {
        self.sealed.iter().chain(std::iter::once(&self.pending))
    }

    fn retain(&mut self, mut strip: impl FnMut(&mut BarrierBatch)) {
        strip(&mut self.pending);
        if self.pending.is_empty() {
            self.pending = BarrierBatch::default();
        }
        for batch in &mut self.sealed {
            strip(batch);
        }
        self.sealed.retain(|batch| !batch.is_empty());
    }
}
