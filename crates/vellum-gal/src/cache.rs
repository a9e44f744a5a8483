//! Cache of native pipelines built from shader and state objects.

use ash::vk;
use hashbrown::HashMap;

use crate::resources::{
    BlendStateHandle, DepthStencilStateHandle, RasterizerStateHandle, ShaderHandle,
};

/// A state or shader object pipelines are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Shader(ShaderHandle),
    Blend(BlendStateHandle),
    DepthStencil(DepthStencilStateHandle),
    Rasterizer(RasterizerStateHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shader: ShaderHandle,
    pub blend: BlendStateHandle,
    pub depth_stencil: DepthStencilStateHandle,
    pub rasterizer: RasterizerStateHandle,
}

impl PipelineKey {
    pub fn references(&self, id: ResourceId) -> bool {
        match id {
            ResourceId::Shader(shader) => self.shader == shader,
            ResourceId::Blend(blend) => self.blend == blend,
            ResourceId::DepthStencil(state) => self.depth_stencil == state,
            ResourceId::Rasterizer(state) => self.rasterizer == state,
        }
    }
}

#[derive(Debug, Default)]
pub struct ResourceCache {
    pipelines: HashMap<PipelineKey, vk::Pipeline>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `pipeline`, returning the one it replaces.
    pub fn insert(&mut self, key: PipelineKey, pipeline: vk::Pipeline) -> Option<vk::Pipeline> {
        self.pipelines
            .insert(key, pipeline)
            .filter(|&previous| previous != pipeline)
    }

    pub fn get(&self, key: &PipelineKey) -> Option<vk::Pipeline> {
        self.pipelines.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Evict every pipeline built from `id`.
    pub fn resource_deleted(&mut self, id: ResourceId) -> Vec<vk::Pipeline> {
        let mut evicted = Vec::new();
        self.pipelines.retain(|key, pipeline| {
            if key.references(id) {
                evicted.push(*pipeline);
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn drain(&mut self) -> Vec<vk::Pipeline> {
        self.pipelines.drain().map(|(_, pipeline)| pipeline).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ArenaHandle;
    use ash::vk::Handle;

    fn key(shader: u32, blend: u32) -> PipelineKey {
        PipelineKey {
            shader: ShaderHandle::from_parts(shader, 0),
            blend: BlendStateHandle::from_parts(blend, 0),
            depth_stencil: DepthStencilStateHandle::from_parts(0, 0),
            rasterizer: RasterizerStateHandle::from_parts(0, 0),
        }
    }

    #[test]
    fn deleting_a_state_evicts_dependent_pipelines() {
        let mut cache = ResourceCache::new();
        cache.insert(key(0, 0), vk::Pipeline::from_raw(1));
        cache.insert(key(0, 1), vk::Pipeline::from_raw(2));
        cache.insert(key(1, 1), vk::Pipeline::from_raw(3));

        let mut evicted = cache.resource_deleted(ResourceId::Blend(BlendStateHandle::from_parts(1, 0)));
        evicted.sort_by_key(|pipeline| pipeline.as_raw());

        assert_eq!(evicted, vec![vk::Pipeline::from_raw(2), vk::Pipeline::from_raw(3)]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(0, 0)), Some(vk::Pipeline::from_raw(1)));
    }

    #[test]
    fn replacing_returns_previous() {
        let mut cache = ResourceCache::new();
        assert_eq!(cache.insert(key(0, 0), vk::Pipeline::from_raw(1)), None);
        assert_eq!(
            cache.insert(key(0, 0), vk::Pipeline::from_raw(2)),
            Some(vk::Pipeline::from_raw(1))
        );
        assert_eq!(cache.insert(key(0, 0), vk::Pipeline::from_raw(2)), None);
    }
}
