use crate::format::{NodeId, NodeIndex, NodePayload, TextureId};
use crate::gpu::{GpuContext, NodeBuffers, TextureHandle};
use crate::core::SmallKeyHashMap;

use smallvec::SmallVec;

/// Where a node's or texture's data currently lives.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Status {
    /// Not requested, or evicted.
    #[default]
    None,
    /// Requested, or arrived and waiting to enter the cache.
    Pending,
    /// Uploaded to the GPU.
    Ready,
    /// Fetching failed too many times. Never requested again until the dataset is reopened.
    Failed,
}

#[derive(Clone, Debug, Default)]
pub struct NodeState {
    pub status: Status,
    /// Screen-space error from the last traversal that reached this node.
    pub render_error: f32,
    /// Frame of the last traversal that reached this node.
    pub render_frame: u64,
    pub attempts: u32,
    /// The node is not requested again before this frame.
    pub retry_frame: u64,
    pub buffers: Option<NodeBuffers>,
}

#[derive(Clone, Debug, Default)]
pub struct TextureState {
    pub status: Status,
    pub attempts: u32,
    pub retry_frame: u64,
    pub handle: Option<TextureHandle>,
    /// Pending or resident nodes that need this texture.
    pub users: SmallVec<[NodeId; 4]>,
}

/// Runtime state of every node and texture of an open dataset.
pub struct Residency {
    pub nodes: Vec<NodeState>,
    pub textures: Vec<TextureState>,
    /// Decoded payloads waiting for their textures or for the next cache update.
    pub arrived_nodes: SmallKeyHashMap<NodeId, NodePayload>,
    /// Fetched images waiting to be uploaded.
    pub arrived_textures: SmallKeyHashMap<TextureId, Vec<u8>>,
}

impl Residency {
    pub fn new(index: &NodeIndex) -> Self {
        Self {
            nodes: vec![NodeState::default(); index.node_count()],
            textures: vec![TextureState::default(); index.textures().len()],
            arrived_nodes: SmallKeyHashMap::default(),
            arrived_textures: SmallKeyHashMap::default(),
        }
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &NodeState {
        &self.nodes[id as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeState {
        &mut self.nodes[id as usize]
    }

    pub fn is_ready(&self, id: NodeId) -> bool {
        self.node(id).status == Status::Ready
    }

    /// The latest frame at which one of `id`'s textures may be requested again, if any of them is still backing off after a
    /// failure.
    pub fn texture_retry_frame(&self, index: &NodeIndex, id: NodeId, frame: u64) -> Option<u64> {
        index
            .node_textures(id)
            .map(|t| &self.textures[t as usize])
            .filter(|texture| texture.status == Status::None && texture.retry_frame > frame)
            .map(|texture| texture.retry_frame)
            .max()
    }

    /// Registers `id` as a user of its textures and returns the ones that still need to be requested.
    pub fn acquire_textures(&mut self, index: &NodeIndex, id: NodeId) -> SmallVec<[TextureId; 4]> {
        let mut to_request = SmallVec::new();
        for t in index.node_textures(id) {
            let texture = &mut self.textures[t as usize];
            if !texture.users.contains(&id) {
                texture.users.push(id);
            }
            if texture.status == Status::None {
                to_request.push(t);
            }
        }
        to_request
    }

    /// Drops `id` from its textures' users, deleting any texture left without users.
    pub fn release_textures(&mut self, index: &NodeIndex, id: NodeId, gpu: &mut dyn GpuContext) {
        for t in index.node_textures(id) {
            let texture = &mut self.textures[t as usize];
            texture.users.retain(|u| *u != id);
            if texture.users.is_empty() {
                if let Some(handle) = texture.handle.take() {
                    log::debug!("Deleting texture {}", t);
                    gpu.delete_texture(handle);
                }
                if texture.status == Status::Ready {
                    texture.status = Status::None;
                }
                self.arrived_textures.remove(&t);
            }
        }
    }

    /// Deletes every GPU resource. Used when the dataset is closed.
    pub fn release_all(&mut self, gpu: &mut dyn GpuContext) {
        for node in self.nodes.iter_mut() {
            if let Some(buffers) = node.buffers.take() {
                gpu.delete_buffer(buffers.vertices);
                if let Some(indices) = buffers.indices {
                    gpu.delete_buffer(indices);
                }
            }
            node.status = Status::None;
        }
        for texture in self.textures.iter_mut() {
            if let Some(handle) = texture.handle.take() {
                gpu.delete_texture(handle);
            }
            texture.status = Status::None;
            texture.users.clear();
        }
        self.arrived_nodes.clear();
        self.arrived_textures.clear();
    }
}
