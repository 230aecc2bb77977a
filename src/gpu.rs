//! The boundary between the engine and a graphics API.

use crate::core::glam::Mat4;
use crate::core::{SmallKeyHashMap, SmallKeyHashSet};
use crate::format::{NodeId, Signature};

use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BufferHandle(pub u64);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TextureHandle(pub u64);

/// The buffers owned by one resident node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeBuffers {
    pub vertices: BufferHandle,
    /// `None` for point clouds.
    pub indices: Option<BufferHandle>,
}

/// What a context needs to set up vertex attribute pointers for one node.
#[derive(Clone, Debug)]
pub struct NodeBinding<'a> {
    pub node: NodeId,
    pub buffers: NodeBuffers,
    pub signature: &'a Signature,
    pub vertex_count: u32,
    /// `(attribute slot, byte offset into the vertex buffer)` for every present vertex attribute.
    pub attribute_offsets: SmallVec<[(usize, usize); 8]>,
}

/// Rendering operations the engine issues. Resources are created only while the cache is updated, and deleted when a node is
/// evicted or the dataset is closed.
pub trait GpuContext {
    fn create_vertex_buffer(&mut self, data: &[u8]) -> BufferHandle;
    fn create_index_buffer(&mut self, data: &[u8]) -> BufferHandle;
    fn delete_buffer(&mut self, buffer: BufferHandle);

    fn create_texture(&mut self, image: &[u8]) -> TextureHandle;
    fn delete_texture(&mut self, texture: TextureHandle);

    fn bind_node(&mut self, binding: &NodeBinding);
    fn bind_texture(&mut self, texture: TextureHandle, uv_matrix: &Mat4);

    /// Draws `count` indexed triangles starting at triangle `first` of the bound node.
    fn draw_triangles(&mut self, first: u32, count: u32);
    /// Draws the first `count` vertices of the bound node as points.
    fn draw_points(&mut self, count: u32);
}

#[derive(Clone, Debug, PartialEq)]
pub enum GpuCommand {
    CreateVertexBuffer { buffer: BufferHandle, size: usize },
    CreateIndexBuffer { buffer: BufferHandle, size: usize },
    DeleteBuffer(BufferHandle),
    CreateTexture { texture: TextureHandle, size: usize },
    DeleteTexture(TextureHandle),
    BindNode(NodeId),
    BindTexture(TextureHandle),
    DrawTriangles { first: u32, count: u32 },
    DrawPoints { count: u32 },
}

/// A context with no graphics API behind it. Records every command and tracks live resources, for tools and tests.
#[derive(Debug, Default)]
pub struct HeadlessContext {
    next_handle: u64,
    live_buffers: SmallKeyHashMap<BufferHandle, usize>,
    live_textures: SmallKeyHashSet<TextureHandle>,
    commands: Vec<GpuCommand>,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.len()
    }

    /// Bytes held by live buffers.
    pub fn live_buffer_bytes(&self) -> usize {
        self.live_buffers.values().sum()
    }

    pub fn live_texture_count(&self) -> usize {
        self.live_textures.len()
    }
}

impl GpuContext for HeadlessContext {
    fn create_vertex_buffer(&mut self, data: &[u8]) -> BufferHandle {
        let buffer = BufferHandle(self.next_handle());
        self.live_buffers.insert(buffer, data.len());
        self.commands.push(GpuCommand::CreateVertexBuffer {
            buffer,
            size: data.len(),
        });
        buffer
    }

    fn create_index_buffer(&mut self, data: &[u8]) -> BufferHandle {
        let buffer = BufferHandle(self.next_handle());
        self.live_buffers.insert(buffer, data.len());
        self.commands.push(GpuCommand::CreateIndexBuffer {
            buffer,
            size: data.len(),
        });
        buffer
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        let was_live = self.live_buffers.remove(&buffer).is_some();
        debug_assert!(was_live, "double free of {:?}", buffer);
        self.commands.push(GpuCommand::DeleteBuffer(buffer));
    }

    fn create_texture(&mut self, image: &[u8]) -> TextureHandle {
        let texture = TextureHandle(self.next_handle());
        self.live_textures.insert(texture);
        self.commands.push(GpuCommand::CreateTexture {
            texture,
            size: image.len(),
        });
        texture
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        let was_live = self.live_textures.remove(&texture);
        debug_assert!(was_live, "double free of {:?}", texture);
        self.commands.push(GpuCommand::DeleteTexture(texture));
    }

    fn bind_node(&mut self, binding: &NodeBinding) {
        debug_assert!(self.live_buffers.contains_key(&binding.buffers.vertices));
        self.commands.push(GpuCommand::BindNode(binding.node));
    }

    fn bind_texture(&mut self, texture: TextureHandle, _uv_matrix: &Mat4) {
        debug_assert!(self.live_textures.contains(&texture));
        self.commands.push(GpuCommand::BindTexture(texture));
    }

    fn draw_triangles(&mut self, first: u32, count: u32) {
        self.commands.push(GpuCommand::DrawTriangles { first, count });
    }

    fn draw_points(&mut self, count: u32) {
        self.commands.push(GpuCommand::DrawPoints { count });
    }
}
