//! Synthetic datasets for tests.

use super::cache::GeometryCache;
use super::state::{Residency, Status};
use crate::core::geometry::Sphere;
use crate::core::glam::{Mat4, Vec3A};
use crate::format::{
    ByteOrder, ByteRange, DatasetWriter, FaceElement, Header, NodeEntry, NodeId, NodeIndex, NodePayload,
    Patch, Signature, TextureId, VertexElement, HEADER_SIZE,
};
use crate::fetch::{FetchCallback, FetchError, FetchRequest, RangeFetcher};
use crate::gpu::GpuContext;

use parking_lot::Mutex;

#[derive(Clone, Debug)]
pub struct FixtureNode {
    pub error: f32,
    pub sphere: Sphere,
    pub children: Vec<NodeId>,
    pub vertex_count: u16,
    pub face_count: u16,
    /// One texture per patch, if any.
    pub textures: Vec<TextureId>,
}

impl FixtureNode {
    pub fn new(error: f32, center: Vec3A, radius: f32, children: &[NodeId]) -> Self {
        Self {
            error,
            sphere: Sphere::new(center, radius),
            children: children.to_vec(),
            vertex_count: 8,
            face_count: 8,
            textures: Vec::new(),
        }
    }

    pub fn with_faces(mut self, face_count: u16) -> Self {
        self.face_count = face_count;
        self
    }

    pub fn with_vertices(mut self, vertex_count: u16) -> Self {
        self.vertex_count = vertex_count;
        self
    }

    pub fn with_textures(mut self, textures: &[TextureId]) -> Self {
        self.textures = textures.to_vec();
        self
    }
}

pub fn tree_signature(textured: bool) -> Signature {
    let flags = if textured { Signature::PTEXTURE } else { 0 };
    Signature::new(VertexElement::standard(false, false, textured), FaceElement::triangles(), flags)
}

/// Serializes `nodes` in order. Each child gets one patch of its parent, splitting the parent's triangles evenly; childless
/// nodes get a single patch pointing at the sink.
pub fn tree_bytes(nodes: &[FixtureNode], flags: u32) -> (Signature, Vec<u8>) {
    let textured = nodes.iter().any(|n| !n.textures.is_empty());
    let mut signature = tree_signature(textured);
    signature.flags |= flags;

    let mut writer = DatasetWriter::new(signature, Sphere::new(Vec3A::ZERO, 1000.0));
    let num_textures = nodes
        .iter()
        .flat_map(|n| n.textures.iter())
        .map(|&t| t + 1)
        .max()
        .unwrap_or(0);
    for t in 0..num_textures {
        writer.add_texture(vec![t as u8; 64], Mat4::IDENTITY);
    }

    let sink = nodes.len() as NodeId;
    for node in nodes {
        let targets = if node.children.is_empty() {
            vec![sink]
        } else {
            node.children.clone()
        };
        let n = targets.len() as u32;
        let patches = targets
            .iter()
            .enumerate()
            .map(|(i, &child)| Patch {
                child,
                triangle_end: node.face_count as u32 * (i as u32 + 1) / n,
                texture: node.textures.get(i).copied(),
            })
            .collect();
        writer.add_node(
            NodeEntry::synthetic(&signature, node.error, node.vertex_count, node.face_count)
                .with_sphere(node.sphere)
                .with_patches(patches),
        );
    }
    (signature, writer.finish())
}

pub fn parse(bytes: &[u8]) -> NodeIndex {
    let header = Header::parse(bytes, ByteOrder::Little).unwrap();
    NodeIndex::import(&header, bytes, HEADER_SIZE, ByteOrder::Little).unwrap()
}

pub fn tree_dataset(nodes: &[FixtureNode]) -> (NodeIndex, Signature) {
    let (signature, bytes) = tree_bytes(nodes, 0);
    (parse(&bytes), signature)
}

/// Childless nodes whose payloads span the given numbers of blocks.
pub fn blocks_dataset(blocks: &[u64]) -> (NodeIndex, Signature) {
    let signature = tree_signature(false);
    let mut writer = DatasetWriter::new(signature, Sphere::new(Vec3A::ZERO, 1.0));
    for &b in blocks {
        let mut entry = NodeEntry::synthetic(&signature, 1.0, 0, 0);
        entry.payload = vec![0; (b * crate::format::PADDING) as usize];
        writer.add_node(entry);
    }
    (parse(&writer.finish()), signature)
}

/// Marks every node resident without touching a GPU. Enough for traversal, not for drawing.
pub fn mark_all_ready(residency: &mut Residency, index: &NodeIndex) {
    for id in 0..index.sink() {
        residency.node_mut(id).status = Status::Ready;
    }
}

/// Uploads every node and texture through a [`GeometryCache`] with an unlimited budget.
pub fn upload_all(
    index: &NodeIndex,
    signature: &Signature,
    gpu: &mut dyn GpuContext,
) -> (Residency, GeometryCache) {
    let mut residency = Residency::new(index);
    for id in 0..index.sink() {
        residency.acquire_textures(index, id);
    }
    for (t, texture) in residency.textures.iter_mut().enumerate() {
        if !texture.users.is_empty() {
            texture.handle = Some(gpu.create_texture(&[t as u8]));
            texture.status = Status::Ready;
        }
    }

    let arrived = (0..index.sink())
        .map(|id| {
            let node = index.node(id);
            let payload = NodePayload {
                vertex_count: node.vertex_count as u32,
                face_count: node.face_count as u32,
                vertices: vec![0; signature.vertex.element.block_size(node.vertex_count as usize)],
                faces: vec![0; signature.face.element.block_size(node.face_count as usize)],
            };
            (id, payload)
        })
        .collect();
    let mut cache = GeometryCache::default();
    cache.update(u64::MAX, index, signature, &mut residency, arrived, gpu);
    (residency, cache)
}

/// A fetcher that holds every request until the test resolves or fails it. Callbacks run on the test thread.
#[derive(Default)]
pub struct ManualFetcher {
    requests: Mutex<Vec<(FetchRequest, FetchCallback)>>,
}

impl RangeFetcher for ManualFetcher {
    fn fetch(&self, request: FetchRequest, on_complete: FetchCallback) {
        self.requests.lock().push((request, on_complete));
    }
}

impl ManualFetcher {
    pub fn in_flight(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn ranges(&self) -> Vec<ByteRange> {
        self.requests.lock().iter().map(|(r, _)| r.range).collect()
    }

    /// Completes the requests accepted by `filter` with `respond`, returning how many there were.
    pub fn complete_where(
        &self,
        mut filter: impl FnMut(&FetchRequest) -> bool,
        mut respond: impl FnMut(&FetchRequest) -> Result<Vec<u8>, FetchError>,
    ) -> usize {
        let taken: Vec<_> = {
            let mut requests = self.requests.lock();
            let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *requests)
                .into_iter()
                .partition(|(r, _)| filter(r));
            *requests = kept;
            taken
        };
        let count = taken.len();
        for (request, on_complete) in taken {
            on_complete(respond(&request));
        }
        count
    }

    pub fn resolve_all(&self) -> usize {
        self.complete_where(|_| true, |r| r.read())
    }

    pub fn fail_all(&self) -> usize {
        self.complete_where(|_| true, |_| Err(FetchError::Io("connection reset".into())))
    }
}
