use crate::core::geometry::{Cone, Sphere};
use crate::core::glam::{Mat4, Vec3A};
use crate::{
    decode_array, BlockUnits, ByteOrder, ByteRange, ByteReader, ByteUnits, Decode, FormatError,
    Header,
};

use itertools::Itertools;
use std::ops::Range;

pub type NodeId = u32;
pub type TextureId = u32;

/// Stored in [`Patch`] records that have no texture.
pub const NO_TEXTURE: u32 = u32::MAX;

/// One level-of-detail node: a chunk of geometry plus the patches linking it to finer children.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// First byte of the payload.
    pub offset: ByteUnits<u64>,
    /// One past the last byte of the payload; the next node's offset.
    pub end: ByteUnits<u64>,
    pub vertex_count: u16,
    pub face_count: u16,
    /// Object-space geometric error.
    pub error: f32,
    pub cone: Cone,
    pub sphere: Sphere,
    pub tight_radius: f32,
    pub first_patch: u32,
    /// One past the last patch; the next node's first patch.
    pub last_patch: u32,
}

impl Node {
    pub fn last_byte(&self) -> ByteUnits<u64> {
        ByteUnits(self.end.0.saturating_sub(1))
    }

    pub fn byte_size(&self) -> u64 {
        self.end.0.saturating_sub(self.offset.0)
    }

    /// `None` for the sink, which has no payload.
    pub fn byte_range(&self) -> Option<ByteRange> {
        let size = self.byte_size();
        (size > 0).then(|| ByteRange::from_start_and_len(self.offset.0, size))
    }

    pub fn patch_range(&self) -> Range<usize> {
        self.first_patch as usize..self.last_patch as usize
    }

    /// Rough cost of drawing this node, in the same units as the draw budget.
    pub fn draw_cost(&self) -> f32 {
        self.vertex_count as f32 * 0.8 + self.face_count as f32
    }
}

/// The on-disk node record. Derived fields are filled in by [`NodeIndex`].
#[derive(Clone, Debug, PartialEq)]
struct NodeRecord {
    offset: BlockUnits<u32>,
    vertex_count: u16,
    face_count: u16,
    error: f32,
    cone: [i16; 4],
    sphere: Sphere,
    tight_radius: f32,
    first_patch: u32,
}

impl Decode for NodeRecord {
    const SIZE: usize = 44;

    fn decode(reader: &mut ByteReader) -> Result<Self, FormatError> {
        let offset = BlockUnits(reader.read_u32()?);
        let vertex_count = reader.read_u16()?;
        let face_count = reader.read_u16()?;
        let error = reader.read_f32()?;
        let cone = [
            reader.read_i16()?,
            reader.read_i16()?,
            reader.read_i16()?,
            reader.read_i16()?,
        ];
        let center = Vec3A::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?);
        let radius = reader.read_f32()?;
        let tight_radius = reader.read_f32()?;
        let first_patch = reader.read_u32()?;
        Ok(Self {
            offset,
            vertex_count,
            face_count,
            error,
            cone,
            sphere: Sphere::new(center, radius),
            tight_radius,
            first_patch,
        })
    }
}

impl Decode for Node {
    const SIZE: usize = NodeRecord::SIZE;

    /// Decodes a lone record. Its `end` and `last_patch` are left equal to `offset` and `first_patch`.
    fn decode(reader: &mut ByteReader) -> Result<Self, FormatError> {
        let record = NodeRecord::decode(reader)?;
        let offset = record.offset.to_bytes();
        Ok(Self {
            offset,
            end: offset,
            vertex_count: record.vertex_count,
            face_count: record.face_count,
            error: record.error,
            cone: Cone::from_packed(record.cone),
            sphere: record.sphere,
            tight_radius: record.tight_radius,
            first_patch: record.first_patch,
            last_patch: record.first_patch,
        })
    }
}

/// A run of triangles in the parent node that is refined by `child`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Patch {
    pub child: NodeId,
    /// One past the last triangle of this patch, counted from the start of the parent node.
    pub triangle_end: u32,
    pub texture: Option<TextureId>,
}

impl Decode for Patch {
    const SIZE: usize = 12;

    fn decode(reader: &mut ByteReader) -> Result<Self, FormatError> {
        let child = reader.read_u32()?;
        let triangle_end = reader.read_u32()?;
        let texture = reader.read_u32()?;
        Ok(Self {
            child,
            triangle_end,
            texture: (texture != NO_TEXTURE).then_some(texture),
        })
    }
}

/// An embedded image blob with the matrix that maps node texture coordinates into it.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub offset: ByteUnits<u64>,
    /// The next texture's offset. The last texture is a sentinel.
    pub end: ByteUnits<u64>,
    pub uv_matrix: Mat4,
}

impl Texture {
    pub fn byte_range(&self) -> Option<ByteRange> {
        let size = self.end.0.saturating_sub(self.offset.0);
        (size > 0).then(|| ByteRange::from_start_and_len(self.offset.0, size))
    }
}

impl Decode for Texture {
    const SIZE: usize = 4 + 16 * 4;

    fn decode(reader: &mut ByteReader) -> Result<Self, FormatError> {
        let offset = BlockUnits(reader.read_u32()?).to_bytes();
        let mut cols = [0.0; 16];
        for c in cols.iter_mut() {
            *c = reader.read_f32()?;
        }
        Ok(Self {
            offset,
            end: offset,
            uv_matrix: Mat4::from_cols_array(&cols),
        })
    }
}

/// The parsed node, patch and texture arrays. Read-only after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeIndex {
    nodes: Vec<Node>,
    patches: Vec<Patch>,
    textures: Vec<Texture>,
}

impl NodeIndex {
    /// Decodes the three arrays starting at `offset` in `bytes`, with the counts given by `header`.
    pub fn import(
        header: &Header,
        bytes: &[u8],
        offset: usize,
        order: ByteOrder,
    ) -> Result<Self, FormatError> {
        let mut reader = ByteReader::new(bytes, offset, order);
        let nodes = import_nodes(&mut reader, header.node_count as usize)?;
        let patches = decode_array::<Patch>(&mut reader, header.patch_count as usize)?;
        let textures = import_textures(&mut reader, header.texture_count as usize)?;

        let index = Self {
            nodes,
            patches,
            textures,
        };
        index.validate()?;
        log::debug!(
            "Imported index: {} nodes, {} patches, {} textures",
            index.nodes.len(),
            index.patches.len(),
            index.textures.len()
        );
        Ok(index)
    }

    fn validate(&self) -> Result<(), FormatError> {
        if self.nodes.is_empty() {
            return Err(FormatError::CorruptIndex("no nodes".into()));
        }
        let num_nodes = self.nodes.len() as u32;
        let num_textures = self.textures.len() as u32;
        for (id, node) in self.nodes.iter().enumerate() {
            if node.first_patch > node.last_patch || node.last_patch as usize > self.patches.len() {
                return Err(FormatError::CorruptIndex(format!(
                    "node {} has patches {}..{} of {}",
                    id,
                    node.first_patch,
                    node.last_patch,
                    self.patches.len()
                )));
            }
            if node.end < node.offset {
                return Err(FormatError::CorruptIndex(format!(
                    "node {} payload ends before it starts",
                    id
                )));
            }
            let mut prev_end = 0;
            for patch in &self.patches[node.patch_range()] {
                // Children always come after their parents, which keeps the hierarchy acyclic.
                if patch.child <= id as u32 || patch.child >= num_nodes {
                    return Err(FormatError::CorruptIndex(format!(
                        "node {} has invalid child {}",
                        id, patch.child
                    )));
                }
                if patch.triangle_end < prev_end || patch.triangle_end > node.face_count as u32 {
                    return Err(FormatError::CorruptIndex(format!(
                        "node {} has a patch ending at triangle {}",
                        id, patch.triangle_end
                    )));
                }
                if patch.texture.map_or(false, |t| t >= num_textures) {
                    return Err(FormatError::CorruptIndex(format!(
                        "node {} references missing texture {:?}",
                        id, patch.texture
                    )));
                }
                prev_end = patch.triangle_end;
            }
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The last node, which only exists to bound its predecessor's byte range. Patches pointing here have no child.
    pub fn sink(&self) -> NodeId {
        self.nodes.len() as NodeId - 1
    }

    pub fn is_sink(&self, id: NodeId) -> bool {
        id == self.sink()
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patches_of(&self, id: NodeId) -> &[Patch] {
        &self.patches[self.node(id).patch_range()]
    }

    /// The children of `id`, excluding the sink.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let sink = self.sink();
        self.patches_of(id)
            .iter()
            .map(|p| p.child)
            .filter(move |&c| c != sink)
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub fn texture(&self, id: TextureId) -> &Texture {
        &self.textures[id as usize]
    }

    /// Distinct textures referenced by the patches of `id`.
    pub fn node_textures(&self, id: NodeId) -> impl Iterator<Item = TextureId> + '_ {
        self.patches_of(id)
            .iter()
            .filter_map(|p| p.texture)
            .unique()
    }
}

/// Decodes `count` node records and derives each node's `end` and `last_patch` from its successor.
pub fn import_nodes(reader: &mut ByteReader, count: usize) -> Result<Vec<Node>, FormatError> {
    let mut nodes = decode_array::<Node>(reader, count)?;
    let successors: Vec<_> = nodes
        .iter()
        .tuple_windows()
        .map(|(_, next)| (next.offset, next.first_patch))
        .collect();
    for (node, (next_offset, next_first_patch)) in nodes.iter_mut().zip(successors) {
        node.end = next_offset;
        node.last_patch = next_first_patch;
    }
    Ok(nodes)
}

fn import_textures(reader: &mut ByteReader, count: usize) -> Result<Vec<Texture>, FormatError> {
    let mut textures = decode_array::<Texture>(reader, count)?;
    let next_offsets: Vec<_> = textures.iter().skip(1).map(|t| t.offset).collect();
    for (texture, next_offset) in textures.iter_mut().zip(next_offsets) {
        texture.end = next_offset;
    }
    Ok(textures)
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        DatasetWriter, FaceElement, NodeEntry, Signature, VertexElement, HEADER_SIZE, PADDING,
    };

    fn triangle_signature() -> Signature {
        Signature::new(VertexElement::standard(false, false, false), FaceElement::triangles(), 0)
    }

    /// Root with two children, each of which is a leaf.
    fn small_dataset() -> Vec<u8> {
        let signature = triangle_signature();
        let mut writer = DatasetWriter::new(signature, Sphere::new(Vec3A::ZERO, 2.0));
        let sink = 3;
        writer.add_node(NodeEntry::synthetic(&signature, 10.0, 4, 4).with_patches(vec![
            Patch { child: 1, triangle_end: 2, texture: None },
            Patch { child: 2, triangle_end: 4, texture: None },
        ]));
        writer.add_node(NodeEntry::synthetic(&signature, 1.0, 300, 8).with_patches(vec![Patch {
            child: sink,
            triangle_end: 8,
            texture: None,
        }]));
        writer.add_node(NodeEntry::synthetic(&signature, 1.0, 3, 1).with_patches(vec![Patch {
            child: sink,
            triangle_end: 1,
            texture: None,
        }]));
        writer.finish()
    }

    #[test]
    fn byte_ranges_partition_payloads() {
        let bytes = small_dataset();
        let header = Header::parse(&bytes, ByteOrder::Little).unwrap();
        let index = NodeIndex::import(&header, &bytes, HEADER_SIZE, ByteOrder::Little).unwrap();

        assert_eq!(index.node_count(), 4);
        assert_eq!(index.sink(), 3);
        let nodes = index.nodes();
        for pair in nodes.windows(2) {
            assert_eq!(pair[0].last_byte().0, pair[1].offset.0 - 1);
            assert!(pair[0].offset < pair[1].offset);
            assert_eq!(pair[0].offset.0 % PADDING, 0);
        }
        assert_eq!(nodes[3].byte_size(), 0);
        assert_eq!(nodes[3].byte_range(), None);
        // 300 vertices of 12 bytes spill into a second block.
        assert!(nodes[1].byte_size() > PADDING);
    }

    #[test]
    fn patch_ranges_come_from_successors() {
        let bytes = small_dataset();
        let header = Header::parse(&bytes, ByteOrder::Little).unwrap();
        let index = NodeIndex::import(&header, &bytes, HEADER_SIZE, ByteOrder::Little).unwrap();

        assert_eq!(index.node(0).patch_range(), 0..2);
        assert_eq!(index.node(1).patch_range(), 2..3);
        assert_eq!(index.node(2).patch_range(), 3..4);
        assert_eq!(index.children(0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(index.children(1).count(), 0);
    }

    #[test]
    fn child_before_parent_is_rejected() {
        let signature = triangle_signature();
        let mut writer = DatasetWriter::new(signature, Sphere::new(Vec3A::ZERO, 2.0));
        writer.add_node(NodeEntry::synthetic(&signature, 10.0, 3, 1).with_patches(vec![Patch {
            child: 1,
            triangle_end: 1,
            texture: None,
        }]));
        writer.add_node(NodeEntry::synthetic(&signature, 1.0, 3, 1).with_patches(vec![Patch {
            child: 0,
            triangle_end: 1,
            texture: None,
        }]));
        let bytes = writer.finish();
        let header = Header::parse(&bytes, ByteOrder::Little).unwrap();
        assert!(matches!(
            NodeIndex::import(&header, &bytes, HEADER_SIZE, ByteOrder::Little),
            Err(FormatError::CorruptIndex(_))
        ));
    }

    #[test]
    fn truncated_index_is_rejected() {
        let bytes = small_dataset();
        let header = Header::parse(&bytes, ByteOrder::Little).unwrap();
        let cut = HEADER_SIZE + header.index_size() as usize - 1;
        assert!(matches!(
            NodeIndex::import(&header, &bytes[..cut], HEADER_SIZE, ByteOrder::Little),
            Err(FormatError::Truncated { .. })
        ));
    }
}
