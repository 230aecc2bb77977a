use crate::core::geometry::{Cone, Sphere};
use crate::core::glam::{Mat4, Vec3A};
use crate::{
    compress_lz4, Attribute, AttributeType, ByteOrder, ByteUnits, Compression, Element,
    FaceElement, Header, Node, NodeId, Patch, Signature, Texture, TextureId, VertexElement,
    HEADER_SIZE, MAGIC, NO_TEXTURE, PADDING,
};

/// The write-side twin of [`ByteReader`](crate::ByteReader).
pub struct ByteWriter {
    bytes: Vec<u8>,
    order: ByteOrder,
}

macro_rules! write_number {
    ($name: ident, $t: ty) => {
        #[inline]
        pub fn $name(&mut self, value: $t) {
            match self.order {
                ByteOrder::Little => self.bytes.extend_from_slice(&value.to_le_bytes()),
                ByteOrder::Big => self.bytes.extend_from_slice(&value.to_be_bytes()),
            }
        }
    };
}

impl ByteWriter {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            bytes: Vec::new(),
            order,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    write_number!(write_u16, u16);
    write_number!(write_i16, i16);
    write_number!(write_u32, u32);
    write_number!(write_f32, f32);

    pub fn write_u64_words(&mut self, value: u64) {
        let (lo, hi) = (value as u32, (value >> 32) as u32);
        match self.order {
            ByteOrder::Little => {
                self.write_u32(lo);
                self.write_u32(hi);
            }
            ByteOrder::Big => {
                self.write_u32(hi);
                self.write_u32(lo);
            }
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Zero-fills up to the next multiple of [`PADDING`].
    pub fn pad_to_block(&mut self) {
        let padded = ByteUnits(self.bytes.len() as u64).to_blocks_ceil().to_bytes();
        self.bytes.resize(padded.0 as usize, 0);
    }
}

pub trait Encode {
    fn encode(&self, writer: &mut ByteWriter);
}

impl Encode for Attribute {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.kind as u8);
        writer.write_u8(self.number);
    }
}

impl Encode for Element {
    fn encode(&self, writer: &mut ByteWriter) {
        for attribute in self.attributes.iter() {
            attribute.encode(writer);
        }
    }
}

impl Encode for Signature {
    fn encode(&self, writer: &mut ByteWriter) {
        self.vertex.element.encode(writer);
        self.face.element.encode(writer);
        writer.write_u32(self.flags);
    }
}

fn encode_sphere(sphere: &Sphere, writer: &mut ByteWriter) {
    for c in sphere.center.to_array() {
        writer.write_f32(c);
    }
    writer.write_f32(sphere.radius);
}

impl Encode for Header {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u32(MAGIC);
        writer.write_u32(self.version);
        writer.write_u64_words(self.vertex_count);
        writer.write_u64_words(self.face_count);
        self.signature.encode(writer);
        writer.write_u32(self.node_count);
        writer.write_u32(self.patch_count);
        writer.write_u32(self.texture_count);
        encode_sphere(&self.sphere, writer);
    }
}

/// Writes the on-disk record; `end` and `last_patch` are implied by the next node.
impl Encode for Node {
    fn encode(&self, writer: &mut ByteWriter) {
        debug_assert_eq!(self.offset.0 % PADDING, 0);
        writer.write_u32(self.offset.to_blocks_ceil().0);
        writer.write_u16(self.vertex_count);
        writer.write_u16(self.face_count);
        writer.write_f32(self.error);
        for c in self.cone.to_packed() {
            writer.write_i16(c);
        }
        encode_sphere(&self.sphere, writer);
        writer.write_f32(self.tight_radius);
        writer.write_u32(self.first_patch);
    }
}

impl Encode for Patch {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.child);
        writer.write_u32(self.triangle_end);
        writer.write_u32(self.texture.unwrap_or(NO_TEXTURE));
    }
}

impl Encode for Texture {
    fn encode(&self, writer: &mut ByteWriter) {
        debug_assert_eq!(self.offset.0 % PADDING, 0);
        writer.write_u32(self.offset.to_blocks_ceil().0);
        for c in self.uv_matrix.to_cols_array() {
            writer.write_f32(c);
        }
    }
}

/// One node handed to a [`DatasetWriter`].
#[derive(Clone, Debug)]
pub struct NodeEntry {
    pub vertex_count: u16,
    pub face_count: u16,
    pub error: f32,
    pub cone: Cone,
    pub sphere: Sphere,
    pub tight_radius: f32,
    pub patches: Vec<Patch>,
    /// Raw (uncompressed) payload in the dataset's byte order. [`NodeEntry::synthetic`] always writes little-endian.
    pub payload: Vec<u8>,
}

impl NodeEntry {
    /// A node with filler geometry: positions along the x axis and triangle fans over them.
    pub fn synthetic(signature: &Signature, error: f32, vertex_count: u16, face_count: u16) -> Self {
        Self {
            vertex_count,
            face_count,
            error,
            cone: Cone::default(),
            sphere: Sphere::new(Vec3A::ZERO, 1.0),
            tight_radius: 1.0,
            patches: Vec::new(),
            payload: synthetic_payload(signature, vertex_count, face_count),
        }
    }

    pub fn with_patches(mut self, patches: Vec<Patch>) -> Self {
        self.patches = patches;
        self
    }

    pub fn with_sphere(mut self, sphere: Sphere) -> Self {
        self.sphere = sphere;
        self.tight_radius = sphere.radius;
        self
    }
}

/// Serializes a complete dataset: header, index, then block-aligned node payloads and texture blobs.
///
/// Nodes must be added parent-first. The sink and the sentinel texture are appended by [`DatasetWriter::finish`]; patches of
/// leaf nodes should point at [`DatasetWriter::sink`].
pub struct DatasetWriter {
    signature: Signature,
    sphere: Sphere,
    order: ByteOrder,
    nodes: Vec<NodeEntry>,
    textures: Vec<(Vec<u8>, Mat4)>,
}

impl DatasetWriter {
    pub const VERSION: u32 = 2;

    pub fn new(signature: Signature, sphere: Sphere) -> Self {
        Self {
            signature,
            sphere,
            order: ByteOrder::Little,
            nodes: Vec::new(),
            textures: Vec::new(),
        }
    }

    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn add_node(&mut self, entry: NodeEntry) -> NodeId {
        self.nodes.push(entry);
        self.nodes.len() as NodeId - 1
    }

    pub fn add_texture(&mut self, image: Vec<u8>, uv_matrix: Mat4) -> TextureId {
        self.textures.push((image, uv_matrix));
        self.textures.len() as TextureId - 1
    }

    /// The id the sink will get if no more nodes are added.
    pub fn sink(&self) -> NodeId {
        self.nodes.len() as NodeId
    }

    pub fn finish(self) -> Vec<u8> {
        let Self {
            signature,
            sphere,
            order,
            nodes: entries,
            textures: images,
        } = self;

        let payloads: Vec<Vec<u8>> = entries
            .iter()
            .map(|e| match signature.compression() {
                Compression::Lz4 => compress_lz4(&e.payload),
                _ => e.payload.clone(),
            })
            .collect();

        let node_count = entries.len() as u32 + 1;
        let patch_count: u32 = entries.iter().map(|e| e.patches.len() as u32).sum();
        let texture_count = if images.is_empty() {
            0
        } else {
            images.len() as u32 + 1
        };
        let header = Header {
            version: Self::VERSION,
            vertex_count: entries.iter().map(|e| e.vertex_count as u64).sum(),
            face_count: entries.iter().map(|e| e.face_count as u64).sum(),
            signature,
            node_count,
            patch_count,
            texture_count,
            sphere,
        };

        // Lay out payloads after the block-aligned index. Every node gets at least one block so its range is never empty.
        let index_end = HEADER_SIZE as u64 + header.index_size();
        let mut cursor = ByteUnits(index_end).to_blocks_ceil().to_bytes().0;
        let block_len = |len: usize| ByteUnits(len.max(1) as u64).to_blocks_ceil().to_bytes().0;

        let mut nodes = Vec::with_capacity(node_count as usize);
        let mut first_patch = 0;
        for (entry, payload) in entries.iter().zip(payloads.iter()) {
            nodes.push(Node {
                offset: ByteUnits(cursor),
                end: ByteUnits(cursor),
                vertex_count: entry.vertex_count,
                face_count: entry.face_count,
                error: entry.error,
                cone: entry.cone,
                sphere: entry.sphere,
                tight_radius: entry.tight_radius,
                first_patch,
                last_patch: first_patch,
            });
            first_patch += entry.patches.len() as u32;
            cursor += block_len(payload.len());
        }
        nodes.push(Node {
            offset: ByteUnits(cursor),
            end: ByteUnits(cursor),
            vertex_count: 0,
            face_count: 0,
            error: 0.0,
            cone: Cone::default(),
            sphere: Sphere::default(),
            tight_radius: 0.0,
            first_patch,
            last_patch: first_patch,
        });

        let mut textures = Vec::with_capacity(texture_count as usize);
        for (image, uv_matrix) in images.iter() {
            textures.push(Texture {
                offset: ByteUnits(cursor),
                end: ByteUnits(cursor),
                uv_matrix: *uv_matrix,
            });
            cursor += block_len(image.len());
        }
        if !images.is_empty() {
            textures.push(Texture {
                offset: ByteUnits(cursor),
                end: ByteUnits(cursor),
                uv_matrix: Mat4::IDENTITY,
            });
        }

        let mut writer = ByteWriter::new(order);
        header.encode(&mut writer);
        for node in nodes.iter() {
            node.encode(&mut writer);
        }
        for patch in entries.iter().flat_map(|e| e.patches.iter()) {
            patch.encode(&mut writer);
        }
        for texture in textures.iter() {
            texture.encode(&mut writer);
        }
        debug_assert_eq!(writer.len() as u64, index_end);
        writer.pad_to_block();
        for payload in payloads.iter() {
            writer.write_bytes(payload);
            if payload.is_empty() {
                writer.write_u8(0);
            }
            writer.pad_to_block();
        }
        for (image, _) in images.iter() {
            writer.write_bytes(image);
            if image.is_empty() {
                writer.write_u8(0);
            }
            writer.pad_to_block();
        }
        writer.into_bytes()
    }
}

/// A little-endian raw payload with `F32 × 3` positions and `U16 × 3` triangles.
pub fn raw_payload(positions: &[[f32; 3]], triangles: &[[u16; 3]]) -> Vec<u8> {
    let mut writer = ByteWriter::new(ByteOrder::Little);
    for &c in bytemuck::cast_slice::<[f32; 3], f32>(positions) {
        writer.write_f32(c);
    }
    for &i in bytemuck::cast_slice::<[u16; 3], u16>(triangles) {
        writer.write_u16(i);
    }
    writer.into_bytes()
}

fn synthetic_payload(signature: &Signature, vertex_count: u16, face_count: u16) -> Vec<u8> {
    let mut writer = ByteWriter::new(ByteOrder::Little);
    for (slot, attribute) in signature.vertex.element.attributes.iter().enumerate() {
        if !attribute.is_present() {
            continue;
        }
        if slot == VertexElement::POSITION && *attribute == Attribute::new(AttributeType::F32, 3) {
            for v in 0..vertex_count {
                writer.write_f32(v as f32);
                writer.write_f32(0.0);
                writer.write_f32(0.0);
            }
        } else {
            writer.write_bytes(&vec![0; attribute.size() * vertex_count as usize]);
        }
    }
    for (slot, attribute) in signature.face.element.attributes.iter().enumerate() {
        if !attribute.is_present() {
            continue;
        }
        if slot == FaceElement::INDEX && *attribute == Attribute::new(AttributeType::U16, 3) {
            let n = vertex_count.max(1);
            for f in 0..face_count {
                for k in 0..3 {
                    writer.write_u16(((f as u32 + k) % n as u32) as u16);
                }
            }
        } else {
            writer.write_bytes(&vec![0; attribute.size() * face_count as usize]);
        }
    }
    writer.into_bytes()
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
    use crate::{NodeIndex, PayloadDecoder, PayloadLayout, RawDecoder};

    #[test]
    fn textured_dataset_layout() {
        let signature = Signature::new(
            VertexElement::standard(false, false, true),
            FaceElement::triangles(),
            Signature::PTEXTURE,
        );
        let mut writer = DatasetWriter::new(signature, Sphere::new(Vec3A::ZERO, 1.0)).byte_order(ByteOrder::Big);
        let texture = writer.add_texture(vec![7; 300], Mat4::from_scale(crate::core::glam::Vec3::splat(0.5)));
        let sink = 1;
        writer.add_node(NodeEntry::synthetic(&signature, 1.0, 3, 1).with_patches(vec![Patch {
            child: sink,
            triangle_end: 1,
            texture: Some(texture),
        }]));
        let bytes = writer.finish();

        let header = Header::parse(&bytes, ByteOrder::Big).unwrap();
        assert_eq!(header.texture_count, 2);
        let index = NodeIndex::import(&header, &bytes, HEADER_SIZE, ByteOrder::Big).unwrap();
        let range = index.texture(texture).byte_range().unwrap();
        assert_eq!(range.len(), 2 * PADDING);
        assert_eq!(bytes[range.start as usize], 7);
        assert_eq!(index.node_textures(0).collect::<Vec<_>>(), vec![texture]);

        // The payload is padded to its block, but still decodes.
        let node = index.node(0);
        let range = node.byte_range().unwrap();
        let payload_bytes = bytes[range.start as usize..=range.end_inclusive as usize].to_vec();
        let layout = PayloadLayout::new(signature, node, ByteOrder::Little);
        let payload = RawDecoder.decode(&layout, payload_bytes).unwrap();
        assert_eq!(payload.vertices.len(), 3 * (12 + 8));
    }
}
