use crate::core::glam::Vec3;
use crate::{
    AttributeType, ByteOrder, Compression, FaceElement, FormatError, Node, Signature,
    VertexElement,
};

use std::sync::Arc;

/// Decoded geometry for one node, ready to upload.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodePayload {
    pub vertex_count: u32,
    pub face_count: u32,
    /// Attribute-major vertex blocks.
    pub vertices: Vec<u8>,
    /// Attribute-major face blocks. Empty for point clouds.
    pub faces: Vec<u8>,
}

impl NodePayload {
    pub fn byte_size(&self) -> usize {
        self.vertices.len() + self.faces.len()
    }

    /// Reads back the position block. Only meaningful for `F32 × 3` positions.
    pub fn positions(&self, signature: &Signature, order: ByteOrder) -> Vec<Vec3> {
        let position = signature.vertex.element.attributes[VertexElement::POSITION];
        if position != crate::Attribute::new(AttributeType::F32, 3) {
            return Vec::new();
        }
        let len = self.vertex_count as usize * 12;
        let words: Vec<u32> = bytemuck::pod_collect_to_vec::<u8, u32>(&self.vertices[..len]);
        words
            .chunks_exact(3)
            .map(|c| {
                Vec3::from_array([c[0], c[1], c[2]].map(|w| {
                    f32::from_bits(match order {
                        ByteOrder::Little => u32::from_le(w),
                        ByteOrder::Big => u32::from_be(w),
                    })
                }))
            })
            .collect()
    }
}

/// Everything needed to decode one node's payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PayloadLayout {
    pub signature: Signature,
    pub vertex_count: u32,
    pub face_count: u32,
    pub order: ByteOrder,
}

impl PayloadLayout {
    pub fn new(signature: Signature, node: &Node, order: ByteOrder) -> Self {
        Self {
            signature,
            vertex_count: node.vertex_count as u32,
            face_count: node.face_count as u32,
            order,
        }
    }

    pub fn vertex_block_size(&self) -> usize {
        self.signature
            .vertex
            .element
            .block_size(self.vertex_count as usize)
    }

    pub fn face_block_size(&self) -> usize {
        self.signature.face.element.block_size(self.face_count as usize)
    }
}

/// Turns the bytes fetched for a node into a [`NodePayload`]. Runs off the main thread, so it must be `Send + Sync`.
pub trait PayloadDecoder: Send + Sync {
    fn decode(&self, layout: &PayloadLayout, bytes: Vec<u8>) -> Result<NodePayload, FormatError>;
}

/// Uncompressed payloads: a vertex block followed by a face block, padded up to the next block boundary.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawDecoder;

impl PayloadDecoder for RawDecoder {
    fn decode(&self, layout: &PayloadLayout, mut bytes: Vec<u8>) -> Result<NodePayload, FormatError> {
        let vertex_size = layout.vertex_block_size();
        let expected = vertex_size + layout.face_block_size();
        if bytes.len() < expected {
            return Err(FormatError::PayloadSize {
                expected,
                found: bytes.len(),
            });
        }
        bytes.truncate(expected);
        let faces = bytes.split_off(vertex_size);
        validate_indices(layout, &faces)?;

        Ok(NodePayload {
            vertex_count: layout.vertex_count,
            face_count: layout.face_count,
            vertices: bytes,
            faces,
        })
    }
}

/// Two little-endian `u32`s (compressed length, raw length) followed by an LZ4 block that decompresses to the raw layout.
/// Anything after the block is padding.
#[derive(Clone, Copy, Debug, Default)]
pub struct Lz4Decoder;

const LZ4_PREFIX: usize = 8;

impl PayloadDecoder for Lz4Decoder {
    fn decode(&self, layout: &PayloadLayout, bytes: Vec<u8>) -> Result<NodePayload, FormatError> {
        if bytes.len() < LZ4_PREFIX {
            return Err(FormatError::PayloadSize {
                expected: LZ4_PREFIX,
                found: bytes.len(),
            });
        }
        let block_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let raw_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let block = bytes
            .get(LZ4_PREFIX..LZ4_PREFIX + block_len)
            .ok_or(FormatError::PayloadSize {
                expected: LZ4_PREFIX + block_len,
                found: bytes.len(),
            })?;

        let raw = lz4_flex::block::decompress(block, raw_len).map_err(|e| FormatError::Lz4(e.to_string()))?;
        RawDecoder.decode(layout, raw)
    }
}

/// Compresses a raw payload into the form read by [`Lz4Decoder`].
pub fn compress_lz4(raw: &[u8]) -> Vec<u8> {
    let block = lz4_flex::block::compress(raw);
    let mut bytes = Vec::with_capacity(LZ4_PREFIX + block.len());
    bytes.extend_from_slice(&(block.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&block);
    bytes
}

/// Picks the built-in decoder for `signature`. MECO and CORTO datasets need a decoder supplied by the host.
pub fn builtin_decoder(signature: &Signature) -> Result<Arc<dyn PayloadDecoder>, FormatError> {
    match signature.compression() {
        Compression::None => Ok(Arc::new(RawDecoder)),
        Compression::Lz4 => Ok(Arc::new(Lz4Decoder)),
        other => Err(FormatError::UnsupportedCompression(other)),
    }
}

fn validate_indices(layout: &PayloadLayout, faces: &[u8]) -> Result<(), FormatError> {
    let index = layout.signature.face.element.attributes[FaceElement::INDEX];
    let count = layout.face_count as usize * index.number as usize;
    let vertex_count = layout.vertex_count;
    let check = |i: u32| {
        if i >= vertex_count {
            Err(FormatError::IndexOutOfRange {
                index: i,
                vertex_count,
            })
        } else {
            Ok(())
        }
    };
    match (index.kind, layout.order) {
        (AttributeType::U16, ByteOrder::Little) => faces[..count * 2]
            .chunks_exact(2)
            .try_for_each(|c| check(u16::from_le_bytes([c[0], c[1]]) as u32)),
        (AttributeType::U16, ByteOrder::Big) => faces[..count * 2]
            .chunks_exact(2)
            .try_for_each(|c| check(u16::from_be_bytes([c[0], c[1]]) as u32)),
        (AttributeType::U32, ByteOrder::Little) => faces[..count * 4]
            .chunks_exact(4)
            .try_for_each(|c| check(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))),
        (AttributeType::U32, ByteOrder::Big) => faces[..count * 4]
            .chunks_exact(4)
            .try_for_each(|c| check(u32::from_be_bytes([c[0], c[1], c[2], c[3]]))),
        _ => Ok(()),
    }
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
    use crate::{raw_payload, PADDING};

    fn layout(vertex_count: u32, face_count: u32) -> PayloadLayout {
        PayloadLayout {
            signature: Signature::new(
                VertexElement::standard(false, false, false),
                FaceElement::triangles(),
                0,
            ),
            vertex_count,
            face_count,
            order: ByteOrder::Little,
        }
    }

    fn triangle() -> (Vec<[f32; 3]>, Vec<[u16; 3]>) {
        (
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn raw_payload_strips_padding() {
        let (positions, triangles) = triangle();
        let mut bytes = raw_payload(&positions, &triangles);
        bytes.resize(PADDING as usize, 0);

        let payload = RawDecoder.decode(&layout(3, 1), bytes).unwrap();
        assert_eq!(payload.vertices.len(), 36);
        assert_eq!(payload.faces.len(), 6);
        let signature = layout(3, 1).signature;
        assert_eq!(
            payload.positions(&signature, ByteOrder::Little)[1],
            Vec3::new(1.0, 0.0, 0.0)
        );
    }

    #[test]
    fn short_payload_is_rejected() {
        assert_eq!(
            RawDecoder.decode(&layout(3, 1), vec![0; 10]),
            Err(FormatError::PayloadSize {
                expected: 42,
                found: 10
            })
        );
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let (positions, _) = triangle();
        let bytes = raw_payload(&positions, &[[0, 1, 7]]);
        assert_eq!(
            RawDecoder.decode(&layout(3, 1), bytes),
            Err(FormatError::IndexOutOfRange {
                index: 7,
                vertex_count: 3
            })
        );
    }

    #[test]
    fn lz4_payload_decodes_to_raw() {
        let (positions, triangles) = triangle();
        let raw = raw_payload(&positions, &triangles);
        let mut compressed = compress_lz4(&raw);
        // Block padding after the compressed block must be ignored.
        compressed.resize(compressed.len() + 100, 0);

        let from_lz4 = Lz4Decoder.decode(&layout(3, 1), compressed).unwrap();
        let from_raw = RawDecoder.decode(&layout(3, 1), raw).unwrap();
        assert_eq!(from_lz4, from_raw);
    }

    #[test]
    fn compressed_formats_need_injected_decoders() {
        let mut signature = layout(3, 1).signature;
        signature.flags = Signature::CORTO;
        assert!(matches!(
            builtin_decoder(&signature),
            Err(FormatError::UnsupportedCompression(Compression::Corto))
        ));
    }
}
