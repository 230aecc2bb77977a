use crate::core::geometry::Sphere;
use crate::core::glam::Vec3A;
use crate::core::static_assertions::const_assert_eq;
use crate::{
    decode_at, ByteOrder, ByteRange, ByteReader, Decode, FormatError, Node, Patch, Signature,
    Texture,
};

/// "Nxs " read as a 32-bit integer.
pub const MAGIC: u32 = 0x4E78_7320;
pub const HEADER_SIZE: usize = 88;

const_assert_eq!(HEADER_SIZE, 4 + 4 + 8 + 8 + Signature::SIZE + 3 * 4 + 4 * 4);

#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub version: u32,
    pub vertex_count: u64,
    pub face_count: u64,
    pub signature: Signature,
    pub node_count: u32,
    pub patch_count: u32,
    pub texture_count: u32,
    pub sphere: Sphere,
}

impl Header {
    /// Parses the header at the start of `bytes`. Fails with [`FormatError::BadMagic`] for anything that isn't a Nexus file.
    pub fn parse(bytes: &[u8], order: ByteOrder) -> Result<Self, FormatError> {
        decode_at::<Self>(bytes, 0, order).map(|(header, _)| header)
    }

    /// Bytes spanned by the node, patch and texture arrays.
    pub fn index_size(&self) -> u64 {
        self.node_count as u64 * Node::SIZE as u64
            + self.patch_count as u64 * Patch::SIZE as u64
            + self.texture_count as u64 * Texture::SIZE as u64
    }

    /// The index immediately follows the header.
    pub fn index_range(&self) -> ByteRange {
        ByteRange::from_start_and_len(HEADER_SIZE as u64, self.index_size().max(1))
    }

    pub fn header_range() -> ByteRange {
        ByteRange::from_start_and_len(0, HEADER_SIZE as u64)
    }
}

impl Decode for Header {
    const SIZE: usize = HEADER_SIZE;

    fn decode(reader: &mut ByteReader) -> Result<Self, FormatError> {
        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic {
                found: magic,
                expected: MAGIC,
            });
        }
        let version = reader.read_u32()?;
        let vertex_count = reader.read_u64_words()?;
        let face_count = reader.read_u64_words()?;
        let signature = Signature::decode(reader)?;
        let node_count = reader.read_u32()?;
        let patch_count = reader.read_u32()?;
        let texture_count = reader.read_u32()?;
        let center = Vec3A::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?);
        let radius = reader.read_f32()?;

        Ok(Self {
            version,
            vertex_count,
            face_count,
            signature,
            node_count,
            patch_count,
            texture_count,
            sphere: Sphere::new(center, radius),
        })
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
    use crate::{ByteWriter, Encode, FaceElement, VertexElement};

    fn sample_header() -> Header {
        Header {
            version: 2,
            vertex_count: (3 << 32) + 17,
            face_count: 1000,
            signature: Signature::new(VertexElement::standard(true, false, false), FaceElement::triangles(), 0),
            node_count: 5,
            patch_count: 7,
            texture_count: 0,
            sphere: Sphere::new(Vec3A::new(1.0, 2.0, 3.0), 4.0),
        }
    }

    #[test]
    fn parse_is_idempotent() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let mut writer = ByteWriter::new(order);
            sample_header().encode(&mut writer);
            let bytes = writer.into_bytes();
            assert_eq!(bytes.len(), HEADER_SIZE);

            let first = Header::parse(&bytes, order).unwrap();
            let second = Header::parse(&bytes, order).unwrap();
            assert_eq!(first, second);
            assert_eq!(first, sample_header());
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut writer = ByteWriter::new(ByteOrder::Little);
        sample_header().encode(&mut writer);
        let mut bytes = writer.into_bytes();
        bytes[0] ^= 0xff;
        assert!(matches!(
            Header::parse(&bytes, ByteOrder::Little),
            Err(FormatError::BadMagic { expected: MAGIC, .. })
        ));
    }

    #[test]
    fn short_header_is_truncated() {
        let bytes = MAGIC.to_le_bytes();
        assert!(matches!(
            Header::parse(&bytes, ByteOrder::Little),
            Err(FormatError::Truncated { needed: HEADER_SIZE, .. })
        ));
    }

    #[test]
    fn index_follows_header() {
        let header = sample_header();
        assert_eq!(header.index_size(), 5 * 44 + 7 * 12);
        assert_eq!(header.index_range().start, 88);
        assert_eq!(header.index_range().len(), 5 * 44 + 7 * 12);
    }
}
