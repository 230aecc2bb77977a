use crate::{ByteReader, Decode, FormatError};

use smallvec::SmallVec;

/// The scalar type of one attribute component.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum AttributeType {
    #[default]
    None = 0,
    I8 = 1,
    U8 = 2,
    I16 = 3,
    U16 = 4,
    I32 = 5,
    U32 = 6,
    F32 = 7,
    F64 = 8,
}

impl AttributeType {
    pub fn from_code(code: u8) -> Result<Self, FormatError> {
        Ok(match code {
            0 => Self::None,
            1 => Self::I8,
            2 => Self::U8,
            3 => Self::I16,
            4 => Self::U16,
            5 => Self::I32,
            6 => Self::U32,
            7 => Self::F32,
            8 => Self::F64,
            other => return Err(FormatError::UnknownAttributeType(other)),
        })
    }

    pub const fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Attribute {
    pub kind: AttributeType,
    /// Number of components.
    pub number: u8,
}

impl Attribute {
    pub const NONE: Self = Self {
        kind: AttributeType::None,
        number: 0,
    };

    pub const fn new(kind: AttributeType, number: u8) -> Self {
        Self { kind, number }
    }

    pub const fn size(&self) -> usize {
        self.kind.size() * self.number as usize
    }

    pub fn is_present(&self) -> bool {
        self.kind != AttributeType::None && self.number > 0
    }
}

impl Decode for Attribute {
    const SIZE: usize = 2;

    fn decode(reader: &mut ByteReader) -> Result<Self, FormatError> {
        let kind = AttributeType::from_code(reader.read_u8()?)?;
        let number = reader.read_u8()?;
        Ok(Self { kind, number })
    }
}

pub const MAX_ATTRIBUTES: usize = 8;

/// Up to eight attributes, each stored as one contiguous block per node payload (attribute-major).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Element {
    pub attributes: [Attribute; MAX_ATTRIBUTES],
}

impl Element {
    /// Bytes per item (vertex or face) summed over all attributes.
    pub fn stride(&self) -> usize {
        self.attributes.iter().map(Attribute::size).sum()
    }

    /// Bytes needed for `count` items.
    pub fn block_size(&self, count: usize) -> usize {
        self.stride() * count
    }

    /// `(slot, byte offset)` of each present attribute's block inside a payload of `count` items.
    pub fn block_offsets(&self, count: usize) -> SmallVec<[(usize, usize); MAX_ATTRIBUTES]> {
        let mut offset = 0;
        let mut offsets = SmallVec::new();
        for (slot, attribute) in self.attributes.iter().enumerate() {
            if attribute.is_present() {
                offsets.push((slot, offset));
                offset += attribute.size() * count;
            }
        }
        offsets
    }

    pub fn has(&self, slot: usize) -> bool {
        self.attributes[slot].is_present()
    }
}

impl Decode for Element {
    const SIZE: usize = MAX_ATTRIBUTES * Attribute::SIZE;

    fn decode(reader: &mut ByteReader) -> Result<Self, FormatError> {
        let mut attributes = [Attribute::NONE; MAX_ATTRIBUTES];
        for attribute in attributes.iter_mut() {
            *attribute = Attribute::decode(reader)?;
        }
        Ok(Self { attributes })
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct VertexElement {
    pub element: Element,
}

impl VertexElement {
    pub const POSITION: usize = 0;
    pub const NORMAL: usize = 1;
    pub const COLOR: usize = 2;
    pub const TEXCOORD: usize = 3;
    pub const DATA0: usize = 4;

    /// Float positions, optionally with normals (3 × i16), colors (4 × u8) and texture coordinates (2 × f32).
    pub fn standard(normals: bool, colors: bool, texcoords: bool) -> Self {
        let mut element = Element::default();
        element.attributes[Self::POSITION] = Attribute::new(AttributeType::F32, 3);
        if normals {
            element.attributes[Self::NORMAL] = Attribute::new(AttributeType::I16, 3);
        }
        if colors {
            element.attributes[Self::COLOR] = Attribute::new(AttributeType::U8, 4);
        }
        if texcoords {
            element.attributes[Self::TEXCOORD] = Attribute::new(AttributeType::F32, 2);
        }
        Self { element }
    }

    pub fn has_position(&self) -> bool {
        self.element.has(Self::POSITION)
    }

    pub fn has_normal(&self) -> bool {
        self.element.has(Self::NORMAL)
    }

    pub fn has_color(&self) -> bool {
        self.element.has(Self::COLOR)
    }

    pub fn has_texcoord(&self) -> bool {
        self.element.has(Self::TEXCOORD)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct FaceElement {
    pub element: Element,
}

impl FaceElement {
    pub const INDEX: usize = 0;
    pub const NORMAL: usize = 1;
    pub const COLOR: usize = 2;
    pub const TEXCOORD: usize = 3;
    pub const DATA0: usize = 4;

    /// Triangles indexed with three `u16`s.
    pub fn triangles() -> Self {
        let mut element = Element::default();
        element.attributes[Self::INDEX] = Attribute::new(AttributeType::U16, 3);
        Self { element }
    }

    /// No faces at all; the dataset is a point cloud.
    pub fn points() -> Self {
        Self::default()
    }

    pub fn has_index(&self) -> bool {
        self.element.has(Self::INDEX)
    }

    pub fn index(&self) -> Attribute {
        self.element.attributes[Self::INDEX]
    }
}

/// How node payloads are encoded on disk.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Compression {
    None,
    Meco,
    Corto,
    Lz4,
}

/// The per-vertex and per-face attribute layout of a dataset.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Signature {
    pub vertex: VertexElement,
    pub face: FaceElement,
    pub flags: u32,
}

impl Signature {
    /// Patches reference textures.
    pub const PTEXTURE: u32 = 0x1;
    pub const MECO: u32 = 0x2;
    pub const CORTO: u32 = 0x4;
    /// Each payload is a length-prefixed LZ4 frame of the raw layout.
    pub const LZ4: u32 = 0x8;

    pub fn new(vertex: VertexElement, face: FaceElement, flags: u32) -> Self {
        Self {
            vertex,
            face,
            flags,
        }
    }

    pub fn compression(&self) -> Compression {
        if self.flags & Self::CORTO != 0 {
            Compression::Corto
        } else if self.flags & Self::MECO != 0 {
            Compression::Meco
        } else if self.flags & Self::LZ4 != 0 {
            Compression::Lz4
        } else {
            Compression::None
        }
    }

    pub fn has_textures(&self) -> bool {
        self.flags & Self::PTEXTURE != 0
    }

    pub fn is_point_cloud(&self) -> bool {
        !self.face.has_index()
    }

    /// Bytes of a decoded (raw) payload with the given counts.
    pub fn raw_payload_size(&self, vertex_count: usize, face_count: usize) -> usize {
        self.vertex.element.block_size(vertex_count) + self.face.element.block_size(face_count)
    }
}

impl Decode for Signature {
    const SIZE: usize = 2 * Element::SIZE + 4;

    fn decode(reader: &mut ByteReader) -> Result<Self, FormatError> {
        let vertex = VertexElement {
            element: Element::decode(reader)?,
        };
        let face = FaceElement {
            element: Element::decode(reader)?,
        };
        let flags = reader.read_u32()?;
        Ok(Self {
            vertex,
            face,
            flags,
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
    use crate::{decode_at, ByteOrder};

    #[test]
    fn block_layout_is_attribute_major() {
        let vertex = VertexElement::standard(true, true, false);
        assert_eq!(vertex.element.stride(), 12 + 6 + 4);
        let offsets = vertex.element.block_offsets(10);
        assert_eq!(offsets.as_slice(), &[(0, 0), (1, 120), (2, 180)]);
    }

    #[test]
    fn decode_signature_and_flags() {
        let mut bytes = vec![0u8; Signature::SIZE];
        // Vertex positions: 3 floats.
        bytes[0] = AttributeType::F32 as u8;
        bytes[1] = 3;
        // Face indices: 3 u16.
        bytes[16] = AttributeType::U16 as u8;
        bytes[17] = 3;
        bytes[32..36].copy_from_slice(&(Signature::PTEXTURE | Signature::LZ4).to_le_bytes());

        let (signature, consumed) = decode_at::<Signature>(&bytes, 0, ByteOrder::Little).unwrap();
        assert_eq!(consumed, 36);
        assert_eq!(
            signature,
            Signature::new(
                VertexElement::standard(false, false, false),
                FaceElement::triangles(),
                Signature::PTEXTURE | Signature::LZ4
            )
        );
        assert!(signature.has_textures());
        assert!(!signature.is_point_cloud());
        assert_eq!(signature.compression(), Compression::Lz4);
    }

    #[test]
    fn unknown_attribute_type_is_an_error() {
        let bytes = [9u8, 1];
        assert_eq!(
            decode_at::<Attribute>(&bytes, 0, ByteOrder::Little).map(|(a, _)| a),
            Err(FormatError::UnknownAttributeType(9))
        );
    }
}
