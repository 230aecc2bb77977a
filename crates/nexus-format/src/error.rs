use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("bad magic number {found:#010x}, expected {expected:#010x}")]
    BadMagic { found: u32, expected: u32 },
    #[error("truncated buffer: needed {needed} bytes at offset {offset}, but only {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("unknown attribute type code {0}")]
    UnknownAttributeType(u8),
    #[error("payload compression {0:?} needs an injected decoder")]
    UnsupportedCompression(crate::Compression),
    #[error("payload has {found} bytes, but the signature requires at least {expected}")]
    PayloadSize { expected: usize, found: usize },
    #[error("face references vertex {index} but the node only has {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: u32 },
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    #[error("lz4 payload: {0}")]
    Lz4(String),
}
