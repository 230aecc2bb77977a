use crate::FormatError;

use serde::{Deserialize, Serialize};

/// The byte order of every number in a dataset. This is a single flag for the whole engine.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// A cursor over a byte slice that decodes fixed-width numbers.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    order: ByteOrder,
}

macro_rules! read_number {
    ($name: ident, $t: ty) => {
        #[inline]
        pub fn $name(&mut self) -> Result<$t, FormatError> {
            let raw = self.take::<{ std::mem::size_of::<$t>() }>()?;
            Ok(match self.order {
                ByteOrder::Little => <$t>::from_le_bytes(raw),
                ByteOrder::Big => <$t>::from_be_bytes(raw),
            })
        }
    };
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8], offset: usize, order: ByteOrder) -> Self {
        Self {
            bytes,
            offset,
            order,
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Fails unless at least `len` more bytes are available.
    pub fn require(&self, len: usize) -> Result<(), FormatError> {
        let available = self.bytes.len().saturating_sub(self.offset);
        if available < len {
            return Err(FormatError::Truncated {
                offset: self.offset,
                needed: len,
                available,
            });
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        self.require(N)?;
        let mut raw = [0; N];
        raw.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        Ok(raw)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take::<1>()?[0])
    }

    read_number!(read_u16, u16);
    read_number!(read_i16, i16);
    read_number!(read_u32, u32);
    read_number!(read_f32, f32);

    /// 64-bit counts are stored as two 32-bit words, low word first (in file order for little-endian data).
    pub fn read_u64_words(&mut self) -> Result<u64, FormatError> {
        let (lo, hi) = match self.order {
            ByteOrder::Little => {
                let lo = self.read_u32()?;
                (lo, self.read_u32()?)
            }
            ByteOrder::Big => {
                let hi = self.read_u32()?;
                (self.read_u32()?, hi)
            }
        };
        Ok(((hi as u64) << 32) | lo as u64)
    }
}

/// A fixed-layout record.
pub trait Decode: Sized {
    /// Bytes consumed by one record.
    const SIZE: usize;

    fn decode(reader: &mut ByteReader) -> Result<Self, FormatError>;
}

/// Decodes one `T` at `offset` and returns it with the number of bytes consumed.
pub fn decode_at<T: Decode>(
    bytes: &[u8],
    offset: usize,
    order: ByteOrder,
) -> Result<(T, usize), FormatError> {
    let mut reader = ByteReader::new(bytes, offset, order);
    reader.require(T::SIZE)?;
    let value = T::decode(&mut reader)?;
    debug_assert_eq!(reader.offset() - offset, T::SIZE);
    Ok((value, T::SIZE))
}

/// Decodes a dense array of `count` records.
pub fn decode_array<T: Decode>(reader: &mut ByteReader, count: usize) -> Result<Vec<T>, FormatError> {
    reader.require(count * T::SIZE)?;
    (0..count).map(|_| T::decode(reader)).collect()
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
