/// Node and texture offsets are stored in units of this many bytes.
pub const PADDING: u64 = 256;

macro_rules! def_units {
    ($t: ident, $doc: literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $t<T>(pub T);
    };
}

def_units!(BlockUnits, "Denotes that the inner `T` is given in units of [`PADDING`]-sized blocks.");
def_units!(ByteUnits, "Denotes that the inner `T` is given in bytes.");

impl BlockUnits<u32> {
    pub fn to_bytes(self) -> ByteUnits<u64> {
        ByteUnits(self.0 as u64 * PADDING)
    }
}

impl ByteUnits<u64> {
    /// Rounds up to the next block boundary.
    pub fn to_blocks_ceil(self) -> BlockUnits<u32> {
        BlockUnits(((self.0 + PADDING - 1) / PADDING) as u32)
    }
}

/// An inclusive range of bytes, as used by an HTTP `Range` header.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

impl ByteRange {
    /// `len` must be nonzero.
    pub fn from_start_and_len(start: u64, len: u64) -> Self {
        debug_assert!(len > 0);
        Self {
            start,
            end_inclusive: start + len - 1,
        }
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end_inclusive + 1 - self.start
    }

    /// The value for a `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end_inclusive)
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

    #[test]
    fn block_conversions() {
        assert_eq!(BlockUnits(3).to_bytes(), ByteUnits(768));
        assert_eq!(ByteUnits(768).to_blocks_ceil(), BlockUnits(3));
        assert_eq!(ByteUnits(769).to_blocks_ceil(), BlockUnits(4));
    }

    #[test]
    fn range_header() {
        let range = ByteRange::from_start_and_len(88, 100);
        assert_eq!(range.len(), 100);
        assert_eq!(range.header_value(), "bytes=88-187");
    }
}
