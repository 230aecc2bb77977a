/// A dense, fixed-length set of bits, indexed by `u32`.
///
/// One of these is kept per traversal flag (visited, blocked, selected), so clearing must be cheap enough to do every frame.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; Self::num_words(len)],
            len,
        }
    }

    const fn num_words(len: usize) -> usize {
        (len + 63) / 64
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Changes the length to `len` and unsets every bit.
    pub fn reset(&mut self, len: usize) {
        self.words.clear();
        self.words.resize(Self::num_words(len), 0);
        self.len = len;
    }

    #[inline]
    pub fn get(&self, i: u32) -> bool {
        let i = i as usize;
        i < self.len && self.words[i / 64] & (1 << (i % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, i: u32) {
        let i = i as usize;
        assert!(i < self.len, "bit {} out of range {}", i, self.len);
        self.words[i / 64] |= 1 << (i % 64);
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterates over the set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = u32> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_i, &word)| {
                let base = (word_i * 64) as u32;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros();
                    bits &= bits - 1;
                    Some(base + tz)
                })
            })
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
