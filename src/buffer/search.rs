//! Delimiter search
//!
//! Three interchangeable scans with identical results:
//!
//! - [`SearchStrategy::Linear`]: byte-by-byte
//! - [`SearchStrategy::Swar`]: eight bytes per step inside a `u64`
//! - [`SearchStrategy::Vector`]: `memchr`, which uses SIMD where available

use bytemuck::pod_read_unaligned;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SearchStrategy {
    Linear,
    Swar,
    #[default]
    Vector,
}

const LO: u64 = 0x0101_0101_0101_0101;
const HI: u64 = 0x8080_8080_8080_8080;

/// Offset of the first byte equal to `needle` inside one word, if any.
///
/// The high bit of each zero byte in `word ^ splat(needle)` is set; bits above
/// the first match may be false positives, so only the lowest one is used.
#[inline]
fn swar_match(word: u64, needle: u8) -> Option<usize> {
    let x = word ^ (LO * needle as u64);
    let found = x.wrapping_sub(LO) & !x & HI;
    (found != 0).then(|| (found.trailing_zeros() / 8) as usize)
}

fn swar_find(haystack: &[u8], needle: u8) -> Option<usize> {
    let mut chunks = haystack.chunks_exact(8);
    let mut offset = 0;
    for chunk in &mut chunks {
        // little-endian so the lowest bits hold the first byte
        let word = u64::from_le(pod_read_unaligned::<u64>(chunk));
        if let Some(i) = swar_match(word, needle) {
            return Some(offset + i);
        }
        offset += 8;
    }
    chunks
        .remainder()
        .iter()
        .position(|&b| b == needle)
        .map(|i| offset + i)
}

impl SearchStrategy {
    /// Index of the first `needle` in `haystack`.
    pub fn find(self, haystack: &[u8], needle: u8) -> Option<usize> {
        match self {
            SearchStrategy::Linear => haystack.iter().position(|&b| b == needle),
            SearchStrategy::Swar => swar_find(haystack, needle),
            SearchStrategy::Vector => memchr::memchr(needle, haystack),
        }
    }

    /// Index of the first `first` immediately followed by `second`.
    pub fn find2(self, haystack: &[u8], first: u8, second: u8) -> Option<usize> {
        match self {
            SearchStrategy::Linear => haystack.windows(2).position(|w| w[0] == first && w[1] == second),
            SearchStrategy::Vector => memchr::memmem::find(haystack, &[first, second]),
            SearchStrategy::Swar => {
                let mut from = 0;
                while let Some(i) = swar_find(&haystack[from..], first) {
                    let at = from + i;
                    match haystack.get(at + 1) {
                        Some(&b) if b == second => return Some(at),
                        Some(_) => from = at + 1,
                        None => return None,
                    }
                }
                None
            }
        }
    }
}
