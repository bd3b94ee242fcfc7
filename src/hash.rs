//! Content checksum and the hash key used by the content index.
//!
//! Deduplication is keyed on `(width, height, checksum)` where the checksum
//! is the wrapping sum of all pixel words. Two buffers with equal dimensions
//! and equal checksums are treated as identical content; this is a deliberate
//! speed-over-certainty trade-off, not a bug to be fixed with a byte
//! compare. The checksum is spread across hash
//! buckets with a reversible (bijective) 32-bit mix, so the hash is explicitly
//! non-cryptographic.

use std::hash::{Hash, Hasher};

/// Wrapping sum of all pixel words. Cheap pre-filter and equality basis.
#[must_use]
pub fn checksum(pixels: &[u32]) -> u32 {
    pixels.iter().fold(0u32, |acc, &px| acc.wrapping_add(px))
}

/// Reversible 32-bit mix (the murmur3 finalizer, which is bijective).
///
/// Used only to decorrelate checksums before they index hash buckets;
/// `unmix32` recovers the input exactly.
#[must_use]
pub fn mix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Exact inverse of [`mix32`].
#[must_use]
pub fn unmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x7ed1_b41d);
    h ^= h >> 13;
    h ^= h >> 26;
    h = h.wrapping_mul(0xa5cb_9243);
    h ^= h >> 16;
    h
}

/// Identity of a picture's content as seen by the cache.
///
/// Equality is `(width, height, checksum)`; same-checksum buffers of the same
/// size collapse into one cache entry by contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentKey {
    pub width: u32,
    pub height: u32,
    pub checksum: u32,
}

impl ContentKey {
    #[must_use]
    pub fn new(width: u32, height: u32, checksum: u32) -> Self {
        Self {
            width,
            height,
            checksum,
        }
    }
}

impl Hash for ContentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(mix32(self.checksum));
        state.write_u32(self.width);
        state.write_u32(self.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_roundtrips() {
        for h in [0u32, 1, 0xdead_beef, u32::MAX, 0x1234_5678, 42] {
            assert_eq!(unmix32(mix32(h)), h);
            assert_eq!(mix32(unmix32(h)), h);
        }
    }

    #[test]
    fn checksum_wraps_instead_of_overflowing() {
        assert_eq!(checksum(&[u32::MAX, 2]), 1);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn key_equality_ignores_pixel_order() {
        // [1, 2] and [2, 1] share a checksum; by contract they are the same
        // content to this cache.
        let a = ContentKey::new(2, 1, checksum(&[1, 2]));
        let b = ContentKey::new(2, 1, checksum(&[2, 1]));
        assert_eq!(a, b);

        let c = ContentKey::new(1, 2, checksum(&[1, 2]));
        assert_ne!(a, c);
    }
}
