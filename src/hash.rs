//! Key hashing and bucket pair derivation.

use crate::word::Word;

const MURMUR_M: u64 = 0xc6a4_a793_5bd1_e995;
const MURMUR_R: u32 = 47;

/// MurmurHash64A over `bytes`.
pub(crate) fn murmur64a(bytes: &[u8], seed: u64) -> u64 {
    let mut h = seed ^ (bytes.len() as u64).wrapping_mul(MURMUR_M);

    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let mut k = u64::from_le_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]);
        k = k.wrapping_mul(MURMUR_M);
        k ^= k >> MURMUR_R;
        k = k.wrapping_mul(MURMUR_M);
        h ^= k;
        h = h.wrapping_mul(MURMUR_M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, byte) in tail.iter().enumerate().rev() {
            h ^= u64::from(*byte) << (8 * i);
        }
        h = h.wrapping_mul(MURMUR_M);
    }

    h ^= h >> MURMUR_R;
    h = h.wrapping_mul(MURMUR_M);
    h ^= h >> MURMUR_R;
    h
}

/// Hashes the raw little-endian bytes of the key.
#[inline]
pub(crate) fn hash_key<K: Word>(key: K, seed: u64) -> u64 {
    let bytes = key.to_u64().to_le_bytes();
    murmur64a(&bytes[..K::BYTES], seed)
}

/// The two candidate buckets of a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BucketPair {
    /// The bucket that is locked for every multi-step operation on the key.
    pub(crate) primary: usize,
    /// The alternative bucket.
    pub(crate) secondary: usize,
}

impl BucketPair {
    /// Derives the bucket pair from the hash value.
    ///
    /// The lower half selects the primary bucket and the upper half the secondary bucket.
    #[allow(clippy::cast_possible_truncation)] // Both halves fit in 32 bits.
    #[inline]
    pub(crate) fn from_hash(hash: u64, num_buckets: usize) -> Self {
        debug_assert_ne!(num_buckets, 0);
        let num_buckets = num_buckets as u64;
        Self {
            primary: ((hash & 0xFFFF_FFFF) % num_buckets) as usize,
            secondary: ((hash >> 32) % num_buckets) as usize,
        }
    }

    /// Returns the distinct buckets in probing order.
    #[inline]
    pub(crate) fn distinct(self) -> impl Iterator<Item = usize> {
        let secondary = (self.secondary != self.primary).then_some(self.secondary);
        std::iter::once(self.primary).chain(secondary)
    }
}
