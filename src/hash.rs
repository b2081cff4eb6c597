//! Hash primitives and path-key derivation.
//!
//! Three hashes appear in the archive, each bound to format-specific rules:
//!
//! - **FNV-1a/64** keys the legacy bundle index. Paths get a `++` suffix
//!   before hashing; file paths are ASCII-lowercased first, directory paths
//!   keep their case but lose trailing slashes.
//! - **MurmurHash64A** keys the current bundle index, seeded with a per-
//!   archive 64-bit value. Paths are lowercased; directories lose trailing
//!   slashes; no suffix.
//! - **MurmurHash2-32** indexes GGPK directory children, seeded with the
//!   input length and fed the lowercased UTF-16LE name bytes.
//!
//! The archive's seed is not stored anywhere: the root path-rep's key is
//! `murmur_hash_64a("", seed)`, which is just the finalizer applied to the
//! seed, so running the finalizer backwards recovers it.

pub use murmurhash64::murmur_hash64a;

const FNV1A_OFFSET_BASIS_64: u64 = 0xcbf2_9ce4_8422_2325;
const FNV1A_PRIME_64: u64 = 0x0000_0100_0000_01b3;

/// Root path-rep key of the legacy unseeded index
/// (`fnv1a_64` of the empty directory path plus its `++` suffix).
pub const LEGACY_ROOT_HASH: u64 = 0x07e4_7507_b4a9_2e53;

const MURMUR64A_PRIME: u64 = 0xc6a4_a793_5bd1_e995;
/// Multiplicative inverse of [`MURMUR64A_PRIME`] modulo 2^64.
const MURMUR64A_PRIME_INVERSE: u64 = 0x5f7a_0ea7_e59b_19bd;
const MURMUR64A_SHIFT: u32 = 47;

/// Standard 64-bit FNV-1a.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash = FNV1A_OFFSET_BASIS_64;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV1A_PRIME_64);
    }
    hash
}

/// MurmurHash2 32-bit with the input length as seed, as used for GGPK
/// child-name indexing.
pub fn murmur2_32(data: &[u8]) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let len = data.len() as u32;
    let mut h = len;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Run the MurmurHash64A finalizer backwards.
///
/// `murmur_hash_64a("", seed)` is exactly the finalizer applied to the
/// seed, so this maps a root path-rep key back to the candidate seed.
pub fn unfinalize_murmur64a(mut h: u64) -> u64 {
    h ^= h >> MURMUR64A_SHIFT;
    h = h.wrapping_mul(MURMUR64A_PRIME_INVERSE);
    h ^= h >> MURMUR64A_SHIFT;
    h
}

/// How logical paths map to the 64-bit keys of the bundle index.
///
/// Picked once per archive when the index is opened; see
/// [`crate::index::BundleIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// Legacy indexes: FNV-1a over the lowercased path plus `++`.
    UnseededFnv1a,
    /// Current indexes: MurmurHash64A over the lowercased path.
    SeededMurmur64a { seed: u64 },
}

impl HashAlgorithm {
    /// Key for a file path. Lowercasing happens here in both variants,
    /// so callers pass paths as-is.
    pub fn hash_file(&self, path: &str) -> u64 {
        let lower = path.to_ascii_lowercase();
        match *self {
            HashAlgorithm::UnseededFnv1a => {
                let mut keyed = lower.into_bytes();
                keyed.extend_from_slice(b"++");
                fnv1a_64(&keyed)
            }
            HashAlgorithm::SeededMurmur64a { seed } => murmur_hash64a(lower.as_bytes(), seed),
        }
    }

    /// Key for a directory path. Trailing slashes are stripped; the legacy
    /// variant hashes the original case, matching the stored keys.
    pub fn hash_directory(&self, path: &str) -> u64 {
        let trimmed = path.trim_end_matches('/');
        match *self {
            HashAlgorithm::UnseededFnv1a => {
                let mut keyed = trimmed.as_bytes().to_vec();
                keyed.extend_from_slice(b"++");
                fnv1a_64(&keyed)
            }
            HashAlgorithm::SeededMurmur64a { seed } => {
                murmur_hash64a(trimmed.to_ascii_lowercase().as_bytes(), seed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn legacy_root_hash_is_the_empty_directory_key() {
        assert_eq!(
            HashAlgorithm::UnseededFnv1a.hash_directory(""),
            LEGACY_ROOT_HASH
        );
    }

    #[test]
    fn murmur2_32_of_empty_is_zero() {
        // Seed equals the length, so the empty input finalizes from zero.
        assert_eq!(murmur2_32(b""), 0);
    }

    #[test]
    fn murmur2_32_covers_every_tail_length() {
        let data = b"abcdefg";
        let mut seen = std::collections::HashSet::new();
        for n in 0..=data.len() {
            seen.insert(murmur2_32(&data[..n]));
        }
        assert_eq!(seen.len(), data.len() + 1);
    }

    #[test]
    fn seed_recovery_inverts_the_finalizer() {
        let seed = 0x0123_4567_89ab_cdef;
        assert_eq!(unfinalize_murmur64a(murmur_hash64a(b"", seed)), seed);
    }

    #[test]
    fn file_keys_are_case_insensitive() {
        let seeded = HashAlgorithm::SeededMurmur64a { seed: 0x1337_b33f };
        assert_eq!(seeded.hash_file("Dir/B.bin"), seeded.hash_file("dir/b.bin"));
        let legacy = HashAlgorithm::UnseededFnv1a;
        assert_eq!(legacy.hash_file("A.txt"), legacy.hash_file("a.txt"));
    }

    #[test]
    fn directory_keys_ignore_trailing_slashes() {
        let seeded = HashAlgorithm::SeededMurmur64a { seed: 7 };
        assert_eq!(seeded.hash_directory("art/textures/"), seeded.hash_directory("art/textures"));
    }

    proptest! {
        #[test]
        fn seed_recovery_round_trips(seed in any::<u64>()) {
            prop_assert_eq!(unfinalize_murmur64a(murmur_hash64a(b"", seed)), seed);
        }
    }
}
