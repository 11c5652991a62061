use std::hash::{BuildHasher, Hasher};

use foldhash::fast::FixedState;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Computes the 64-bit FNV-1a hash of `key`.
///
/// This is both the per-slot verification checksum and the base hash of the
/// perfect-hash index. Changing it breaks compatibility with existing files.
pub fn checksum(key: &[u8]) -> u64 {
    let mut hasher = Fnv1aHasher::default();
    hasher.write(key);
    hasher.finish()
}

/// Streaming FNV-1a 64 hasher over raw bytes.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1aHasher {
    state: u64,
}

impl Default for Fnv1aHasher {
    fn default() -> Self {
        Fnv1aHasher {
            state: FNV_OFFSET_BASIS,
        }
    }
}

impl Hasher for Fnv1aHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }
}

/// Deterministic stream of 64-bit values derived from a seed.
///
/// The builder draws hash displacements from it so that the same input and
/// seed always produce a byte-identical file.
#[derive(Debug, Clone)]
pub struct SeedSequence {
    state: FixedState,
    counter: u64,
}

impl SeedSequence {
    pub fn new(seed: u64) -> Self {
        SeedSequence {
            state: FixedState::with_seed(seed),
            counter: 0,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let value = self.state.hash_one(self.counter);
        self.counter += 1;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_vectors() {
        assert_eq!(checksum(b""), 0xcbf29ce484222325);
        assert_eq!(checksum(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(checksum(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let mut hasher = Fnv1aHasher::default();
        hasher.write("你".as_bytes());
        hasher.write("好".as_bytes());
        assert_eq!(hasher.finish(), checksum("你好".as_bytes()));
        assert_ne!(checksum(b"ab"), checksum(b"ba"));
    }

    #[test]
    fn test_seed_sequence() {
        let a: Vec<u64> = {
            let mut seq = SeedSequence::new(7);
            (0..4).map(|_| seq.next_u64()).collect()
        };
        let b: Vec<u64> = {
            let mut seq = SeedSequence::new(7);
            (0..4).map(|_| seq.next_u64()).collect()
        };
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);

        let mut other = SeedSequence::new(8);
        assert_ne!(other.next_u64(), a[0]);
    }
}
