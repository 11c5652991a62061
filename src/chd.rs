//! Minimal perfect-hash index in the CHD (compress, hash, displace) layout.
//!
//! The serialized form, little-endian throughout:
//!
//! ```text
//! u32 r_len,       r_len × u64        displacement seeds
//! u32 indices_len, indices_len × u16  per-bucket index into the seeds
//! u32 key_count,   key_count × { u32 key_len, u32 value_len, key, value }
//! ```
//!
//! Every value is a 4-byte little-endian slot number into the hash table.
use std::collections::HashSet;

use log::debug;

use crate::hasher::{checksum, SeedSequence};
use crate::{Error, Result};

const SLOT_VALUE_SIZE: usize = std::mem::size_of::<u32>();

/// Query interface of the perfect-hash index embedded in a dictionary file.
///
/// Implementations keep offsets into the serialized blob instead of borrowing
/// it, so the owning store can hold both the mapping and the index. `query`
/// always receives the same bytes `init` was given.
pub trait SlotIndex: Sized {
    /// Parses the serialized index.
    fn init(blob: &[u8]) -> Result<Self>;

    /// Returns the slot for `key`, or `None` if the key is not in the set.
    ///
    /// Must never guess a slot for untrained keys when the blob can tell.
    fn query(&self, blob: &[u8], key: &[u8]) -> Option<u32>;

    /// Number of keys the index was built for.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct KeySpan {
    offset: u32,
    length: u32,
}

/// Reader for the CHD blob.
#[derive(Debug, Default, Clone)]
pub struct Chd {
    seeds: Vec<u64>,
    indices: Vec<u16>,
    keys: Vec<KeySpan>,
    slots: Vec<u32>,
    key_count: usize,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::IndexInit(format!(
                    "{what} needs {len} bytes at offset {}, blob is {} bytes",
                    self.pos,
                    self.data.len()
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        let b = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }
}

impl SlotIndex for Chd {
    fn init(blob: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { data: blob, pos: 0 };

        // Counts are bounded by the blob length before anything is allocated.
        let seed_count = cursor.u32("seed count")? as usize;
        if seed_count > blob.len() / 8 {
            return Err(Error::IndexInit(format!(
                "{seed_count} seeds cannot fit in a {} byte blob",
                blob.len()
            )));
        }
        let seeds = (0..seed_count)
            .map(|_| cursor.u64("seed"))
            .collect::<Result<Vec<_>>>()?;

        let index_count = cursor.u32("index count")? as usize;
        if index_count > blob.len() / 2 {
            return Err(Error::IndexInit(format!(
                "{index_count} bucket indices cannot fit in a {} byte blob",
                blob.len()
            )));
        }
        let indices = (0..index_count)
            .map(|_| cursor.u16("bucket index"))
            .collect::<Result<Vec<_>>>()?;

        let key_count = cursor.u32("key count")? as usize;
        if key_count > blob.len() / 8 {
            return Err(Error::IndexInit(format!(
                "{key_count} keys cannot fit in a {} byte blob",
                blob.len()
            )));
        }
        let mut keys = Vec::with_capacity(key_count);
        let mut slots = Vec::with_capacity(key_count);
        for i in 0..key_count {
            let key_len = cursor.u32("key length")? as usize;
            let value_len = cursor.u32("value length")? as usize;
            let offset = cursor.pos as u32;
            cursor.take(key_len, "key")?;
            let value = cursor.take(value_len, "value")?;
            if value.len() != SLOT_VALUE_SIZE {
                return Err(Error::IndexInit(format!(
                    "value {i} is {} bytes, expected {SLOT_VALUE_SIZE}",
                    value.len()
                )));
            }
            keys.push(KeySpan {
                offset,
                length: key_len as u32,
            });
            slots.push(u32::from_le_bytes([value[0], value[1], value[2], value[3]]));
        }

        // Padding entries repeat a real slot; only distinct slots are keys.
        let mut distinct = slots.clone();
        distinct.sort_unstable();
        distinct.dedup();
        let key_count = distinct.len();

        debug!(
            "perfect-hash index: {} seeds, {} buckets, {key_count} keys over {} positions",
            seeds.len(),
            indices.len(),
            keys.len()
        );
        Ok(Chd {
            seeds,
            indices,
            keys,
            slots,
            key_count,
        })
    }

    fn query(&self, blob: &[u8], key: &[u8]) -> Option<u32> {
        let first = *self.seeds.first()?;
        if self.indices.is_empty() || self.keys.is_empty() {
            return None;
        }
        let h = checksum(key) ^ first;
        let seed_index = self.indices[(h % self.indices.len() as u64) as usize] as usize;
        let seed = *self.seeds.get(seed_index)?;
        let position = ((h ^ seed) % self.keys.len() as u64) as usize;

        let span = self.keys[position];
        let start = span.offset as usize;
        let stored = blob.get(start..start + span.length as usize)?;
        if stored != key {
            return None;
        }
        Some(self.slots[position])
    }

    fn len(&self) -> usize {
        self.key_count
    }
}

/// Output of [`ChdBuilder::build`].
#[derive(Debug, Clone)]
pub struct ChdLayout {
    /// Serialized index, ready to embed in a dictionary file.
    pub blob: Vec<u8>,
    /// Slot assigned to each input key, in input order. Slots are dense:
    /// `0..keys.len()`.
    pub slots: Vec<u32>,
}

/// Constructs a CHD index for a fixed key set.
///
/// Keys are hashed into `len / keys_per_bucket` buckets. Buckets are placed
/// largest first; each one gets the first displacement seed (existing ones
/// before fresh ones) that sends all of its keys to free positions.
///
/// Positions are taken modulo an odd prime no smaller than the key count.
/// XOR with a seed never changes the low bits two hashes share, so a power
/// of two would leave such keys inseparable. Positions left over are filled
/// with copies of a real key and its slot; a query for that key always
/// resolves to its own position, so the padding never answers a query.
#[derive(Debug)]
pub struct ChdBuilder {
    hash_seed: u64,
    keys_per_bucket: usize,
    max_attempts: u32,
}

impl Default for ChdBuilder {
    fn default() -> Self {
        Self {
            hash_seed: 0,
            keys_per_bucket: 2,
            max_attempts: 1 << 16,
        }
    }
}

impl ChdBuilder {
    /// Overrides the seed the displacement values are drawn from.
    pub fn with_hash_seed(mut self, seed: u64) -> Self {
        self.hash_seed = seed;
        self
    }

    /// Sets the average number of keys sharing one bucket.
    ///
    /// Larger values shrink the bucket array but make placement slower.
    pub fn with_keys_per_bucket(mut self, count: usize) -> Self {
        self.keys_per_bucket = count.max(1);
        self
    }

    /// Caps the number of fresh seeds tried for a single bucket.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Builds the index for `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for duplicate keys, for keys whose
    /// 64-bit hashes collide, for key sets too large for the format, or when
    /// a bucket cannot be placed within the configured number of attempts.
    pub fn build<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<ChdLayout> {
        let n = keys.len();
        let width = position_count(n);
        if width > u32::MAX as usize {
            return Err(Error::InvalidInput(format!("too many keys: {n}")));
        }
        let mut unique = HashSet::with_capacity(n);
        for key in keys {
            if !unique.insert(key.as_ref()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate key {:?}",
                    String::from_utf8_lossy(key.as_ref())
                )));
            }
        }

        let mut sequence = SeedSequence::new(self.hash_seed);
        let mut seeds = vec![sequence.next_u64()];
        let bucket_count = (n / self.keys_per_bucket).max(1);
        let mut indices = vec![0u16; bucket_count];

        let hashes: Vec<u64> = keys
            .iter()
            .map(|k| checksum(k.as_ref()) ^ seeds[0])
            .collect();
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); bucket_count];
        for (i, h) in hashes.iter().enumerate() {
            buckets[(h % bucket_count as u64) as usize].push(i);
        }
        for bucket in &buckets {
            // Equal hashes land on equal positions for every seed.
            let mut bucket_hashes: Vec<u64> = bucket.iter().map(|&k| hashes[k]).collect();
            bucket_hashes.sort_unstable();
            if bucket_hashes.windows(2).any(|w| w[0] == w[1]) {
                return Err(Error::InvalidInput(
                    "two keys share a 64-bit hash and cannot be indexed".to_string(),
                ));
            }
        }
        let mut order: Vec<usize> = (0..bucket_count).collect();
        order.sort_by(|a, b| buckets[*b].len().cmp(&buckets[*a].len()).then(a.cmp(b)));

        let mut taken = vec![false; width];
        let mut positions = vec![0usize; n];
        let mut candidate = Vec::new();
        for bucket_index in order {
            let bucket = &buckets[bucket_index];
            if bucket.is_empty() {
                continue;
            }

            let place = |seed: u64, candidate: &mut Vec<usize>, taken: &[bool]| -> bool {
                candidate.clear();
                for &key in bucket {
                    let position = ((hashes[key] ^ seed) % width as u64) as usize;
                    if taken[position] || candidate.contains(&position) {
                        return false;
                    }
                    candidate.push(position);
                }
                true
            };

            let mut chosen = seeds
                .iter()
                .position(|&seed| place(seed, &mut candidate, &taken));
            if chosen.is_none() {
                for _ in 0..self.max_attempts {
                    let seed = sequence.next_u64();
                    if place(seed, &mut candidate, &taken) {
                        seeds.push(seed);
                        chosen = Some(seeds.len() - 1);
                        break;
                    }
                }
            }
            let chosen = chosen.ok_or_else(|| {
                Error::InvalidInput(format!(
                    "could not place bucket of {} keys after {} attempts",
                    bucket.len(),
                    self.max_attempts
                ))
            })?;
            if chosen > u16::MAX as usize {
                return Err(Error::InvalidInput(format!(
                    "displacement table overflow: {} seeds",
                    seeds.len()
                )));
            }

            indices[bucket_index] = chosen as u16;
            for (&key, &position) in bucket.iter().zip(candidate.iter()) {
                taken[position] = true;
                positions[key] = position;
            }
        }

        let mut by_position: Vec<Option<usize>> = vec![None; width];
        for (key, &position) in positions.iter().enumerate() {
            by_position[position] = Some(key);
        }
        let mut slots = vec![0u32; n];
        for (slot, &key) in by_position.iter().flatten().enumerate() {
            slots[key] = slot as u32;
        }

        let mut blob = Vec::new();
        blob.extend_from_slice(&(seeds.len() as u32).to_le_bytes());
        for seed in &seeds {
            blob.extend_from_slice(&seed.to_le_bytes());
        }
        blob.extend_from_slice(&(indices.len() as u32).to_le_bytes());
        for index in &indices {
            blob.extend_from_slice(&index.to_le_bytes());
        }
        blob.extend_from_slice(&(width as u32).to_le_bytes());
        for entry in &by_position {
            let key = entry.unwrap_or(0);
            let bytes = keys[key].as_ref();
            blob.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            blob.extend_from_slice(&(SLOT_VALUE_SIZE as u32).to_le_bytes());
            blob.extend_from_slice(bytes);
            blob.extend_from_slice(&slots[key].to_le_bytes());
        }

        debug!(
            "built perfect-hash index: {n} keys over {width} positions, {bucket_count} buckets, {} seeds",
            seeds.len()
        );
        Ok(ChdLayout { blob, slots })
    }
}

/// Smallest odd prime `>= n` with a little headroom, or `n` itself for
/// zero or one key.
fn position_count(n: usize) -> usize {
    if n <= 1 {
        return n;
    }
    let mut m = (n + n / 64 + 1) | 1;
    while !is_prime(m) {
        m += 2;
    }
    m
}

fn is_prime(m: usize) -> bool {
    if m < 2 {
        return false;
    }
    if m % 2 == 0 {
        return m == 2;
    }
    let mut d = 3;
    while d * d <= m {
        if m % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}
