use serde::Serialize;

use crate::{Error, Result, MAGIC};

/// Fixed header at the start of every dictionary file.
///
/// ```text
/// offset 0   8 bytes  magic "CUNCHUQI"
/// offset 8   4 bytes  reserved
/// offset 12  u32      table size (slots)
/// offset 16  u32      perfect-hash blob length
/// ```
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DictionaryHeader {
    /// Kept verbatim; no meaning is assigned to these bytes.
    pub reserved: [u8; 4],
    /// Number of slots in the hash table.
    pub table_size: u32,
    /// Length in bytes of the embedded perfect-hash blob.
    pub index_length: u32,
}

impl DictionaryHeader {
    pub const SIZE: usize = 20;

    /// Parses the header from the start of `data`.
    ///
    /// # Errors
    ///
    /// [`Error::TruncatedFile`] if `data` is shorter than the header and
    /// [`Error::BadMagic`] if the tag does not match.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MAGIC.len() {
            return Err(Error::TruncatedFile {
                context: "magic",
                needed: MAGIC.len() as u64,
                available: data.len() as u64,
            });
        }
        if data[..MAGIC.len()] != MAGIC[..] {
            let mut found = [0u8; 8];
            found.copy_from_slice(&data[..MAGIC.len()]);
            return Err(Error::BadMagic {
                expected: *MAGIC,
                found,
            });
        }
        if data.len() < Self::SIZE {
            return Err(Error::TruncatedFile {
                context: "header",
                needed: Self::SIZE as u64,
                available: data.len() as u64,
            });
        }
        let field = |at: usize| [data[at], data[at + 1], data[at + 2], data[at + 3]];
        Ok(DictionaryHeader {
            reserved: field(8),
            table_size: u32::from_le_bytes(field(12)),
            index_length: u32::from_le_bytes(field(16)),
        })
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        data[..8].copy_from_slice(MAGIC);
        data[8..12].copy_from_slice(&self.reserved);
        data[12..16].copy_from_slice(&self.table_size.to_le_bytes());
        data[16..20].copy_from_slice(&self.index_length.to_le_bytes());
        data
    }
}

/// One entry of the hash table.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HashSlot {
    /// Checksum of the key this slot belongs to.
    pub verification: u64,
    /// Offset of the first record in the pool.
    pub offset: u32,
    /// Number of consecutive records.
    pub count: u32,
}

impl HashSlot {
    pub const SIZE: usize = 16;

    pub fn decode(data: &[u8; Self::SIZE]) -> Self {
        let mut verification = [0u8; 8];
        verification.copy_from_slice(&data[..8]);
        HashSlot {
            verification: u64::from_le_bytes(verification),
            offset: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            count: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        data[..8].copy_from_slice(&self.verification.to_le_bytes());
        data[8..12].copy_from_slice(&self.offset.to_le_bytes());
        data[12..16].copy_from_slice(&self.count.to_le_bytes());
        data
    }
}

/// Summary of a dictionary file, returned by the builder and by
/// [`Dictionary::info`](crate::Dictionary::info).
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DictionaryInfo {
    /// Total size of the file in bytes.
    pub file_length: u64,
    pub header: DictionaryHeader,
    /// Number of keys known to the perfect-hash index.
    pub key_count: u64,
    /// Length in bytes of the record pool.
    pub pool_length: u64,
    /// Number of records written. Only the builder knows this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
}
