use std::fs::File;
use std::ops::{Deref, Range};
use std::path::Path;

use log::{debug, warn};
use memmap2::{Mmap, MmapOptions};

use crate::hasher::checksum;
use crate::record::{decode_next, Entry, RecordRef};
use crate::{Chd, DictionaryHeader, DictionaryInfo, Error, HashSlot, Result, SlotIndex};

/// Immutable dictionary backed by a dictionary file.
///
/// The header is parsed once; afterwards every lookup works directly on the
/// underlying bytes. Nothing is ever written back, so a shared reference can
/// be used from several threads at once.
///
/// # Type Parameters
/// - `D`: byte storage, a read-only [`Mmap`] for files or any other
///   `Deref<Target = [u8]>` such as `Vec<u8>`.
/// - `I`: perfect-hash index implementation, [`Chd`] by default.
#[derive(Debug)]
pub struct Dictionary<D = Mmap, I = Chd> {
    /// Header as found in the file.
    pub header: DictionaryHeader,
    data: D,
    index: I,
    index_range: Range<usize>,
    table_range: Range<usize>,
    pool_range: Range<usize>,
}

impl Dictionary {
    /// Maps the file at `path` read-only and parses it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or mapped, and the
    /// errors of [`load`](Self::load) otherwise. The mapping is released on
    /// every error path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("opening dictionary {}", path.display());
        let file = File::open(path)?;
        // SAFETY: the mapping is private and read-only; the file is treated
        // as immutable for the lifetime of the process.
        let data = unsafe { MmapOptions::new().map_copy_read_only(&file)? };
        Self::load(data)
    }
}

impl<D: Deref<Target = [u8]>, I: SlotIndex> Dictionary<D, I> {
    /// Parses a dictionary from `data` without copying it.
    ///
    /// # Errors
    ///
    /// - [`Error::BadMagic`] if the tag does not match.
    /// - [`Error::TruncatedFile`] if the header, index blob or hash table run
    ///   past the end of `data`.
    /// - [`Error::IndexInit`] if the perfect-hash blob cannot be parsed.
    pub fn load(data: D) -> Result<Self> {
        let header = DictionaryHeader::parse(&data)?;
        let available = data.len() as u64;

        let index_end = DictionaryHeader::SIZE as u64 + header.index_length as u64;
        if index_end > available {
            return Err(Error::TruncatedFile {
                context: "perfect-hash index",
                needed: index_end,
                available,
            });
        }
        let table_end = index_end + header.table_size as u64 * HashSlot::SIZE as u64;
        if table_end > available {
            return Err(Error::TruncatedFile {
                context: "hash table",
                needed: table_end,
                available,
            });
        }

        let index_range = DictionaryHeader::SIZE..index_end as usize;
        let table_range = index_end as usize..table_end as usize;
        let pool_range = table_end as usize..data.len();
        let index = I::init(&data[index_range.clone()])?;

        debug!(
            "dictionary loaded: {} slots, {} keys, {} byte index, {} byte pool",
            header.table_size,
            index.len(),
            index_range.len(),
            pool_range.len()
        );
        Ok(Dictionary {
            header,
            data,
            index,
            index_range,
            table_range,
            pool_range,
        })
    }

    /// Number of slots in the hash table.
    pub fn table_size(&self) -> u32 {
        self.header.table_size
    }

    /// Returns the hash slot at `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] if `idx` is outside the table.
    pub fn slot(&self, idx: u32) -> Result<HashSlot> {
        if idx >= self.header.table_size {
            return Err(Error::CorruptIndex(format!(
                "slot {idx} out of range for table of {} slots",
                self.header.table_size
            )));
        }
        let start = self.table_range.start + idx as usize * HashSlot::SIZE;
        let mut raw = [0u8; HashSlot::SIZE];
        raw.copy_from_slice(&self.data[start..start + HashSlot::SIZE]);
        Ok(HashSlot::decode(&raw))
    }

    /// Resolves `key` to its verified slot and returns an iterator over its
    /// records, borrowed from the underlying bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the index does not know the key.
    /// - [`Error::CorruptIndex`] if the index or the slot point outside the
    ///   file.
    /// - [`Error::HashMismatch`] if the slot's checksum belongs to another key.
    pub fn records(&self, key: &str) -> Result<Records<'_>> {
        let idx = self
            .index
            .query(self.index_blob(), key.as_bytes())
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        let slot = self.slot(idx)?;

        let actual = checksum(key.as_bytes());
        if actual != slot.verification {
            warn!("verification failed for {key:?} at slot {idx}");
            return Err(Error::HashMismatch {
                key: key.to_string(),
                expected: slot.verification,
                actual,
            });
        }

        let pool = self.pool();
        if slot.count > 0 && slot.offset as usize >= pool.len() {
            warn!("slot {idx} points outside the pool");
            return Err(Error::CorruptIndex(format!(
                "slot {idx} offset {} outside pool of {} bytes",
                slot.offset,
                pool.len()
            )));
        }

        debug!(
            "{key:?} resolved to slot {idx}: {} records at pool offset {}",
            slot.count, slot.offset
        );
        Ok(Records {
            pool,
            position: slot.offset as usize,
            remaining: slot.count,
            skipped: 0,
        })
    }

    /// Looks up `key` and decodes all of its well-formed records in pool order.
    ///
    /// Malformed records are skipped, so the list can be empty even on
    /// success; callers should treat that like [`Error::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns the errors of [`records`](Self::records), and
    /// [`Error::UnterminatedRecord`] if the pool ends before all records of
    /// the slot were read.
    pub fn lookup(&self, key: &str) -> Result<Vec<Entry>> {
        let mut records = self.records(key)?;
        let mut entries = Vec::with_capacity(records.remaining());
        for record in records.by_ref() {
            entries.push(record?.to_entry());
        }
        if records.skipped() > 0 {
            debug!("{key:?}: skipped {} malformed records", records.skipped());
        }
        Ok(entries)
    }

    /// Summarizes the layout of the underlying file.
    pub fn info(&self) -> DictionaryInfo {
        DictionaryInfo {
            file_length: self.data.len() as u64,
            header: self.header,
            key_count: self.index.len() as u64,
            pool_length: self.pool_range.len() as u64,
            record_count: None,
        }
    }

    fn index_blob(&self) -> &[u8] {
        &self.data[self.index_range.clone()]
    }

    fn pool(&self) -> &[u8] {
        &self.data[self.pool_range.clone()]
    }
}

/// Iterator over the records of one key.
///
/// Yields only well-formed records; malformed ones are counted in
/// [`skipped`](Self::skipped). An unterminated record ends the iteration with
/// an error.
#[derive(Debug)]
pub struct Records<'a> {
    pool: &'a [u8],
    position: usize,
    remaining: u32,
    skipped: u32,
}

impl<'a> Records<'a> {
    /// Number of malformed records passed over so far.
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Upper bound on the records still to come: the slot's count minus the
    /// spans consumed so far, malformed ones included.
    pub fn remaining(&self) -> usize {
        self.remaining as usize
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<RecordRef<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            self.remaining -= 1;
            let rest = self.pool.get(self.position..).unwrap_or(&[]);
            match decode_next(rest) {
                Ok((record, consumed)) => {
                    self.position += consumed;
                    match record {
                        Some(record) => return Some(Ok(record)),
                        None => self.skipped += 1,
                    }
                }
                Err(_) => {
                    warn!("unterminated record at pool offset {}", self.position);
                    self.remaining = 0;
                    return Some(Err(Error::UnterminatedRecord {
                        offset: self.position as u64,
                    }));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::*;

    fn single_key_blob(key: &[u8], slot: u32) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&0u64.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&0u16.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&(key.len() as u32).to_le_bytes());
        blob.extend_from_slice(&4u32.to_le_bytes());
        blob.extend_from_slice(key);
        blob.extend_from_slice(&slot.to_le_bytes());
        blob
    }

    fn raw_file(blob: &[u8], table: &[HashSlot], pool: &[u8]) -> Vec<u8> {
        let header = DictionaryHeader {
            reserved: [0; 4],
            table_size: table.len() as u32,
            index_length: blob.len() as u32,
        };
        let mut data = header.serialize().to_vec();
        data.extend_from_slice(blob);
        for slot in table {
            data.extend_from_slice(&slot.encode());
        }
        data.extend_from_slice(pool);
        data
    }

    fn hi_file(slot: HashSlot, pool: &[u8]) -> Vec<u8> {
        raw_file(&single_key_blob(b"hi", 0), &[slot], pool)
    }

    fn entry(dict: &str, def: &str) -> Entry {
        Entry {
            dict: dict.to_string(),
            def: def.to_string(),
        }
    }

    #[test]
    fn test_two_records_in_pool_order() {
        let data = hi_file(
            HashSlot {
                verification: checksum(b"hi"),
                offset: 0,
                count: 2,
            },
            b"x|oxford|hello\0y|wenlin|world\0",
        );
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        assert_eq!(dict.table_size(), 1);
        assert_eq!(
            dict.lookup("hi").unwrap(),
            vec![entry("oxford", "hello"), entry("wenlin", "world")]
        );
        assert!(dict.lookup("ho").unwrap_err().is_not_found());
        assert!(matches!(dict.lookup("ho"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_records_start_at_slot_offset() {
        let pool = b"skip|me|please\0a|b|c\0";
        let data = hi_file(
            HashSlot {
                verification: checksum(b"hi"),
                offset: 15,
                count: 1,
            },
            pool,
        );
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        assert_eq!(dict.lookup("hi").unwrap(), vec![entry("b", "c")]);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let data = hi_file(
            HashSlot {
                verification: checksum(b"hi"),
                offset: 0,
                count: 3,
            },
            b"onlyonefield\0a|b\0x|oxford|kept\0",
        );
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        let mut records = dict.records("hi").unwrap();
        let first = records.next().unwrap().unwrap();
        assert_eq!(first.def(), "kept");
        assert!(records.next().is_none());
        assert_eq!(records.skipped(), 2);
        assert_eq!(dict.lookup("hi").unwrap(), vec![entry("oxford", "kept")]);

        let data = hi_file(
            HashSlot {
                verification: checksum(b"hi"),
                offset: 0,
                count: 1,
            },
            b"garbage\0",
        );
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        assert_eq!(dict.lookup("hi").unwrap(), vec![]);
    }

    #[test]
    fn test_hash_mismatch() {
        let data = hi_file(
            HashSlot {
                verification: checksum(b"hi") ^ 1,
                offset: 0,
                count: 1,
            },
            b"x|oxford|hello\0",
        );
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        let err = dict.lookup("hi").unwrap_err();
        assert!(err.is_not_found());
        match err {
            Error::HashMismatch {
                key,
                expected,
                actual,
            } => {
                assert_eq!(key, "hi");
                assert_eq!(actual, checksum(b"hi"));
                assert_eq!(expected, actual ^ 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_slot_index_out_of_range() {
        let slot = HashSlot {
            verification: checksum(b"hi"),
            offset: 0,
            count: 1,
        };
        let data = raw_file(&single_key_blob(b"hi", 1), &[slot], b"a|b|c\0");
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        let err = dict.lookup("hi").unwrap_err();
        assert!(matches!(err, Error::CorruptIndex(_)));
        assert!(err.is_corruption());
        dict.slot(1).unwrap_err();
        assert_eq!(dict.slot(0).unwrap(), slot);
    }

    #[test]
    fn test_offset_outside_pool() {
        let data = hi_file(
            HashSlot {
                verification: checksum(b"hi"),
                offset: 100,
                count: 1,
            },
            b"a|b|c\0",
        );
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        assert!(matches!(dict.lookup("hi"), Err(Error::CorruptIndex(_))));

        let data = hi_file(
            HashSlot {
                verification: checksum(b"hi"),
                offset: 100,
                count: 0,
            },
            b"a|b|c\0",
        );
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        assert_eq!(dict.lookup("hi").unwrap(), vec![]);
    }

    #[test]
    fn test_unterminated_record() {
        let data = hi_file(
            HashSlot {
                verification: checksum(b"hi"),
                offset: 0,
                count: 3,
            },
            b"x|oxford|hello\0y|wenlin|world",
        );
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        let err = dict.lookup("hi").unwrap_err();
        assert!(err.is_corruption());
        assert!(matches!(err, Error::UnterminatedRecord { offset: 15 }));

        // count exceeds the records present
        let data = hi_file(
            HashSlot {
                verification: checksum(b"hi"),
                offset: 0,
                count: 2,
            },
            b"x|oxford|hello\0",
        );
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        assert!(matches!(
            dict.lookup("hi"),
            Err(Error::UnterminatedRecord { offset: 15 })
        ));
    }

    #[test]
    fn test_load_errors() {
        let good = hi_file(
            HashSlot {
                verification: checksum(b"hi"),
                offset: 0,
                count: 1,
            },
            b"a|b|c\0",
        );

        let mut bad_magic = good.clone();
        bad_magic[3] ^= 0xff;
        let err = Dictionary::<_, Chd>::load(bad_magic).unwrap_err();
        assert!(matches!(err, Error::BadMagic { .. }));

        let err = Dictionary::<_, Chd>::load(good[..4].to_vec()).unwrap_err();
        assert!(matches!(err, Error::TruncatedFile { .. }));

        let index_end = DictionaryHeader::SIZE + single_key_blob(b"hi", 0).len();
        let err = Dictionary::<_, Chd>::load(good[..index_end - 1].to_vec()).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedFile {
                context: "perfect-hash index",
                ..
            }
        ));

        let err = Dictionary::<_, Chd>::load(good[..index_end + 8].to_vec()).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedFile {
                context: "hash table",
                ..
            }
        ));

        // exactly header, blob and table: an empty pool is allowed
        let dict = Dictionary::<_, Chd>::load(good[..index_end + 16].to_vec()).unwrap();
        assert!(dict.lookup("hi").unwrap_err().is_corruption());

        let mut broken_blob = good.clone();
        broken_blob[DictionaryHeader::SIZE..DictionaryHeader::SIZE + 4]
            .copy_from_slice(&u32::MAX.to_le_bytes());
        let err = Dictionary::<_, Chd>::load(broken_blob).unwrap_err();
        assert!(matches!(err, Error::IndexInit(_)));
    }

    #[test]
    fn test_reserved_bytes_are_preserved() {
        let mut data = hi_file(HashSlot::default(), b"");
        data[8..12].copy_from_slice(b"\x01\x02\x03\x04");
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        assert_eq!(dict.header.reserved, [1, 2, 3, 4]);
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.bin");
        let file = std::fs::File::create(&path).unwrap();
        let entries = vec![
            (
                "你好",
                vec![
                    Record::new("zh", "oxford", "hello"),
                    Record::new("zh", "xiandai", "问候语"),
                ],
            ),
            ("再见", vec![Record::new("zh", "wenlin", "goodbye")]),
        ];
        let info = DictionaryBuilder::default()
            .with_hash_seed(42)
            .build(&file, entries.iter().map(|(k, v)| (*k, v.as_slice())))
            .unwrap();
        drop(file);

        let dict = Dictionary::open(&path).unwrap();
        assert_eq!(dict.info().file_length, info.file_length);
        assert_eq!(dict.info().key_count, 2);
        assert_eq!(
            dict.lookup("你好").unwrap(),
            vec![entry("oxford", "hello"), entry("xiandai", "问候语")]
        );
        assert_eq!(dict.lookup("再见").unwrap(), vec![entry("wenlin", "goodbye")]);
        assert!(dict.lookup("谢谢").unwrap_err().is_not_found());
        drop(dict);

        let missing = dir.path().join("missing.bin");
        assert!(matches!(Dictionary::open(&missing), Err(Error::Io(_))));

        std::fs::write(&path, b"NOTADICT0000000000000000").unwrap();
        assert!(matches!(
            Dictionary::open(&path),
            Err(Error::BadMagic { .. })
        ));
    }

    fn assert_all_keys_resolve(n: usize) {
        let keys: Vec<String> = (0..n).map(|i| format!("词{i}")).collect();
        let records: Vec<Vec<Record>> = (0..n)
            .map(|i| {
                (0..i % 3 + 1)
                    .map(|j| Record::new("zh", format!("dict{j}"), format!("def {i}.{j}")))
                    .collect()
            })
            .collect();

        let mut data = Vec::new();
        DictionaryBuilder::default()
            .build(
                &mut data,
                keys.iter()
                    .map(String::as_str)
                    .zip(records.iter().map(Vec::as_slice)),
            )
            .unwrap();
        let dict = Dictionary::<_, Chd>::load(data).unwrap();
        assert_eq!(dict.table_size(), n as u32);
        assert_eq!(dict.info().key_count, n as u64);

        for (i, key) in keys.iter().enumerate() {
            let entries = dict.lookup(key).unwrap();
            assert_eq!(entries.len(), i % 3 + 1, "key {key:?}");
            assert_eq!(entries[0].def, format!("def {i}.0"));
            assert!(dict
                .lookup(&format!("词{}", i + n))
                .unwrap_err()
                .is_not_found());
        }
    }

    #[test]
    fn test_many_keys() {
        assert_all_keys_resolve(2000);
    }

    #[test]
    fn test_power_of_two_key_count() {
        assert_all_keys_resolve(2048);
    }

    #[test]
    fn test_remaining_counts_down() {
        let mut data = Vec::new();
        let records = [
            Record::new("zh", "oxford", "good"),
            Record::new("zh", "wenlin", "fine"),
        ];
        DictionaryBuilder::default()
            .build(&mut data, [("好", &records[..])])
            .unwrap();
        let dict = Dictionary::<_, Chd>::load(data).unwrap();

        let mut iter = dict.records("好").unwrap();
        assert_eq!(iter.remaining(), 2);
        assert_eq!(iter.next().unwrap().unwrap().def(), "good");
        assert_eq!(iter.remaining(), 1);
        assert!(iter.next().unwrap().is_ok());
        assert_eq!(iter.remaining(), 0);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_repeated_and_concurrent_lookups() {
        let mut data = Vec::new();
        let entries: Vec<(String, Vec<Record>)> = (0..64)
            .map(|i| {
                (
                    format!("k{i}"),
                    vec![Record::new("", "oxford", format!("v{i}"))],
                )
            })
            .collect();
        DictionaryBuilder::default()
            .build(
                &mut data,
                entries.iter().map(|(k, v)| (k.as_str(), v.as_slice())),
            )
            .unwrap();
        let dict = Arc::new(Dictionary::<_, Chd>::load(data).unwrap());

        let first = dict.lookup("k7").unwrap();
        assert_eq!(dict.lookup("k7").unwrap(), first);

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let dict = dict.clone();
                std::thread::spawn(move || {
                    for i in (t..64).step_by(4) {
                        let entries = dict.lookup(&format!("k{i}")).unwrap();
                        assert_eq!(entries, vec![entry("oxford", &format!("v{i}"))]);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
    }
}
