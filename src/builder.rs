use std::io::{BufWriter, Write};

use log::{debug, info};

use crate::hasher::checksum;
use crate::{ChdBuilder, DictionaryHeader, DictionaryInfo, Error, HashSlot, Record, Result};

/// Builder type for emitting dictionary files.
///
/// The builder owns the perfect-hash parameters and IO buffering. Use
/// [`build`](Self::build) to lay out the header, index blob, hash table and
/// record pool and stream them to any [`Write`] sink.
#[derive(Debug)]
pub struct DictionaryBuilder {
    hash_seed: u64,
    keys_per_bucket: usize,
    max_attempts: u32,
    writer_buffer_size: usize,
}

impl Default for DictionaryBuilder {
    fn default() -> Self {
        Self {
            hash_seed: 0,
            keys_per_bucket: 2,
            max_attempts: 1 << 16,
            writer_buffer_size: 16 << 20, // 16 MiB
        }
    }
}

impl DictionaryBuilder {
    /// Overrides the seed used to derive the perfect-hash displacements.
    pub fn with_hash_seed(mut self, seed: u64) -> Self {
        self.hash_seed = seed;
        self
    }

    /// Sets the average number of keys sharing one perfect-hash bucket.
    pub fn with_keys_per_bucket(mut self, count: usize) -> Self {
        self.keys_per_bucket = count;
        self
    }

    /// Caps the number of displacement seeds tried per bucket.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Adjusts the capacity of the buffered writer used while streaming data.
    pub fn with_writer_buffer_size(mut self, size: usize) -> Self {
        self.writer_buffer_size = size;
        self
    }

    /// Consumes the builder and writes a dictionary to `writer`.
    ///
    /// Each key gets the slot chosen by the perfect hash; its records are
    /// stored consecutively in the pool, in the order given. Keys must be
    /// unique and non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for duplicate or empty keys, records
    /// that cannot be encoded, or a pool larger than 4 GiB, and
    /// [`Error::Io`] if the writer fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use cunchuqi::{Dictionary, DictionaryBuilder, Record};
    ///
    /// # fn main() -> cunchuqi::Result<()> {
    /// let records = [Record::new("zh", "oxford", "hello")];
    /// let mut data = Vec::new();
    /// DictionaryBuilder::default().build(&mut data, [("你好", &records[..])])?;
    ///
    /// let dict = Dictionary::<_, cunchuqi::Chd>::load(data)?;
    /// assert_eq!(dict.lookup("你好")?[0].def, "hello");
    /// # Ok(())
    /// # }
    /// ```
    pub fn build<W, K, R>(
        self,
        writer: W,
        entries: impl IntoIterator<Item = (K, R)>,
    ) -> Result<DictionaryInfo>
    where
        W: Write,
        K: AsRef<str>,
        R: AsRef<[Record]>,
    {
        let (keys, records): (Vec<K>, Vec<R>) = entries.into_iter().unzip();
        if let Some(position) = keys.iter().position(|k| k.as_ref().is_empty()) {
            return Err(Error::InvalidInput(format!("empty key at position {position}")));
        }

        let layout = ChdBuilder::default()
            .with_hash_seed(self.hash_seed)
            .with_keys_per_bucket(self.keys_per_bucket)
            .with_max_attempts(self.max_attempts)
            .build(&keys.iter().map(|k| k.as_ref().as_bytes()).collect::<Vec<_>>())?;

        let mut table = vec![HashSlot::default(); keys.len()];
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by_key(|&i| layout.slots[i]);

        let mut pool = Vec::new();
        let mut record_count = 0u64;
        for i in order {
            let offset = u32::try_from(pool.len()).map_err(|_| {
                Error::InvalidInput(format!("record pool exceeds {} bytes", u32::MAX))
            })?;
            let key_records = records[i].as_ref();
            let count = slot_count(keys[i].as_ref(), key_records.len())?;
            for record in key_records {
                record.encode_into(&mut pool)?;
            }
            record_count += key_records.len() as u64;
            table[layout.slots[i] as usize] = HashSlot {
                verification: checksum(keys[i].as_ref().as_bytes()),
                offset,
                count,
            };
        }

        let header = DictionaryHeader {
            reserved: [0; 4],
            table_size: table.len() as u32,
            index_length: u32::try_from(layout.blob.len()).map_err(|_| {
                Error::InvalidInput("perfect-hash index exceeds 4 GiB".to_string())
            })?,
        };

        let mut buf_writer = BufWriter::with_capacity(self.writer_buffer_size, writer);
        buf_writer.write_all(&header.serialize())?;
        buf_writer.write_all(&layout.blob)?;
        for slot in &table {
            buf_writer.write_all(&slot.encode())?;
        }
        buf_writer.write_all(&pool)?;
        buf_writer.flush()?;

        let file_length = (DictionaryHeader::SIZE
            + layout.blob.len()
            + table.len() * HashSlot::SIZE
            + pool.len()) as u64;
        debug!(
            "wrote {} byte index, {} slots, {} byte pool",
            layout.blob.len(),
            table.len(),
            pool.len()
        );
        info!(
            "dictionary built: {} keys, {record_count} records, {file_length} bytes",
            keys.len()
        );

        Ok(DictionaryInfo {
            file_length,
            header,
            key_count: keys.len() as u64,
            pool_length: pool.len() as u64,
            record_count: Some(record_count),
        })
    }
}

fn slot_count(key: &str, records: usize) -> Result<u32> {
    u32::try_from(records).map_err(|_| {
        Error::InvalidInput(format!(
            "{records} records under {key:?} exceed {} per key",
            u32::MAX
        ))
    })
}
