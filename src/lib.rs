//! Read-only dictionary store backed by a single memory-mapped file.
//!
//! A dictionary file maps string keys to a variable number of definition
//! records. Keys are resolved through an embedded minimal perfect hash (CHD),
//! the resulting slot is checked against a stored FNV-1a checksum, and the
//! slot's records are decoded straight out of the mapped record pool.
//!
//! Files are produced once with [`DictionaryBuilder`] and opened with
//! [`Dictionary::open`]; they are never modified afterwards.
//!
//! ```
//! use cunchuqi::{Chd, Dictionary, DictionaryBuilder, Record};
//!
//! # fn main() -> cunchuqi::Result<()> {
//! let entries = [
//!     ("你好", vec![Record::new("zh", "oxford", "hello")]),
//!     ("再见", vec![Record::new("zh", "wenlin", "goodbye")]),
//! ];
//! let mut data = Vec::new();
//! DictionaryBuilder::default().build(&mut data, entries.iter().map(|(k, v)| (*k, v)))?;
//!
//! let dict = Dictionary::<_, Chd>::load(data)?;
//! assert_eq!(dict.lookup("再见")?[0].dict, "wenlin");
//! assert!(dict.lookup("谢谢").unwrap_err().is_not_found());
//! # Ok(())
//! # }
//! ```

/// Tag at the start of every dictionary file.
pub const MAGIC: &[u8; 8] = b"CUNCHUQI";

mod error;
pub use error::{Error, Result};

mod hasher;
pub use hasher::{checksum, Fnv1aHasher, SeedSequence};

mod record;
pub use record::{decode_next, Entry, EntryFilter, Record, RecordRef, BILINGUAL_SOURCES};

mod chd;
pub use chd::{Chd, ChdBuilder, ChdLayout, SlotIndex};

mod meta;
pub use meta::{DictionaryHeader, DictionaryInfo, HashSlot};

mod dictionary;
pub use dictionary::{Dictionary, Records};

mod builder;
pub use builder::DictionaryBuilder;

mod study_log;
pub use study_log::StudyLog;
