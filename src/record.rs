use std::borrow::Cow;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Separator between the fields of a record.
pub const FIELD_SEPARATOR: u8 = b'|';
/// Terminator closing each record in the pool.
pub const RECORD_TERMINATOR: u8 = 0;

/// Dictionary sources that carry bilingual definitions.
pub const BILINGUAL_SOURCES: &[&str] = &["oxford", "wenlin"];

/// A decoded definition handed to callers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Name of the dictionary the definition comes from.
    pub dict: String,
    /// The definition text.
    pub def: String,
}

impl Entry {
    pub fn is_bilingual(&self) -> bool {
        BILINGUAL_SOURCES.contains(&self.dict.as_str())
    }
}

/// A complete record as written by the builder.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Record {
    /// Language or source tag. Stored but not surfaced by lookups.
    #[serde(default)]
    pub tag: String,
    pub dict: String,
    pub def: String,
}

impl Record {
    pub fn new(tag: impl Into<String>, dict: impl Into<String>, def: impl Into<String>) -> Self {
        Record {
            tag: tag.into(),
            dict: dict.into(),
            def: def.into(),
        }
    }

    /// Appends `tag|dict|def\0` to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a field contains a NUL byte, or if
    /// the tag or dictionary name contains the field separator. The definition
    /// may contain separators since decoding splits into at most three parts.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        for (name, field) in [("tag", &self.tag), ("dict", &self.dict)] {
            if field.as_bytes().contains(&FIELD_SEPARATOR) {
                return Err(Error::InvalidInput(format!(
                    "record {name} {field:?} contains the field separator"
                )));
            }
        }
        for (name, field) in [("tag", &self.tag), ("dict", &self.dict), ("def", &self.def)] {
            if field.as_bytes().contains(&RECORD_TERMINATOR) {
                return Err(Error::InvalidInput(format!(
                    "record {name} {field:?} contains a NUL byte"
                )));
            }
        }
        out.extend_from_slice(self.tag.as_bytes());
        out.push(FIELD_SEPARATOR);
        out.extend_from_slice(self.dict.as_bytes());
        out.push(FIELD_SEPARATOR);
        out.extend_from_slice(self.def.as_bytes());
        out.push(RECORD_TERMINATOR);
        Ok(())
    }
}

/// Borrowed view of a well-formed record inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef<'a> {
    pub tag: &'a [u8],
    pub dict: &'a [u8],
    pub def: &'a [u8],
}

impl<'a> RecordRef<'a> {
    pub fn dict(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.dict)
    }

    pub fn def(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.def)
    }

    pub fn to_entry(&self) -> Entry {
        Entry {
            dict: self.dict().into_owned(),
            def: self.def().into_owned(),
        }
    }
}

/// Decodes the first record in `data`.
///
/// Returns the record (or `None` when its payload does not split into exactly
/// three fields) together with the number of bytes consumed, terminator
/// included.
///
/// # Errors
///
/// Returns [`Error::UnterminatedRecord`] if `data` holds no NUL byte. The
/// reported offset is relative to `data`; callers rebase it.
pub fn decode_next(data: &[u8]) -> Result<(Option<RecordRef<'_>>, usize)> {
    let end = data
        .iter()
        .position(|&b| b == RECORD_TERMINATOR)
        .ok_or(Error::UnterminatedRecord { offset: 0 })?;
    let payload = &data[..end];

    let mut parts = payload.splitn(3, |&b| b == FIELD_SEPARATOR);
    let record = match (parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(dict), Some(def)) => Some(RecordRef { tag, dict, def }),
        _ => {
            trace!("skipping malformed record of {} bytes", payload.len());
            None
        }
    };
    Ok((record, end + 1))
}

/// Which entries a caller wants to see.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntryFilter {
    #[default]
    All,
    Bilingual,
    Monolingual,
}

impl EntryFilter {
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            EntryFilter::All => true,
            EntryFilter::Bilingual => entry.is_bilingual(),
            EntryFilter::Monolingual => !entry.is_bilingual(),
        }
    }

    /// Keeps the entries accepted by this filter, preserving order.
    pub fn apply<'e>(&self, entries: &'e [Entry]) -> Vec<&'e Entry> {
        entries.iter().filter(|e| self.matches(e)).collect()
    }
}
