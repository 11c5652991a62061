use thiserror::Error;

/// Errors returned while opening or querying a dictionary file.
#[derive(Debug, Error)]
pub enum Error {
    /// The file could not be opened or mapped.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The leading 8-byte tag is not the expected magic.
    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 8], found: [u8; 8] },

    /// A region declared by the header runs past the end of the file.
    #[error("truncated file: {context} needs {needed} bytes, only {available} available")]
    TruncatedFile {
        context: &'static str,
        needed: u64,
        available: u64,
    },

    /// The embedded perfect-hash blob could not be parsed.
    #[error("failed to initialize perfect-hash index: {0}")]
    IndexInit(String),

    /// The perfect-hash index or a hash slot points outside the file.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// A record span ran to the end of the pool without a NUL terminator.
    #[error("unterminated record at pool offset {offset}")]
    UnterminatedRecord { offset: u64 },

    /// The key is not part of the indexed key set.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The slot returned by the index belongs to a different key.
    #[error("hash mismatch for {key:?}: slot stores {expected:#018x}, key hashes to {actual:#018x}")]
    HashMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// Input handed to the builder or the command line is unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Both kinds mean "no usable entry" to a caller.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::HashMismatch { .. })
    }

    /// Returns true for errors caused by a malformed or damaged file.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::BadMagic { .. }
                | Error::TruncatedFile { .. }
                | Error::IndexInit(_)
                | Error::CorruptIndex(_)
                | Error::UnterminatedRecord { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
