use thiserror::Error;

/// Errors raised while decoding a table image.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    /// The stored checksum of a block or the index does not match its bytes.
    #[error("checksum mismatch: stored {expected:#018x}, computed {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    /// Lengths or offsets point outside the image.
    #[error("corrupt table: {0}")]
    Corrupt(&'static str),
}
