//! Error types and the related `Result<T>`

use thiserror::Error;

pub type ZoneResult<T> = Result<T, ZoneError>;

#[derive(Debug, Error)]
pub enum ZoneError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// No embedded blob or file backs the requested table name.
    #[error("No zone table named {0}")]
    DatasetNotFound(String),

    /// The table's bytes failed structural validation.
    #[error("Corrupt zone table: {0}")]
    CorruptData(&'static str),

    /// Decoding a UTF-8 zone name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The table is well-formed but uses something we don't support
    /// (an unknown flag, a resolution we can't index, ...)
    #[error("Unsupported zone table: {0}")]
    UnsupportedTable(String),

    /// A table name wasn't a single, plain path component.
    #[error("Invalid table name {0:?}")]
    InvalidName(String),

    /// The authoring API (rasters, the table writer) was handed something it can't store.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A strict lookup was given coordinates outside of
    /// latitude [-90, 90] and longitude [-180, 180].
    #[error("Coordinates ({lat}, {lon}) out of range")]
    OutOfRange { lat: f64, lon: f64 },

    /// A size read from the table doesn't fit in a usize,
    /// probably on a 32-bit system.
    #[error("Zone table too large for address space")]
    InsufficientAddressSpace,
}
