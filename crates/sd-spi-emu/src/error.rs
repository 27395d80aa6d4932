use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeviceError>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure reported by a [`crate::BlockStore`].
///
/// [`StoreError::Io`] keeps a rendered message rather than `std::io::Error` so in-memory and
/// host-file stores report through the same type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        capacity: u64,
    },

    #[error("integer overflow while computing byte offsets")]
    OffsetOverflow,

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors surfaced by the emulated card.
///
/// The first six variants mirror the status codes a real SD-over-SPI driver reports. Bounds
/// violations are caller errors and are raised before the backing store is touched; the
/// `*Failure` variants and [`DeviceError::InitTimeout`] carry the store error that caused them.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("card initialization timed out")]
    InitTimeout(#[source] StoreError),

    #[error("write of {len} bytes at offset {offset} crosses the block boundary")]
    WriteOutsideBlock { offset: usize, len: usize },

    #[error("read of {len} bytes at offset {offset} crosses the block boundary")]
    ReadOutsideBlock { offset: usize, len: usize },

    #[error("write to block {block} failed")]
    WriteFailure {
        block: u32,
        #[source]
        source: StoreError,
    },

    #[error("read from block {block} failed")]
    ReadFailure {
        block: u32,
        #[source]
        source: StoreError,
    },

    #[error("erase of blocks {start}..{end} failed")]
    EraseFailure {
        start: u32,
        end: u32,
        #[source]
        source: StoreError,
    },

    #[error("no continuous {0} session is active")]
    NoSession(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
