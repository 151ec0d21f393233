//! # adlb-xpt - checkpoint log
//!
//! Append-only, rank-striped, CRC-protected. All ranks share one file;
//! rank `r` writes only to blocks `{b : b mod N = r}`, so writes never
//! interfere and the file stays sparse-friendly.
//!
//! On-disk layout:
//!
//! - fixed-size blocks (default 4 MiB), each starting with the magic
//!   byte `0x42`; a zero byte at a block start marks an unused block
//! - block 0 carries a header after its magic: `u32 block_size,
//!   u32 ranks`, big-endian like every `u32` this crate writes
//! - records: `u32 sync_marker, u32 crc32, varint rec_len,
//!   varint key_len, key, value`; the CRC covers
//!   `(varint rec_len ++ body)`; `rec_len = 0` is a rank's end marker
//! - records span blocks; the magic byte at each block start is not
//!   part of any record
//!
//! Reads that fail the CRC, or decode an oversize length, mark that one
//! record invalid and resynchronize by scanning forward for the sync
//! marker; the rest of the rank's records stay readable.

pub mod bufwrite;
pub mod write;
pub mod read;
pub mod index;

pub use bufwrite::BlockWriter;
pub use index::{IndexEntry, XptIndex};
pub use read::{ReadOutcome, XptReader, XptStats};
pub use write::{FlushPolicy, RecordLoc, XptWriter};

use core::fmt;

/// First byte of every in-use block.
pub const XPT_MAGIC: u8 = 0x42;

/// Record start marker.
pub const XPT_SYNC_MARKER: u32 = 0x5F1C_0B73;

/// Default block size: 4 MiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 4 * 1024 * 1024;

/// Upper bound on a decoded record length. Anything larger is treated
/// as corruption and triggers resync.
pub const XPT_MAX_RECORD: u64 = 256 * 1024 * 1024;

/// Result type for checkpoint operations.
pub type XptResult<T> = Result<T, XptError>;

/// Checkpoint-layer errors. Per-record corruption is *not* an error;
/// the reader reports it as an `Invalid` outcome and continues.
#[derive(Debug)]
pub enum XptError {
    Io(std::io::Error),
    /// Block 0 does not start with the magic byte.
    BadMagic,
    /// Block 0 header is unreadable or inconsistent.
    BadHeader(&'static str),
    /// Rank outside the file's rank count.
    RankOutOfRange,
}

impl fmt::Display for XptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XptError::Io(e) => write!(f, "checkpoint I/O: {}", e),
            XptError::BadMagic => write!(f, "not a checkpoint file (bad magic)"),
            XptError::BadHeader(what) => write!(f, "bad checkpoint header: {}", what),
            XptError::RankOutOfRange => write!(f, "rank out of range for checkpoint"),
        }
    }
}

impl std::error::Error for XptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            XptError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for XptError {
    fn from(e: std::io::Error) -> Self {
        XptError::Io(e)
    }
}
