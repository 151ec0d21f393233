//! Error taxonomy for the adlb runtime
//!
//! Two layers, mirroring the RPC boundary:
//!
//! - `AdlbError` - what a caller of the runtime sees. `Rejected`,
//!   `Shutdown`, `Retry` and `Done` are recoverable control outcomes;
//!   semantic empties ("nothing queued") are `Ok(None)` at the API, never
//!   errors.
//! - `DataError` - data-layer failure kinds, carried across the wire as
//!   stable `i32` codes.

use core::fmt;

/// Result type for runtime operations.
pub type AdlbResult<T> = Result<T, AdlbError>;

/// Result type for data-store operations.
pub type DataResult<T> = Result<T, DataError>;

/// Stable wire codes for response messages. Positive success, negative
/// control/error; data-layer kinds start at 100.
pub mod code {
    pub const SUCCESS: i32 = 1;
    pub const ERROR: i32 = -1;
    pub const SHUTDOWN: i32 = -2;
    pub const REJECTED: i32 = -3;
    pub const NOTHING: i32 = -4;
    pub const RETRY: i32 = -5;
    pub const DONE: i32 = -6;

    pub const DATA_BASE: i32 = 100;
}

/// Errors surfaced by runtime operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdlbError {
    /// Out of memory or double assignment on the server; the caller may
    /// retry or handle locally.
    Rejected,

    /// The cluster is shutting down.
    Shutdown,

    /// Caller must resubmit (e.g. buffer too small).
    Retry,

    /// End of stream.
    Done,

    /// The peer is gone or the transport refused the operation.
    Disconnected,

    /// Malformed argument detected before any RPC was issued.
    Invalid(&'static str),

    /// A message arrived that could not be decoded.
    Protocol(&'static str),

    /// Data-layer failure, relayed from the owning server.
    Data(DataError),
}

impl AdlbError {
    /// Encode for a response message.
    pub fn wire_code(&self) -> i32 {
        match self {
            AdlbError::Rejected => code::REJECTED,
            AdlbError::Shutdown => code::SHUTDOWN,
            AdlbError::Retry => code::RETRY,
            AdlbError::Done => code::DONE,
            AdlbError::Disconnected => code::ERROR,
            AdlbError::Invalid(_) => code::ERROR,
            AdlbError::Protocol(_) => code::ERROR,
            AdlbError::Data(d) => d.wire_code(),
        }
    }

    /// Decode a response code. `SUCCESS` maps to `Ok(())`; `NOTHING` and
    /// `DONE` are returned as errors here and interpreted at call sites
    /// that expect them.
    pub fn check_code(c: i32) -> AdlbResult<()> {
        match c {
            code::SUCCESS => Ok(()),
            code::ERROR => Err(AdlbError::Invalid("rejected by server")),
            code::SHUTDOWN => Err(AdlbError::Shutdown),
            code::REJECTED => Err(AdlbError::Rejected),
            code::RETRY => Err(AdlbError::Retry),
            code::DONE => Err(AdlbError::Done),
            c if c >= code::DATA_BASE => Err(AdlbError::Data(DataError::from_wire_code(c))),
            _ => Err(AdlbError::Protocol("unrecognized response code")),
        }
    }
}

impl fmt::Display for AdlbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdlbError::Rejected => write!(f, "rejected"),
            AdlbError::Shutdown => write!(f, "cluster shutting down"),
            AdlbError::Retry => write!(f, "caller must resubmit"),
            AdlbError::Done => write!(f, "end of stream"),
            AdlbError::Disconnected => write!(f, "peer disconnected"),
            AdlbError::Invalid(what) => write!(f, "invalid argument: {}", what),
            AdlbError::Protocol(what) => write!(f, "protocol error: {}", what),
            AdlbError::Data(d) => write!(f, "data error: {}", d),
        }
    }
}

impl std::error::Error for AdlbError {}

impl From<DataError> for AdlbError {
    fn from(e: DataError) -> Self {
        AdlbError::Data(e)
    }
}

/// Data-layer failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataError {
    /// Allocation failed on the owning server.
    Oom,
    /// `create` on an id that already exists.
    DoubleDeclare,
    /// Write to an already-filled datum or container slot.
    DoubleWrite,
    /// Read of a datum that was never stored.
    Unset,
    /// No datum with that id.
    NotFound,
    /// Container key absent (or present only as a reservation).
    SubscriptNotFound,
    /// Subscript did not parse as a number where one was required.
    NumberFormat,
    /// Malformed payload or argument.
    Invalid,
    /// Null id or value where a real one was required.
    Null,
    /// Type mismatch between operation and datum.
    Type,
    /// A refcount would have gone negative.
    RefcountNegative,
    /// Resource limit hit (e.g. id space exhausted).
    Limit,
    /// Caller-supplied buffer too small; resubmit larger.
    BufferTooSmall,
    /// End of enumeration.
    Done,
    /// Anything else.
    Unknown,
}

impl DataError {
    pub fn wire_code(self) -> i32 {
        code::DATA_BASE
            + match self {
                DataError::Oom => 0,
                DataError::DoubleDeclare => 1,
                DataError::DoubleWrite => 2,
                DataError::Unset => 3,
                DataError::NotFound => 4,
                DataError::SubscriptNotFound => 5,
                DataError::NumberFormat => 6,
                DataError::Invalid => 7,
                DataError::Null => 8,
                DataError::Type => 9,
                DataError::RefcountNegative => 10,
                DataError::Limit => 11,
                DataError::BufferTooSmall => 12,
                DataError::Done => 13,
                DataError::Unknown => 14,
            }
    }

    pub fn from_wire_code(c: i32) -> DataError {
        match c - code::DATA_BASE {
            0 => DataError::Oom,
            1 => DataError::DoubleDeclare,
            2 => DataError::DoubleWrite,
            3 => DataError::Unset,
            4 => DataError::NotFound,
            5 => DataError::SubscriptNotFound,
            6 => DataError::NumberFormat,
            7 => DataError::Invalid,
            8 => DataError::Null,
            9 => DataError::Type,
            10 => DataError::RefcountNegative,
            11 => DataError::Limit,
            12 => DataError::BufferTooSmall,
            13 => DataError::Done,
            _ => DataError::Unknown,
        }
    }
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataError::Oom => "out of memory",
            DataError::DoubleDeclare => "id already declared",
            DataError::DoubleWrite => "already written",
            DataError::Unset => "datum not set",
            DataError::NotFound => "id not found",
            DataError::SubscriptNotFound => "subscript not found",
            DataError::NumberFormat => "subscript is not a number",
            DataError::Invalid => "invalid payload",
            DataError::Null => "null id or value",
            DataError::Type => "type mismatch",
            DataError::RefcountNegative => "refcount would go negative",
            DataError::Limit => "resource limit reached",
            DataError::BufferTooSmall => "buffer too small",
            DataError::Done => "enumeration done",
            DataError::Unknown => "unknown data error",
        };
        f.write_str(s)
    }
}

impl std::error::Error for DataError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_codes_round_trip() {
        let all = [
            DataError::Oom,
            DataError::DoubleDeclare,
            DataError::DoubleWrite,
            DataError::Unset,
            DataError::NotFound,
            DataError::SubscriptNotFound,
            DataError::NumberFormat,
            DataError::Invalid,
            DataError::Null,
            DataError::Type,
            DataError::RefcountNegative,
            DataError::Limit,
            DataError::BufferTooSmall,
            DataError::Done,
            DataError::Unknown,
        ];
        for e in all {
            assert_eq!(DataError::from_wire_code(e.wire_code()), e);
        }
    }

    #[test]
    fn test_check_code() {
        assert!(AdlbError::check_code(code::SUCCESS).is_ok());
        assert_eq!(AdlbError::check_code(code::SHUTDOWN), Err(AdlbError::Shutdown));
        assert_eq!(
            AdlbError::check_code(DataError::DoubleWrite.wire_code()),
            Err(AdlbError::Data(DataError::DoubleWrite))
        );
    }

    #[test]
    fn test_display() {
        let e = AdlbError::Data(DataError::RefcountNegative);
        assert_eq!(format!("{}", e), "data error: refcount would go negative");
    }
}
