//! # adlb-core
//!
//! Core types and codecs for the adlb load-balancing runtime.
//!
//! This crate is transport-agnostic and contains no I/O. The server engine
//! lives in `adlb-server`, the transport contract in `adlb-comm`, and the
//! checkpoint log in `adlb-xpt`.
//!
//! ## Modules
//!
//! - `rank` - Cluster layout and rank/id routing math
//! - `tag` - Message tag enumeration
//! - `error` - Error taxonomy and wire codes
//! - `vint` - Self-delimited variable-length integer codec
//! - `value` - Typed value codec (pack/unpack)
//! - `msgs` - Fixed-layout wire message bodies
//! - `workunit` - Task descriptor
//! - `dprint` - Debug/trace print macros
//! - `env` - Environment variable utilities

pub mod rank;
pub mod tag;
pub mod error;
pub mod vint;
pub mod value;
pub mod msgs;
pub mod workunit;
pub mod dprint;
pub mod env;

// Re-exports for convenience
pub use rank::{Layout, Rank};
pub use tag::Tag;
pub use error::{code, AdlbError, AdlbResult, DataError, DataResult};
pub use value::{ContainerVal, DataType, FileRef, MultisetVal, StructVal, Value};
pub use workunit::{WorkUnit, RANK_ANY, TYPE_CONTROL};
pub use env::{env_get, env_get_bool, env_get_opt, env_is_set};

/// Tuning constants shared by client and server.
pub mod constants {
    /// Payloads at or below this many bytes travel inline with the PUT
    /// header; larger payloads are streamed in a follow-up message.
    pub const PUT_INLINE_MAX: usize = 1024;

    /// Priority used for server-generated CONTROL notifications.
    pub const CONTROL_PRIORITY: i32 = 1;

    /// Null data id: `create` allocates a fresh id when given this.
    pub const NULL_ID: i64 = 0;

    /// Bound on the pending-sync queue of a server (deferred lower-rank
    /// requests). Beyond this, incoming requests are rejected.
    pub const SYNC_PENDING_MAX: usize = 16;

    /// Default byte budget a stealer offers for one steal exchange.
    pub const STEAL_BUDGET_DEFAULT: i64 = 4 * 1024 * 1024;
}
