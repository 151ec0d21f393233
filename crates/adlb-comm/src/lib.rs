//! # adlb-comm - wire transport contract
//!
//! The runtime requires a small set of point-to-point operations from its
//! transport: typed tagged sends, selective receives, and probing. This
//! crate defines that boundary as the [`Comm`] trait and ships one
//! implementation, the in-process [`fabric`], used by the demos and the
//! integration tests.
//!
//! # Implementors
//!
//! - `FabricEndpoint` (this crate): per-rank mailboxes inside one
//!   process, one OS thread per rank. Lock-free ingress, condvar
//!   parking.
//! - An MPI-style binding can implement the same trait over real
//!   network transports; the engine never looks behind the trait.

pub mod fabric;

pub use fabric::{Fabric, FabricEndpoint};

use adlb_core::error::AdlbResult;
use adlb_core::tag::Tag;

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub src: i32,
    pub tag: Tag,
    pub bytes: Vec<u8>,
}

/// Metadata returned by a probe, without consuming the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgInfo {
    pub src: i32,
    pub tag: Tag,
    pub len: usize,
}

/// Point-to-point transport bound to one rank.
///
/// **Contract:**
/// - Messages between a fixed (sender, receiver) pair are delivered in
///   send order. No ordering holds across different senders.
/// - `send` must not block on the receiver making progress.
/// - `ssend` completes only after the receiver has matched the message;
///   the redirect payload path relies on this for the per-pair PUT
///   ordering guarantee.
/// - `recv`/`probe` with `src`/`tag` of `None` match any source/tag; a
///   selective call never returns a non-matching message.
/// - `probe` does not consume: a following matching `recv` returns the
///   probed message.
pub trait Comm {
    /// This endpoint's rank.
    fn rank(&self) -> i32;

    /// Total number of ranks.
    fn size(&self) -> i32;

    /// Fire-and-forget typed send.
    fn send(&self, dst: i32, tag: Tag, bytes: &[u8]) -> AdlbResult<()>;

    /// Synchronous send: returns once the receiver has matched.
    fn ssend(&self, dst: i32, tag: Tag, bytes: &[u8]) -> AdlbResult<()>;

    /// Blocking selective receive.
    fn recv(&self, src: Option<i32>, tag: Option<Tag>) -> AdlbResult<Envelope>;

    /// Non-blocking selective receive.
    fn try_recv(&self, src: Option<i32>, tag: Option<Tag>) -> AdlbResult<Option<Envelope>>;

    /// Blocking probe: wait until a matching message is available.
    fn probe(&self, src: Option<i32>, tag: Option<Tag>) -> AdlbResult<MsgInfo>;

    /// Non-blocking probe.
    fn iprobe(&self, src: Option<i32>, tag: Option<Tag>) -> AdlbResult<Option<MsgInfo>>;
}
