//! Server-to-server sync protocol
//!
//! A server that must call a peer (notification, reference write, steal)
//! first acquires it with a SYNC_REQUEST/SYNC_RESPONSE handshake. Two
//! servers calling each other concurrently would deadlock under a naive
//! blocking RPC; rank order breaks the tie:
//!
//! - an incoming request from a *higher* rank is accepted and served
//!   immediately, even while our own request is outstanding;
//! - one from a *lower* rank is deferred into a bounded pending queue
//!   (or rejected when full) and served after our sync completes.
//!
//! In any cycle of waiting servers the highest rank's request is
//! accepted by someone, so the cycle cannot close.

use std::collections::VecDeque;
use std::time::Duration;

use adlb_core::constants::SYNC_PENDING_MAX;
use adlb_core::error::{AdlbError, AdlbResult};
use adlb_core::msgs::{SyncHdr, SYNC_MODE_REQUEST, SYNC_MODE_STEAL};
use adlb_core::tag::Tag;
use adlb_core::{adlb_dbg, adlb_trace};
use adlb_comm::Comm;

use crate::server::Server;

/// Pause between handshake poll rounds and after a rejection.
const SYNC_BACKOFF: Duration = Duration::from_micros(100);

const ACCEPT: u8 = 1;
const REJECT: u8 = 0;

/// Handshake state carried by every server.
pub struct SyncState {
    /// Deferred lower-rank requests, served once our own sync ends.
    pending: VecDeque<(i32, SyncHdr)>,
}

impl SyncState {
    pub fn new() -> SyncState {
        SyncState {
            pending: VecDeque::new(),
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// How an initiated sync ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Target accepted; it is now serving this server's next RPC.
    Accepted,
    /// A shutdown arrived mid-handshake; abandon the operation.
    Shutdown,
}

impl<C: Comm> Server<C> {
    /// Acquire `target` for one RPC. On `Accepted`, the caller must send
    /// exactly one RPC to the target and consume its response, then call
    /// [`Server::drain_pending_syncs`].
    pub(crate) fn sync(&mut self, target: i32, hdr: &SyncHdr) -> AdlbResult<SyncOutcome> {
        adlb_trace!("sync: -> {} mode={}", target, hdr.mode);
        self.stats.syncs += 1;
        self.comm.send(target, Tag::SyncRequest, &hdr.encode())?;

        loop {
            // 1. Did the target answer?
            if let Some(env) = self.comm.try_recv(Some(target), Some(Tag::SyncResponse))? {
                let byte = *env.bytes.first().ok_or(AdlbError::Protocol("empty sync response"))?;
                if byte == ACCEPT {
                    return Ok(SyncOutcome::Accepted);
                }
                // Rejected: back off and re-request.
                adlb_trace!("sync: {} rejected, retrying", target);
                std::thread::sleep(SYNC_BACKOFF);
                self.comm.send(target, Tag::SyncRequest, &hdr.encode())?;
                continue;
            }

            // 2. A peer wants us while we wait.
            if let Some(info) = self.comm.iprobe(None, Some(Tag::SyncRequest))? {
                let env = self
                    .comm
                    .try_recv(Some(info.src), Some(Tag::SyncRequest))?
                    .expect("probed message vanished");
                let peer_hdr = SyncHdr::decode(&env.bytes)?;
                if env.src > self.rank {
                    // Higher rank wins: serve it inside our own wait.
                    self.comm.send(env.src, Tag::SyncResponse, &[ACCEPT])?;
                    self.serve_sync(env.src, &peer_hdr)?;
                } else if self.sync.pending.len() < SYNC_PENDING_MAX {
                    self.sync.pending.push_back((env.src, peer_hdr));
                } else {
                    self.comm.send(env.src, Tag::SyncResponse, &[REJECT])?;
                }
                continue;
            }

            // 3. Shutdown interrupts the handshake; the message stays
            // queued for the main loop.
            if self.comm.iprobe(None, Some(Tag::ShutdownServer))?.is_some() {
                adlb_dbg!("sync: interrupted by shutdown");
                return Ok(SyncOutcome::Shutdown);
            }

            std::thread::sleep(SYNC_BACKOFF);
        }
    }

    /// Main-loop path: a SYNC_REQUEST arrived while this server was not
    /// itself syncing. Always accepted.
    pub(crate) fn handle_sync_request(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let hdr = SyncHdr::decode(bytes)?;
        self.comm.send(src, Tag::SyncResponse, &[ACCEPT])?;
        self.serve_sync(src, &hdr)
    }

    /// Serve an accepted sync according to its mode.
    pub(crate) fn serve_sync(&mut self, peer: i32, hdr: &SyncHdr) -> AdlbResult<()> {
        match hdr.mode {
            SYNC_MODE_REQUEST => self.serve_peer_rpc(peer),
            SYNC_MODE_STEAL => self.serve_steal(peer, hdr),
            _ => Err(AdlbError::Protocol("unknown sync mode")),
        }
    }

    /// REQUEST mode: dispatch messages from the peer until its one RPC
    /// has run. Unrelated traffic from the same peer (an idle poll from
    /// the master) may be interleaved ahead of the RPC and is dispatched
    /// on the way.
    fn serve_peer_rpc(&mut self, peer: i32) -> AdlbResult<()> {
        loop {
            let env = self.comm.recv(Some(peer), None)?;
            let tag = env.tag;
            self.dispatch(env)?;
            match tag {
                Tag::Put | Tag::StoreHeader | Tag::RefcountIncr => return Ok(()),
                _ => continue,
            }
        }
    }

    /// Serve everything deferred while this server held a sync of its
    /// own.
    pub(crate) fn drain_pending_syncs(&mut self) -> AdlbResult<()> {
        while let Some((peer, hdr)) = self.sync.pending.pop_front() {
            self.comm.send(peer, Tag::SyncResponse, &[ACCEPT])?;
            self.serve_sync(peer, &hdr)?;
        }
        Ok(())
    }
}
