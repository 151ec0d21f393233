//! Notification engine
//!
//! Drains the [`Notifications`] a data-store operation produced:
//!
//! - close / subscript-insert events become high-priority CONTROL work
//!   units (`close <id>[ <sub>]`) targeted at each listener rank. Ranks
//!   homed here are peeled off and enqueued locally; the rest are
//!   delivered through a sync-acquired PUT to their home server.
//! - reference writes become STOREs routed to the ref id's home.
//! - refcount deltas are applied locally or routed the same way.
//!
//! Local effects can cascade (a local store closes a datum, which frees
//! referands, ...), so the engine runs a worklist until quiet.

use adlb_core::constants::CONTROL_PRIORITY;
use adlb_core::error::{code, AdlbError, AdlbResult, DataError};
use adlb_core::msgs::{PutHdr, PutResponse, RefcountHdr, RefcountResponse, StoreHdr, SyncHdr};
use adlb_core::tag::Tag;
use adlb_core::workunit::{WorkUnit, TYPE_CONTROL};
use adlb_core::{adlb_trace, adlb_warn};
use adlb_comm::Comm;

use crate::server::Server;
use crate::store::{CloseNote, Notifications, RefWrite};
use crate::sync::SyncOutcome;

impl<C: Comm> Server<C> {
    /// Drain a notification bundle, following local cascades.
    pub(crate) fn process_notifications(&mut self, notifs: Notifications) -> AdlbResult<()> {
        let mut worklist = vec![notifs];
        while let Some(n) = worklist.pop() {
            for note in n.close {
                self.send_close_notifications(&note)?;
            }
            for rw in n.ref_writes {
                let home = self.layout.home_server_for_id(rw.ref_id);
                if home == self.rank {
                    // Filling the promise also closes the reference datum.
                    match self.store.store(rw.ref_id, None, rw.value_type, rw.value, 0, 1) {
                        Ok(more) => worklist.push(more),
                        Err(e) => adlb_warn!("reference write to {} failed: {}", rw.ref_id, e),
                    }
                } else {
                    self.remote_ref_write(home, &rw)?;
                }
            }
            for (id, delta) in n.rc_changes {
                let home = self.layout.home_server_for_id(id);
                if home == self.rank {
                    match self.store.refcount_incr(id, delta, 0, false) {
                        Ok((_, more)) => worklist.push(more),
                        Err(DataError::NotFound) => {
                            adlb_trace!("refcount target {} already gone", id)
                        }
                        Err(e) => adlb_warn!("refcount {} on {} failed: {}", delta, id, e),
                    }
                } else {
                    self.remote_refcount(home, id, delta)?;
                }
            }
        }
        Ok(())
    }

    /// Fan one close/insert event out to its listener ranks, local ones
    /// first.
    fn send_close_notifications(&mut self, note: &CloseNote) -> AdlbResult<()> {
        let payload = match &note.sub {
            Some(sub) => format!("close {} {}", note.id, String::from_utf8_lossy(sub)),
            None => format!("close {}", note.id),
        }
        .into_bytes();

        // Peel local listeners off; only the remainder crosses servers.
        let (local, remote): (Vec<i32>, Vec<i32>) = note
            .ranks
            .iter()
            .copied()
            .partition(|r| self.layout.home_server_for_worker(*r) == self.rank);

        for rank in local {
            let unit = self.control_unit(rank, &payload);
            self.accepted += 1;
            self.place_unit(unit)?;
        }
        for rank in remote {
            let home = self.layout.home_server_for_worker(rank);
            self.remote_control_put(home, rank, &payload)?;
        }
        Ok(())
    }

    fn control_unit(&self, target: i32, payload: &[u8]) -> WorkUnit {
        WorkUnit {
            id: 0,
            seq: 0,
            work_type: TYPE_CONTROL,
            putter: self.rank,
            answer: self.rank,
            target,
            priority: CONTROL_PRIORITY,
            parallelism: 1,
            length: payload.len() as i32,
            payload: payload.to_vec(),
        }
    }

    /// Acquire a peer server and PUT a CONTROL notification through it.
    fn remote_control_put(&mut self, home: i32, target: i32, payload: &[u8]) -> AdlbResult<()> {
        if self.sync(home, &SyncHdr::request())? == SyncOutcome::Shutdown {
            return Ok(());
        }
        let hdr = PutHdr {
            work_type: TYPE_CONTROL,
            priority: CONTROL_PRIORITY,
            putter: self.rank,
            answer: self.rank,
            target,
            length: payload.len() as i32,
            parallelism: 1,
            has_inline: 1,
        };
        self.comm.send(home, Tag::Put, &hdr.encode(payload))?;
        let env = self.comm.recv(Some(home), Some(Tag::ResponsePut))?;
        let resp = PutResponse::decode(&env.bytes)?;
        if resp.code != code::SUCCESS {
            adlb_warn!("remote notification to {} via {} failed", target, home);
        }
        self.drain_pending_syncs()
    }

    /// Acquire a peer server and STORE a resolved reference value there.
    fn remote_ref_write(&mut self, home: i32, rw: &RefWrite) -> AdlbResult<()> {
        if self.sync(home, &SyncHdr::request())? == SyncOutcome::Shutdown {
            return Ok(());
        }
        let hdr = StoreHdr {
            id: rw.ref_id,
            data_type: rw.value_type.as_i32(),
            read_decr: 0,
            write_decr: 1,
            sub_len: 0,
        };
        self.comm.send(home, Tag::StoreHeader, &hdr.encode())?;
        self.comm.send(home, Tag::StorePayload, &rw.value)?;
        let env = self.comm.recv(Some(home), Some(Tag::Response))?;
        let c = i32::from_le_bytes(
            env.bytes
                .get(0..4)
                .ok_or(AdlbError::Protocol("short store response"))?
                .try_into()
                .unwrap(),
        );
        if c != code::SUCCESS {
            adlb_warn!("remote reference write to {} failed: code {}", rw.ref_id, c);
        }
        self.drain_pending_syncs()
    }

    /// Acquire a peer server and apply a read-refcount delta there.
    fn remote_refcount(&mut self, home: i32, id: i64, delta: i32) -> AdlbResult<()> {
        if self.sync(home, &SyncHdr::request())? == SyncOutcome::Shutdown {
            return Ok(());
        }
        let hdr = RefcountHdr {
            id,
            read_incr: delta,
            write_incr: 0,
            scavenge: 0,
        };
        self.comm.send(home, Tag::RefcountIncr, &hdr.encode())?;
        let env = self.comm.recv(Some(home), Some(Tag::Response))?;
        let _ = RefcountResponse::decode(&env.bytes)?;
        self.drain_pending_syncs()
    }
}
