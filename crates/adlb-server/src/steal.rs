//! Work stealing
//!
//! A server whose workers are starving picks a random peer and acquires
//! it with a STEAL-mode sync, shipping its own per-type counts and a
//! payload byte budget. The victim gives up half of what it can spare
//! per type (never targeted tasks), in batches. The stealer re-runs
//! matching on arrival so parked workers are served immediately.

use adlb_core::error::AdlbResult;
use adlb_core::msgs::{StealBatchHdr, SyncHdr};
use adlb_core::tag::Tag;
use adlb_core::workunit::WorkUnit;
use adlb_core::{adlb_dbg, adlb_trace};
use adlb_comm::Comm;

use crate::server::Server;
use crate::sync::SyncOutcome;

/// Units per WORKUNIT batch message.
const STEAL_BATCH: usize = 16;

impl<C: Comm> Server<C> {
    /// Initiate one steal exchange. No-op on a single-server cluster.
    pub(crate) fn attempt_steal(&mut self) -> AdlbResult<()> {
        if self.layout.servers() < 2 {
            return Ok(());
        }
        self.last_steal = std::time::Instant::now();
        let victim = self.random_server();
        let counts = self.matcher.workq.counts().to_vec();
        let hdr = SyncHdr::steal(counts, self.config.steal_budget);

        match self.sync(victim, &hdr)? {
            SyncOutcome::Shutdown => return Ok(()),
            SyncOutcome::Accepted => {}
        }
        self.stats.steals_out += 1;

        let mut got = 0u64;
        loop {
            let env = self.comm.recv(Some(victim), Some(Tag::Workunit))?;
            let (bhdr, mut rest) = StealBatchHdr::decode(&env.bytes)?;
            for _ in 0..bhdr.count {
                let (unit, used) = WorkUnit::decode(rest)?;
                rest = &rest[used..];
                got += 1;
                self.incorporate_stolen(unit)?;
            }
            if bhdr.last != 0 {
                break;
            }
        }
        if got > 0 {
            adlb_dbg!("steal: got {} units from {}", got, victim);
            self.stats.units_stolen += got;
        }
        self.drain_pending_syncs()
    }

    /// Victim side: ship half of each type's untargeted backlog within
    /// the stealer's budget. Always ends with a last-flagged batch so
    /// the stealer's receive loop terminates.
    pub(crate) fn serve_steal(&mut self, peer: i32, hdr: &SyncHdr) -> AdlbResult<()> {
        self.stats.steals_in += 1;
        let mut budget = hdr.budget;
        let ntypes = self.matcher.ntypes() as i32;
        let mut outgoing: Vec<WorkUnit> = Vec::new();
        for t in 0..ntypes {
            outgoing.extend(self.matcher.workq.steal_extract(t, &mut budget));
        }
        adlb_trace!("steal: {} asks, sending {} units", peer, outgoing.len());

        let mut sent = 0usize;
        while sent < outgoing.len() {
            let batch = &outgoing[sent..(sent + STEAL_BATCH).min(outgoing.len())];
            sent += batch.len();
            let mut body = Vec::new();
            for u in batch {
                u.encode(&mut body);
            }
            let bhdr = StealBatchHdr {
                count: batch.len() as i32,
                last: (sent == outgoing.len()) as u8,
            };
            self.comm.send(peer, Tag::Workunit, &bhdr.encode(&body))?;
        }
        if outgoing.is_empty() {
            let bhdr = StealBatchHdr { count: 0, last: 1 };
            self.comm.send(peer, Tag::Workunit, &bhdr.encode(&[]))?;
        }
        Ok(())
    }

    /// Enqueue a stolen unit; it may match a parked worker on the spot.
    fn incorporate_stolen(&mut self, unit: WorkUnit) -> AdlbResult<()> {
        let work_type = unit.work_type;
        self.place_unit(unit)?;
        while let Some((u, team)) = self.matcher.check_parallel(work_type) {
            self.deliver_team(&team, &u)?;
        }
        Ok(())
    }
}
