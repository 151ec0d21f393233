//! Matcher
//!
//! Couples the work queue and the request queue. Every PUT first looks
//! for a parked worker (redirect path, task never queued); every GET
//! first looks for queued work. The two queues can never both be
//! non-empty for the same (type, target) combination.

use adlb_core::workunit::WorkUnit;

use crate::requestqueue::RequestQueue;
use crate::workqueue::WorkQueue;

/// What became of an accepted PUT. Redirect outcomes hand the unit back
/// to the caller for delivery; it was never queued.
#[derive(Debug)]
pub enum PutOutcome {
    /// Matched a parked worker; the payload goes straight to that rank.
    Redirect(i32, WorkUnit),
    /// Matched a full parallel team.
    RedirectTeam(Vec<i32>, WorkUnit),
    /// Enqueued under the given server-local work id.
    Queued(i64),
}

/// What a GET produced.
#[derive(Debug)]
pub enum GetOutcome {
    Ready(WorkUnit),
    /// No match; rank was parked (GET) ...
    Parked,
    /// ... or answered empty on the spot (IGET).
    Nothing,
}

/// The coupled queues of one server.
pub struct Matcher {
    pub workq: WorkQueue,
    pub reqq: RequestQueue,
}

impl Matcher {
    pub fn new(ntypes: usize) -> Matcher {
        Matcher {
            workq: WorkQueue::new(ntypes),
            reqq: RequestQueue::new(ntypes),
        }
    }

    #[inline]
    pub fn ntypes(&self) -> usize {
        self.workq.ntypes()
    }

    /// Route an accepted PUT: request queue first, work queue on miss.
    pub fn put(&mut self, mut unit: WorkUnit) -> PutOutcome {
        if unit.is_parallel() {
            if let Some(team) = self
                .reqq
                .take_team(unit.work_type, unit.parallelism as usize)
            {
                return PutOutcome::RedirectTeam(team, unit);
            }
        } else if unit.is_targeted() {
            if self.reqq.match_target(unit.target, unit.work_type) {
                return PutOutcome::Redirect(unit.target, unit);
            }
        } else if let Some(rank) = self.reqq.match_type(unit.work_type) {
            return PutOutcome::Redirect(rank, unit);
        }
        let id = self.workq.assign_id();
        unit.id = id;
        self.workq.add(unit);
        PutOutcome::Queued(id)
    }

    /// Serve a GET/IGET from `rank`. `park` distinguishes the two: a GET
    /// miss parks the rank, an IGET miss answers Nothing.
    pub fn get(&mut self, rank: i32, work_type: i32, park: bool) -> GetOutcome {
        if let Some(unit) = self.workq.pop_for(rank, work_type) {
            return GetOutcome::Ready(unit);
        }
        if park {
            self.reqq.park(rank, work_type, 1);
            GetOutcome::Parked
        } else {
            GetOutcome::Nothing
        }
    }

    /// After ranks park or stolen work arrives: release the best
    /// parallel task whose team is now complete.
    pub fn check_parallel(&mut self, work_type: i32) -> Option<(WorkUnit, Vec<i32>)> {
        let navail = self.reqq.parked_count(work_type);
        if navail == 0 {
            return None;
        }
        let unit = self.workq.pop_parallel(work_type, navail)?;
        let team = self
            .reqq
            .take_team(work_type, unit.parallelism as usize)
            .expect("pop_parallel checked the team size");
        Some((unit, team))
    }

    /// Re-inject a stolen unit; it may match a parked worker right away.
    pub fn add_stolen(&mut self, unit: WorkUnit) -> PutOutcome {
        self.put(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adlb_core::workunit::RANK_ANY;

    fn unit(work_type: i32, target: i32, parallelism: i32) -> WorkUnit {
        WorkUnit {
            id: 0,
            seq: 0,
            work_type,
            putter: 0,
            answer: 0,
            target,
            priority: 0,
            parallelism,
            length: 0,
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_put_redirects_to_parked() {
        let mut m = Matcher::new(2);
        assert!(matches!(m.get(3, 1, true), GetOutcome::Parked));
        match m.put(unit(1, RANK_ANY, 1)) {
            PutOutcome::Redirect(r, u) => {
                assert_eq!(r, 3);
                assert_eq!(u.work_type, 1);
            }
            other => panic!("expected redirect, got {:?}", other),
        }
        // queue stayed empty
        assert_eq!(m.workq.total(), 0);
    }

    #[test]
    fn test_put_queues_on_miss() {
        let mut m = Matcher::new(2);
        assert!(matches!(m.put(unit(1, RANK_ANY, 1)), PutOutcome::Queued(_)));
        match m.get(3, 1, true) {
            GetOutcome::Ready(u) => assert_eq!(u.work_type, 1),
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[test]
    fn test_targeted_put_only_matches_its_rank() {
        let mut m = Matcher::new(1);
        assert!(matches!(m.get(2, 0, true), GetOutcome::Parked));
        // targeted at rank 9, rank 2 is parked: must queue
        assert!(matches!(m.put(unit(0, 9, 1)), PutOutcome::Queued(_)));
        // rank 9 arrives and gets it immediately
        assert!(matches!(m.get(9, 0, false), GetOutcome::Ready(_)));
    }

    #[test]
    fn test_iget_nothing() {
        let mut m = Matcher::new(1);
        assert!(matches!(m.get(3, 0, false), GetOutcome::Nothing));
        assert!(!m.reqq.contains(3));
    }

    #[test]
    fn test_parallel_team_release() {
        let mut m = Matcher::new(1);
        // parallelism 4, only 2 parked: queued
        assert!(matches!(m.get(0, 0, true), GetOutcome::Parked));
        assert!(matches!(m.get(1, 0, true), GetOutcome::Parked));
        assert!(matches!(m.put(unit(0, RANK_ANY, 4)), PutOutcome::Queued(_)));
        assert!(m.check_parallel(0).is_none());

        // two more park: the task is released to all four
        assert!(matches!(m.get(2, 0, true), GetOutcome::Parked));
        assert!(m.check_parallel(0).is_none());
        assert!(matches!(m.get(3, 0, true), GetOutcome::Parked));
        let (u, team) = m.check_parallel(0).unwrap();
        assert_eq!(u.parallelism, 4);
        assert_eq!(team, vec![0, 1, 2, 3]);
        assert_eq!(m.reqq.total(), 0);
    }

    #[test]
    fn test_parallel_put_with_team_already_parked() {
        let mut m = Matcher::new(1);
        for r in 0..3 {
            m.get(r, 0, true);
        }
        match m.put(unit(0, RANK_ANY, 3)) {
            PutOutcome::RedirectTeam(team, _) => assert_eq!(team, vec![0, 1, 2]),
            other => panic!("expected team, got {:?}", other),
        }
    }
}
