//! Request queue
//!
//! Parked workers waiting for tasks, indexed by type (FIFO) with a rank
//! side-map for targeted lookup and O(1) removal. Removal is lazy: the
//! side-map is authoritative and stale FIFO entries are skipped on pop.

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReqEntry {
    work_type: i32,
    parallelism: i32,
}

/// Parked ranks on one server.
pub struct RequestQueue {
    by_type: Vec<VecDeque<i32>>,
    by_rank: HashMap<i32, ReqEntry>,
    counts: Vec<i64>,
}

impl RequestQueue {
    pub fn new(ntypes: usize) -> RequestQueue {
        RequestQueue {
            by_type: (0..ntypes).map(|_| VecDeque::new()).collect(),
            by_rank: HashMap::new(),
            counts: vec![0; ntypes],
        }
    }

    /// Park a rank waiting for `work_type`. A rank parks at most once;
    /// re-parking replaces the previous registration.
    pub fn park(&mut self, rank: i32, work_type: i32, parallelism: i32) {
        if let Some(old) = self.by_rank.insert(
            rank,
            ReqEntry {
                work_type,
                parallelism,
            },
        ) {
            self.counts[old.work_type as usize] -= 1;
        }
        self.by_type[work_type as usize].push_back(rank);
        self.counts[work_type as usize] += 1;
    }

    #[inline]
    pub fn contains(&self, rank: i32) -> bool {
        self.by_rank.contains_key(&rank)
    }

    /// Parallelism demand a parked rank registered with.
    pub fn demand(&self, rank: i32) -> Option<i32> {
        self.by_rank.get(&rank).map(|e| e.parallelism)
    }

    pub fn parked_count(&self, work_type: i32) -> usize {
        self.counts[work_type as usize] as usize
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// Is `rank` parked for `work_type`? Used to satisfy a targeted PUT.
    /// Removes and returns true on hit.
    pub fn match_target(&mut self, rank: i32, work_type: i32) -> bool {
        match self.by_rank.get(&rank) {
            Some(e) if e.work_type == work_type => {
                self.remove(rank);
                true
            }
            _ => false,
        }
    }

    /// Pop the longest-waiting rank parked for `work_type`.
    pub fn match_type(&mut self, work_type: i32) -> Option<i32> {
        let fifo = &mut self.by_type[work_type as usize];
        while let Some(rank) = fifo.pop_front() {
            // skip stale entries (removed or re-parked under another type)
            match self.by_rank.get(&rank) {
                Some(e) if e.work_type == work_type => {
                    self.by_rank.remove(&rank);
                    self.counts[work_type as usize] -= 1;
                    return Some(rank);
                }
                _ => continue,
            }
        }
        None
    }

    /// Pop the `n` longest-waiting ranks of one type, all or nothing.
    pub fn take_team(&mut self, work_type: i32, n: usize) -> Option<Vec<i32>> {
        if self.parked_count(work_type) < n {
            return None;
        }
        let mut team = Vec::with_capacity(n);
        while team.len() < n {
            team.push(self.match_type(work_type)?);
        }
        Some(team)
    }

    /// Remove a rank wherever it is parked. Returns whether it was.
    pub fn remove(&mut self, rank: i32) -> bool {
        match self.by_rank.remove(&rank) {
            Some(e) => {
                self.counts[e.work_type as usize] -= 1;
                // FIFO entry left behind; match_type skips it
                true
            }
            None => false,
        }
    }

    /// All parked ranks, clearing the queue. Used at shutdown to
    /// complete every deferred GET with the shutdown code.
    pub fn drain_all(&mut self) -> Vec<i32> {
        let ranks: Vec<i32> = self.by_rank.keys().copied().collect();
        self.by_rank.clear();
        for q in &mut self.by_type {
            q.clear();
        }
        self.counts.iter_mut().for_each(|c| *c = 0);
        ranks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut rq = RequestQueue::new(2);
        rq.park(3, 1, 1);
        rq.park(5, 1, 1);
        rq.park(7, 1, 1);
        assert_eq!(rq.parked_count(1), 3);
        assert_eq!(rq.match_type(1), Some(3));
        assert_eq!(rq.match_type(1), Some(5));
        assert_eq!(rq.match_type(1), Some(7));
        assert_eq!(rq.match_type(1), None);
    }

    #[test]
    fn test_match_target() {
        let mut rq = RequestQueue::new(2);
        rq.park(3, 1, 2);
        assert_eq!(rq.demand(3), Some(2));
        assert!(!rq.match_target(3, 0)); // wrong type
        assert!(rq.match_target(3, 1));
        assert!(!rq.match_target(3, 1)); // gone
        assert_eq!(rq.parked_count(1), 0);
        assert_eq!(rq.demand(3), None);
    }

    #[test]
    fn test_lazy_removal_skips_stale() {
        let mut rq = RequestQueue::new(2);
        rq.park(3, 1, 1);
        rq.park(5, 1, 1);
        assert!(rq.remove(3));
        assert_eq!(rq.match_type(1), Some(5));
        assert_eq!(rq.match_type(1), None);
    }

    #[test]
    fn test_repark_moves_type() {
        let mut rq = RequestQueue::new(2);
        rq.park(3, 0, 1);
        rq.park(3, 1, 1);
        assert_eq!(rq.parked_count(0), 0);
        assert_eq!(rq.match_type(0), None);
        assert_eq!(rq.match_type(1), Some(3));
    }

    #[test]
    fn test_take_team_all_or_nothing() {
        let mut rq = RequestQueue::new(1);
        rq.park(1, 0, 1);
        rq.park(2, 0, 1);
        assert_eq!(rq.take_team(0, 4), None);
        assert_eq!(rq.parked_count(0), 2);
        rq.park(3, 0, 1);
        rq.park(4, 0, 1);
        assert_eq!(rq.take_team(0, 4), Some(vec![1, 2, 3, 4]));
        assert_eq!(rq.parked_count(0), 0);
    }

    #[test]
    fn test_drain_all() {
        let mut rq = RequestQueue::new(2);
        rq.park(1, 0, 1);
        rq.park(2, 1, 1);
        let mut drained = rq.drain_all();
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(rq.total(), 0);
    }
}
