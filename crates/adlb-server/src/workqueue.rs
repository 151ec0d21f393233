//! Work queue
//!
//! The pool of pending tasks on one server, indexed for the three ways a
//! task can leave it:
//!
//! - untargeted single tasks: per-type max-heap on (priority, age)
//! - targeted tasks: per-(target, type) bucket, same ordering
//! - parallel tasks: per-type side table, matched only when enough ranks
//!   are parked
//!
//! Same-priority tasks are dequeued oldest first (monotone enqueue tick).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use adlb_core::workunit::WorkUnit;

struct Entry {
    priority: i32,
    seq: u64,
    unit: WorkUnit,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then older (smaller seq)
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

/// Typed pool of pending tasks.
pub struct WorkQueue {
    ntypes: usize,
    untargeted: Vec<BinaryHeap<Entry>>,
    targeted: HashMap<(i32, i32), BinaryHeap<Entry>>,
    parallel: Vec<Vec<WorkUnit>>,
    counts: Vec<i64>,
    next_work_id: i64,
    clock: u64,
}

impl WorkQueue {
    pub fn new(ntypes: usize) -> WorkQueue {
        WorkQueue {
            ntypes,
            untargeted: (0..ntypes).map(|_| BinaryHeap::new()).collect(),
            targeted: HashMap::new(),
            parallel: (0..ntypes).map(|_| Vec::new()).collect(),
            counts: vec![0; ntypes],
            next_work_id: 1,
            clock: 0,
        }
    }

    #[inline]
    pub fn ntypes(&self) -> usize {
        self.ntypes
    }

    /// Server-local unique id for a newly accepted task.
    pub fn assign_id(&mut self) -> i64 {
        let id = self.next_work_id;
        self.next_work_id += 1;
        id
    }

    /// Queued tasks per type (all three pools).
    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn type_count(&self, work_type: i32) -> i64 {
        self.counts[work_type as usize]
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// Enqueue, stamping the age tick.
    pub fn add(&mut self, mut unit: WorkUnit) {
        self.clock += 1;
        unit.seq = self.clock;
        let t = unit.work_type as usize;
        self.counts[t] += 1;
        if unit.is_parallel() {
            self.parallel[t].push(unit);
        } else if unit.is_targeted() {
            self.targeted
                .entry((unit.target, unit.work_type))
                .or_default()
                .push(Entry {
                    priority: unit.priority,
                    seq: unit.seq,
                    unit,
                });
        } else {
            self.untargeted[t].push(Entry {
                priority: unit.priority,
                seq: unit.seq,
                unit,
            });
        }
    }

    /// Best task for a GET from `rank`: targeted bucket first, then the
    /// untargeted heap.
    pub fn pop_for(&mut self, rank: i32, work_type: i32) -> Option<WorkUnit> {
        if let Some(heap) = self.targeted.get_mut(&(rank, work_type)) {
            if let Some(e) = heap.pop() {
                if heap.is_empty() {
                    self.targeted.remove(&(rank, work_type));
                }
                self.counts[work_type as usize] -= 1;
                return Some(e.unit);
            }
        }
        self.pop_untargeted(work_type)
    }

    pub fn pop_untargeted(&mut self, work_type: i32) -> Option<WorkUnit> {
        let e = self.untargeted[work_type as usize].pop()?;
        self.counts[work_type as usize] -= 1;
        Some(e.unit)
    }

    /// Smallest parallel task of this type whose team fits in `navail`
    /// parked ranks. Single tasks never compete with this path, so a
    /// parallel task cannot preempt a ready single task.
    pub fn pop_parallel(&mut self, work_type: i32, navail: usize) -> Option<WorkUnit> {
        let pool = &mut self.parallel[work_type as usize];
        let idx = pool
            .iter()
            .enumerate()
            .filter(|(_, u)| u.parallelism as usize <= navail)
            .min_by_key(|(_, u)| u.parallelism)?
            .0;
        self.counts[work_type as usize] -= 1;
        Some(pool.swap_remove(idx))
    }

    /// Extract up to `ceil(count/2)` untargeted tasks of one type for a
    /// steal, stopping when the payload budget is spent. Targeted tasks
    /// are never stolen.
    pub fn steal_extract(&mut self, work_type: i32, budget: &mut i64) -> Vec<WorkUnit> {
        let t = work_type as usize;
        let stealable = self.untargeted[t].len() + self.parallel[t].len();
        let quota = stealable.div_ceil(2);
        let mut out = Vec::new();
        while out.len() < quota && *budget > 0 {
            let unit = if let Some(e) = self.untargeted[t].pop() {
                e.unit
            } else if let Some(u) = self.parallel[t].pop() {
                u
            } else {
                break;
            };
            *budget -= unit.payload.len() as i64;
            self.counts[t] -= 1;
            out.push(unit);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adlb_core::workunit::RANK_ANY;

    fn unit(work_type: i32, target: i32, priority: i32, parallelism: i32) -> WorkUnit {
        WorkUnit {
            id: 0,
            seq: 0,
            work_type,
            putter: 0,
            answer: 0,
            target,
            priority,
            parallelism,
            length: 0,
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_priority_then_age() {
        let mut q = WorkQueue::new(2);
        let mut a = unit(1, RANK_ANY, 0, 1);
        a.id = 1;
        let mut b = unit(1, RANK_ANY, 5, 1);
        b.id = 2;
        let mut c = unit(1, RANK_ANY, 5, 1);
        c.id = 3;
        q.add(a);
        q.add(b);
        q.add(c);

        // highest priority first; ties oldest-first
        assert_eq!(q.pop_untargeted(1).unwrap().id, 2);
        assert_eq!(q.pop_untargeted(1).unwrap().id, 3);
        assert_eq!(q.pop_untargeted(1).unwrap().id, 1);
        assert!(q.pop_untargeted(1).is_none());
    }

    #[test]
    fn test_targeted_before_untargeted() {
        let mut q = WorkQueue::new(2);
        let mut high = unit(1, RANK_ANY, 100, 1);
        high.id = 1;
        let mut targeted = unit(1, 3, 0, 1);
        targeted.id = 2;
        q.add(high);
        q.add(targeted);

        // rank 3 gets its targeted task even though an untargeted task
        // has higher priority
        assert_eq!(q.pop_for(3, 1).unwrap().id, 2);
        assert_eq!(q.pop_for(3, 1).unwrap().id, 1);
    }

    #[test]
    fn test_targeted_wrong_rank_invisible() {
        let mut q = WorkQueue::new(1);
        q.add(unit(0, 2, 0, 1));
        assert!(q.pop_for(1, 0).is_none());
        assert_eq!(q.type_count(0), 1);
        assert!(q.pop_for(2, 0).is_some());
        assert_eq!(q.type_count(0), 0);
    }

    #[test]
    fn test_parallel_needs_enough_ranks() {
        let mut q = WorkQueue::new(1);
        q.add(unit(0, RANK_ANY, 0, 4));
        assert!(q.pop_parallel(0, 2).is_none());
        assert!(q.pop_parallel(0, 4).is_some());
        assert_eq!(q.total(), 0);
    }

    #[test]
    fn test_counts_track_all_pools() {
        let mut q = WorkQueue::new(2);
        q.add(unit(0, RANK_ANY, 0, 1));
        q.add(unit(0, 1, 0, 1));
        q.add(unit(1, RANK_ANY, 0, 3));
        assert_eq!(q.counts(), &[2, 1]);
        assert_eq!(q.total(), 3);
    }

    #[test]
    fn test_steal_takes_half_untargeted_only() {
        let mut q = WorkQueue::new(1);
        for _ in 0..4 {
            q.add(unit(0, RANK_ANY, 0, 1));
        }
        q.add(unit(0, 2, 0, 1)); // targeted, must not move

        let mut budget = i64::MAX;
        let stolen = q.steal_extract(0, &mut budget);
        assert_eq!(stolen.len(), 2);
        assert!(stolen.iter().all(|u| !u.is_targeted()));
        assert_eq!(q.type_count(0), 3);
    }

    #[test]
    fn test_steal_budget_caps() {
        let mut q = WorkQueue::new(1);
        for _ in 0..6 {
            let mut u = unit(0, RANK_ANY, 0, 1);
            u.payload = vec![0u8; 100];
            u.length = 100;
            q.add(u);
        }
        let mut budget = 150; // fits one, second exhausts it
        let stolen = q.steal_extract(0, &mut budget);
        assert_eq!(stolen.len(), 2);
    }
}
