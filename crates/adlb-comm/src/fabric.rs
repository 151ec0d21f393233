//! In-process transport fabric
//!
//! One mailbox per rank. Senders push onto a lock-free ingress queue;
//! the owning rank drains it into a private pending list under its own
//! lock and scans that list for selective matches. Receivers park on a
//! condvar with a short timeout, so a wakeup racing a drain costs at
//! most one timeout tick.
//!
//! Arrival order is the order ingress pushes linearize; pushes from one
//! sender linearize in program order, which gives the per-(sender,
//! receiver) FIFO the transport contract requires.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_queue::SegQueue;

use adlb_core::error::{AdlbError, AdlbResult};
use adlb_core::tag::Tag;

use crate::{Comm, Envelope, MsgInfo};

/// Receiver park interval. Bounds the window of a wakeup lost between
/// draining and parking.
const PARK_TICK: Duration = Duration::from_millis(1);

struct Mailbox {
    ingress: SegQueue<Envelope>,
    pending: Mutex<VecDeque<Envelope>>,
    cv: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Mailbox {
            ingress: SegQueue::new(),
            pending: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }
}

struct Shared {
    boxes: Vec<Mailbox>,
}

/// An in-process cluster transport. Create once, then hand one endpoint
/// to each rank's thread.
pub struct Fabric {
    shared: Arc<Shared>,
}

impl Fabric {
    pub fn new(ranks: i32) -> Fabric {
        assert!(ranks > 0);
        let boxes = (0..ranks).map(|_| Mailbox::new()).collect();
        Fabric {
            shared: Arc::new(Shared { boxes }),
        }
    }

    /// The endpoint for `rank`. Each rank's endpoint must be used from a
    /// single thread at a time (the rank's own).
    pub fn endpoint(&self, rank: i32) -> FabricEndpoint {
        assert!(rank >= 0 && (rank as usize) < self.shared.boxes.len());
        FabricEndpoint {
            shared: Arc::clone(&self.shared),
            rank,
        }
    }
}

/// One rank's handle on the fabric.
pub struct FabricEndpoint {
    shared: Arc<Shared>,
    rank: i32,
}

#[inline]
fn matches(env: &Envelope, src: Option<i32>, tag: Option<Tag>) -> bool {
    src.map_or(true, |s| env.src == s) && tag.map_or(true, |t| env.tag == t)
}

impl FabricEndpoint {
    fn mailbox(&self) -> &Mailbox {
        &self.shared.boxes[self.rank as usize]
    }

    /// Move everything that arrived on the ingress queue into the
    /// pending list, preserving arrival order. Caller holds the pending
    /// lock.
    fn drain_into(&self, pending: &mut VecDeque<Envelope>) {
        while let Some(env) = self.mailbox().ingress.pop() {
            pending.push_back(env);
        }
    }

    /// Scan for the first match; remove it when `take` is set.
    fn scan(
        &self,
        pending: &mut VecDeque<Envelope>,
        src: Option<i32>,
        tag: Option<Tag>,
        take: bool,
    ) -> Option<Envelope> {
        let idx = pending.iter().position(|e| matches(e, src, tag))?;
        if take {
            pending.remove(idx)
        } else {
            pending.get(idx).cloned()
        }
    }
}

impl Comm for FabricEndpoint {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.shared.boxes.len() as i32
    }

    fn send(&self, dst: i32, tag: Tag, bytes: &[u8]) -> AdlbResult<()> {
        let mbox = self
            .shared
            .boxes
            .get(dst as usize)
            .ok_or(AdlbError::Invalid("destination rank out of range"))?;
        mbox.ingress.push(Envelope {
            src: self.rank,
            tag,
            bytes: bytes.to_vec(),
        });
        mbox.cv.notify_all();
        Ok(())
    }

    fn ssend(&self, dst: i32, tag: Tag, bytes: &[u8]) -> AdlbResult<()> {
        // Mailboxes are FIFO per sender, so eager completion is
        // indistinguishable from rendezvous inside one process.
        self.send(dst, tag, bytes)
    }

    fn recv(&self, src: Option<i32>, tag: Option<Tag>) -> AdlbResult<Envelope> {
        let mbox = self.mailbox();
        let mut pending = mbox.pending.lock().unwrap();
        loop {
            self.drain_into(&mut pending);
            if let Some(env) = self.scan(&mut pending, src, tag, true) {
                return Ok(env);
            }
            let (guard, _) = mbox.cv.wait_timeout(pending, PARK_TICK).unwrap();
            pending = guard;
        }
    }

    fn try_recv(&self, src: Option<i32>, tag: Option<Tag>) -> AdlbResult<Option<Envelope>> {
        let mbox = self.mailbox();
        let mut pending = mbox.pending.lock().unwrap();
        self.drain_into(&mut pending);
        Ok(self.scan(&mut pending, src, tag, true))
    }

    fn probe(&self, src: Option<i32>, tag: Option<Tag>) -> AdlbResult<MsgInfo> {
        let mbox = self.mailbox();
        let mut pending = mbox.pending.lock().unwrap();
        loop {
            self.drain_into(&mut pending);
            if let Some(env) = self.scan(&mut pending, src, tag, false) {
                return Ok(MsgInfo {
                    src: env.src,
                    tag: env.tag,
                    len: env.bytes.len(),
                });
            }
            let (guard, _) = mbox.cv.wait_timeout(pending, PARK_TICK).unwrap();
            pending = guard;
        }
    }

    fn iprobe(&self, src: Option<i32>, tag: Option<Tag>) -> AdlbResult<Option<MsgInfo>> {
        let mbox = self.mailbox();
        let mut pending = mbox.pending.lock().unwrap();
        self.drain_into(&mut pending);
        Ok(self.scan(&mut pending, src, tag, false).map(|env| MsgInfo {
            src: env.src,
            tag: env.tag,
            len: env.bytes.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_send_recv_basic() {
        let fabric = Fabric::new(2);
        let a = fabric.endpoint(0);
        let b = fabric.endpoint(1);

        a.send(1, Tag::Put, b"hello").unwrap();
        let env = b.recv(None, None).unwrap();
        assert_eq!(env.src, 0);
        assert_eq!(env.tag, Tag::Put);
        assert_eq!(env.bytes, b"hello");
    }

    #[test]
    fn test_selective_recv_by_tag() {
        let fabric = Fabric::new(2);
        let a = fabric.endpoint(0);
        let b = fabric.endpoint(1);

        a.send(1, Tag::Put, b"work").unwrap();
        a.send(1, Tag::Get, b"req").unwrap();

        // Select the second message first
        let env = b.recv(None, Some(Tag::Get)).unwrap();
        assert_eq!(env.bytes, b"req");
        let env = b.recv(None, Some(Tag::Put)).unwrap();
        assert_eq!(env.bytes, b"work");
    }

    #[test]
    fn test_selective_recv_by_src() {
        let fabric = Fabric::new(3);
        let a = fabric.endpoint(0);
        let b = fabric.endpoint(1);
        let c = fabric.endpoint(2);

        a.send(2, Tag::Response, b"from-a").unwrap();
        b.send(2, Tag::Response, b"from-b").unwrap();

        let env = c.recv(Some(1), None).unwrap();
        assert_eq!(env.bytes, b"from-b");
        let env = c.recv(Some(0), None).unwrap();
        assert_eq!(env.bytes, b"from-a");
    }

    #[test]
    fn test_probe_does_not_consume() {
        let fabric = Fabric::new(2);
        let a = fabric.endpoint(0);
        let b = fabric.endpoint(1);

        a.send(1, Tag::Fail, b"xyz").unwrap();
        let info = b.probe(None, None).unwrap();
        assert_eq!(info.src, 0);
        assert_eq!(info.tag, Tag::Fail);
        assert_eq!(info.len, 3);
        // Still there
        let env = b.try_recv(None, None).unwrap().unwrap();
        assert_eq!(env.bytes, b"xyz");
        assert!(b.try_recv(None, None).unwrap().is_none());
    }

    #[test]
    fn test_iprobe_empty() {
        let fabric = Fabric::new(1);
        let a = fabric.endpoint(0);
        assert!(a.iprobe(None, None).unwrap().is_none());
    }

    #[test]
    fn test_per_sender_order() {
        let fabric = Fabric::new(2);
        let a = fabric.endpoint(0);
        let b = fabric.endpoint(1);

        for i in 0..100u8 {
            a.send(1, Tag::Put, &[i]).unwrap();
        }
        for i in 0..100u8 {
            let env = b.recv(Some(0), Some(Tag::Put)).unwrap();
            assert_eq!(env.bytes, &[i]);
        }
    }

    #[test]
    fn test_cross_thread_blocking_recv() {
        let fabric = Fabric::new(2);
        let a = fabric.endpoint(0);
        let b = fabric.endpoint(1);

        let handle = thread::spawn(move || b.recv(None, Some(Tag::Workunit)).unwrap());
        thread::sleep(Duration::from_millis(10));
        a.send(1, Tag::Workunit, b"late").unwrap();
        let env = handle.join().unwrap();
        assert_eq!(env.bytes, b"late");
    }

    #[test]
    fn test_send_out_of_range() {
        let fabric = Fabric::new(1);
        let a = fabric.endpoint(0);
        assert!(a.send(5, Tag::Put, b"").is_err());
    }
}
