//! Work unit descriptor
//!
//! A task as the server tracks it: identity, matching attributes, and the
//! opaque payload (possibly still in flight from the putter).

use crate::error::{DataError, DataResult};
use crate::vint;

/// Target sentinel: deliverable to any worker.
pub const RANK_ANY: i32 = -100;

/// Work type reserved for server-generated CONTROL notifications.
pub const TYPE_CONTROL: i32 = 0;

/// A queued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Server-local unique id.
    pub id: i64,
    /// Enqueue tick, used as the age tie-break. Assigned by whichever
    /// server currently holds the unit; not carried across a steal.
    pub seq: u64,
    pub work_type: i32,
    pub putter: i32,
    pub answer: i32,
    pub target: i32,
    pub priority: i32,
    /// Number of ranks that must receive this unit together (>= 1).
    pub parallelism: i32,
    /// Payload bytes if buffered on the server; empty while the putter
    /// still holds them.
    pub payload: Vec<u8>,
    /// Total payload length, valid even while the payload is unbuffered.
    pub length: i32,
}

impl WorkUnit {
    #[inline]
    pub fn is_targeted(&self) -> bool {
        self.target != RANK_ANY
    }

    #[inline]
    pub fn is_parallel(&self) -> bool {
        self.parallelism > 1
    }

    /// True once the payload bytes are held by the server.
    #[inline]
    pub fn is_buffered(&self) -> bool {
        self.payload.len() == self.length as usize
    }

    /// Self-delimited encoding for steal batches: varint total length,
    /// then the descriptor and payload.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut body = Vec::with_capacity(40 + self.payload.len());
        vint::encode_i64(self.id, &mut body);
        vint::encode_i64(self.work_type as i64, &mut body);
        vint::encode_i64(self.putter as i64, &mut body);
        vint::encode_i64(self.answer as i64, &mut body);
        vint::encode_i64(self.target as i64, &mut body);
        vint::encode_i64(self.priority as i64, &mut body);
        vint::encode_i64(self.parallelism as i64, &mut body);
        vint::encode_u64(self.payload.len() as u64, &mut body);
        body.extend_from_slice(&self.payload);
        vint::encode_u64(body.len() as u64, out);
        out.extend_from_slice(&body);
    }

    /// Decode one unit from the front of `buf`; returns the unit and the
    /// bytes consumed. The seq is zeroed and must be reassigned on
    /// enqueue.
    pub fn decode(buf: &[u8]) -> DataResult<(WorkUnit, usize)> {
        let (total, hn) = vint::decode_u64(buf).ok_or(DataError::Invalid)?;
        let total = total as usize;
        if buf.len() < hn + total {
            return Err(DataError::Invalid);
        }
        let body = &buf[hn..hn + total];
        let mut pos = 0usize;
        let mut next_i64 = |pos: &mut usize| -> DataResult<i64> {
            let (v, n) = vint::decode_i64(&body[*pos..]).ok_or(DataError::Invalid)?;
            *pos += n;
            Ok(v)
        };
        let id = next_i64(&mut pos)?;
        let work_type = next_i64(&mut pos)? as i32;
        let putter = next_i64(&mut pos)? as i32;
        let answer = next_i64(&mut pos)? as i32;
        let target = next_i64(&mut pos)? as i32;
        let priority = next_i64(&mut pos)? as i32;
        let parallelism = next_i64(&mut pos)? as i32;
        let (plen, n) = vint::decode_u64(&body[pos..]).ok_or(DataError::Invalid)?;
        pos += n;
        let plen = plen as usize;
        if body.len() != pos + plen {
            return Err(DataError::Invalid);
        }
        let payload = body[pos..].to_vec();
        Ok((
            WorkUnit {
                id,
                seq: 0,
                work_type,
                putter,
                answer,
                target,
                priority,
                parallelism,
                length: plen as i32,
                payload,
            },
            hn + total,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: i64, payload: &[u8]) -> WorkUnit {
        WorkUnit {
            id,
            seq: 7,
            work_type: 1,
            putter: 2,
            answer: 3,
            target: RANK_ANY,
            priority: -5,
            parallelism: 1,
            length: payload.len() as i32,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_encode_decode() {
        let u = unit(42, b"payload");
        let mut buf = Vec::new();
        u.encode(&mut buf);
        let (back, used) = WorkUnit::decode(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(back.id, 42);
        assert_eq!(back.seq, 0); // reassigned on enqueue
        assert_eq!(back.priority, -5);
        assert_eq!(back.payload, b"payload");
        assert!(back.is_buffered());
    }

    #[test]
    fn test_decode_many_from_batch() {
        let mut buf = Vec::new();
        unit(1, b"a").encode(&mut buf);
        unit(2, b"bb").encode(&mut buf);
        let (u1, n1) = WorkUnit::decode(&buf).unwrap();
        let (u2, n2) = WorkUnit::decode(&buf[n1..]).unwrap();
        assert_eq!(n1 + n2, buf.len());
        assert_eq!((u1.id, u2.id), (1, 2));
    }

    #[test]
    fn test_flags() {
        let mut u = unit(1, b"");
        assert!(!u.is_targeted());
        assert!(!u.is_parallel());
        u.target = 4;
        u.parallelism = 2;
        assert!(u.is_targeted());
        assert!(u.is_parallel());
    }

    #[test]
    fn test_decode_truncated() {
        let mut buf = Vec::new();
        unit(1, b"abcdef").encode(&mut buf);
        buf.truncate(buf.len() - 2);
        assert!(WorkUnit::decode(&buf).is_err());
    }
}
