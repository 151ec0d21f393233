//! Datum record and store side effects
//!
//! A datum exists iff it is resident in the store's id map. Lifecycle:
//! open while `write_refcount > 0`, closed at zero (listeners fire exactly
//! once), destroyed when both counts reach zero.

use adlb_core::value::{DataType, Value};

/// One addressable value in the shared store.
#[derive(Debug, Clone)]
pub struct Datum {
    pub data_type: DataType,
    /// `None` until stored. Containers and multisets are materialized at
    /// creation and count as set from the start.
    pub value: Option<Value>,
    pub read_refcount: i32,
    pub write_refcount: i32,
    /// Permanent datums ignore read-refcount changes and are never
    /// garbage collected.
    pub permanent: bool,
    /// Ranks awaiting closure of this datum. Duplicates rejected.
    pub listeners: Vec<i32>,
    /// Opaque debug tag, surfaced in leak reports.
    pub symbol: Option<String>,
}

impl Datum {
    pub fn new(data_type: DataType, props: &CreateProps) -> Datum {
        Datum {
            data_type,
            value: None,
            read_refcount: props.read_refcount,
            write_refcount: props.write_refcount,
            permanent: props.permanent,
            listeners: Vec::new(),
            symbol: props.symbol.clone(),
        }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.write_refcount == 0
    }

    /// Add a closure listener; returns false on duplicate.
    pub fn add_listener(&mut self, rank: i32) -> bool {
        if self.listeners.contains(&rank) {
            return false;
        }
        self.listeners.push(rank);
        true
    }
}

/// Creation properties for a datum.
#[derive(Debug, Clone, Default)]
pub struct CreateProps {
    pub read_refcount: i32,
    pub write_refcount: i32,
    pub permanent: bool,
    pub symbol: Option<String>,
}

impl CreateProps {
    pub fn refs(read: i32, write: i32) -> CreateProps {
        CreateProps {
            read_refcount: read,
            write_refcount: write,
            ..Default::default()
        }
    }
}

/// A closure or subscript-insertion event owed to a set of ranks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseNote {
    pub id: i64,
    /// `Some` for subscript-insertion notifications.
    pub sub: Option<Vec<u8>>,
    pub ranks: Vec<i32>,
}

/// A bound container reference resolved by an insert: `value` must be
/// stored into `ref_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefWrite {
    pub ref_id: i64,
    pub value_type: DataType,
    pub value: Vec<u8>,
}

/// Side effects a store operation owes the rest of the cluster. The
/// server drains these after the operation commits: close/insert
/// notifications to listener ranks, reference writes, and read-refcount
/// deltas routed to each id's home server.
#[derive(Debug, Default, Clone)]
pub struct Notifications {
    pub close: Vec<CloseNote>,
    pub ref_writes: Vec<RefWrite>,
    /// `(id, read_delta)` pairs, applied at the id's home.
    pub rc_changes: Vec<(i64, i32)>,
}

impl Notifications {
    pub fn is_empty(&self) -> bool {
        self.close.is_empty() && self.ref_writes.is_empty() && self.rc_changes.is_empty()
    }

    pub fn merge(&mut self, mut other: Notifications) {
        self.close.append(&mut other.close);
        self.ref_writes.append(&mut other.ref_writes);
        self.rc_changes.append(&mut other.rc_changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_dup_reject() {
        let mut d = Datum::new(DataType::Integer, &CreateProps::refs(1, 1));
        assert!(d.add_listener(3));
        assert!(!d.add_listener(3));
        assert!(d.add_listener(4));
        assert_eq!(d.listeners, vec![3, 4]);
    }

    #[test]
    fn test_closed() {
        let mut d = Datum::new(DataType::Integer, &CreateProps::refs(1, 1));
        assert!(!d.is_closed());
        d.write_refcount = 0;
        assert!(d.is_closed());
    }

    #[test]
    fn test_notifications_merge() {
        let mut a = Notifications::default();
        assert!(a.is_empty());
        let mut b = Notifications::default();
        b.rc_changes.push((7, -1));
        b.close.push(CloseNote {
            id: 7,
            sub: None,
            ranks: vec![1],
        });
        a.merge(b);
        assert!(!a.is_empty());
        assert_eq!(a.rc_changes, vec![(7, -1)]);
        assert_eq!(a.close.len(), 1);
    }
}
