//! Data store
//!
//! Id -> datum mapping with subscripts, split refcounts, closure
//! listeners, container subscriptions and advisory locks. Every method
//! runs to completion on the owning server's single thread; there is no
//! interior locking because there is no interior parallelism.
//!
//! Operations that change lifecycle state return a [`Notifications`]
//! bundle the server must drain afterwards (close events, reference
//! writes, routed refcount deltas). The store itself never talks to the
//! transport.

pub mod datum;

pub use datum::{CloseNote, CreateProps, Datum, Notifications, RefWrite};

use std::collections::HashMap;

use adlb_core::constants::NULL_ID;
use adlb_core::error::{DataError, DataResult};
use adlb_core::msgs::RetrieveRc;
use adlb_core::rank::Layout;
use adlb_core::value::{
    packed_refs, parse_subscript_index, ContainerVal, DataType, MultisetVal, Value,
};
use adlb_core::{adlb_trace, msgs};

/// Listener ranks and bound references waiting on one `(id, sub)` slot.
/// Cleared atomically when the insert occurs.
#[derive(Debug, Default, Clone)]
struct SubBucket {
    listeners: Vec<i32>,
    refs: Vec<(i64, DataType)>,
    /// The bucket holds one read refcount on the container, released
    /// when the bucket is cleared. Set when the bucket was created by a
    /// container-reference call (the caller's refcount transfers here).
    holds_ref: bool,
}

/// The id -> datum store owned by one server.
pub struct DataStore {
    layout: Layout,
    data: HashMap<i64, Datum>,
    sub_index: HashMap<(i64, Vec<u8>), SubBucket>,
    locks: HashMap<i64, i32>,
    next_id: i64,
}

impl DataStore {
    pub fn new(layout: Layout, server_rank: i32) -> DataStore {
        DataStore {
            layout,
            data: HashMap::new(),
            sub_index: HashMap::new(),
            locks: HashMap::new(),
            next_id: layout.server_index(server_rank) as i64,
        }
    }

    /// Number of resident datums.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Resident datums, for leak reporting at finalize.
    pub fn datums(&self) -> impl Iterator<Item = (i64, &Datum)> {
        self.data.iter().map(|(id, d)| (*id, d))
    }

    /// Allocate a fresh id from this server's strictly-increasing
    /// sequence (step = number of servers). Never yields `NULL_ID`.
    fn alloc_id(&mut self) -> DataResult<i64> {
        let step = self.layout.servers() as i64;
        loop {
            if self.next_id > i64::MAX - step - 1 {
                return Err(DataError::Limit);
            }
            let id = self.next_id;
            self.next_id += step;
            if id != NULL_ID {
                return Ok(id);
            }
        }
    }

    /// Create a datum. `id_hint == NULL_ID` allocates a fresh id.
    /// `key_type`/`val_type` are consulted only for containers and
    /// multisets (a multiset's element type rides in `val_type`).
    ///
    /// A create whose props carry no references at all is a no-op.
    pub fn create(
        &mut self,
        id_hint: i64,
        data_type: DataType,
        key_type: DataType,
        val_type: DataType,
        props: &CreateProps,
    ) -> DataResult<i64> {
        if props.read_refcount == 0 && props.write_refcount == 0 {
            return Ok(id_hint);
        }
        if props.read_refcount < 0 || props.write_refcount < 0 {
            return Err(DataError::RefcountNegative);
        }
        let id = if id_hint == NULL_ID {
            self.alloc_id()?
        } else {
            id_hint
        };
        if self.data.contains_key(&id) {
            return Err(DataError::DoubleDeclare);
        }
        let mut d = Datum::new(data_type, props);
        match data_type {
            DataType::Container => {
                d.value = Some(Value::Container(ContainerVal::new(key_type, val_type)));
            }
            DataType::Multiset => {
                d.value = Some(Value::Multiset(MultisetVal::new(val_type)));
            }
            _ => {}
        }
        adlb_trace!("create: id={} type={:?}", id, data_type);
        self.data.insert(id, d);
        Ok(id)
    }

    /// Fresh id without creating a datum.
    pub fn unique(&mut self) -> DataResult<i64> {
        self.alloc_id()
    }

    pub fn exists(&self, id: i64, sub: Option<&[u8]>) -> bool {
        match (self.data.get(&id), sub) {
            (Some(_), None) => true,
            (Some(d), Some(sub)) => match &d.value {
                Some(Value::Container(c)) => matches!(c.entries.get(sub), Some(Some(_))),
                _ => false,
            },
            (None, _) => false,
        }
    }

    pub fn type_of(&self, id: i64) -> DataResult<DataType> {
        self.data
            .get(&id)
            .map(|d| d.data_type)
            .ok_or(DataError::NotFound)
    }

    pub fn container_type_of(&self, id: i64) -> DataResult<(DataType, DataType)> {
        let d = self.data.get(&id).ok_or(DataError::NotFound)?;
        match &d.value {
            Some(Value::Container(c)) => Ok((c.key_type, c.val_type)),
            Some(Value::Multiset(m)) => Ok((m.elem_type, m.elem_type)),
            _ => Err(DataError::Type),
        }
    }

    /// Keys resident in a container (filled or reserved), elements in a
    /// multiset.
    pub fn container_size(&self, id: i64) -> DataResult<i64> {
        let d = self.data.get(&id).ok_or(DataError::NotFound)?;
        match &d.value {
            Some(Value::Container(c)) => Ok(c.len() as i64),
            Some(Value::Multiset(m)) => Ok(m.len() as i64),
            _ => Err(DataError::Type),
        }
    }

    /// Store a value, then apply the caller's refcount decrements
    /// atomically with the insertion.
    ///
    /// - No subscript, scalar datum: single assignment, `DoubleWrite` if
    ///   already set.
    /// - No subscript, multiset: append.
    /// - Subscript, container: key insert; filling a reservation is
    ///   legal, refilling a filled key is `DoubleWrite`. The insert
    ///   resolves the `(id, sub)` subscription bucket.
    pub fn store(
        &mut self,
        id: i64,
        sub: Option<&[u8]>,
        data_type: DataType,
        mut bytes: Vec<u8>,
        read_decr: i32,
        write_decr: i32,
    ) -> DataResult<Notifications> {
        let mut notifs = Notifications::default();
        let mut resolved_val_type: Option<DataType> = None;
        {
            let d = self.data.get_mut(&id).ok_or(DataError::NotFound)?;
            match sub {
                None => {
                    if d.data_type == DataType::Multiset {
                        let Some(Value::Multiset(m)) = &mut d.value else {
                            return Err(DataError::Invalid);
                        };
                        if data_type != m.elem_type {
                            return Err(DataError::Type);
                        }
                        m.elems.push(std::mem::take(&mut bytes));
                    } else {
                        if data_type != d.data_type {
                            return Err(DataError::Type);
                        }
                        if d.is_set() {
                            return Err(DataError::DoubleWrite);
                        }
                        d.value = Some(Value::unpack(data_type, &bytes)?);
                    }
                }
                Some(sub) => {
                    let Some(Value::Container(c)) = &mut d.value else {
                        return Err(DataError::Type);
                    };
                    if data_type != c.val_type {
                        return Err(DataError::Type);
                    }
                    match c.entries.get_mut(sub) {
                        Some(Some(_)) => return Err(DataError::DoubleWrite),
                        // reserved slot: fill it
                        Some(slot) => *slot = Some(bytes.clone()),
                        None => {
                            c.entries.insert(sub.to_vec(), Some(bytes.clone()));
                        }
                    }
                    resolved_val_type = Some(c.val_type);
                }
            }
        }

        // Subscript insert: clear the subscription bucket atomically.
        if let (Some(val_type), Some(sub)) = (resolved_val_type, sub) {
            if let Some(bucket) = self.sub_index.remove(&(id, sub.to_vec())) {
                if !bucket.listeners.is_empty() {
                    notifs.close.push(CloseNote {
                        id,
                        sub: Some(sub.to_vec()),
                        ranks: bucket.listeners,
                    });
                }
                let nrefs = bucket.refs.len() as i32;
                if nrefs > 0 {
                    for rid in packed_refs(val_type, &bytes) {
                        notifs.rc_changes.push((rid, nrefs));
                    }
                    for (ref_id, ref_type) in bucket.refs {
                        notifs.ref_writes.push(RefWrite {
                            ref_id,
                            value_type: ref_type,
                            value: bytes.clone(),
                        });
                    }
                }
                if bucket.holds_ref {
                    notifs.rc_changes.push((id, -1));
                }
            }
        }

        if read_decr != 0 || write_decr != 0 {
            self.apply_refcount(id, -read_decr, -write_decr, false, &mut notifs)?;
        }
        Ok(notifs)
    }

    /// Read a value, then apply the retrieval refcount plan: referand
    /// increments first (so nothing the caller now holds a pointer into
    /// can be freed), then the caller's own decrements.
    pub fn retrieve(
        &mut self,
        id: i64,
        sub: Option<&[u8]>,
        refc: RetrieveRc,
    ) -> DataResult<(DataType, Vec<u8>, Notifications)> {
        let mut notifs = Notifications::default();
        let (t, bytes) = {
            let d = self.data.get(&id).ok_or(DataError::NotFound)?;
            match sub {
                None => {
                    let v = d.value.as_ref().ok_or(DataError::Unset)?;
                    (d.data_type, v.pack())
                }
                Some(sub) => match &d.value {
                    Some(Value::Container(c)) => match c.entries.get(sub) {
                        Some(Some(v)) => (c.val_type, v.clone()),
                        _ => return Err(DataError::SubscriptNotFound),
                    },
                    Some(Value::Struct(s)) => {
                        let idx = parse_subscript_index(sub)?;
                        let f = s.field(idx)?;
                        (f.field_type, f.data.clone())
                    }
                    Some(_) => return Err(DataError::Type),
                    None => return Err(DataError::Unset),
                },
            }
        };
        if refc.incr_referand != 0 {
            for rid in packed_refs(t, &bytes) {
                notifs.rc_changes.push((rid, refc.incr_referand));
            }
        }
        if refc.decr_read != 0 || refc.decr_write != 0 {
            self.apply_refcount(id, -refc.decr_read, -refc.decr_write, false, &mut notifs)?;
        }
        Ok((t, bytes, notifs))
    }

    /// Pack a contiguous slice `[offset, offset+count)` of a container or
    /// multiset. `count == -1` means to the end. Reserved container slots
    /// appear as zero-length values.
    pub fn enumerate(
        &self,
        id: i64,
        offset: i32,
        count: i32,
        include_keys: bool,
        include_vals: bool,
    ) -> DataResult<(i32, Vec<u8>)> {
        let d = self.data.get(&id).ok_or(DataError::NotFound)?;
        let take = if count < 0 { usize::MAX } else { count as usize };
        let mut out = Vec::new();
        let mut records = 0i32;
        match &d.value {
            Some(Value::Container(c)) => {
                for (k, v) in c.entries.iter().skip(offset.max(0) as usize).take(take) {
                    msgs::encode_enum_entry(
                        include_keys.then_some(k.as_slice()),
                        include_vals.then(|| v.as_deref().unwrap_or(&[])),
                        &mut out,
                    );
                    records += 1;
                }
            }
            Some(Value::Multiset(m)) => {
                for e in m.elems.iter().skip(offset.max(0) as usize).take(take) {
                    msgs::encode_enum_entry(None, include_vals.then_some(e.as_slice()), &mut out);
                    records += 1;
                }
            }
            Some(_) => return Err(DataError::Type),
            None => return Err(DataError::Unset),
        }
        Ok((records, out))
    }

    /// Register `rank` for a closure notification (no subscript) or a
    /// subscript-insertion notification. `Ok(false)` means the event
    /// already happened and nothing will fire.
    pub fn subscribe(&mut self, id: i64, sub: Option<&[u8]>, rank: i32) -> DataResult<bool> {
        let d = self.data.get_mut(&id).ok_or(DataError::NotFound)?;
        if d.read_refcount <= 0 && !d.permanent {
            return Err(DataError::Invalid);
        }
        match sub {
            None => {
                if d.is_closed() {
                    return Ok(false);
                }
                d.add_listener(rank);
                Ok(true)
            }
            Some(sub) => {
                let Some(Value::Container(c)) = &d.value else {
                    return Err(DataError::Type);
                };
                if matches!(c.entries.get(sub), Some(Some(_))) {
                    return Ok(false);
                }
                let bucket = self.sub_index.entry((id, sub.to_vec())).or_default();
                if !bucket.listeners.contains(&rank) {
                    bucket.listeners.push(rank);
                }
                Ok(true)
            }
        }
    }

    /// Bind a promise: when `container[sub]` is filled, the inserted
    /// value is stored into `ref_id`. Consumes one read refcount on the
    /// container unless this call created the subscription bucket, in
    /// which case the caller's refcount transfers to the bucket and is
    /// released when the bucket clears.
    pub fn container_reference(
        &mut self,
        container_id: i64,
        sub: &[u8],
        ref_id: i64,
        ref_type: DataType,
    ) -> DataResult<Notifications> {
        let mut notifs = Notifications::default();
        let d = self.data.get(&container_id).ok_or(DataError::NotFound)?;
        if d.read_refcount <= 0 && !d.permanent {
            return Err(DataError::Invalid);
        }
        let Some(Value::Container(c)) = &d.value else {
            return Err(DataError::Type);
        };
        match c.entries.get(sub) {
            Some(Some(v)) => {
                // Already filled: resolve on the spot.
                let v = v.clone();
                for rid in packed_refs(c.val_type, &v) {
                    notifs.rc_changes.push((rid, 1));
                }
                notifs.ref_writes.push(RefWrite {
                    ref_id,
                    value_type: ref_type,
                    value: v,
                });
                notifs.rc_changes.push((container_id, -1));
            }
            _ => {
                use std::collections::hash_map::Entry;
                match self.sub_index.entry((container_id, sub.to_vec())) {
                    Entry::Occupied(mut e) => {
                        e.get_mut().refs.push((ref_id, ref_type));
                        notifs.rc_changes.push((container_id, -1));
                    }
                    Entry::Vacant(e) => {
                        e.insert(SubBucket {
                            listeners: Vec::new(),
                            refs: vec![(ref_id, ref_type)],
                            holds_ref: true,
                        });
                    }
                }
            }
        }
        Ok(notifs)
    }

    /// Reserve `container[sub]` with a null marker. Returns
    /// `(created, value_present)`.
    pub fn insert_atomic(&mut self, id: i64, sub: &[u8]) -> DataResult<(bool, bool)> {
        let d = self.data.get_mut(&id).ok_or(DataError::NotFound)?;
        let Some(Value::Container(c)) = &mut d.value else {
            return Err(DataError::Type);
        };
        match c.entries.get(sub) {
            Some(Some(_)) => Ok((false, true)),
            Some(None) => Ok((false, false)),
            None => {
                c.entries.insert(sub.to_vec(), None);
                Ok((true, false))
            }
        }
    }

    /// The only way refcounts change after creation.
    ///
    /// Returns the number of referand references released by a
    /// destruction (the scavenge count).
    pub fn refcount_incr(
        &mut self,
        id: i64,
        read_incr: i32,
        write_incr: i32,
        scavenge: bool,
    ) -> DataResult<(i32, Notifications)> {
        let mut notifs = Notifications::default();
        let scavenged = self.apply_refcount(id, read_incr, write_incr, scavenge, &mut notifs)?;
        Ok((scavenged, notifs))
    }

    fn apply_refcount(
        &mut self,
        id: i64,
        read_incr: i32,
        write_incr: i32,
        scavenge: bool,
        notifs: &mut Notifications,
    ) -> DataResult<i32> {
        let d = self.data.get_mut(&id).ok_or(DataError::NotFound)?;
        let eff_read = if d.permanent { 0 } else { read_incr };
        let new_read = d.read_refcount + eff_read;
        let new_write = d.write_refcount + write_incr;
        let would_destroy = !d.permanent && new_read <= 0 && new_write <= 0;

        // A scavenging caller intends to take over the referand counts;
        // if the datum survives, someone else may free it first, so the
        // whole change is abandoned.
        if scavenge && !would_destroy {
            return Ok(0);
        }
        if new_read < 0 || new_write < 0 {
            return Err(DataError::RefcountNegative);
        }

        let was_open = d.write_refcount > 0;
        d.read_refcount = new_read;
        d.write_refcount = new_write;
        if was_open && d.write_refcount == 0 && !d.listeners.is_empty() {
            notifs.close.push(CloseNote {
                id,
                sub: None,
                ranks: std::mem::take(&mut d.listeners),
            });
        }

        let mut scavenged = 0;
        if would_destroy {
            let d = self.data.remove(&id).unwrap();
            self.locks.remove(&id);
            self.sub_index.retain(|(bid, _), _| *bid != id);
            if let Some(v) = d.value {
                for rid in v.embedded_refs() {
                    notifs.rc_changes.push((rid, -1));
                    scavenged += 1;
                }
            }
            adlb_trace!("destroy: id={}", id);
        }
        Ok(scavenged)
    }

    /// Advisory lock for `rank`. Returns whether acquired.
    pub fn lock(&mut self, id: i64, rank: i32) -> DataResult<bool> {
        if !self.data.contains_key(&id) {
            return Err(DataError::NotFound);
        }
        match self.locks.get(&id) {
            Some(holder) => Ok(*holder == rank),
            None => {
                self.locks.insert(id, rank);
                Ok(true)
            }
        }
    }

    pub fn unlock(&mut self, id: i64, rank: i32) -> DataResult<()> {
        match self.locks.get(&id) {
            Some(holder) if *holder == rank => {
                self.locks.remove(&id);
                Ok(())
            }
            Some(_) => Err(DataError::Invalid),
            None => Err(DataError::NotFound),
        }
    }
}
