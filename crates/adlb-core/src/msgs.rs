//! Fixed-layout wire message bodies
//!
//! Every RPC body is a tightly packed little-endian struct with an
//! explicit size; variable parts (subscripts, payloads, symbols) are
//! appended after the fixed header. Encoding is by hand so the layout is
//! the contract, not an artifact of any serializer.

use crate::error::{DataError, DataResult};
use crate::vint;

// ── byte-level helpers ──

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_i64(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn get_i32(buf: &[u8], off: usize) -> DataResult<i32> {
    buf.get(off..off + 4)
        .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
        .ok_or(DataError::Invalid)
}

fn get_i64(buf: &[u8], off: usize) -> DataResult<i64> {
    buf.get(off..off + 8)
        .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
        .ok_or(DataError::Invalid)
}

fn get_u8(buf: &[u8], off: usize) -> DataResult<u8> {
    buf.get(off).copied().ok_or(DataError::Invalid)
}

fn get_rest(buf: &[u8], off: usize, len: usize) -> DataResult<Vec<u8>> {
    if buf.len() < off + len {
        return Err(DataError::Invalid);
    }
    Ok(buf[off..off + len].to_vec())
}

// ── PUT ──

/// PUT request header. When `has_inline` is set the payload follows the
/// header in the same message; otherwise the putter streams it after the
/// server answers with a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutHdr {
    pub work_type: i32,
    pub priority: i32,
    pub putter: i32,
    pub answer: i32,
    pub target: i32,
    pub length: i32,
    pub parallelism: i32,
    pub has_inline: u8,
}

impl PutHdr {
    pub const SIZE: usize = 29;

    pub fn encode(&self, inline: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + inline.len());
        put_i32(&mut out, self.work_type);
        put_i32(&mut out, self.priority);
        put_i32(&mut out, self.putter);
        put_i32(&mut out, self.answer);
        put_i32(&mut out, self.target);
        put_i32(&mut out, self.length);
        put_i32(&mut out, self.parallelism);
        out.push(self.has_inline);
        out.extend_from_slice(inline);
        out
    }

    /// Returns the header and the inline payload (empty when streamed).
    pub fn decode(buf: &[u8]) -> DataResult<(PutHdr, Vec<u8>)> {
        let hdr = PutHdr {
            work_type: get_i32(buf, 0)?,
            priority: get_i32(buf, 4)?,
            putter: get_i32(buf, 8)?,
            answer: get_i32(buf, 12)?,
            target: get_i32(buf, 16)?,
            length: get_i32(buf, 20)?,
            parallelism: get_i32(buf, 24)?,
            has_inline: get_u8(buf, 28)?,
        };
        let inline = if hdr.has_inline != 0 {
            get_rest(buf, Self::SIZE, hdr.length as usize)?
        } else {
            Vec::new()
        };
        Ok((hdr, inline))
    }
}

/// RESPONSE_PUT body: where the putter must stream the payload, or
/// nowhere (inline / error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutResponse {
    pub code: i32,
    /// Receiving rank for the payload: a matched worker (redirect path),
    /// the server itself (queued, streamed payload), or negative when no
    /// second leg is needed.
    pub dest: i32,
}

impl PutResponse {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_i32(&mut out, self.code);
        put_i32(&mut out, self.dest);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<PutResponse> {
        Ok(PutResponse {
            code: get_i32(buf, 0)?,
            dest: get_i32(buf, 4)?,
        })
    }
}

// ── GET ──

/// GET / IGET request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetRequest {
    pub work_type: i32,
}

impl GetRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4);
        put_i32(&mut out, self.work_type);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<GetRequest> {
        Ok(GetRequest {
            work_type: get_i32(buf, 0)?,
        })
    }
}

/// RESPONSE_GET body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetResponse {
    pub code: i32,
    pub length: i32,
    pub answer_rank: i32,
    pub work_type: i32,
    /// Rank that will send the payload (the server, or the putter on the
    /// redirect path).
    pub payload_source: i32,
    pub parallelism: i32,
}

impl GetResponse {
    pub const SIZE: usize = 24;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_i32(&mut out, self.code);
        put_i32(&mut out, self.length);
        put_i32(&mut out, self.answer_rank);
        put_i32(&mut out, self.work_type);
        put_i32(&mut out, self.payload_source);
        put_i32(&mut out, self.parallelism);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<GetResponse> {
        Ok(GetResponse {
            code: get_i32(buf, 0)?,
            length: get_i32(buf, 4)?,
            answer_rank: get_i32(buf, 8)?,
            work_type: get_i32(buf, 12)?,
            payload_source: get_i32(buf, 16)?,
            parallelism: get_i32(buf, 20)?,
        })
    }
}

// ── CREATE ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateHdr {
    pub id: i64,
    pub data_type: i32,
    /// Key/val types, meaningful only for containers and multisets.
    pub key_type: i32,
    pub val_type: i32,
    pub read_refcount: i32,
    pub write_refcount: i32,
    pub permanent: u8,
    pub symbol_len: i32,
}

impl CreateHdr {
    pub const SIZE: usize = 33;

    pub fn encode(&self, symbol: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + symbol.len());
        put_i64(&mut out, self.id);
        put_i32(&mut out, self.data_type);
        put_i32(&mut out, self.key_type);
        put_i32(&mut out, self.val_type);
        put_i32(&mut out, self.read_refcount);
        put_i32(&mut out, self.write_refcount);
        out.push(self.permanent);
        put_i32(&mut out, self.symbol_len);
        out.extend_from_slice(symbol);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<(CreateHdr, Vec<u8>)> {
        let hdr = CreateHdr {
            id: get_i64(buf, 0)?,
            data_type: get_i32(buf, 8)?,
            key_type: get_i32(buf, 12)?,
            val_type: get_i32(buf, 16)?,
            read_refcount: get_i32(buf, 20)?,
            write_refcount: get_i32(buf, 24)?,
            permanent: get_u8(buf, 28)?,
            symbol_len: get_i32(buf, 29)?,
        };
        let symbol = get_rest(buf, Self::SIZE, hdr.symbol_len as usize)?;
        Ok((hdr, symbol))
    }
}

/// Also the UNIQUE response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateResponse {
    pub code: i32,
    pub id: i64,
}

impl CreateResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        put_i32(&mut out, self.code);
        put_i64(&mut out, self.id);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<CreateResponse> {
        Ok(CreateResponse {
            code: get_i32(buf, 0)?,
            id: get_i64(buf, 4)?,
        })
    }
}

// ── STORE ──

/// STORE_HEADER body. A subscript follows under STORE_SUB when
/// `sub_len > 0`; the value bytes follow under STORE_PAYLOAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHdr {
    pub id: i64,
    pub data_type: i32,
    pub read_decr: i32,
    pub write_decr: i32,
    pub sub_len: i32,
}

impl StoreHdr {
    pub const SIZE: usize = 24;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_i64(&mut out, self.id);
        put_i32(&mut out, self.data_type);
        put_i32(&mut out, self.read_decr);
        put_i32(&mut out, self.write_decr);
        put_i32(&mut out, self.sub_len);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<StoreHdr> {
        Ok(StoreHdr {
            id: get_i64(buf, 0)?,
            data_type: get_i32(buf, 8)?,
            read_decr: get_i32(buf, 12)?,
            write_decr: get_i32(buf, 16)?,
            sub_len: get_i32(buf, 20)?,
        })
    }
}

// ── RETRIEVE ──

/// Refcount plan applied after a successful retrieve: optionally release
/// the caller's own references and acquire references on ids embedded in
/// the returned payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetrieveRc {
    pub decr_read: i32,
    pub decr_write: i32,
    pub incr_referand: i32,
}

/// RETRIEVE body: header plus subscript bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveHdr {
    pub id: i64,
    pub refc: RetrieveRc,
    pub sub_len: i32,
}

impl RetrieveHdr {
    pub const SIZE: usize = 24;

    pub fn encode(&self, sub: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + sub.len());
        put_i64(&mut out, self.id);
        put_i32(&mut out, self.refc.decr_read);
        put_i32(&mut out, self.refc.decr_write);
        put_i32(&mut out, self.refc.incr_referand);
        put_i32(&mut out, self.sub_len);
        out.extend_from_slice(sub);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<(RetrieveHdr, Vec<u8>)> {
        let hdr = RetrieveHdr {
            id: get_i64(buf, 0)?,
            refc: RetrieveRc {
                decr_read: get_i32(buf, 8)?,
                decr_write: get_i32(buf, 12)?,
                incr_referand: get_i32(buf, 16)?,
            },
            sub_len: get_i32(buf, 20)?,
        };
        let sub = get_rest(buf, Self::SIZE, hdr.sub_len as usize)?;
        Ok((hdr, sub))
    }
}

/// Retrieve/enumerate-style response: status header plus appended bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveResponse {
    pub code: i32,
    pub data_type: i32,
    pub length: i32,
}

impl RetrieveResponse {
    pub const SIZE: usize = 12;

    pub fn encode(&self, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + value.len());
        put_i32(&mut out, self.code);
        put_i32(&mut out, self.data_type);
        put_i32(&mut out, self.length);
        out.extend_from_slice(value);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<(RetrieveResponse, Vec<u8>)> {
        let hdr = RetrieveResponse {
            code: get_i32(buf, 0)?,
            data_type: get_i32(buf, 4)?,
            length: get_i32(buf, 8)?,
        };
        let value = if hdr.code == crate::error::code::SUCCESS {
            get_rest(buf, Self::SIZE, hdr.length as usize)?
        } else {
            Vec::new()
        };
        Ok((hdr, value))
    }
}

// ── ENUMERATE ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumerateHdr {
    pub id: i64,
    /// Number of entries requested; -1 means "to the end".
    pub count: i32,
    pub offset: i32,
    pub include_keys: u8,
    pub include_vals: u8,
}

impl EnumerateHdr {
    pub const SIZE: usize = 18;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_i64(&mut out, self.id);
        put_i32(&mut out, self.count);
        put_i32(&mut out, self.offset);
        out.push(self.include_keys);
        out.push(self.include_vals);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<EnumerateHdr> {
        Ok(EnumerateHdr {
            id: get_i64(buf, 0)?,
            count: get_i32(buf, 8)?,
            offset: get_i32(buf, 12)?,
            include_keys: get_u8(buf, 16)?,
            include_vals: get_u8(buf, 17)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumerateResponse {
    pub code: i32,
    pub records: i32,
    pub length: i32,
}

impl EnumerateResponse {
    pub const SIZE: usize = 12;

    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + data.len());
        put_i32(&mut out, self.code);
        put_i32(&mut out, self.records);
        put_i32(&mut out, self.length);
        out.extend_from_slice(data);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<(EnumerateResponse, Vec<u8>)> {
        let hdr = EnumerateResponse {
            code: get_i32(buf, 0)?,
            records: get_i32(buf, 4)?,
            length: get_i32(buf, 8)?,
        };
        let data = if hdr.code == crate::error::code::SUCCESS {
            get_rest(buf, Self::SIZE, hdr.length as usize)?
        } else {
            Vec::new()
        };
        Ok((hdr, data))
    }
}

// ── SUBSCRIBE / INSERT_ATOMIC / CONTAINER_REFERENCE ──

/// SUBSCRIBE and INSERT_ATOMIC share this id + subscript body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptHdr {
    pub id: i64,
    pub sub_len: i32,
}

impl SubscriptHdr {
    pub const SIZE: usize = 12;

    pub fn encode(&self, sub: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + sub.len());
        put_i64(&mut out, self.id);
        put_i32(&mut out, self.sub_len);
        out.extend_from_slice(sub);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<(SubscriptHdr, Vec<u8>)> {
        let hdr = SubscriptHdr {
            id: get_i64(buf, 0)?,
            sub_len: get_i32(buf, 8)?,
        };
        let sub = get_rest(buf, Self::SIZE, hdr.sub_len as usize)?;
        Ok((hdr, sub))
    }
}

/// SUBSCRIBE response: `subscribed == 0` means the datum is already
/// closed and no notification will come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeResponse {
    pub code: i32,
    pub subscribed: u8,
}

impl SubscribeResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5);
        put_i32(&mut out, self.code);
        out.push(self.subscribed);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<SubscribeResponse> {
        Ok(SubscribeResponse {
            code: get_i32(buf, 0)?,
            subscribed: get_u8(buf, 4)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertAtomicResponse {
    pub code: i32,
    pub created: u8,
    pub value_present: u8,
}

impl InsertAtomicResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6);
        put_i32(&mut out, self.code);
        out.push(self.created);
        out.push(self.value_present);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<InsertAtomicResponse> {
        Ok(InsertAtomicResponse {
            code: get_i32(buf, 0)?,
            created: get_u8(buf, 4)?,
            value_present: get_u8(buf, 5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRefHdr {
    pub container_id: i64,
    pub ref_id: i64,
    pub ref_type: i32,
    pub sub_len: i32,
}

impl ContainerRefHdr {
    pub const SIZE: usize = 24;

    pub fn encode(&self, sub: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + sub.len());
        put_i64(&mut out, self.container_id);
        put_i64(&mut out, self.ref_id);
        put_i32(&mut out, self.ref_type);
        put_i32(&mut out, self.sub_len);
        out.extend_from_slice(sub);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<(ContainerRefHdr, Vec<u8>)> {
        let hdr = ContainerRefHdr {
            container_id: get_i64(buf, 0)?,
            ref_id: get_i64(buf, 8)?,
            ref_type: get_i32(buf, 16)?,
            sub_len: get_i32(buf, 20)?,
        };
        let sub = get_rest(buf, Self::SIZE, hdr.sub_len as usize)?;
        Ok((hdr, sub))
    }
}

// ── REFCOUNT ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefcountHdr {
    pub id: i64,
    pub read_incr: i32,
    pub write_incr: i32,
    /// When set, also release referand refcounts if this change destroys
    /// the datum (and only then).
    pub scavenge: u8,
}

impl RefcountHdr {
    pub const SIZE: usize = 17;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_i64(&mut out, self.id);
        put_i32(&mut out, self.read_incr);
        put_i32(&mut out, self.write_incr);
        out.push(self.scavenge);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<RefcountHdr> {
        Ok(RefcountHdr {
            id: get_i64(buf, 0)?,
            read_incr: get_i32(buf, 8)?,
            write_incr: get_i32(buf, 12)?,
            scavenge: get_u8(buf, 16)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefcountResponse {
    pub code: i32,
    pub scavenged: i32,
}

impl RefcountResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        put_i32(&mut out, self.code);
        put_i32(&mut out, self.scavenged);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<RefcountResponse> {
        Ok(RefcountResponse {
            code: get_i32(buf, 0)?,
            scavenged: get_i32(buf, 4)?,
        })
    }
}

// ── simple id queries ──

/// TYPEOF, CONTAINER_TYPEOF, CONTAINER_SIZE, LOCK, UNLOCK body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRequest {
    pub id: i64,
}

impl IdRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        put_i64(&mut out, self.id);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<IdRequest> {
        Ok(IdRequest { id: get_i64(buf, 0)? })
    }
}

/// TYPEOF and CONTAINER_TYPEOF response; `val_type` is unused for plain
/// TYPEOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeofResponse {
    pub code: i32,
    pub key_or_data_type: i32,
    pub val_type: i32,
}

impl TypeofResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        put_i32(&mut out, self.code);
        put_i32(&mut out, self.key_or_data_type);
        put_i32(&mut out, self.val_type);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<TypeofResponse> {
        Ok(TypeofResponse {
            code: get_i32(buf, 0)?,
            key_or_data_type: get_i32(buf, 4)?,
            val_type: get_i32(buf, 8)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeResponse {
    pub code: i32,
    pub size: i64,
}

impl SizeResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        put_i32(&mut out, self.code);
        put_i64(&mut out, self.size);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<SizeResponse> {
        Ok(SizeResponse {
            code: get_i32(buf, 0)?,
            size: get_i64(buf, 4)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockResponse {
    pub code: i32,
    pub acquired: u8,
}

impl LockResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5);
        put_i32(&mut out, self.code);
        out.push(self.acquired);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<LockResponse> {
        Ok(LockResponse {
            code: get_i32(buf, 0)?,
            acquired: get_u8(buf, 4)?,
        })
    }
}

// ── SYNC ──

pub const SYNC_MODE_REQUEST: i32 = 0;
pub const SYNC_MODE_STEAL: i32 = 1;

/// SYNC_REQUEST body. For STEAL mode it carries the stealer's per-type
/// queued-work counts and a payload byte budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncHdr {
    pub mode: i32,
    pub budget: i64,
    pub counts: Vec<i64>,
}

impl SyncHdr {
    pub fn request() -> Self {
        SyncHdr {
            mode: SYNC_MODE_REQUEST,
            budget: 0,
            counts: Vec::new(),
        }
    }

    pub fn steal(counts: Vec<i64>, budget: i64) -> Self {
        SyncHdr {
            mode: SYNC_MODE_STEAL,
            budget,
            counts,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 8 * self.counts.len());
        put_i32(&mut out, self.mode);
        put_i64(&mut out, self.budget);
        put_i32(&mut out, self.counts.len() as i32);
        for c in &self.counts {
            put_i64(&mut out, *c);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<SyncHdr> {
        let mode = get_i32(buf, 0)?;
        let budget = get_i64(buf, 4)?;
        let n = get_i32(buf, 12)? as usize;
        let mut counts = Vec::with_capacity(n);
        for i in 0..n {
            counts.push(get_i64(buf, 16 + 8 * i)?);
        }
        Ok(SyncHdr { mode, budget, counts })
    }
}

// ── STEAL batches ──

/// Header of one WORKUNIT batch message during a steal; the encoded work
/// units follow back-to-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealBatchHdr {
    pub count: i32,
    pub last: u8,
}

impl StealBatchHdr {
    pub const SIZE: usize = 5;

    pub fn encode(&self, units: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + units.len());
        put_i32(&mut out, self.count);
        out.push(self.last);
        out.extend_from_slice(units);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<(StealBatchHdr, &[u8])> {
        let hdr = StealBatchHdr {
            count: get_i32(buf, 0)?,
            last: get_u8(buf, 4)?,
        };
        Ok((hdr, &buf[Self::SIZE..]))
    }
}

// ── misc ──

/// FAIL body, forwarded to the master server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailMsg {
    pub code: i32,
}

impl FailMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4);
        put_i32(&mut out, self.code);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<FailMsg> {
        Ok(FailMsg { code: get_i32(buf, 0)? })
    }
}

/// CHECK_IDLE vote. Besides the local idle bit it carries the server's
/// lifetime unit counters; the master only shuts the cluster down when
/// every server is idle AND the cluster-wide sums balance, which rules
/// out units still in flight between servers (steal batches,
/// notifications).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleVote {
    pub idle: u8,
    /// Units this server has accepted (first acceptance only; stolen
    /// arrivals are not re-counted).
    pub accepted: i64,
    /// Units this server has handed to workers.
    pub delivered: i64,
}

impl IdleVote {
    pub const SIZE: usize = 17;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(self.idle);
        put_i64(&mut out, self.accepted);
        put_i64(&mut out, self.delivered);
        out
    }

    pub fn decode(buf: &[u8]) -> DataResult<IdleVote> {
        Ok(IdleVote {
            idle: get_u8(buf, 0)?,
            accepted: get_i64(buf, 1)?,
            delivered: get_i64(buf, 9)?,
        })
    }
}

/// Rank list sent to each member of a parallel task team, after the
/// RESPONSE_GET header.
pub fn encode_rank_list(ranks: &[i32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 * ranks.len());
    for r in ranks {
        put_i32(&mut out, *r);
    }
    out
}

pub fn decode_rank_list(buf: &[u8], n: usize) -> DataResult<Vec<i32>> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(get_i32(buf, 4 * i)?);
    }
    Ok(out)
}

/// Varint-framed key/value entry appended to an ENUMERATE response; both
/// parts are omissible.
pub fn encode_enum_entry(key: Option<&[u8]>, val: Option<&[u8]>, out: &mut Vec<u8>) {
    if let Some(k) = key {
        vint::encode_u64(k.len() as u64, out);
        out.extend_from_slice(k);
    }
    if let Some(v) = val {
        vint::encode_u64(v.len() as u64, out);
        out.extend_from_slice(v);
    }
}
