//! RPC dispatcher
//!
//! Tag -> handler table for the probe-driven server loop. Data-layer
//! errors are converted to structured response codes at this boundary;
//! only transport and protocol failures unwind further.

use adlb_core::error::{code, AdlbResult, DataError};
use adlb_core::msgs::{
    ContainerRefHdr, CreateHdr, CreateResponse, EnumerateHdr, EnumerateResponse, IdRequest,
    IdleVote, InsertAtomicResponse, LockResponse, RefcountHdr, RefcountResponse, RetrieveHdr,
    RetrieveResponse, SizeResponse, StoreHdr, SubscribeResponse, SubscriptHdr, TypeofResponse,
};
use adlb_core::tag::Tag;
use adlb_core::value::DataType;
use adlb_core::{adlb_trace, adlb_warn};
use adlb_comm::{Comm, Envelope};

use crate::server::Server;
use crate::store::CreateProps;

/// Wire code for a data-layer outcome. Double assignments and allocation
/// failures surface as the recoverable `Rejected`; everything else keeps
/// its specific kind.
fn data_code(e: DataError) -> i32 {
    match e {
        DataError::Oom | DataError::DoubleDeclare | DataError::DoubleWrite => code::REJECTED,
        other => other.wire_code(),
    }
}

fn result_code<T>(r: &Result<T, DataError>) -> i32 {
    match r {
        Ok(_) => code::SUCCESS,
        Err(e) => data_code(*e),
    }
}

impl<C: Comm> Server<C> {
    pub(crate) fn dispatch(&mut self, env: Envelope) -> AdlbResult<()> {
        adlb_trace!("dispatch: {:?} from {}", env.tag, env.src);
        match env.tag {
            Tag::Put => self.handle_put(env.src, &env.bytes),
            Tag::Get => self.handle_get(env.src, &env.bytes, true),
            Tag::Iget => self.handle_get(env.src, &env.bytes, false),
            Tag::Create => self.handle_create(env.src, &env.bytes),
            Tag::StoreHeader => self.handle_store(env.src, &env.bytes),
            Tag::Retrieve => self.handle_retrieve(env.src, &env.bytes),
            Tag::Enumerate => self.handle_enumerate(env.src, &env.bytes),
            Tag::Subscribe => self.handle_subscribe(env.src, &env.bytes),
            Tag::RefcountIncr => self.handle_refcount(env.src, &env.bytes),
            Tag::InsertAtomic => self.handle_insert_atomic(env.src, &env.bytes),
            Tag::Unique => self.handle_unique(env.src),
            Tag::Typeof => self.handle_typeof(env.src, &env.bytes),
            Tag::ContainerTypeof => self.handle_container_typeof(env.src, &env.bytes),
            Tag::ContainerReference => self.handle_container_reference(env.src, &env.bytes),
            Tag::ContainerSize => self.handle_container_size(env.src, &env.bytes),
            Tag::Lock => self.handle_lock(env.src, &env.bytes),
            Tag::Unlock => self.handle_unlock(env.src, &env.bytes),
            Tag::SyncRequest => self.handle_sync_request(env.src, &env.bytes),
            Tag::CheckIdle => self.handle_check_idle(env.src, &env.bytes),
            Tag::ShutdownWorker => {
                self.handle_shutdown_worker(env.src);
                Ok(())
            }
            Tag::ShutdownServer => self.shutdown_self(),
            Tag::Fail => self.handle_fail(&env.bytes),
            other => {
                adlb_warn!("unexpected tag {:?} from {}", other, env.src);
                Ok(())
            }
        }
    }

    fn send_code(&mut self, dst: i32, c: i32) -> AdlbResult<()> {
        self.comm.send(dst, Tag::Response, &c.to_le_bytes())
    }

    // ── data-store handlers ──

    fn handle_create(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let (hdr, symbol) = CreateHdr::decode(bytes)?;
        let parsed = DataType::from_i32(hdr.data_type).and_then(|dt| {
            let (kt, vt) = if dt.is_compound() {
                (
                    DataType::from_i32(hdr.key_type)?,
                    DataType::from_i32(hdr.val_type)?,
                )
            } else {
                (DataType::Integer, DataType::Integer)
            };
            Ok((dt, kt, vt))
        });
        let res = parsed.and_then(|(dt, kt, vt)| {
            let props = CreateProps {
                read_refcount: hdr.read_refcount,
                write_refcount: hdr.write_refcount,
                permanent: hdr.permanent != 0,
                symbol: (!symbol.is_empty())
                    .then(|| String::from_utf8_lossy(&symbol).into_owned()),
            };
            self.store.create(hdr.id, dt, kt, vt, &props)
        });
        let resp = CreateResponse {
            code: result_code(&res),
            id: res.unwrap_or(0),
        };
        self.comm.send(src, Tag::Response, &resp.encode())
    }

    fn handle_store(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let hdr = StoreHdr::decode(bytes)?;
        let sub = if hdr.sub_len > 0 {
            Some(self.comm.recv(Some(src), Some(Tag::StoreSub))?.bytes)
        } else {
            None
        };
        let payload = self.comm.recv(Some(src), Some(Tag::StorePayload))?.bytes;

        let res = DataType::from_i32(hdr.data_type).and_then(|dt| {
            self.store.store(
                hdr.id,
                sub.as_deref(),
                dt,
                payload,
                hdr.read_decr,
                hdr.write_decr,
            )
        });
        self.send_code(src, result_code(&res))?;
        if let Ok(notifs) = res {
            self.process_notifications(notifs)?;
        }
        Ok(())
    }

    fn handle_retrieve(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let (hdr, sub) = RetrieveHdr::decode(bytes)?;
        let sub = (hdr.sub_len > 0).then_some(sub.as_slice());
        let res = self.store.retrieve(hdr.id, sub, hdr.refc);
        match res {
            Ok((t, value, notifs)) => {
                let resp = RetrieveResponse {
                    code: code::SUCCESS,
                    data_type: t.as_i32(),
                    length: value.len() as i32,
                };
                self.comm.send(src, Tag::Response, &resp.encode(&value))?;
                self.process_notifications(notifs)
            }
            Err(e) => {
                let resp = RetrieveResponse {
                    code: data_code(e),
                    data_type: 0,
                    length: 0,
                };
                self.comm.send(src, Tag::Response, &resp.encode(&[]))
            }
        }
    }

    fn handle_enumerate(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let hdr = EnumerateHdr::decode(bytes)?;
        let res = self.store.enumerate(
            hdr.id,
            hdr.offset,
            hdr.count,
            hdr.include_keys != 0,
            hdr.include_vals != 0,
        );
        match res {
            Ok((records, data)) => {
                let resp = EnumerateResponse {
                    code: code::SUCCESS,
                    records,
                    length: data.len() as i32,
                };
                self.comm.send(src, Tag::Response, &resp.encode(&data))
            }
            Err(e) => {
                let resp = EnumerateResponse {
                    code: data_code(e),
                    records: 0,
                    length: 0,
                };
                self.comm.send(src, Tag::Response, &resp.encode(&[]))
            }
        }
    }

    fn handle_subscribe(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let (hdr, sub) = SubscriptHdr::decode(bytes)?;
        let sub = (hdr.sub_len > 0).then_some(sub.as_slice());
        let res = self.store.subscribe(hdr.id, sub, src);
        let resp = SubscribeResponse {
            code: result_code(&res),
            subscribed: res.unwrap_or(false) as u8,
        };
        self.comm.send(src, Tag::Response, &resp.encode())
    }

    fn handle_refcount(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let hdr = RefcountHdr::decode(bytes)?;
        let res = self
            .store
            .refcount_incr(hdr.id, hdr.read_incr, hdr.write_incr, hdr.scavenge != 0);
        match res {
            Ok((scavenged, notifs)) => {
                let resp = RefcountResponse {
                    code: code::SUCCESS,
                    scavenged,
                };
                self.comm.send(src, Tag::Response, &resp.encode())?;
                self.process_notifications(notifs)
            }
            Err(e) => {
                let resp = RefcountResponse {
                    code: data_code(e),
                    scavenged: 0,
                };
                self.comm.send(src, Tag::Response, &resp.encode())
            }
        }
    }

    fn handle_insert_atomic(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let (hdr, sub) = SubscriptHdr::decode(bytes)?;
        let res = self.store.insert_atomic(hdr.id, &sub);
        let (created, present) = res.unwrap_or((false, false));
        let resp = InsertAtomicResponse {
            code: result_code(&res),
            created: created as u8,
            value_present: present as u8,
        };
        self.comm.send(src, Tag::Response, &resp.encode())
    }

    fn handle_unique(&mut self, src: i32) -> AdlbResult<()> {
        let res = self.store.unique();
        let resp = CreateResponse {
            code: result_code(&res),
            id: res.unwrap_or(0),
        };
        self.comm.send(src, Tag::Response, &resp.encode())
    }

    fn handle_typeof(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let req = IdRequest::decode(bytes)?;
        let res = self.store.type_of(req.id);
        let resp = TypeofResponse {
            code: result_code(&res),
            key_or_data_type: res.map(|t| t.as_i32()).unwrap_or(0),
            val_type: 0,
        };
        self.comm.send(src, Tag::Response, &resp.encode())
    }

    fn handle_container_typeof(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let req = IdRequest::decode(bytes)?;
        let res = self.store.container_type_of(req.id);
        let (kt, vt) = res
            .map(|(k, v)| (k.as_i32(), v.as_i32()))
            .unwrap_or((0, 0));
        let resp = TypeofResponse {
            code: result_code(&res),
            key_or_data_type: kt,
            val_type: vt,
        };
        self.comm.send(src, Tag::Response, &resp.encode())
    }

    fn handle_container_reference(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let (hdr, sub) = ContainerRefHdr::decode(bytes)?;
        let res = DataType::from_i32(hdr.ref_type).and_then(|rt| {
            self.store
                .container_reference(hdr.container_id, &sub, hdr.ref_id, rt)
        });
        self.send_code(src, result_code(&res))?;
        if let Ok(notifs) = res {
            self.process_notifications(notifs)?;
        }
        Ok(())
    }

    fn handle_container_size(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let req = IdRequest::decode(bytes)?;
        let res = self.store.container_size(req.id);
        let resp = SizeResponse {
            code: result_code(&res),
            size: res.unwrap_or(0),
        };
        self.comm.send(src, Tag::Response, &resp.encode())
    }

    fn handle_lock(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let req = IdRequest::decode(bytes)?;
        let res = self.store.lock(req.id, src);
        let resp = LockResponse {
            code: result_code(&res),
            acquired: res.unwrap_or(false) as u8,
        };
        self.comm.send(src, Tag::Response, &resp.encode())
    }

    fn handle_unlock(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let req = IdRequest::decode(bytes)?;
        let res = self.store.unlock(req.id, src);
        self.send_code(src, result_code(&res))
    }

    // ── idle voting (CHECK_IDLE rides both directions) ──

    fn handle_check_idle(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        if bytes.is_empty() {
            // master's poll: answer with our vote
            let vote = IdleVote {
                idle: self.server_idle() as u8,
                accepted: self.accepted,
                delivered: self.delivered,
            };
            self.comm.send(src, Tag::CheckIdle, &vote.encode())
        } else {
            let vote = IdleVote::decode(bytes)?;
            self.record_idle_vote(src, vote.idle != 0, vote.accepted, vote.delivered);
            Ok(())
        }
    }
}
