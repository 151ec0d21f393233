//! Worker-facing client
//!
//! Thin RPC wrappers over the transport. Task operations talk to the
//! worker's home server; data operations are routed to each id's home
//! server. One RPC is outstanding at a time, which is what makes the
//! plain tag-selective receives unambiguous.

use adlb_core::constants::{NULL_ID, PUT_INLINE_MAX};
use adlb_core::error::{code, AdlbError, AdlbResult};
use adlb_core::msgs::{
    ContainerRefHdr, CreateHdr, CreateResponse, EnumerateHdr, EnumerateResponse, FailMsg,
    GetRequest, GetResponse, IdRequest, InsertAtomicResponse, LockResponse, PutHdr, PutResponse,
    RefcountHdr, RefcountResponse, RetrieveHdr, RetrieveRc, RetrieveResponse, SizeResponse,
    StoreHdr, SubscribeResponse, SubscriptHdr, TypeofResponse,
};
use adlb_core::rank::Layout;
use adlb_core::tag::Tag;
use adlb_core::value::DataType;
use adlb_core::{adlb_dbg, adlb_trace};
use adlb_comm::Comm;
use adlb_server::CreateProps;

/// A task delivered to this worker.
#[derive(Debug, Clone)]
pub struct Work {
    pub payload: Vec<u8>,
    pub work_type: i32,
    /// Rank to send the answer to (application convention).
    pub answer_rank: i32,
    pub parallelism: i32,
    /// Full team for a parallel task (includes this rank), empty
    /// otherwise. Communicator formation is up to the application.
    pub team: Vec<i32>,
}

/// One worker rank's handle on the cluster.
pub struct Client<C: Comm> {
    comm: C,
    layout: Layout,
    home: i32,
    shutdown: bool,
}

impl<C: Comm> Client<C> {
    pub fn new(comm: C, layout: Layout) -> Client<C> {
        let rank = comm.rank();
        assert!(layout.is_worker(rank), "rank {} is not a worker", rank);
        Client {
            home: layout.home_server_for_worker(rank),
            comm,
            layout,
            shutdown: false,
        }
    }

    #[inline]
    pub fn rank(&self) -> i32 {
        self.comm.rank()
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// True once the home server answered a GET with the shutdown code.
    #[inline]
    pub fn shutting_down(&self) -> bool {
        self.shutdown
    }

    fn guard(&self) -> AdlbResult<()> {
        if self.shutdown {
            Err(AdlbError::Shutdown)
        } else {
            Ok(())
        }
    }

    // ── task operations ──

    /// Submit a task. `target` is a worker rank or
    /// [`RANK_ANY`](adlb_core::workunit::RANK_ANY);
    /// `answer` travels with the task for the consumer to reply to;
    /// a `parallelism` above 1 asks for simultaneous delivery to that
    /// many workers.
    pub fn put(
        &mut self,
        payload: &[u8],
        work_type: i32,
        target: i32,
        answer: i32,
        priority: i32,
        parallelism: i32,
    ) -> AdlbResult<()> {
        self.guard()?;
        let inline = payload.len() <= PUT_INLINE_MAX;
        let hdr = PutHdr {
            work_type,
            priority,
            putter: self.rank(),
            answer,
            target,
            length: payload.len() as i32,
            parallelism,
            has_inline: inline as u8,
        };
        let body = hdr.encode(if inline { payload } else { &[] });
        self.comm.send(self.home, Tag::Put, &body)?;

        let env = self.comm.recv(Some(self.home), Some(Tag::ResponsePut))?;
        let resp = PutResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;

        if !inline {
            if resp.dest == self.home {
                // server buffers it
                self.comm.send(self.home, Tag::Workunit, payload)?;
            } else if resp.dest >= 0 {
                // redirect: stream straight to the matched worker
                adlb_trace!("put: redirect payload to {}", resp.dest);
                self.comm.ssend(resp.dest, Tag::Workunit, payload)?;
            }
        }
        Ok(())
    }

    /// Blocking fetch of one task of `work_type`. `Ok(None)` means the
    /// cluster shut down and no further RPCs may be issued.
    pub fn get(&mut self, work_type: i32) -> AdlbResult<Option<Work>> {
        self.guard()?;
        let req = GetRequest { work_type };
        self.comm.send(self.home, Tag::Get, &req.encode())?;
        self.finish_get()
    }

    /// Non-blocking variant: `Ok(None)` means nothing is queued right
    /// now. Shutdown surfaces as `Err(Shutdown)`.
    pub fn iget(&mut self, work_type: i32) -> AdlbResult<Option<Work>> {
        self.guard()?;
        let req = GetRequest { work_type };
        self.comm.send(self.home, Tag::Iget, &req.encode())?;
        match self.finish_get() {
            Ok(None) => Err(AdlbError::Shutdown),
            Err(AdlbError::Done) => Ok(None), // NOTHING
            other => other,
        }
    }

    fn finish_get(&mut self) -> AdlbResult<Option<Work>> {
        let env = self.comm.recv(Some(self.home), Some(Tag::ResponseGet))?;
        let resp = GetResponse::decode(&env.bytes)?;
        match resp.code {
            code::SUCCESS => {}
            code::SHUTDOWN => {
                adlb_dbg!("get: shutdown from server");
                self.shutdown = true;
                return Ok(None);
            }
            code::NOTHING => return Err(AdlbError::Done),
            c => return Err(AdlbError::check_code(c).unwrap_err()),
        }

        let team = if resp.parallelism > 1 {
            let list = self.comm.recv(Some(self.home), Some(Tag::Response))?;
            adlb_core::msgs::decode_rank_list(&list.bytes, resp.parallelism as usize)?
        } else {
            Vec::new()
        };

        let payload = self
            .comm
            .recv(Some(resp.payload_source), Some(Tag::Workunit))?
            .bytes;
        if payload.len() != resp.length as usize {
            return Err(AdlbError::Protocol("payload length mismatch"));
        }
        Ok(Some(Work {
            payload,
            work_type: resp.work_type,
            answer_rank: resp.answer_rank,
            parallelism: resp.parallelism,
            team,
        }))
    }

    // ── data operations ──

    fn data_home(&self, id: i64) -> i32 {
        self.layout.home_server_for_id(id)
    }

    /// Create a datum. Pass [`NULL_ID`] (0) to let the home
    /// server allocate a fresh id; in that case the call is routed to
    /// this worker's home server and the allocated id returned.
    pub fn create(
        &mut self,
        id: i64,
        data_type: DataType,
        key_type: DataType,
        val_type: DataType,
        props: &CreateProps,
    ) -> AdlbResult<i64> {
        self.guard()?;
        let server = if id == NULL_ID {
            self.home
        } else {
            self.data_home(id)
        };
        let symbol = props.symbol.clone().unwrap_or_default().into_bytes();
        let hdr = CreateHdr {
            id,
            data_type: data_type.as_i32(),
            key_type: key_type.as_i32(),
            val_type: val_type.as_i32(),
            read_refcount: props.read_refcount,
            write_refcount: props.write_refcount,
            permanent: props.permanent as u8,
            symbol_len: symbol.len() as i32,
        };
        self.comm.send(server, Tag::Create, &hdr.encode(&symbol))?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let resp = CreateResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok(resp.id)
    }

    /// Scalar-create shorthand with plain refcounts.
    pub fn create_scalar(
        &mut self,
        id: i64,
        data_type: DataType,
        read: i32,
        write: i32,
    ) -> AdlbResult<i64> {
        self.create(
            id,
            data_type,
            DataType::Integer,
            DataType::Integer,
            &CreateProps::refs(read, write),
        )
    }

    pub fn store(
        &mut self,
        id: i64,
        sub: Option<&[u8]>,
        data_type: DataType,
        bytes: &[u8],
        read_decr: i32,
        write_decr: i32,
    ) -> AdlbResult<()> {
        self.guard()?;
        let server = self.data_home(id);
        let hdr = StoreHdr {
            id,
            data_type: data_type.as_i32(),
            read_decr,
            write_decr,
            sub_len: sub.map_or(0, <[u8]>::len) as i32,
        };
        self.comm.send(server, Tag::StoreHeader, &hdr.encode())?;
        if let Some(sub) = sub {
            self.comm.send(server, Tag::StoreSub, sub)?;
        }
        self.comm.send(server, Tag::StorePayload, bytes)?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let c = i32::from_le_bytes(
            env.bytes
                .get(0..4)
                .ok_or(AdlbError::Protocol("short store response"))?
                .try_into()
                .unwrap(),
        );
        AdlbError::check_code(c)
    }

    pub fn retrieve(
        &mut self,
        id: i64,
        sub: Option<&[u8]>,
        refc: RetrieveRc,
    ) -> AdlbResult<(DataType, Vec<u8>)> {
        self.guard()?;
        let server = self.data_home(id);
        let hdr = RetrieveHdr {
            id,
            refc,
            sub_len: sub.map_or(0, <[u8]>::len) as i32,
        };
        self.comm
            .send(server, Tag::Retrieve, &hdr.encode(sub.unwrap_or(&[])))?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let (resp, value) = RetrieveResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok((DataType::from_i32(resp.data_type)?, value))
    }

    /// Packed `[offset, offset+count)` slice of a container/multiset;
    /// `count == -1` reads to the end. Returns (records, packed bytes).
    pub fn enumerate(
        &mut self,
        id: i64,
        offset: i32,
        count: i32,
        include_keys: bool,
        include_vals: bool,
    ) -> AdlbResult<(i32, Vec<u8>)> {
        self.guard()?;
        let server = self.data_home(id);
        let hdr = EnumerateHdr {
            id,
            count,
            offset,
            include_keys: include_keys as u8,
            include_vals: include_vals as u8,
        };
        self.comm.send(server, Tag::Enumerate, &hdr.encode())?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let (resp, data) = EnumerateResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok((resp.records, data))
    }

    /// Register for the closure of `id` (no subscript) or the insertion
    /// at `(id, sub)`. `Ok(false)` means the event already happened.
    pub fn subscribe(&mut self, id: i64, sub: Option<&[u8]>) -> AdlbResult<bool> {
        self.guard()?;
        let server = self.data_home(id);
        let hdr = SubscriptHdr {
            id,
            sub_len: sub.map_or(0, <[u8]>::len) as i32,
        };
        self.comm
            .send(server, Tag::Subscribe, &hdr.encode(sub.unwrap_or(&[])))?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let resp = SubscribeResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok(resp.subscribed != 0)
    }

    /// The only way refcounts change after creation. Returns the number
    /// of referand references scavenged (only with `scavenge`).
    pub fn refcount_incr(
        &mut self,
        id: i64,
        read_incr: i32,
        write_incr: i32,
        scavenge: bool,
    ) -> AdlbResult<i32> {
        self.guard()?;
        let server = self.data_home(id);
        let hdr = RefcountHdr {
            id,
            read_incr,
            write_incr,
            scavenge: scavenge as u8,
        };
        self.comm.send(server, Tag::RefcountIncr, &hdr.encode())?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let resp = RefcountResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok(resp.scavenged)
    }

    /// Reserve `container[sub]`; returns `(created, value_present)`.
    pub fn insert_atomic(&mut self, id: i64, sub: &[u8]) -> AdlbResult<(bool, bool)> {
        self.guard()?;
        let server = self.data_home(id);
        let hdr = SubscriptHdr {
            id,
            sub_len: sub.len() as i32,
        };
        self.comm.send(server, Tag::InsertAtomic, &hdr.encode(sub))?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let resp = InsertAtomicResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok((resp.created != 0, resp.value_present != 0))
    }

    /// Bind a promise: when `container[sub]` is filled, store the value
    /// into `ref_id`.
    pub fn container_reference(
        &mut self,
        container_id: i64,
        sub: &[u8],
        ref_id: i64,
        ref_type: DataType,
    ) -> AdlbResult<()> {
        self.guard()?;
        let server = self.data_home(container_id);
        let hdr = ContainerRefHdr {
            container_id,
            ref_id,
            ref_type: ref_type.as_i32(),
            sub_len: sub.len() as i32,
        };
        self.comm
            .send(server, Tag::ContainerReference, &hdr.encode(sub))?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let c = i32::from_le_bytes(
            env.bytes
                .get(0..4)
                .ok_or(AdlbError::Protocol("short response"))?
                .try_into()
                .unwrap(),
        );
        AdlbError::check_code(c)
    }

    pub fn type_of(&mut self, id: i64) -> AdlbResult<DataType> {
        self.guard()?;
        let server = self.data_home(id);
        self.comm
            .send(server, Tag::Typeof, &IdRequest { id }.encode())?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let resp = TypeofResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok(DataType::from_i32(resp.key_or_data_type)?)
    }

    pub fn container_typeof(&mut self, id: i64) -> AdlbResult<(DataType, DataType)> {
        self.guard()?;
        let server = self.data_home(id);
        self.comm
            .send(server, Tag::ContainerTypeof, &IdRequest { id }.encode())?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let resp = TypeofResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok((
            DataType::from_i32(resp.key_or_data_type)?,
            DataType::from_i32(resp.val_type)?,
        ))
    }

    pub fn container_size(&mut self, id: i64) -> AdlbResult<i64> {
        self.guard()?;
        let server = self.data_home(id);
        self.comm
            .send(server, Tag::ContainerSize, &IdRequest { id }.encode())?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let resp = SizeResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok(resp.size)
    }

    /// Fresh id from this worker's home server, without creating a
    /// datum.
    pub fn unique(&mut self) -> AdlbResult<i64> {
        self.guard()?;
        self.comm.send(self.home, Tag::Unique, &[])?;
        let env = self.comm.recv(Some(self.home), Some(Tag::Response))?;
        let resp = CreateResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok(resp.id)
    }

    /// Advisory lock attempt; returns whether acquired.
    pub fn lock(&mut self, id: i64) -> AdlbResult<bool> {
        self.guard()?;
        let server = self.data_home(id);
        self.comm.send(server, Tag::Lock, &IdRequest { id }.encode())?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let resp = LockResponse::decode(&env.bytes)?;
        AdlbError::check_code(resp.code)?;
        Ok(resp.acquired != 0)
    }

    pub fn unlock(&mut self, id: i64) -> AdlbResult<()> {
        self.guard()?;
        let server = self.data_home(id);
        self.comm
            .send(server, Tag::Unlock, &IdRequest { id }.encode())?;
        let env = self.comm.recv(Some(server), Some(Tag::Response))?;
        let c = i32::from_le_bytes(
            env.bytes
                .get(0..4)
                .ok_or(AdlbError::Protocol("short response"))?
                .try_into()
                .unwrap(),
        );
        AdlbError::check_code(c)
    }

    /// Broadcast a non-recoverable failure; the master server exits
    /// non-zero at finalize.
    pub fn fail(&mut self, fail_code: i32) -> AdlbResult<()> {
        let msg = FailMsg { code: fail_code };
        self.comm
            .send(self.layout.master_server(), Tag::Fail, &msg.encode())
    }

    /// Tell the home server this worker is done. After a shutdown code
    /// was already received, no further RPC is issued.
    pub fn finalize(mut self) -> AdlbResult<()> {
        if !self.shutdown {
            self.comm.send(self.home, Tag::ShutdownWorker, &[])?;
            self.shutdown = true;
        }
        Ok(())
    }
}
