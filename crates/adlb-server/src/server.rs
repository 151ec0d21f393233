//! Server object and main loop
//!
//! One `Server` per server rank, owning every piece of state the rank
//! has: data store, coupled queues, sync/steal state, shutdown
//! bookkeeping. The loop is a probe-driven state machine over
//! {idle-polling, sync-initiating, sync-serving, shutting-down}; there
//! is no thread-per-peer, which is what keeps the sync protocol's
//! deadlock-freedom argument valid.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use adlb_core::constants::STEAL_BUDGET_DEFAULT;
use adlb_core::error::{code, AdlbError, AdlbResult};
use adlb_core::msgs::{GetRequest, GetResponse, PutHdr, PutResponse};
use adlb_core::rank::Layout;
use adlb_core::tag::Tag;
use adlb_core::workunit::{WorkUnit, RANK_ANY};
use adlb_core::{adlb_dbg, adlb_warn, env::env_get_bool, msgs};
use adlb_comm::Comm;

use crate::matcher::{GetOutcome, Matcher, PutOutcome};
use crate::store::DataStore;
use crate::sync::SyncState;

/// Tuning for one server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of work types the application registered (CONTROL is type
    /// 0 and always present).
    pub ntypes: usize,
    /// Byte budget offered per steal exchange.
    pub steal_budget: i64,
    /// Minimum gap between steal attempts from this server.
    pub steal_cooldown: Duration,
    /// Master's gap between idle polls.
    pub idle_poll: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            ntypes: 2,
            steal_budget: STEAL_BUDGET_DEFAULT,
            steal_cooldown: Duration::from_millis(20),
            idle_poll: Duration::from_millis(5),
        }
    }
}

/// Counters reported at finalize.
#[derive(Debug, Default, Clone)]
pub struct ServerStats {
    pub puts: u64,
    pub gets: u64,
    pub redirects: u64,
    pub steals_out: u64,
    pub steals_in: u64,
    pub units_stolen: u64,
    pub syncs: u64,
}

/// All state of one server rank.
pub struct Server<C: Comm> {
    pub(crate) comm: C,
    pub(crate) layout: Layout,
    pub(crate) rank: i32,
    pub(crate) config: ServerConfig,
    pub(crate) store: DataStore,
    pub(crate) matcher: Matcher,
    pub(crate) sync: SyncState,
    pub(crate) steal_rng: u64,
    pub(crate) last_steal: Instant,
    pub(crate) finalized_workers: HashSet<i32>,
    /// Master only: latest (idle, accepted, delivered) vote per peer.
    idle_votes: HashMap<i32, (bool, i64, i64)>,
    last_idle_poll: Instant,
    /// Units first accepted here (never re-counted on steal arrival).
    pub(crate) accepted: i64,
    /// Units handed to workers from here.
    pub(crate) delivered: i64,
    pub(crate) failed: Option<i32>,
    pub(crate) done: bool,
    pub(crate) stats: ServerStats,
}

impl<C: Comm> Server<C> {
    pub fn new(comm: C, layout: Layout, config: ServerConfig) -> Server<C> {
        let rank = comm.rank();
        assert!(layout.is_server(rank), "rank {} is not a server", rank);
        assert!(config.ntypes >= 1);
        let seed = (rank as u64).wrapping_mul(2654435761).wrapping_add(1);
        Server {
            store: DataStore::new(layout, rank),
            matcher: Matcher::new(config.ntypes),
            sync: SyncState::new(),
            steal_rng: seed,
            last_steal: Instant::now(),
            finalized_workers: HashSet::new(),
            idle_votes: HashMap::new(),
            last_idle_poll: Instant::now(),
            accepted: 0,
            delivered: 0,
            failed: None,
            done: false,
            stats: ServerStats::default(),
            comm,
            layout,
            rank,
            config,
        }
    }

    #[inline]
    pub fn rank(&self) -> i32 {
        self.rank
    }

    #[inline]
    pub fn is_master(&self) -> bool {
        self.rank == self.layout.master_server()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Serve until cluster shutdown. Returns the failure code recorded
    /// on this server (the master's is the cluster exit status).
    pub fn run(&mut self) -> AdlbResult<Option<i32>> {
        adlb_core::dprint::set_rank(self.rank);
        adlb_dbg!("server up: {} ntypes={}", self.layout, self.config.ntypes);
        if self.is_master() {
            if let Some(hm) = crate::hostmap::Hostmap::build(&self.layout) {
                for host in hm.hosts() {
                    adlb_dbg!("hostmap: {} -> {:?}", host, hm.ranks_on(host));
                }
            }
        }
        while !self.done {
            match self.comm.try_recv(None, None)? {
                Some(env) => self.dispatch(env)?,
                None => self.idle_tick()?,
            }
        }
        self.finalize();
        Ok(self.failed)
    }

    /// One quiet-loop step: master idle polling, opportunistic stealing,
    /// then a short park so an idle server does not spin a core.
    fn idle_tick(&mut self) -> AdlbResult<()> {
        if self.is_master() && self.server_idle() {
            if self.cluster_quiescent() {
                adlb_dbg!("cluster idle: broadcasting shutdown");
                for s in self.layout.server_ranks() {
                    if s != self.rank {
                        self.comm.send(s, Tag::ShutdownServer, &[])?;
                    }
                }
                self.shutdown_self()?;
                return Ok(());
            }
            if self.last_idle_poll.elapsed() >= self.config.idle_poll {
                self.last_idle_poll = Instant::now();
                for s in self.layout.server_ranks() {
                    if s != self.rank {
                        self.comm.send(s, Tag::CheckIdle, &[])?;
                    }
                }
            }
        }

        // Idle-loop steal trigger: workers are waiting and the queue is
        // dry.
        if self.matcher.reqq.total() > 0
            && self.matcher.workq.total() == 0
            && self.steal_cooldown_over()
        {
            self.attempt_steal()?;
        }

        std::thread::sleep(Duration::from_micros(200));
        Ok(())
    }

    pub(crate) fn steal_cooldown_over(&self) -> bool {
        self.last_steal.elapsed() >= self.config.steal_cooldown
    }

    /// This server contributes to cluster idleness when it has no queued
    /// work and every worker it homes is either parked here or has
    /// finalized.
    pub(crate) fn server_idle(&self) -> bool {
        let homed = self.layout.workers_of(self.rank).count();
        let accounted = self.matcher.reqq.total() as usize + self.finalized_workers.len();
        self.matcher.workq.total() == 0 && accounted == homed
    }

    /// Every peer voted idle and cluster-wide accepted == delivered, so
    /// no unit is queued anywhere or in flight between servers.
    fn cluster_quiescent(&self) -> bool {
        let mut accepted = self.accepted;
        let mut delivered = self.delivered;
        for s in self.layout.server_ranks().filter(|s| *s != self.rank) {
            match self.idle_votes.get(&s) {
                Some(&(true, a, d)) => {
                    accepted += a;
                    delivered += d;
                }
                _ => return false,
            }
        }
        accepted == delivered
    }

    pub(crate) fn record_idle_vote(&mut self, src: i32, idle: bool, accepted: i64, delivered: i64) {
        self.idle_votes.insert(src, (idle, accepted, delivered));
    }

    /// Complete every parked GET with the shutdown code and stop. Any
    /// FAIL still in the mailbox is recorded first so a failure sent
    /// right before worker finalize is not lost.
    pub(crate) fn shutdown_self(&mut self) -> AdlbResult<()> {
        while let Some(env) = self.comm.try_recv(None, Some(Tag::Fail))? {
            self.handle_fail(&env.bytes)?;
        }
        for rank in self.matcher.reqq.drain_all() {
            let resp = GetResponse {
                code: code::SHUTDOWN,
                length: 0,
                answer_rank: -1,
                work_type: -1,
                payload_source: -1,
                parallelism: 0,
            };
            self.comm.send(rank, Tag::ResponseGet, &resp.encode())?;
        }
        self.done = true;
        Ok(())
    }

    fn finalize(&mut self) {
        adlb_dbg!(
            "server done: puts={} gets={} redirects={} steals(out/in)={}/{} syncs={}",
            self.stats.puts,
            self.stats.gets,
            self.stats.redirects,
            self.stats.steals_out,
            self.stats.steals_in,
            self.stats.syncs
        );
        if env_get_bool("ADLB_REPORT_LEAKS", false) && self.store.len() > 0 {
            for (id, d) in self.store.datums() {
                adlb_warn!(
                    "leaked datum {}: type={:?} refs=({},{}) symbol={}",
                    id,
                    d.data_type,
                    d.read_refcount,
                    d.write_refcount,
                    d.symbol.as_deref().unwrap_or("-")
                );
            }
        }
    }

    // ── PUT / GET ──

    pub(crate) fn handle_put(&mut self, src: i32, bytes: &[u8]) -> AdlbResult<()> {
        let (hdr, inline) = PutHdr::decode(bytes)?;
        self.stats.puts += 1;

        let type_ok = hdr.work_type >= 0 && (hdr.work_type as usize) < self.config.ntypes;
        let target_ok =
            hdr.target == RANK_ANY || (hdr.target >= 0 && hdr.target < self.layout.workers());
        if !type_ok || !target_ok || hdr.parallelism < 1 {
            let resp = PutResponse {
                code: code::ERROR,
                dest: -1,
            };
            return self.comm.send(src, Tag::ResponsePut, &resp.encode());
        }

        let mut unit = WorkUnit {
            id: 0,
            seq: 0,
            work_type: hdr.work_type,
            putter: hdr.putter,
            answer: hdr.answer,
            target: hdr.target,
            priority: hdr.priority,
            parallelism: hdr.parallelism,
            length: hdr.length,
            payload: inline,
        };
        self.accepted += 1;

        if hdr.has_inline != 0 {
            self.respond_put(src, -1)?;
            return self.place_unit(unit);
        }

        // Large single task: try the redirect path before pulling the
        // payload, so it can stream worker-to-worker.
        if unit.parallelism == 1 {
            let hit = if unit.is_targeted() {
                self.matcher
                    .reqq
                    .match_target(unit.target, unit.work_type)
                    .then_some(unit.target)
            } else {
                self.matcher.reqq.match_type(unit.work_type)
            };
            if let Some(winner) = hit {
                self.stats.redirects += 1;
                self.delivered += 1;
                self.respond_put(src, winner)?;
                return self.send_get_response(winner, &unit, unit.putter);
            }
        }

        // Buffer the payload here, then queue or match.
        self.respond_put(src, self.rank)?;
        let env = self.comm.recv(Some(src), Some(Tag::Workunit))?;
        if env.bytes.len() != unit.length as usize {
            return Err(AdlbError::Protocol("payload length mismatch"));
        }
        unit.payload = env.bytes;
        self.place_unit(unit)
    }

    fn respond_put(&mut self, src: i32, dest: i32) -> AdlbResult<()> {
        let resp = PutResponse {
            code: code::SUCCESS,
            dest,
        };
        self.comm.send(src, Tag::ResponsePut, &resp.encode())
    }

    /// Hand a fully buffered unit to the matcher and deliver any match.
    pub(crate) fn place_unit(&mut self, unit: WorkUnit) -> AdlbResult<()> {
        match self.matcher.put(unit) {
            PutOutcome::Redirect(rank, unit) => {
                self.stats.redirects += 1;
                self.deliver_buffered(rank, &unit)
            }
            PutOutcome::RedirectTeam(team, unit) => self.deliver_team(&team, &unit),
            PutOutcome::Queued(_) => Ok(()),
        }
    }

    pub(crate) fn handle_get(&mut self, src: i32, bytes: &[u8], park: bool) -> AdlbResult<()> {
        let req = GetRequest::decode(bytes)?;
        self.stats.gets += 1;
        if req.work_type < 0 || (req.work_type as usize) >= self.config.ntypes {
            let resp = GetResponse {
                code: code::ERROR,
                length: 0,
                answer_rank: -1,
                work_type: req.work_type,
                payload_source: -1,
                parallelism: 0,
            };
            return self.comm.send(src, Tag::ResponseGet, &resp.encode());
        }

        match self.matcher.get(src, req.work_type, park) {
            GetOutcome::Ready(unit) => self.deliver_buffered(src, &unit),
            GetOutcome::Nothing => {
                let resp = GetResponse {
                    code: code::NOTHING,
                    length: 0,
                    answer_rank: -1,
                    work_type: req.work_type,
                    payload_source: -1,
                    parallelism: 0,
                };
                self.comm.send(src, Tag::ResponseGet, &resp.encode())
            }
            GetOutcome::Parked => {
                if let Some((unit, team)) = self.matcher.check_parallel(req.work_type) {
                    return self.deliver_team(&team, &unit);
                }
                if self.matcher.workq.type_count(req.work_type) == 0 && self.steal_cooldown_over()
                {
                    self.attempt_steal()?;
                }
                Ok(())
            }
        }
    }

    /// Deliver a unit whose payload the server holds.
    pub(crate) fn deliver_buffered(&mut self, rank: i32, unit: &WorkUnit) -> AdlbResult<()> {
        self.delivered += 1;
        self.send_get_response(rank, unit, self.rank)?;
        self.comm.send(rank, Tag::Workunit, &unit.payload)
    }

    /// RESPONSE_GET header; the payload follows from `payload_source`.
    fn send_get_response(&mut self, rank: i32, unit: &WorkUnit, source: i32) -> AdlbResult<()> {
        let resp = GetResponse {
            code: code::SUCCESS,
            length: unit.length,
            answer_rank: unit.answer,
            work_type: unit.work_type,
            payload_source: source,
            parallelism: unit.parallelism,
        };
        self.comm.send(rank, Tag::ResponseGet, &resp.encode())
    }

    /// Deliver a parallel task: each member gets the descriptor, the
    /// full team list, and the payload. Communicator formation is the
    /// workers' job.
    pub(crate) fn deliver_team(&mut self, team: &[i32], unit: &WorkUnit) -> AdlbResult<()> {
        self.delivered += 1;
        let list = msgs::encode_rank_list(team);
        for &rank in team {
            self.send_get_response(rank, unit, self.rank)?;
            self.comm.send(rank, Tag::Response, &list)?;
            self.comm.send(rank, Tag::Workunit, &unit.payload)?;
        }
        Ok(())
    }

    // ── shutdown bookkeeping ──

    pub(crate) fn handle_shutdown_worker(&mut self, src: i32) {
        self.matcher.reqq.remove(src);
        self.finalized_workers.insert(src);
        adlb_dbg!("worker {} finalized", src);
    }

    pub(crate) fn handle_fail(&mut self, bytes: &[u8]) -> AdlbResult<()> {
        let msg = msgs::FailMsg::decode(bytes)?;
        adlb_warn!("failure recorded: code {}", msg.code);
        if self.failed.is_none() {
            self.failed = Some(msg.code);
        }
        Ok(())
    }

    // ── helpers shared with sync/steal ──

    /// Cheap LCG, plenty to spread steal victims.
    pub(crate) fn random_server(&mut self) -> i32 {
        self.steal_rng = self
            .steal_rng
            .wrapping_mul(1103515245)
            .wrapping_add(12345);
        let span = (self.layout.servers() - 1).max(1) as u64;
        let pick = (self.steal_rng >> 16) % span;
        let mut victim = self.layout.master_server() + pick as i32;
        if victim >= self.rank {
            victim += 1; // skip self; max lands on the last server rank
        }
        victim
    }

    /// (queued work, parked requests) totals, for tests and demos.
    pub fn queue_totals(&self) -> (i64, i64) {
        (self.matcher.workq.total(), self.matcher.reqq.total())
    }
}
