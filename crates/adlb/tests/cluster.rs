//! In-process cluster scenarios: store/retrieve lifecycles, container
//! subscriptions with cross-server notification, the insert-atomic
//! race, parallel tasks, steal-driven matching, and mutual server
//! syncs.

use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use adlb::{
    init, Client, CreateProps, DataType, FabricEndpoint, Role, AdlbError, DataError, Fabric,
    RetrieveRc, Value, RANK_ANY, TYPE_CONTROL,
};

type WorkerFn = Box<dyn FnOnce(Client<FabricEndpoint>) + Send>;

/// Spawn a full cluster; returns the failure code recorded per server
/// once every worker has finished and shutdown has propagated.
fn run_cluster(nservers: i32, ntypes: usize, workers: Vec<WorkerFn>) -> Vec<Option<i32>> {
    let nworkers = workers.len() as i32;
    let fabric = Fabric::new(nworkers + nservers);
    let mut server_handles = Vec::new();
    for rank in nworkers..nworkers + nservers {
        let ep = fabric.endpoint(rank);
        server_handles.push(thread::spawn(move || match init(ep, nservers, ntypes) {
            Role::Server(mut s) => s.run().unwrap(),
            Role::Worker(_) => unreachable!(),
        }));
    }
    let mut worker_handles = Vec::new();
    for (rank, body) in workers.into_iter().enumerate() {
        let ep = fabric.endpoint(rank as i32);
        let nservers = nservers;
        worker_handles.push(thread::spawn(move || match init(ep, nservers, ntypes) {
            Role::Worker(c) => body(c),
            Role::Server(_) => unreachable!(),
        }));
    }
    for h in worker_handles {
        h.join().unwrap();
    }
    server_handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn worker<F: FnOnce(Client<FabricEndpoint>) + Send + 'static>(f: F) -> WorkerFn {
    Box::new(f)
}

// ── S1: simple store/retrieve lifecycle ──

#[test]
fn s1_store_retrieve_destroy() {
    let fails = run_cluster(
        1,
        2,
        vec![worker(|mut c| {
            let id = 101;
            c.create_scalar(id, DataType::Integer, 1, 1).unwrap();
            c.store(id, None, DataType::Integer, &Value::Integer(42).pack(), 0, 0)
                .unwrap();

            let (t, bytes) = c.retrieve(id, None, RetrieveRc::default()).unwrap();
            assert_eq!(t, DataType::Integer);
            assert_eq!(bytes.len(), 8);
            assert_eq!(Value::unpack(t, &bytes).unwrap(), Value::Integer(42));

            // release the read reference
            let (_, _) = c
                .retrieve(
                    id,
                    None,
                    RetrieveRc {
                        decr_read: 1,
                        ..Default::default()
                    },
                )
                .unwrap();

            // closing the write reference destroys the datum
            c.refcount_incr(id, 0, -1, false).unwrap();
            match c.retrieve(id, None, RetrieveRc::default()) {
                Err(AdlbError::Data(DataError::NotFound)) => {}
                other => panic!("expected NotFound, got {:?}", other),
            }
            c.finalize().unwrap();
        })],
    );
    assert_eq!(fails, vec![None]);
}

// ── S2: container subscription, local and cross-server delivery ──

#[test]
fn s2_container_subscription_notifies() {
    // 6 workers + 2 servers; container 7 is homed on server rank 7.
    // Worker 3 is homed on server 7 (local path), worker 4 on server 6
    // (remote path through the sync protocol).
    let barrier = Arc::new(Barrier::new(3));
    let b3 = barrier.clone();
    let b4 = barrier.clone();
    let b5 = barrier;

    let mut workers: Vec<WorkerFn> = Vec::new();
    for idx in 0..6 {
        workers.push(match idx {
            3 => {
                let b = b3.clone();
                worker(move |mut c| {
                    c.create(
                        7,
                        DataType::Container,
                        DataType::String,
                        DataType::Ref,
                        &CreateProps::refs(1, 1),
                    )
                    .unwrap();
                    assert!(c.subscribe(7, Some(b"k1")).unwrap());
                    b.wait();
                    // the CLOSE notification arrives as a CONTROL task
                    let w = c.get(TYPE_CONTROL).unwrap().unwrap();
                    assert_eq!(w.payload, b"close 7 k1");
                    c.finalize().unwrap();
                })
            }
            4 => {
                let b = b4.clone();
                worker(move |mut c| {
                    b.wait(); // after creation+subscription by worker 3
                    assert!(c.subscribe(7, Some(b"k1")).unwrap());
                    // tell the putter we are ready via a datum
                    c.create_scalar(40, DataType::Integer, 1, 1).unwrap();
                    c.store(40, None, DataType::Integer, &Value::Integer(1).pack(), 0, 0)
                        .unwrap();
                    let w = c.get(TYPE_CONTROL).unwrap().unwrap();
                    assert_eq!(w.payload, b"close 7 k1");
                    c.finalize().unwrap();
                })
            }
            5 => {
                let b = b5.clone();
                worker(move |mut c| {
                    b.wait();
                    // wait for worker 4's readiness marker
                    loop {
                        match c.retrieve(40, None, RetrieveRc::default()) {
                            Ok(_) => break,
                            Err(_) => thread::sleep(std::time::Duration::from_millis(1)),
                        }
                    }
                    c.store(7, Some(b"k1"), DataType::Ref, &Value::Ref(101).pack(), 0, 0)
                        .unwrap();
                    c.finalize().unwrap();
                })
            }
            _ => worker(|c| c.finalize().unwrap()),
        });
    }
    let fails = run_cluster(2, 2, workers);
    assert_eq!(fails, vec![None, None]);
}

// ── S3: insert-atomic race ──

#[test]
fn s3_insert_atomic_race() {
    let results: Arc<Mutex<Vec<(usize, bool, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let raced = Arc::new(Barrier::new(2));
    let decided = Arc::new(Barrier::new(2));

    let mut workers: Vec<WorkerFn> = Vec::new();
    for idx in 0..2usize {
        let results = results.clone();
        let raced = raced.clone();
        let decided = decided.clone();
        workers.push(worker(move |mut c| {
            if idx == 0 {
                c.create(
                    7,
                    DataType::Container,
                    DataType::String,
                    DataType::Integer,
                    &CreateProps::refs(1, 1),
                )
                .unwrap();
            }
            raced.wait();
            let (created, present) = loop {
                match c.insert_atomic(7, b"k2") {
                    Ok(r) => break r,
                    Err(AdlbError::Data(DataError::NotFound)) => {
                        thread::sleep(std::time::Duration::from_millis(1))
                    }
                    Err(e) => panic!("{}", e),
                }
            };
            assert!(!present);
            results.lock().unwrap().push((idx, created, present));
            decided.wait();

            let won = created;
            if won {
                c.store(7, Some(b"k2"), DataType::Integer, &Value::Integer(9).pack(), 0, 0)
                    .unwrap();
                // marker for the loser
                c.create_scalar(30, DataType::Integer, 1, 1).unwrap();
                c.store(30, None, DataType::Integer, &Value::Integer(1).pack(), 0, 0)
                    .unwrap();
            } else {
                while c.retrieve(30, None, RetrieveRc::default()).is_err() {
                    thread::sleep(std::time::Duration::from_millis(1));
                }
                match c.store(7, Some(b"k2"), DataType::Integer, &Value::Integer(8).pack(), 0, 0)
                {
                    Err(AdlbError::Rejected) => {}
                    other => panic!("expected Rejected, got {:?}", other),
                }
            }
            c.finalize().unwrap();
        }));
    }
    run_cluster(1, 2, workers);

    let results = results.lock().unwrap();
    let wins = results.iter().filter(|(_, created, _)| *created).count();
    assert_eq!(wins, 1, "exactly one reservation must win: {:?}", *results);
}

// ── S4: parallel task released only when the team is complete ──

#[test]
fn s4_parallel_task_team() {
    let seen: Arc<Mutex<Vec<Vec<i32>>>> = Arc::new(Mutex::new(Vec::new()));
    let mut workers: Vec<WorkerFn> = Vec::new();
    for idx in 0..5usize {
        let seen = seen.clone();
        workers.push(worker(move |mut c| {
            if idx == 4 {
                // stagger: two workers park, then the put, then the rest
                thread::sleep(std::time::Duration::from_millis(20));
                c.put(b"team-job", 1, RANK_ANY, 4, 0, 4).unwrap();
                c.finalize().unwrap();
                return;
            }
            if idx >= 2 {
                thread::sleep(std::time::Duration::from_millis(40));
            }
            let w = c.get(1).unwrap().unwrap();
            assert_eq!(w.payload, b"team-job");
            assert_eq!(w.parallelism, 4);
            let mut team = w.team.clone();
            team.sort_unstable();
            seen.lock().unwrap().push(team);
            c.finalize().unwrap();
        }));
    }
    run_cluster(1, 2, workers);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    for team in seen.iter() {
        assert_eq!(team, &vec![0, 1, 2, 3]);
    }
}

// ── matching + stealing: every put consumed exactly once ──

#[test]
fn puts_match_gets_across_servers() {
    const PER_PUTTER: usize = 20;
    let collected: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

    let mut workers: Vec<WorkerFn> = Vec::new();
    for idx in 0..4usize {
        let collected = collected.clone();
        workers.push(worker(move |mut c| {
            if idx % 2 == 0 {
                // putters are homed on server 4; consumers on server 5,
                // so work must be stolen across
                for i in 0..PER_PUTTER {
                    let payload = format!("task-{}-{}", idx, i);
                    c.put(payload.as_bytes(), 1, RANK_ANY, c.rank(), (i % 3) as i32, 1)
                        .unwrap();
                }
            } else {
                for _ in 0..PER_PUTTER {
                    let w = c.get(1).unwrap().expect("shutdown before all tasks consumed");
                    collected.lock().unwrap().push(w.payload);
                }
            }
            c.finalize().unwrap();
        }));
    }
    let fails = run_cluster(2, 2, workers);
    assert_eq!(fails, vec![None, None]);

    let mut got = collected.lock().unwrap().clone();
    got.sort();
    got.dedup();
    assert_eq!(got.len(), 2 * PER_PUTTER, "every put matched exactly once");
}

// ── targeted tasks only reach their rank ──

#[test]
fn targeted_put_reaches_its_rank() {
    let mut workers: Vec<WorkerFn> = Vec::new();
    for idx in 0..3usize {
        workers.push(worker(move |mut c| match idx {
            0 => {
                // parked early, must NOT receive the targeted task
                let w = c.get(1).unwrap().unwrap();
                assert_eq!(w.payload, b"for-anyone");
                c.finalize().unwrap();
            }
            1 => {
                thread::sleep(std::time::Duration::from_millis(20));
                c.put(b"for-two", 1, 2, 1, 100, 1).unwrap();
                c.put(b"for-anyone", 1, RANK_ANY, 1, 0, 1).unwrap();
                c.finalize().unwrap();
            }
            _ => {
                thread::sleep(std::time::Duration::from_millis(40));
                let w = c.get(1).unwrap().unwrap();
                assert_eq!(w.payload, b"for-two");
                c.finalize().unwrap();
            }
        }));
    }
    run_cluster(1, 2, workers);
}

// ── large payloads stream worker-to-worker on the redirect path ──

#[test]
fn large_payload_redirect() {
    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let expect = payload.clone();

    let workers: Vec<WorkerFn> = vec![
        worker(move |mut c| {
            let w = c.get(1).unwrap().unwrap();
            assert_eq!(w.payload, expect);
            assert_eq!(w.answer_rank, 1);
            c.finalize().unwrap();
        }),
        worker(move |mut c| {
            thread::sleep(std::time::Duration::from_millis(20));
            c.put(&payload, 1, RANK_ANY, 1, 0, 1).unwrap();
            c.finalize().unwrap();
        }),
    ];
    run_cluster(1, 2, workers);
}

// ── iget answers NOTHING instead of parking ──

#[test]
fn iget_returns_nothing() {
    run_cluster(
        1,
        2,
        vec![worker(|mut c| {
            assert!(c.iget(1).unwrap().is_none());
            c.finalize().unwrap();
        })],
    );
}

// ── S6: mutual sync requests between two servers resolve ──

#[test]
fn s6_mutual_server_sync() {
    // Workers 0 (home server 2) and 1 (home server 3). Each round, each
    // worker closes a datum homed on its own server whose listener is
    // the other worker, so both servers initiate syncs toward each
    // other at once.
    const ROUNDS: i64 = 10;
    let ready = Arc::new(Barrier::new(2));
    let mut workers: Vec<WorkerFn> = Vec::new();
    for idx in 0..2i64 {
        let ready = ready.clone();
        workers.push(worker(move |mut c| {
            let me = idx;
            let other = 1 - idx;
            for round in 0..ROUNDS {
                // server homing: id parity picks the server (S = 2)
                let my_id = 1000 + round * 2 + me;
                let other_id = 1000 + round * 2 + other;
                c.create_scalar(my_id, DataType::Integer, 1, 1).unwrap();
                ready.wait();
                // subscribe to the OTHER worker's datum
                assert!(c.subscribe(other_id, None).unwrap());
                ready.wait();
                // both close simultaneously: mutual server syncs
                c.store(my_id, None, DataType::Integer, &Value::Integer(me).pack(), 0, 1)
                    .unwrap();
                let w = c.get(TYPE_CONTROL).unwrap().unwrap();
                assert_eq!(w.payload, format!("close {}", other_id).as_bytes());
            }
            c.finalize().unwrap();
        }));
    }
    let fails = run_cluster(2, 2, workers);
    assert_eq!(fails, vec![None, None]);
}

// ── failures propagate to the master's exit status ──

#[test]
fn fail_reaches_master() {
    let fails = run_cluster(
        2,
        2,
        vec![worker(|mut c| {
            c.fail(42).unwrap();
            c.finalize().unwrap();
        })],
    );
    // master is the first server in the returned list
    assert_eq!(fails[0], Some(42));
    assert_eq!(fails[1], None);
}

// ── data ops route by id across servers, negative ids included ──

#[test]
fn data_ops_route_across_servers() {
    let fails = run_cluster(
        3,
        2,
        vec![worker(|mut c| {
            for id in [-9i64, -2, 5, 12, 1001] {
                c.create_scalar(id, DataType::Integer, 1, 1).unwrap();
                c.store(id, None, DataType::Integer, &Value::Integer(id).pack(), 0, 0)
                    .unwrap();
            }
            for id in [-9i64, -2, 5, 12, 1001] {
                let (t, bytes) = c.retrieve(id, None, RetrieveRc::default()).unwrap();
                assert_eq!(Value::unpack(t, &bytes).unwrap(), Value::Integer(id));
                assert_eq!(c.type_of(id).unwrap(), DataType::Integer);
            }
            c.finalize().unwrap();
        })],
    );
    assert_eq!(fails, vec![None, None, None]);
}

// ── container reference promise writes through on insert ──

#[test]
fn container_reference_promise() {
    let fails = run_cluster(
        2,
        2,
        vec![worker(|mut c| {
            c.create(
                7,
                DataType::Container,
                DataType::String,
                DataType::Integer,
                // one refcount for us, one to hand to the bucket
                &CreateProps::refs(2, 1),
            )
            .unwrap();
            // the promise target, homed on the other server (even id)
            c.create_scalar(200, DataType::Integer, 1, 1).unwrap();
            c.container_reference(7, b"x", 200, DataType::Integer).unwrap();

            c.store(7, Some(b"x"), DataType::Integer, &Value::Integer(77).pack(), 0, 0)
                .unwrap();

            // the resolved value lands in 200 (written remotely, so
            // poll briefly)
            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
            loop {
                match c.retrieve(200, None, RetrieveRc::default()) {
                    Ok((t, bytes)) => {
                        assert_eq!(Value::unpack(t, &bytes).unwrap(), Value::Integer(77));
                        break;
                    }
                    Err(AdlbError::Data(DataError::Unset)) => {
                        assert!(std::time::Instant::now() < deadline, "promise never resolved");
                        thread::sleep(std::time::Duration::from_millis(1));
                    }
                    Err(e) => panic!("{}", e),
                }
            }
            c.finalize().unwrap();
        })],
    );
    assert_eq!(fails, vec![None, None]);
}
