//! Smoke test - one in-process cluster end to end
//!
//! Spins up workers + servers on threads, pushes a handful of tasks and
//! data operations through every major path, and shuts down cleanly.

use adlb::{init, DataType, Fabric, RetrieveRc, Role, Value, RANK_ANY};
use std::thread;

const WORKERS: i32 = 3;
const SERVERS: i32 = 2;
const NTYPES: usize = 2;
const WORK: i32 = 1;

fn main() {
    println!("=== adlb smoke: {} workers + {} servers ===\n", WORKERS, SERVERS);

    let fabric = Fabric::new(WORKERS + SERVERS);
    let mut handles = Vec::new();

    for rank in 0..WORKERS + SERVERS {
        let ep = fabric.endpoint(rank);
        handles.push(thread::spawn(move || match init(ep, SERVERS, NTYPES) {
            Role::Server(mut s) => {
                let failed = s.run().unwrap();
                println!(
                    "[server {}] done ({} puts, {} gets, {} redirects)",
                    s.rank(),
                    s.stats().puts,
                    s.stats().gets,
                    s.stats().redirects
                );
                failed
            }
            Role::Worker(mut w) => {
                let me = w.rank();
                if me == 0 {
                    // producer: a few tasks plus a shared datum
                    w.create_scalar(101, DataType::Integer, 1, 1).unwrap();
                    w.store(101, None, DataType::Integer, &Value::Integer(42).pack(), 0, 0)
                        .unwrap();
                    for i in 0..6 {
                        let payload = format!("job-{}", i);
                        w.put(payload.as_bytes(), WORK, RANK_ANY, me, i % 2, 1).unwrap();
                    }
                    println!("[worker 0] submitted 6 jobs");
                } else {
                    for _ in 0..3 {
                        let work = w.get(WORK).unwrap().expect("shut down early");
                        let (_, bytes) = w.retrieve(101, None, RetrieveRc::default()).unwrap();
                        let shared = Value::unpack(DataType::Integer, &bytes).unwrap();
                        println!(
                            "[worker {}] ran {:?} (shared={:?})",
                            me,
                            String::from_utf8_lossy(&work.payload),
                            shared
                        );
                    }
                }
                w.finalize().unwrap();
                None
            }
        }));
    }

    let mut exit = 0;
    for h in handles {
        if let Some(code) = h.join().unwrap() {
            exit = code;
        }
    }
    println!("\n=== smoke complete (exit {}) ===", exit);
    std::process::exit(exit);
}
