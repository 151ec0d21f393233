//! Stress test - many tasks through the matcher and the steal path
//!
//! Usage: stress [tasks-per-producer] [workers] [servers]
//!
//! Even workers produce, odd workers consume; with the default layout
//! producers and consumers are homed on different servers so a share of
//! the work must be stolen across.

use adlb::{init, Fabric, Role, RANK_ANY};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const WORK: i32 = 1;

fn main() {
    let mut args = std::env::args().skip(1);
    let per_producer: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(5_000);
    let workers: i32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(4);
    let servers: i32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(2);
    assert!(workers >= 2 && workers % 2 == 0, "need an even worker count");

    let producers = workers / 2;
    let total = per_producer * producers as usize;
    println!(
        "=== adlb stress: {} tasks, {} workers, {} servers ===\n",
        total, workers, servers
    );

    let fabric = Fabric::new(workers + servers);
    let consumed = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for rank in 0..workers + servers {
        let ep = fabric.endpoint(rank);
        let consumed = consumed.clone();
        handles.push(thread::spawn(move || match init(ep, servers, 2) {
            Role::Server(mut s) => {
                s.run().unwrap();
                println!(
                    "[server {}] steals out/in: {}/{} ({} units), syncs: {}",
                    s.rank(),
                    s.stats().steals_out,
                    s.stats().steals_in,
                    s.stats().units_stolen,
                    s.stats().syncs
                );
            }
            Role::Worker(mut w) => {
                if w.rank() % 2 == 0 {
                    for i in 0..per_producer {
                        let payload = format!("t{}-{}", w.rank(), i);
                        w.put(payload.as_bytes(), WORK, RANK_ANY, w.rank(), 0, 1).unwrap();
                    }
                } else {
                    let share = per_producer; // one consumer per producer
                    for _ in 0..share {
                        w.get(WORK).unwrap().expect("early shutdown");
                        consumed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                w.finalize().unwrap();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let elapsed = start.elapsed();
    let done = consumed.load(Ordering::Relaxed);
    println!("\nconsumed {}/{} tasks in {:?}", done, total, elapsed);
    println!(
        "throughput: {:.0} tasks/sec",
        done as f64 / elapsed.as_secs_f64()
    );
    assert_eq!(done as usize, total);
}
