//! Checkpoint file inspector
//!
//! Usage: xpt-dump <file> [rank]
//!
//! Walks one rank's records (or every rank's) and prints keys, value
//! sizes, and valid/invalid counts. Corrupt records are skipped via the
//! normal resync path, exactly as recovery would.

use adlb_xpt::{ReadOutcome, XptReader};

fn dump_rank(r: &mut XptReader, rank: u32) {
    println!("-- rank {} --", rank);
    if let Err(e) = r.select_rank(rank) {
        println!("  unreadable: {}", e);
        return;
    }
    let mut valid = 0u64;
    let mut invalid = 0u64;
    loop {
        match r.read_record() {
            Ok(ReadOutcome::Valid { key, val, val_offset }) => {
                valid += 1;
                println!(
                    "  {:<32} {:>8} bytes @ {}",
                    String::from_utf8_lossy(&key),
                    val.len(),
                    val_offset
                );
            }
            Ok(ReadOutcome::Invalid) => {
                invalid += 1;
                println!("  ** invalid record skipped **");
            }
            Ok(ReadOutcome::EndOfRank) => break,
            Err(e) => {
                println!("  read error: {}", e);
                break;
            }
        }
    }
    println!("  {} valid, {} invalid", valid, invalid);
}

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: xpt-dump <file> [rank]");
        std::process::exit(2);
    };
    let rank: Option<u32> = args.next().and_then(|s| s.parse().ok());

    let mut r = match XptReader::open(&path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}: {}", path, e);
            std::process::exit(1);
        }
    };
    println!(
        "{}: block size {} bytes, {} ranks",
        path,
        r.block_size(),
        r.ranks()
    );

    match rank {
        Some(rank) => dump_rank(&mut r, rank),
        None => {
            for rank in 0..r.ranks() {
                dump_rank(&mut r, rank);
            }
        }
    }
}
