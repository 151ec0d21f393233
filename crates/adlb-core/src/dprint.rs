//! Debug/trace print macros for the adlb runtime
//!
//! Thread-safe, rank-aware stderr output. Debug and trace channels are
//! independently gated from the environment and checked with one relaxed
//! atomic load per call site.
//!
//! # Environment Variables
//!
//! - `ADLB_DEBUG=0` - silence debug output (on by default)
//! - `ADLB_TRACE=0` - silence trace output (on by default)
//! - `ADLB_PRINT_TIME=1` - include microsecond timestamps
//! - `ADLB_PRINT_FLUSH=1` - flush stderr after each line
//!
//! # Output Format
//!
//! `[DBG] [r<rank>] message`, with `r--` when the calling thread has not
//! been bound to a rank.
//!
//! # Usage
//!
//! ```ignore
//! use adlb_core::{adlb_dbg, adlb_trace, adlb_warn};
//!
//! adlb_dbg!("put: type={} target={}", work_type, target);
//! adlb_trace!("sync: probing peer {}", peer);
//! adlb_warn!("leaked datum {}", id);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::env::env_get_bool;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(true);
static TRACE_ENABLED: AtomicBool = AtomicBool::new(true);
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static TIME_ENABLED: AtomicBool = AtomicBool::new(false);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

thread_local! {
    static RANK: std::cell::Cell<Option<i32>> = const { std::cell::Cell::new(None) };
}

/// Initialize from environment variables.
///
/// Called automatically on first print; call explicitly for deterministic
/// startup ordering.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    START_TIME.get_or_init(Instant::now);
    DEBUG_ENABLED.store(env_get_bool("ADLB_DEBUG", true), Ordering::Relaxed);
    TRACE_ENABLED.store(env_get_bool("ADLB_TRACE", true), Ordering::Relaxed);
    FLUSH_ENABLED.store(env_get_bool("ADLB_PRINT_FLUSH", false), Ordering::Relaxed);
    TIME_ENABLED.store(env_get_bool("ADLB_PRINT_TIME", false), Ordering::Relaxed);
}

#[inline]
pub fn debug_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn trace_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    TRACE_ENABLED.load(Ordering::Relaxed)
}

/// Bind the calling thread to a rank for log context.
pub fn set_rank(rank: i32) {
    RANK.with(|r| r.set(Some(rank)));
}

pub fn clear_rank() {
    RANK.with(|r| r.set(None));
}

#[inline]
pub fn get_rank() -> Option<i32> {
    RANK.with(|r| r.get())
}

#[doc(hidden)]
pub fn _dlog_impl(prefix: &str, args: std::fmt::Arguments<'_>) {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();

    let _ = write!(handle, "{} ", prefix);
    if TIME_ENABLED.load(Ordering::Relaxed) {
        let start = START_TIME.get_or_init(Instant::now);
        let _ = write!(handle, "[{:>10}us] ", start.elapsed().as_micros());
    }
    match get_rank() {
        Some(r) => {
            let _ = write!(handle, "[r{}] ", r);
        }
        None => {
            let _ = write!(handle, "[r--] ");
        }
    }
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

/// Debug log, silenced by `ADLB_DEBUG=0`.
#[macro_export]
macro_rules! adlb_dbg {
    ($($arg:tt)*) => {{
        if $crate::dprint::debug_enabled() {
            $crate::dprint::_dlog_impl("[DBG]", format_args!($($arg)*));
        }
    }};
}

/// Trace log, silenced by `ADLB_TRACE=0`. Finer-grained than debug
/// (per-message, per-record events).
#[macro_export]
macro_rules! adlb_trace {
    ($($arg:tt)*) => {{
        if $crate::dprint::trace_enabled() {
            $crate::dprint::_dlog_impl("[TRC]", format_args!($($arg)*));
        }
    }};
}

/// Informational log, always on.
#[macro_export]
macro_rules! adlb_info {
    ($($arg:tt)*) => {{
        $crate::dprint::_dlog_impl("[INF]", format_args!($($arg)*));
    }};
}

/// Warning log, always on.
#[macro_export]
macro_rules! adlb_warn {
    ($($arg:tt)*) => {{
        $crate::dprint::_dlog_impl("[WRN]", format_args!($($arg)*));
    }};
}

/// Error log, always on.
#[macro_export]
macro_rules! adlb_error {
    ($($arg:tt)*) => {{
        $crate::dprint::_dlog_impl("[ERR]", format_args!($($arg)*));
    }};
}
