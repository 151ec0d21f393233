//! # adlb-server
//!
//! The server-side coordination engine: data store, work/request queues
//! and their matcher, the notification engine, the deadlock-free
//! server-to-server sync protocol, work stealing, and the probe-driven
//! RPC loop.
//!
//! One [`Server`] object per server rank holds all of it; nothing in
//! this crate is process-global. Handlers run serially on the owning
//! rank's thread (the concurrency model the sync protocol is built
//! for).
//!
//! ## Modules
//!
//! - `store` - id -> datum store, refcounts, subscriptions
//! - `workqueue` / `requestqueue` / `matcher` - task/worker matching
//! - `notify` - close/insert notification fan-out
//! - `sync` - server acquisition handshake
//! - `steal` - cross-server task redistribution
//! - `handlers` - tag -> handler dispatch
//! - `server` - the `Server` object and main loop
//! - `hostmap` - node-name table

pub mod store;
pub mod workqueue;
pub mod requestqueue;
pub mod matcher;
pub mod notify;
pub mod sync;
pub mod steal;
pub mod handlers;
pub mod server;
pub mod hostmap;

pub use matcher::{GetOutcome, Matcher, PutOutcome};
pub use requestqueue::RequestQueue;
pub use server::{Server, ServerConfig, ServerStats};
pub use store::{CreateProps, DataStore, Notifications};
pub use workqueue::WorkQueue;
pub use hostmap::{Hostmap, HostmapMode};
