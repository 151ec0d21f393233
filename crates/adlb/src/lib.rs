//! # adlb - distributed asynchronous load balancing
//!
//! A fixed cluster of ranks: the last `S` are servers hosting task
//! queues and a shared data store, the rest are workers that submit
//! tasks, fetch tasks, and read/write shared data. Every accepted task
//! is matched to exactly one worker (or one team, for parallel tasks);
//! data objects move monotonically through a write/read/destroy
//! lifecycle driven by split refcounts.
//!
//! ## Quick Start
//!
//! ```ignore
//! use adlb::{init, Role};
//! use adlb_comm::Fabric;
//!
//! let fabric = Fabric::new(4); // ranks 0-2 work, rank 3 serves
//! for rank in 0..4 {
//!     let endpoint = fabric.endpoint(rank);
//!     std::thread::spawn(move || match adlb::init(endpoint, 1, 2) {
//!         Role::Server(mut s) => {
//!             s.run().unwrap();
//!         }
//!         Role::Worker(mut w) => {
//!             w.put(b"task", 1, adlb::RANK_ANY, w.rank(), 0, 1).unwrap();
//!             while let Some(work) = w.get(1).unwrap() {
//!                 // run work.payload
//!             }
//!             w.finalize().unwrap();
//!         }
//!     });
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  workers                 servers (last S ranks)
//!  ┌──────┐  PUT/GET   ┌───────────────────────────┐
//!  │ rank │ ─────────► │ matcher: work q ⇄ req q   │
//!  │ 0..W │ ◄───────── │ data store (id → datum)   │
//!  └──────┘  WORKUNIT  │ checkpoint log (adlb-xpt) │
//!                      └─────────▲─────────────────┘
//!                                │ sync / steal
//!                      ┌─────────▼─────────────────┐
//!                      │        peer servers       │
//!                      └───────────────────────────┘
//! ```

pub mod checkpoint;
pub mod client;

pub use checkpoint::Checkpoint;
pub use client::{Client, Work};

// Re-export core types
pub use adlb_core::error::{code, AdlbError, AdlbResult, DataError};
pub use adlb_core::msgs::RetrieveRc;
pub use adlb_core::rank::Layout;
pub use adlb_core::value::{ContainerVal, DataType, FileRef, MultisetVal, StructVal, Value};
pub use adlb_core::workunit::{RANK_ANY, TYPE_CONTROL};

// Re-export logging macros and env utilities
pub use adlb_core::{adlb_dbg, adlb_error, adlb_info, adlb_trace, adlb_warn};
pub use adlb_core::{env_get, env_get_bool, env_get_opt, env_is_set};

// Re-export the engine and transport surface
pub use adlb_comm::{Comm, Fabric, FabricEndpoint};
pub use adlb_server::{CreateProps, Hostmap, HostmapMode, Server, ServerConfig};

/// Checkpoint log (rank-striped, CRC-protected, resynchronizing).
pub use adlb_xpt as xpt;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What a rank becomes after init.
pub enum Role<C: Comm> {
    Worker(Client<C>),
    Server(Box<Server<C>>),
}

/// Split a rank into its role. `servers` is the number of server ranks
/// (the last ones); `ntypes` the number of application work types
/// (type 0 is reserved for CONTROL notifications).
pub fn init<C: Comm>(comm: C, servers: i32, ntypes: usize) -> Role<C> {
    adlb_core::dprint::init();
    adlb_core::dprint::set_rank(comm.rank());
    let layout = Layout::new(comm.size(), servers);
    if layout.is_server(comm.rank()) {
        let config = ServerConfig {
            ntypes,
            ..Default::default()
        };
        Role::Server(Box::new(Server::new(comm, layout, config)))
    } else {
        Role::Worker(Client::new(comm, layout))
    }
}
