//! GASP (Graph Aware Synchronization Protocol, C6/C9): peer UTXO-set
//! pagination, concurrent dependency-graph resolution, and anchor
//! validation/finalization (§4.3).
//!
//! Peer discovery and the SHIP/SLAP advertisement format are handled by
//! [`crate::advertiser`] and [`crate::orchestrator`]; this module is the
//! wire protocol and the graph-walking engine itself.

pub mod engine;
pub mod local;
pub mod remote;
pub mod wire;

pub use engine::{GaspEngine, GraphLimits, SyncOutcome};
pub use local::LocalGaspService;
pub use remote::{HttpRemotePeer, RemotePeer};
