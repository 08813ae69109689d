//! GASP wire types (§6.2): the JSON-over-HTTP envelopes exchanged between
//! peers. Payload types (`Outpoint`, `RawTx`, `Bundle`, `MerkleProof`) are
//! reused directly from [`crate::types`] and [`crate::codec`] rather than
//! duplicated into parallel wire structs, since they already round-trip
//! through `serde_json`.

use serde::{Deserialize, Serialize};

use crate::codec::{Bundle, MerkleProof, RawTx};
use crate::types::{Outpoint, Topic};

/// Bumped whenever a wire-incompatible change is made to any type in this
/// module. A peer returning a different version aborts the sync (§4.3).
pub const PROTOCOL_VERSION: u32 = 1;

/// First message of a GASP exchange: "send me your UTXOs for `topic`
/// scored above `since`".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialRequest {
    pub version: u32,
    pub topic: Topic,
    pub since: f64,
    pub limit: u32,
}

/// One page of a peer's UTXO set for a topic, ordered by score ascending.
/// `since` is the cursor to pass as the next page's `InitialRequest.since`
/// (the last returned item's score, or the request's own `since` if the
/// page was empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialResponse {
    pub version: u32,
    pub utxo_list: Vec<Outpoint>,
    pub since: f64,
}

/// Requests the graph node (producing transaction, proof, ancillary
/// bundle) for a single outpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRequest {
    pub graph_id: Outpoint,
    /// Whether the requester also wants ancillary dependency metadata
    /// alongside the primary transaction.
    pub metadata: bool,
}

/// One resolved graph node: the outpoint's producing transaction, its
/// Merkle proof if mined, and any ancillary dependency bundle the topic
/// retained alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub graph_id: Outpoint,
    pub tx: RawTx,
    pub proof: Option<MerkleProof>,
    pub ancillary_beef: Option<Bundle>,
}
