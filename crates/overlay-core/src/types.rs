//! Domain types for the overlay sync engine's per-topic UTXO model.
//!
//! Contains the outpoint/topic identifiers, the per-topic `Output` record,
//! the idempotency and peer-progress marks, and the `Steak` admittance
//! result returned by the submission pipeline.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use bitcoin::{ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use crate::codec::Bundle;

// ==============================================================================
// Topic
// ==============================================================================

/// A named overlay view with its own admissibility manager and UTXO set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic(pub String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ==============================================================================
// Outpoint
// ==============================================================================

/// `(txid, index)`. Totally ordered by byte comparison of `txid || index`,
/// matching the wire/storage ordering the spec requires for pagination
/// and deterministic set operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: Txid,
    pub index: u32,
}

impl Outpoint {
    pub fn new(txid: Txid, index: u32) -> Self {
        Self { txid, index }
    }

    /// String form `<hex-txid>.<decimal-index>`.
    pub fn to_key_string(&self) -> String {
        format!("{}.{}", self.txid, self.index)
    }

    fn sort_key(&self) -> ([u8; 32], u32) {
        (self.txid.to_byte_array(), self.index)
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key_string())
    }
}

impl PartialOrd for Outpoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Outpoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

// ==============================================================================
// Output
// ==============================================================================

/// A per-topic UTXO record (§3 "Output").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub outpoint: Outpoint,
    pub topic: Topic,
    pub script: ScriptBuf,
    pub satoshis: u64,
    pub spent: bool,
    /// `0` means unmined.
    pub block_height: u32,
    pub block_index: u64,
    /// Monotonic per-topic ordering key used for pagination.
    pub score: f64,
    /// Outpoints this output's producing transaction spent, intersected
    /// with outputs the topic admitted.
    pub outputs_consumed: Vec<Outpoint>,
    /// Outpoints (in later transactions) that have spent this output
    /// within the same topic.
    pub consumed_by: BTreeSet<Outpoint>,
    /// Self-contained transaction bundle proving ancestry up to
    /// Merkle-anchored transactions.
    pub beef: Bundle,
    pub ancillary_txids: Vec<Txid>,
    pub ancillary_beef: Option<Bundle>,
}

impl Output {
    pub fn is_unmined(&self) -> bool {
        self.block_height == 0
    }
}

// ==============================================================================
// Idempotency and Peer Progress Marks
// ==============================================================================

/// `(txid, topic)` idempotency mark (§3 "AppliedTransaction").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppliedTransaction {
    pub txid: Txid,
    pub topic: Topic,
}

/// `(host, topic) -> score` monotonic high-water mark of peer scores
/// already ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInteraction {
    pub host: String,
    pub topic: Topic,
    pub score: f64,
}

// ==============================================================================
// Submission Mode and Steak
// ==============================================================================

/// `Submit`'s processing mode. Historical mode is used exclusively by GASP
/// finalization and must never broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Current,
    Historical,
}

/// A tagged transaction bundle submitted to the pipeline.
#[derive(Debug, Clone)]
pub struct TaggedBeef {
    pub topics: Vec<Topic>,
    pub beef: Bundle,
    pub off_chain_values: Option<serde_json::Value>,
}

/// Per-topic admittance outcome: which outputs were admitted, which prior
/// coins were retained, and which were removed by deep-delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicAdmittance {
    pub outputs_admitted: Vec<u32>,
    pub coins_retained: Vec<u32>,
    pub coins_removed: Vec<u32>,
}

impl TopicAdmittance {
    pub fn is_empty(&self) -> bool {
        self.outputs_admitted.is_empty()
            && self.coins_retained.is_empty()
            && self.coins_removed.is_empty()
    }
}

/// The per-topic admittance result returned by `Submit` (§ Glossary
/// "Steak").
#[derive(Debug, Clone, Default)]
pub struct Steak {
    pub by_topic: std::collections::HashMap<Topic, TopicAdmittance>,
}

impl Steak {
    pub fn empty_for(topics: &[Topic]) -> Self {
        let mut by_topic = std::collections::HashMap::new();
        for topic in topics {
            by_topic.insert(topic.clone(), TopicAdmittance::default());
        }
        Self { by_topic }
    }
}

// ==============================================================================
// Admissibility (Topic Manager response)
// ==============================================================================

/// The admissibility decision a [`crate::topic::TopicManager`] returns for
/// one transaction.
#[derive(Debug, Clone, Default)]
pub struct Admittance {
    pub outputs_to_admit: Vec<u32>,
    pub coins_to_retain: Vec<u32>,
    pub ancillary_txids: HashSet<Txid>,
}

/// A previously-stored output the pipeline is presenting to a topic
/// manager as a candidate "previous coin".
#[derive(Debug, Clone)]
pub struct PreviousCoin {
    pub vin: u32,
    pub output: Output,
}
