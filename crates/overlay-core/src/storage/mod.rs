//! Storage (C1, interface only).
//!
//! Durable per-topic output records, applied-transaction marks, and
//! peer-interaction marks (§6.1). The persistent storage driver itself is
//! excluded (§1); [`memory::MemoryStorage`] is this crate's one reference
//! implementation, used for tests and the demo binary.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use bitcoin::Txid;

use crate::codec::Bundle;
use crate::error::StorageError;
use crate::types::{Outpoint, Output, Topic};

/// Whether a stored output's Merkle proof is mined, unmined, or has been
/// invalidated by a chain reorg (§4.4 `SyncInvalidatedOutputs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerkleState {
    Unmined,
    Mined,
    Invalidated,
}

/// Durable per-(outpoint, topic) output records plus applied-transaction
/// and peer-interaction marks (§6.1).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert `output`. Returns `false` without error if `(outpoint,
    /// topic)` already exists (no overwrite on duplicate key).
    async fn insert_output(&self, output: Output) -> Result<bool, StorageError>;

    async fn find_output(
        &self,
        outpoint: &Outpoint,
        topic: Option<&Topic>,
        spent: Option<bool>,
        include_bundle: bool,
    ) -> Result<Option<Output>, StorageError>;

    /// Parallel-array batch lookup: absent positions return `None`.
    async fn find_outputs(
        &self,
        outpoints: &[Outpoint],
        topic: &Topic,
        include_bundle: bool,
    ) -> Result<Vec<Option<Output>>, StorageError>;

    async fn find_outputs_for_transaction(
        &self,
        txid: &Txid,
        include_bundle: bool,
    ) -> Result<Vec<Output>, StorageError>;

    /// Ordered by score ascending.
    async fn find_utxos_for_topic(
        &self,
        topic: &Topic,
        since_score: f64,
        limit: Option<u32>,
        include_bundle: bool,
    ) -> Result<Vec<Output>, StorageError>;

    async fn has_outputs(
        &self,
        outpoints: &[Outpoint],
        topic: &Topic,
    ) -> Result<Vec<bool>, StorageError>;

    /// Idempotent.
    async fn delete_output(&self, outpoint: &Outpoint, topic: &Topic) -> Result<(), StorageError>;

    async fn mark_utxos_as_spent(
        &self,
        outpoints: &[Outpoint],
        topic: &Topic,
        spending_txid: Txid,
    ) -> Result<(), StorageError>;

    async fn update_consumed_by(
        &self,
        outpoint: &Outpoint,
        topic: &Topic,
        consumed_by: Vec<Outpoint>,
    ) -> Result<(), StorageError>;

    /// Rewrite the stored bundle for every output (any topic) produced by
    /// `txid`.
    async fn update_transaction_beef(
        &self,
        txid: &Txid,
        beef: Bundle,
    ) -> Result<(), StorageError>;

    /// Atomic with the corresponding Merkle-proof rewrite (§4.2).
    async fn update_output_block_height(
        &self,
        outpoint: &Outpoint,
        topic: &Topic,
        block_height: u32,
        block_index: u64,
        ancillary_beef: Option<Bundle>,
    ) -> Result<(), StorageError>;

    /// Idempotent write-once per `(txid, topic)`. Returns `true` if this
    /// call performed the insert, `false` if already present.
    async fn insert_applied_transaction(
        &self,
        txid: &Txid,
        topic: &Topic,
    ) -> Result<bool, StorageError>;

    async fn does_applied_transaction_exist(
        &self,
        txid: &Txid,
        topic: &Topic,
    ) -> Result<bool, StorageError>;

    /// Per-peer monotonic high-water mark. Implementations must reject
    /// (silently clamp to) regressions rather than store a lower score.
    async fn update_last_interaction(
        &self,
        host: &str,
        topic: &Topic,
        score: f64,
    ) -> Result<(), StorageError>;

    /// Returns `0.0` if absent.
    async fn get_last_interaction(&self, host: &str, topic: &Topic) -> Result<f64, StorageError>;

    async fn find_outpoints_by_merkle_state(
        &self,
        topic: &Topic,
        state: MerkleState,
        limit: usize,
    ) -> Result<Vec<Outpoint>, StorageError>;

    /// Mark a stored output's proof invalidated, e.g. by a chain reorg.
    /// Not part of the original interface table; added so
    /// `SyncInvalidatedOutputs` (§4.4) is exercisable without a real
    /// reorg detector. See DESIGN.md for the rationale.
    async fn mark_merkle_invalidated(
        &self,
        outpoint: &Outpoint,
        topic: &Topic,
    ) -> Result<(), StorageError>;
}
