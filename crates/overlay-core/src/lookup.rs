//! Lookup Service (C4, interface only).
//!
//! A side-channel index notified of admit/spend/evict/height events. Query
//! answering is excluded (§1) — this module only defines the notification
//! seam the submission pipeline and Merkle proof handler call through.

use async_trait::async_trait;
use bitcoin::ScriptBuf;

use crate::codec::Bundle;
use crate::error::OverlayError;
use crate::types::{Outpoint, Output, Topic};

/// Context about the transaction input that spent an output, passed to
/// `output_spent` so a lookup service can index spend provenance.
#[derive(Debug, Clone)]
pub struct SpendContext {
    pub spending_txid: bitcoin::Txid,
    pub input_index: u32,
    pub unlocking_script: ScriptBuf,
    pub sequence: u32,
    pub spending_beef: Bundle,
}

/// Side-channel index notified of admit/spend/evict/height events (§4.1,
/// §4.2, §9 "lookup-service back-pressure").
#[async_trait]
pub trait LookupService: Send + Sync {
    /// §4.1 step 6: called once per spent previous coin, strictly before
    /// any `output_admitted` call for the same topic within one Submit.
    async fn output_spent(
        &self,
        topic: &Topic,
        outpoint: &Outpoint,
        context: &SpendContext,
    ) -> Result<(), OverlayError>;

    /// §4.1 step 9d: called once per newly admitted output.
    async fn output_admitted(&self, output: &Output) -> Result<(), OverlayError>;

    /// §4.1 deep-delete: called when an output with no remaining
    /// `consumed_by` entries is about to be removed from storage.
    async fn output_retention_lost(
        &self,
        topic: &Topic,
        outpoint: &Outpoint,
    ) -> Result<(), OverlayError>;

    /// §4.2 step 5: called after a transaction's outputs are upgraded
    /// from unmined to Merkle-proven.
    async fn output_block_height_updated(
        &self,
        topic: &Topic,
        outpoint: &Outpoint,
        block_height: u32,
        block_index: u64,
    ) -> Result<(), OverlayError>;
}
