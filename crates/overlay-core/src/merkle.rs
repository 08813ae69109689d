//! Merkle proof ingestion (C8, §4.2): upgrading a topic's stored outputs
//! from unmined to Merkle-proven once a producing transaction's block
//! inclusion proof becomes available.

use std::sync::Arc;

use bitcoin::Txid;

use crate::chain::ChainValidator;
use crate::codec::MerkleProof;
use crate::error::OverlayError;
use crate::lookup::LookupService;
use crate::storage::Storage;

/// Applies incoming Merkle proofs to every stored output a transaction
/// produced, across every topic that admitted one.
pub struct MerkleProofHandler {
    storage: Arc<dyn Storage>,
    chain_validator: Arc<dyn ChainValidator>,
    lookup_services: Vec<Arc<dyn LookupService>>,
}

impl MerkleProofHandler {
    pub fn new(storage: Arc<dyn Storage>, chain_validator: Arc<dyn ChainValidator>) -> Self {
        Self {
            storage,
            chain_validator,
            lookup_services: Vec::new(),
        }
    }

    pub fn register_lookup_service(&mut self, service: Arc<dyn LookupService>) {
        self.lookup_services.push(service);
    }

    /// Verify `proof` against the known header chain, then attach it to
    /// every stored output `txid` produced, pruning now-redundant
    /// ancestor transactions from each output's bundle, and recursing into
    /// each upgraded output's `consumed_by` chain so consumers that embed
    /// `txid` as an unproven ancestor get the same proof structurally
    /// folded into their own bundle (§4.2 updateMerkleProof). Idempotent:
    /// an output already carrying an equivalent proof is left untouched.
    /// Returns the number of outputs upgraded.
    pub async fn handle_new_merkle_proof(
        &self,
        txid: &Txid,
        proof: MerkleProof,
    ) -> Result<usize, OverlayError> {
        self.chain_validator.verify_proof(txid, &proof).await?;

        let outputs = self.storage.find_outputs_for_transaction(txid, true).await?;
        if outputs.is_empty() {
            // §4.2 step 2: no output belongs to this txid yet. Not an
            // error — the proof may simply have arrived for a transaction
            // this node's topics never admitted.
            return Ok(0);
        }

        let block_index = proof
            .offset_of(txid)
            .ok_or_else(|| OverlayError::NotFoundInProof(*txid))?;

        let mut upgraded = 0;
        for output in outputs {
            upgraded += self
                .update_merkle_proof(output, txid, &proof, block_index, true)
                .await?;
        }

        Ok(upgraded)
    }

    /// Attach `proof` (proving ancestor transaction `proven_txid`) into
    /// `output`'s bundle and recurse into its `consumed_by` chain so every
    /// consumer that structurally embeds `proven_txid` as an ancestor gets
    /// the same rewrite. `is_own_proof` is `true` only at the root call,
    /// where `output` is itself produced by `proven_txid` — only then do
    /// we advance the output's own `block_height`/`block_index`, since a
    /// consumer transaction's own mined status is unrelated to one of its
    /// ancestors getting proven. Returns the count of outputs upgraded (0
    /// if `output` already carried an equivalent proof).
    fn update_merkle_proof<'a>(
        &'a self,
        output: crate::types::Output,
        proven_txid: &'a Txid,
        proof: &'a MerkleProof,
        block_index: u64,
        is_own_proof: bool,
    ) -> futures::future::BoxFuture<'a, Result<usize, OverlayError>> {
        use futures::future::FutureExt;
        async move {
            if output.beef.has_equivalent_proof(proven_txid, proof) {
                return Ok(0);
            }

            let mut bundle = output.beef.clone();
            if !bundle.attach_proof(proven_txid, proof.clone()) {
                return Err(OverlayError::MissingDependencyTransaction(*proven_txid));
            }
            bundle.prune_unreferenced_ancestors();
            self.storage
                .update_transaction_beef(&output.outpoint.txid, bundle)
                .await?;

            if is_own_proof {
                self.storage
                    .update_output_block_height(
                        &output.outpoint,
                        &output.topic,
                        proof.block_height,
                        block_index,
                        output.ancillary_beef.clone(),
                    )
                    .await?;
                for service in &self.lookup_services {
                    service
                        .output_block_height_updated(
                            &output.topic,
                            &output.outpoint,
                            proof.block_height,
                            block_index,
                        )
                        .await?;
                }
            }

            let mut upgraded = 1;
            for consumer_outpoint in &output.consumed_by {
                let Some(consumer) = self
                    .storage
                    .find_output(consumer_outpoint, Some(&output.topic), None, true)
                    .await?
                else {
                    continue;
                };
                if !consumer.is_unmined() {
                    // The consumer already has its own proven path; the
                    // proof is no longer structurally embedded in its
                    // bundle, so there is nothing left to upgrade.
                    continue;
                }
                upgraded += self
                    .update_merkle_proof(consumer, proven_txid, proof, block_index, false)
                    .await?;
            }
            Ok(upgraded)
        }
        .boxed()
    }
}
