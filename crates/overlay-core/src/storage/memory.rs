//! In-memory reference [`Storage`] implementation.
//!
//! Analogous in spirit to the teacher's `LabelStore`: an in-process,
//! `tokio::sync::RwLock`-guarded map, here keyed by `(Topic, Outpoint)`
//! with separate maps for applied-transaction marks and peer-interaction
//! scores. This is the crate's only `Storage` implementation; a real
//! persistent driver is an excluded external concern (§1).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bitcoin::Txid;
use tokio::sync::RwLock;

use crate::codec::Bundle;
use crate::error::StorageError;
use crate::types::{Outpoint, Output, Topic};

use super::{MerkleState, Storage};

#[derive(Default)]
struct State {
    outputs: HashMap<(Topic, Outpoint), Output>,
    applied: HashSet<(Txid, Topic)>,
    last_interaction: HashMap<(String, Topic), f64>,
    invalidated: HashSet<(Topic, Outpoint)>,
}

/// In-memory [`Storage`]. Cheap to clone via `Arc` at the call site;
/// internal state lives behind a single `RwLock`, matching `LabelStore`'s
/// single-writer-at-a-time design rather than fine-grained sharding.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elide bundle contents when a caller asked not to include them,
    /// keeping only the primary txid so callers can still identify the
    /// output's producing transaction.
    fn project(mut output: Output, include_bundle: bool) -> Output {
        if !include_bundle {
            output.beef = Bundle {
                primary_txid: output.beef.primary_txid,
                transactions: Vec::new(),
            };
            output.ancillary_beef = None;
        }
        output
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert_output(&self, output: Output) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        let key = (output.topic.clone(), output.outpoint);
        if state.outputs.contains_key(&key) {
            return Ok(false);
        }
        state.outputs.insert(key, output);
        Ok(true)
    }

    async fn find_output(
        &self,
        outpoint: &Outpoint,
        topic: Option<&Topic>,
        spent: Option<bool>,
        include_bundle: bool,
    ) -> Result<Option<Output>, StorageError> {
        let state = self.state.read().await;
        let found = match topic {
            Some(topic) => state.outputs.get(&(topic.clone(), *outpoint)).cloned(),
            None => state
                .outputs
                .iter()
                .find(|((_, op), _)| op == outpoint)
                .map(|(_, output)| output.clone()),
        };
        let found = found.filter(|output| spent.is_none_or(|want| output.spent == want));
        Ok(found.map(|output| Self::project(output, include_bundle)))
    }

    async fn find_outputs(
        &self,
        outpoints: &[Outpoint],
        topic: &Topic,
        include_bundle: bool,
    ) -> Result<Vec<Option<Output>>, StorageError> {
        let state = self.state.read().await;
        Ok(outpoints
            .iter()
            .map(|outpoint| {
                state
                    .outputs
                    .get(&(topic.clone(), *outpoint))
                    .cloned()
                    .map(|output| Self::project(output, include_bundle))
            })
            .collect())
    }

    async fn find_outputs_for_transaction(
        &self,
        txid: &Txid,
        include_bundle: bool,
    ) -> Result<Vec<Output>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .outputs
            .values()
            .filter(|output| &output.outpoint.txid == txid)
            .cloned()
            .map(|output| Self::project(output, include_bundle))
            .collect())
    }

    async fn find_utxos_for_topic(
        &self,
        topic: &Topic,
        since_score: f64,
        limit: Option<u32>,
        include_bundle: bool,
    ) -> Result<Vec<Output>, StorageError> {
        let state = self.state.read().await;
        let mut matching: Vec<Output> = state
            .outputs
            .iter()
            .filter(|((t, _), output)| t == topic && output.score > since_score)
            .map(|(_, output)| output.clone())
            .collect();
        matching.sort_by(|a, b| a.score.total_cmp(&b.score));
        if let Some(limit) = limit {
            matching.truncate(limit as usize);
        }
        Ok(matching
            .into_iter()
            .map(|output| Self::project(output, include_bundle))
            .collect())
    }

    async fn has_outputs(
        &self,
        outpoints: &[Outpoint],
        topic: &Topic,
    ) -> Result<Vec<bool>, StorageError> {
        let state = self.state.read().await;
        Ok(outpoints
            .iter()
            .map(|outpoint| state.outputs.contains_key(&(topic.clone(), *outpoint)))
            .collect())
    }

    async fn delete_output(&self, outpoint: &Outpoint, topic: &Topic) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.outputs.remove(&(topic.clone(), *outpoint));
        state.invalidated.remove(&(topic.clone(), *outpoint));
        Ok(())
    }

    async fn mark_utxos_as_spent(
        &self,
        outpoints: &[Outpoint],
        topic: &Topic,
        _spending_txid: Txid,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        for outpoint in outpoints {
            if let Some(output) = state.outputs.get_mut(&(topic.clone(), *outpoint)) {
                output.spent = true;
            }
        }
        Ok(())
    }

    async fn update_consumed_by(
        &self,
        outpoint: &Outpoint,
        topic: &Topic,
        consumed_by: Vec<Outpoint>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        if let Some(output) = state.outputs.get_mut(&(topic.clone(), *outpoint)) {
            output.consumed_by = consumed_by.into_iter().collect();
        }
        Ok(())
    }

    async fn update_transaction_beef(
        &self,
        txid: &Txid,
        beef: Bundle,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        for output in state.outputs.values_mut() {
            if &output.outpoint.txid == txid {
                output.beef = beef.clone();
            }
        }
        Ok(())
    }

    async fn update_output_block_height(
        &self,
        outpoint: &Outpoint,
        topic: &Topic,
        block_height: u32,
        block_index: u64,
        ancillary_beef: Option<Bundle>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        if let Some(output) = state.outputs.get_mut(&(topic.clone(), *outpoint)) {
            output.block_height = block_height;
            output.block_index = block_index;
            output.ancillary_beef = ancillary_beef;
        }
        state.invalidated.remove(&(topic.clone(), *outpoint));
        Ok(())
    }

    async fn insert_applied_transaction(
        &self,
        txid: &Txid,
        topic: &Topic,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        Ok(state.applied.insert((*txid, topic.clone())))
    }

    async fn does_applied_transaction_exist(
        &self,
        txid: &Txid,
        topic: &Topic,
    ) -> Result<bool, StorageError> {
        let state = self.state.read().await;
        Ok(state.applied.contains(&(*txid, topic.clone())))
    }

    async fn update_last_interaction(
        &self,
        host: &str,
        topic: &Topic,
        score: f64,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let entry = state
            .last_interaction
            .entry((host.to_owned(), topic.clone()))
            .or_insert(0.0);
        if score > *entry {
            *entry = score;
        }
        Ok(())
    }

    async fn get_last_interaction(&self, host: &str, topic: &Topic) -> Result<f64, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .last_interaction
            .get(&(host.to_owned(), topic.clone()))
            .copied()
            .unwrap_or(0.0))
    }

    async fn find_outpoints_by_merkle_state(
        &self,
        topic: &Topic,
        state_filter: MerkleState,
        limit: usize,
    ) -> Result<Vec<Outpoint>, StorageError> {
        let state = self.state.read().await;
        let mut matching: Vec<Outpoint> = state
            .outputs
            .iter()
            .filter(|((t, outpoint), output)| {
                t == topic
                    && match state_filter {
                        MerkleState::Unmined => output.is_unmined(),
                        MerkleState::Mined => !output.is_unmined(),
                        MerkleState::Invalidated => {
                            state.invalidated.contains(&(topic.clone(), **outpoint))
                        }
                    }
            })
            .map(|((_, outpoint), _)| *outpoint)
            .collect();
        matching.sort();
        matching.truncate(limit);
        Ok(matching)
    }

    async fn mark_merkle_invalidated(
        &self,
        outpoint: &Outpoint,
        topic: &Topic,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.invalidated.insert((topic.clone(), *outpoint));
        Ok(())
    }
}
