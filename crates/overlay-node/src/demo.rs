//! Stand-in collaborator implementations for the demo binary.
//!
//! `overlay-core`'s `TopicManager`, `ChainValidator`, `Broadcaster`,
//! `PeerPropagator`, `Advertiser`, and `LookupResolver` are interface-only
//! seams; a real deployment plugs in topic scripting, SPV validation, and
//! a base-chain client. This module provides the simplest possible
//! implementation of each so the binary has something runnable to wire
//! up, the same role `cory-core`'s mocks play in tests but meant to be
//! driven interactively rather than asserted against.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{ScriptBuf, Txid};

use overlay_core::advertiser::{Advertisement, Advertiser, Broadcaster, LookupResolver, PeerPropagator};
use overlay_core::chain::ChainValidator;
use overlay_core::codec::{Bundle, MerkleProof, RawTx, TxOut};
use overlay_core::error::OverlayError;
use overlay_core::topic::{NeededInput, TopicManager};
use overlay_core::types::{Admittance, PreviousCoin, Topic};

/// Admits every output of every transaction it sees and retains every
/// previous coin, so a submitted demo transaction always has somewhere
/// to land.
pub struct AdmitAllTopicManager {
    topic: Topic,
}

impl AdmitAllTopicManager {
    pub fn new(topic: Topic) -> Self {
        Self { topic }
    }
}

#[async_trait]
impl TopicManager for AdmitAllTopicManager {
    fn topic(&self) -> &Topic {
        &self.topic
    }

    async fn identify_admissible_outputs(
        &self,
        bundle: &Bundle,
        previous_coins: &[PreviousCoin],
    ) -> Result<Admittance, OverlayError> {
        let outputs_to_admit = bundle
            .primary()
            .map(|entry| (0..entry.tx.outputs.len() as u32).collect())
            .unwrap_or_default();
        Ok(Admittance {
            outputs_to_admit,
            coins_to_retain: previous_coins.iter().map(|coin| coin.vin).collect(),
            ancillary_txids: Default::default(),
        })
    }

    fn needed_inputs(&self, tx: &RawTx) -> Vec<NeededInput> {
        tx.inputs
            .iter()
            .map(|&outpoint| NeededInput { outpoint, metadata: false })
            .collect()
    }
}

/// Trusts every bundle and proof unconditionally. There is no header
/// chain behind this binary to validate against.
pub struct TrustingChainValidator;

#[async_trait]
impl ChainValidator for TrustingChainValidator {
    async fn verify_bundle(&self, _bundle: &Bundle) -> Result<(), OverlayError> {
        Ok(())
    }

    async fn verify_proof(&self, _txid: &Txid, _proof: &MerkleProof) -> Result<(), OverlayError> {
        Ok(())
    }
}

/// Logs instead of actually broadcasting to a base-chain node.
pub struct LoggingBroadcaster;

#[async_trait]
impl Broadcaster for LoggingBroadcaster {
    async fn broadcast(&self, tx: &RawTx) -> Result<(), OverlayError> {
        tracing::info!(txid = %tx.txid, "would broadcast to base chain");
        Ok(())
    }
}

/// Logs instead of actually propagating to discovered overlay peers.
pub struct LoggingPeerPropagator;

#[async_trait]
impl PeerPropagator for LoggingPeerPropagator {
    async fn propagate(&self, topic: &Topic, tx: &RawTx, peers: &[String]) -> Result<(), OverlayError> {
        tracing::info!(%topic, txid = %tx.txid, peer_count = peers.len(), "would propagate to overlay peers");
        Ok(())
    }
}

/// Parses nothing; this binary doesn't implement the SHIP/SLAP on-chain
/// advertisement format (§1 Non-goal).
pub struct NoopAdvertiser;

#[async_trait]
impl Advertiser for NoopAdvertiser {
    fn parse_advertisements(&self, _raw_outputs: &[Vec<u8>]) -> Vec<Advertisement> {
        Vec::new()
    }
}

/// Reports no advertisements for any topic. `SyncMode::Ship` is
/// configurable but this binary has no live SHIP lookup service to query;
/// use `SyncMode::Peers` with a static host list for the demo.
pub struct NoopLookupResolver;

#[async_trait]
impl LookupResolver for NoopLookupResolver {
    async fn query(&self, _topic: &Topic) -> Result<Vec<Vec<u8>>, OverlayError> {
        Ok(Vec::new())
    }
}

/// Builds a transaction deterministic enough for two runs against the
/// same counter value to agree, but distinct across submissions.
pub fn make_demo_tx(topic: &Topic, num_outputs: usize) -> RawTx {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut preimage = topic.0.clone().into_bytes();
    preimage.extend_from_slice(&sequence.to_le_bytes());
    let txid = Txid::from_byte_array(bitcoin::hashes::sha256d::Hash::hash(&preimage).to_byte_array());

    RawTx {
        txid,
        inputs: Vec::new(),
        outputs: (0..num_outputs)
            .map(|_| TxOut { script: ScriptBuf::new(), satoshis: 1000 })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_demo_tx_is_distinct_across_calls() {
        let topic = Topic::new("alpha");
        let a = make_demo_tx(&topic, 1);
        let b = make_demo_tx(&topic, 1);
        assert_ne!(a.txid, b.txid);
    }

    #[tokio::test]
    async fn admit_all_admits_every_output() {
        let manager = AdmitAllTopicManager::new(Topic::new("alpha"));
        let tx = make_demo_tx(&Topic::new("alpha"), 3);
        let bundle = Bundle::single(tx);
        let admittance = manager.identify_admissible_outputs(&bundle, &[]).await.unwrap();
        assert_eq!(admittance.outputs_to_admit, vec![0, 1, 2]);
    }
}
