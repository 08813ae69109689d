//! Builders and mock collaborator implementations shared by this crate's
//! unit tests and `tests/` integration suites.
//!
//! Grounded in the teacher's `test_util.rs` (raw-transaction builders) and
//! `rpc/mock.rs` (a configurable mock implementing the collaborator trait,
//! recording calls for later assertion).

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::{ScriptBuf, Txid};

use crate::advertiser::{Advertisement, Advertiser, Broadcaster, LookupResolver, PeerPropagator};
use crate::chain::ChainValidator;
use crate::codec::{Bundle, BundleTx, MerkleProof, RawTx, TxOut};
use crate::error::OverlayError;
use crate::lookup::{LookupService, SpendContext};
use crate::topic::{NeededInput, TopicManager};
use crate::types::{Admittance, Outpoint, Output, PreviousCoin, Topic};

// ==============================================================================
// Raw data builders
// ==============================================================================

pub fn txid_from_byte(b: u8) -> Txid {
    Txid::from_byte_array([b; 32])
}

pub fn topic(name: &str) -> Topic {
    Topic::new(name)
}

pub fn simple_output(satoshis: u64) -> TxOut {
    TxOut {
        script: ScriptBuf::new(),
        satoshis,
    }
}

pub fn make_raw_tx(txid: Txid, inputs: Vec<Outpoint>, num_outputs: usize) -> RawTx {
    RawTx {
        txid,
        inputs,
        outputs: (0..num_outputs).map(|_| simple_output(1000)).collect(),
    }
}

/// A bundle whose primary transaction spends nothing and produces one
/// 1000-satoshi output, with `ancestors` prepended ancestor-first.
pub fn bundle_for(primary_txid: Txid, ancestors: &[RawTx]) -> Bundle {
    let primary = make_raw_tx(primary_txid, Vec::new(), 1);
    let mut transactions: Vec<BundleTx> = ancestors
        .iter()
        .cloned()
        .map(|tx| BundleTx { tx, proof: None })
        .collect();
    transactions.push(BundleTx {
        tx: primary,
        proof: None,
    });
    Bundle {
        primary_txid,
        transactions,
    }
}

pub fn merkle_proof(block_height: u32, leaves: Vec<(Txid, u64)>) -> MerkleProof {
    let root = leaves.first().map(|(txid, _)| txid.to_byte_array()).unwrap_or([0; 32]);
    MerkleProof {
        block_height,
        leaves,
        root,
    }
}

// ==============================================================================
// MockTopicManager
// ==============================================================================

/// Configurable [`TopicManager`]. Defaults to admitting nothing; use
/// [`MockTopicManager::admit_all`] or [`MockTopicManager::admit_vouts`] to
/// opt specific outputs in.
pub struct MockTopicManager {
    topic: Topic,
    admit_all: bool,
    admit_vouts: Vec<u32>,
    retain_all: bool,
    retain_vins: Vec<u32>,
    ancillary: HashSet<Txid>,
    needed: Vec<NeededInput>,
}

impl MockTopicManager {
    pub fn new(topic: impl Into<Topic>) -> Self {
        Self {
            topic: topic.into(),
            admit_all: false,
            admit_vouts: Vec::new(),
            retain_all: false,
            retain_vins: Vec::new(),
            ancillary: HashSet::new(),
            needed: Vec::new(),
        }
    }

    pub fn admit_all(mut self) -> Self {
        self.admit_all = true;
        self.retain_all = true;
        self
    }

    pub fn admit_vouts(mut self, vouts: Vec<u32>) -> Self {
        self.admit_vouts = vouts;
        self
    }

    pub fn retain_vins(mut self, vins: Vec<u32>) -> Self {
        self.retain_vins = vins;
        self
    }

    pub fn ancillary_txids(mut self, txids: HashSet<Txid>) -> Self {
        self.ancillary = txids;
        self
    }

    pub fn needed_inputs(mut self, needed: Vec<NeededInput>) -> Self {
        self.needed = needed;
        self
    }
}

#[async_trait]
impl TopicManager for MockTopicManager {
    fn topic(&self) -> &Topic {
        &self.topic
    }

    async fn identify_admissible_outputs(
        &self,
        bundle: &Bundle,
        previous_coins: &[PreviousCoin],
    ) -> Result<Admittance, OverlayError> {
        let outputs_to_admit = if self.admit_all {
            bundle
                .primary()
                .map(|entry| (0..entry.tx.outputs.len() as u32).collect())
                .unwrap_or_default()
        } else {
            self.admit_vouts.clone()
        };
        let coins_to_retain = if self.retain_all {
            previous_coins.iter().map(|coin| coin.vin).collect()
        } else {
            self.retain_vins.clone()
        };
        Ok(Admittance {
            outputs_to_admit,
            coins_to_retain,
            ancillary_txids: self.ancillary.clone(),
        })
    }

    fn needed_inputs(&self, _tx: &RawTx) -> Vec<NeededInput> {
        self.needed.clone()
    }
}

// ==============================================================================
// MockLookupService
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupEvent {
    Spent(Outpoint),
    Admitted(Outpoint),
    RetentionLost(Outpoint),
    HeightUpdated(Outpoint, u32),
}

/// Records every call it receives for later assertion, matching the
/// teacher's "builder records calls, test asserts against the log" mock
/// style.
#[derive(Default)]
pub struct MockLookupService {
    events: Mutex<Vec<LookupEvent>>,
}

impl MockLookupService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LookupEvent> {
        self.events.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl LookupService for MockLookupService {
    async fn output_spent(
        &self,
        _topic: &Topic,
        outpoint: &Outpoint,
        _context: &SpendContext,
    ) -> Result<(), OverlayError> {
        self.events.lock().expect("mock lock poisoned").push(LookupEvent::Spent(*outpoint));
        Ok(())
    }

    async fn output_admitted(&self, output: &Output) -> Result<(), OverlayError> {
        self.events
            .lock()
            .expect("mock lock poisoned")
            .push(LookupEvent::Admitted(output.outpoint));
        Ok(())
    }

    async fn output_retention_lost(
        &self,
        _topic: &Topic,
        outpoint: &Outpoint,
    ) -> Result<(), OverlayError> {
        self.events
            .lock()
            .expect("mock lock poisoned")
            .push(LookupEvent::RetentionLost(*outpoint));
        Ok(())
    }

    async fn output_block_height_updated(
        &self,
        _topic: &Topic,
        outpoint: &Outpoint,
        block_height: u32,
        _block_index: u64,
    ) -> Result<(), OverlayError> {
        self.events
            .lock()
            .expect("mock lock poisoned")
            .push(LookupEvent::HeightUpdated(*outpoint, block_height));
        Ok(())
    }
}

// ==============================================================================
// MockChainValidator
// ==============================================================================

/// Validates everything unless `txid` is listed in `reject`.
#[derive(Default)]
pub struct MockChainValidator {
    reject: HashSet<Txid>,
}

impl MockChainValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, txid: Txid) -> Self {
        self.reject.insert(txid);
        self
    }
}

#[async_trait]
impl ChainValidator for MockChainValidator {
    async fn verify_bundle(&self, bundle: &Bundle) -> Result<(), OverlayError> {
        if self.reject.contains(&bundle.primary_txid) {
            return Err(OverlayError::MerkleRootMismatch(bundle.primary_txid));
        }
        for ancestor in bundle.ancestors() {
            if self.reject.contains(&ancestor.tx.txid) {
                return Err(OverlayError::MerkleRootMismatch(ancestor.tx.txid));
            }
        }
        Ok(())
    }

    async fn verify_proof(&self, txid: &Txid, _proof: &MerkleProof) -> Result<(), OverlayError> {
        if self.reject.contains(txid) {
            return Err(OverlayError::MerkleRootMismatch(*txid));
        }
        Ok(())
    }
}

// ==============================================================================
// MockBroadcaster / MockPeerPropagator / MockAdvertiser / MockLookupResolver
// ==============================================================================

#[derive(Default)]
pub struct MockBroadcaster {
    broadcast: Mutex<Vec<Txid>>,
}

impl MockBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcasted(&self) -> Vec<Txid> {
        self.broadcast.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl Broadcaster for MockBroadcaster {
    async fn broadcast(&self, tx: &RawTx) -> Result<(), OverlayError> {
        self.broadcast.lock().expect("mock lock poisoned").push(tx.txid);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPeerPropagator {
    propagated: Mutex<Vec<(Topic, Txid, Vec<String>)>>,
}

impl MockPeerPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn propagated(&self) -> Vec<(Topic, Txid, Vec<String>)> {
        self.propagated.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl PeerPropagator for MockPeerPropagator {
    async fn propagate(
        &self,
        topic: &Topic,
        tx: &RawTx,
        peers: &[String],
    ) -> Result<(), OverlayError> {
        self.propagated
            .lock()
            .expect("mock lock poisoned")
            .push((topic.clone(), tx.txid, peers.to_vec()));
        Ok(())
    }
}

pub struct MockAdvertiser {
    advertisements: Vec<Advertisement>,
}

impl MockAdvertiser {
    pub fn new(advertisements: Vec<Advertisement>) -> Self {
        Self { advertisements }
    }
}

#[async_trait]
impl Advertiser for MockAdvertiser {
    fn parse_advertisements(&self, _raw_outputs: &[Vec<u8>]) -> Vec<Advertisement> {
        self.advertisements.clone()
    }
}

pub struct MockLookupResolver {
    peers: Vec<Vec<u8>>,
}

impl MockLookupResolver {
    pub fn new(peers: Vec<Vec<u8>>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl LookupResolver for MockLookupResolver {
    async fn query(&self, _topic: &Topic) -> Result<Vec<Vec<u8>>, OverlayError> {
        Ok(self.peers.clone())
    }
}
