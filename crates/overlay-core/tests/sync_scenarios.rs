//! Cross-cutting sync scenarios exercising the submission pipeline, GASP
//! engine, and Merkle-proof handler together through their public APIs,
//! rather than one module's internals in isolation.

use std::collections::HashMap;
use std::sync::{Arc, Once};

use async_trait::async_trait;

use overlay_core::advertiser::{Broadcaster, PeerPropagator};
use overlay_core::chain::ChainValidator;
use overlay_core::codec::Bundle;
use overlay_core::error::OverlayError;
use overlay_core::gasp::wire::{InitialRequest, InitialResponse, Node, NodeRequest};
use overlay_core::gasp::{GaspEngine, LocalGaspService, RemotePeer};
use overlay_core::merkle::MerkleProofHandler;
use overlay_core::storage::Storage;
use overlay_core::submission::SubmissionPipeline;
use overlay_core::testutil::{
    make_raw_tx, merkle_proof, topic, txid_from_byte, MockBroadcaster, MockChainValidator, MockLookupService,
    MockPeerPropagator, MockTopicManager,
};
use overlay_core::topic::TopicManager;
use overlay_core::types::{Outpoint, SubmitMode, TaggedBeef, Topic};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("overlay_core=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Wraps a [`LocalGaspService`] as a [`RemotePeer`] so one node's storage
/// and topic managers can stand in for a remote peer entirely in-process.
struct LoopbackPeer {
    host: String,
    service: LocalGaspService,
}

#[async_trait]
impl RemotePeer for LoopbackPeer {
    fn host(&self) -> &str {
        &self.host
    }

    async fn request_initial(&self, request: &InitialRequest) -> Result<InitialResponse, OverlayError> {
        self.service.initial_response(request).await
    }

    async fn request_node(&self, _topic: &Topic, request: &NodeRequest) -> Result<Node, OverlayError> {
        self.service.node(request).await
    }

    async fn submit_node(&self, topic: &Topic, node: &Node) -> Result<Vec<NodeRequest>, OverlayError> {
        self.service.submit_node(topic, node).await
    }
}

struct TestNode {
    storage: Arc<dyn Storage>,
    pipeline: Arc<SubmissionPipeline>,
    engine: GaspEngine,
}

/// `make_manager` is called twice with identical intended behavior: once
/// for the pipeline's own admissibility check and once for the engine's
/// (`MockTopicManager` isn't `Clone`, so a single instance can't be
/// shared between the two seams).
fn build_node(t: &Topic, make_manager: impl Fn() -> MockTopicManager) -> TestNode {
    let storage: Arc<dyn Storage> = Arc::new(overlay_core::storage::MemoryStorage::new());
    let validator = Arc::new(MockChainValidator::new());
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(MockBroadcaster::new());
    let propagator: Arc<dyn PeerPropagator> = Arc::new(MockPeerPropagator::new());
    let mut pipeline = SubmissionPipeline::new(storage.clone(), validator.clone(), broadcaster, propagator);
    pipeline.register_topic_manager(Arc::new(make_manager()));
    let pipeline = Arc::new(pipeline);

    let mut managers: HashMap<Topic, Arc<dyn TopicManager>> = HashMap::new();
    managers.insert(t.clone(), Arc::new(make_manager()));
    let engine = GaspEngine::new(storage.clone(), pipeline.clone(), managers, validator, 4);

    TestNode { storage, pipeline, engine }
}

async fn submit_utxo(node: &TestNode, t: &Topic, txid: bitcoin::Txid) {
    node.pipeline
        .submit(
            TaggedBeef {
                topics: vec![t.clone()],
                beef: Bundle::single(make_raw_tx(txid, Vec::new(), 1)),
                off_chain_values: None,
            },
            SubmitMode::Historical,
            &HashMap::new(),
        )
        .await
        .unwrap();
}

fn loopback_peer(host: &str, node: &TestNode, t: &Topic) -> LoopbackPeer {
    let mut managers: HashMap<Topic, Arc<dyn TopicManager>> = HashMap::new();
    managers.insert(t.clone(), Arc::new(MockTopicManager::new(t.clone()).admit_all()));
    LoopbackPeer {
        host: host.to_string(),
        service: LocalGaspService::new(node.storage.clone(), managers),
    }
}

#[tokio::test]
async fn s1_basic_sync_pulls_a_single_utxo() {
    init_tracing();
    let t = topic("s1");
    let a = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let u1 = txid_from_byte(1);
    submit_utxo(&a, &t, u1).await;

    let b = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let peer = loopback_peer("peer-a", &a, &t);

    let outcome = b.engine.sync_with_peer(&peer, &t, 0.0, 10, true).await.unwrap();
    assert_eq!(outcome.admitted, 1);
    assert_eq!(outcome.last_score, 1.0);

    assert!(b
        .storage
        .find_output(&Outpoint::new(u1, 0), Some(&t), None, false)
        .await
        .unwrap()
        .is_some());
    assert!(a
        .storage
        .find_output(&Outpoint::new(u1, 0), Some(&t), None, false)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn s2_since_filter_excludes_already_seen_scores() {
    init_tracing();
    let t = topic("s2");
    let a = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let u_old = txid_from_byte(10);
    let u_new = txid_from_byte(11);
    submit_utxo(&a, &t, u_old).await;
    submit_utxo(&a, &t, u_new).await;

    let b = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    b.storage.update_last_interaction("peer-a", &t, 1.0).await.unwrap();
    let since = b.storage.get_last_interaction("peer-a", &t).await.unwrap();

    let peer = loopback_peer("peer-a", &a, &t);
    let outcome = b.engine.sync_with_peer(&peer, &t, since, 10, true).await.unwrap();
    assert_eq!(outcome.admitted, 1);

    assert!(b
        .storage
        .find_output(&Outpoint::new(u_new, 0), Some(&t), None, false)
        .await
        .unwrap()
        .is_some());
    assert!(b
        .storage
        .find_output(&Outpoint::new(u_old, 0), Some(&t), None, false)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn s3_discards_graph_when_topic_manager_rejects_anchor() {
    init_tracing();
    let t = topic("s3");
    let a = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let u1 = txid_from_byte(20);
    submit_utxo(&a, &t, u1).await;

    // B's own copy of the manager admits nothing, so the pulled anchor
    // never clears `simulate_admission` and the graph is discarded.
    let b = build_node(&t, || MockTopicManager::new(t.clone()));
    let peer = loopback_peer("peer-a", &a, &t);

    let outcome = b.engine.sync_with_peer(&peer, &t, 0.0, 10, true).await.unwrap();
    assert_eq!(outcome.admitted, 0);
    assert_eq!(outcome.discarded, 1);

    assert!(b
        .storage
        .find_output(&Outpoint::new(u1, 0), Some(&t), None, false)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn s4_multiple_disjoint_graphs_are_both_admitted() {
    init_tracing();
    let t = topic("s4");
    let a = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let u1 = txid_from_byte(30);
    let u2 = txid_from_byte(31);
    submit_utxo(&a, &t, u1).await;
    submit_utxo(&a, &t, u2).await;

    let b = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let peer = loopback_peer("peer-a", &a, &t);

    let outcome = b.engine.sync_with_peer(&peer, &t, 0.0, 10, true).await.unwrap();
    assert_eq!(outcome.admitted, 2);

    for txid in [u1, u2] {
        assert!(b
            .storage
            .find_output(&Outpoint::new(txid, 0), Some(&t), None, false)
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test]
async fn s5_utxo_already_held_by_both_sides_is_a_no_op() {
    init_tracing();
    let t = topic("s5");
    let a = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let b = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let u1 = txid_from_byte(40);
    submit_utxo(&a, &t, u1).await;
    submit_utxo(&b, &t, u1).await;

    let peer = loopback_peer("peer-a", &a, &t);
    let outcome = b.engine.sync_with_peer(&peer, &t, 0.0, 10, true).await.unwrap();
    assert_eq!(outcome.admitted, 0);
    assert_eq!(outcome.already_held, 1);

    assert!(b
        .storage
        .find_output(&Outpoint::new(u1, 0), Some(&t), None, false)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn s6_merkle_upgrade_is_idempotent_and_notifies_once() {
    init_tracing();
    let t = topic("s6");
    let node = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let txid = txid_from_byte(50);
    submit_utxo(&node, &t, txid).await;

    let validator = Arc::new(MockChainValidator::new());
    let lookups = Arc::new(MockLookupService::new());
    let mut handler = MerkleProofHandler::new(node.storage.clone(), validator);
    handler.register_lookup_service(lookups.clone());

    let proof = merkle_proof(500, vec![(txid, 7)]);
    let upgraded = handler.handle_new_merkle_proof(&txid, proof.clone()).await.unwrap();
    assert_eq!(upgraded, 1);

    let output = node
        .storage
        .find_output(&Outpoint::new(txid, 0), Some(&t), None, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output.block_height, 500);
    assert_eq!(output.block_index, 7);
    assert_eq!(lookups.events().len(), 1);

    let upgraded_again = handler.handle_new_merkle_proof(&txid, proof).await.unwrap();
    assert_eq!(upgraded_again, 0);
    assert_eq!(lookups.events().len(), 1);
}

#[tokio::test]
async fn property_9_bidirectional_sync_converges_on_the_union() {
    init_tracing();
    let t = topic("bidi");
    let a = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());
    let b = build_node(&t, || MockTopicManager::new(t.clone()).admit_all());

    let u1 = txid_from_byte(60);
    let u2 = txid_from_byte(61);
    submit_utxo(&a, &t, u1).await;
    submit_utxo(&b, &t, u2).await;

    let mut managers: HashMap<Topic, Arc<dyn TopicManager>> = HashMap::new();
    managers.insert(t.clone(), Arc::new(MockTopicManager::new(t.clone()).admit_all()));
    let a_service = LocalGaspService::new(a.storage.clone(), managers).with_submission(Arc::new(MockChainValidator::new()), a.pipeline.clone());
    let peer = LoopbackPeer {
        host: "peer-a".into(),
        service: a_service,
    };

    let outcome = b.engine.sync_with_peer(&peer, &t, 0.0, 10, false).await.unwrap();
    assert_eq!(outcome.admitted, 1);

    for txid in [u1, u2] {
        assert!(
            a.storage.find_output(&Outpoint::new(txid, 0), Some(&t), None, false).await.unwrap().is_some(),
            "peer A missing {txid}"
        );
        assert!(
            b.storage.find_output(&Outpoint::new(txid, 0), Some(&t), None, false).await.unwrap().is_some(),
            "peer B missing {txid}"
        );
    }
}
