//! The requesting side of the GASP sync engine (§4.3): pages through a
//! peer's UTXO list, concurrently resolves each UTXO's dependency graph,
//! validates the candidate anchor, and finalizes valid graphs through the
//! submission pipeline in historical mode.
//!
//! Concurrency is bounded by a `Semaphore`, one permit per in-flight root
//! UTXO, mirroring the teacher's `graph.rs` BFS-with-bounded-fetch design;
//! each root's own dependency graph is then walked depth-first and
//! sequentially, since transactions within one graph are rarely
//! independent of one another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitcoin::Txid;
use futures::future::{join_all, BoxFuture, FutureExt};
use tokio::sync::{Mutex, OnceCell, Semaphore};

use crate::chain::ChainValidator;
use crate::codec::{Bundle, BundleTx};
use crate::error::{ErrorKind, OverlayError};
use crate::storage::{MerkleState, Storage};
use crate::submission::SubmissionPipeline;
use crate::topic::TopicManager;
use crate::types::{Outpoint, Output, SubmitMode, TaggedBeef, Topic};

use super::remote::RemotePeer;
use super::wire::{InitialRequest, Node as WireNode, NodeRequest, PROTOCOL_VERSION};

/// Bounds on one dependency graph's size while resolving a candidate
/// anchor, analogous to the teacher's ancestry `GraphLimits`.
#[derive(Debug, Clone, Copy)]
pub struct GraphLimits {
    pub max_nodes: usize,
    pub max_depth: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_nodes: 1000,
            max_depth: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeOutcome {
    Admitted,
    AlreadyHeld,
    Discarded,
}

/// Tally returned by one [`GaspEngine::sync_with_peer`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    pub admitted: usize,
    pub already_held: usize,
    pub discarded: usize,
    pub last_score: f64,
}

struct Graph {
    anchor: Outpoint,
    nodes: HashMap<Txid, WireNode>,
}

/// Single-flight registry for `RequestNode` calls, shared across every
/// concurrently-processing root UTXO within one [`GaspEngine::sync_with_peer`]
/// (or `sync_invalidated_outputs`) call. Two root graphs that both depend on
/// the same outpoint converge on the same [`OnceCell`] and the peer is asked
/// for that node exactly once (§4.3 / request coalescing).
type Inflight = Mutex<HashMap<Outpoint, Arc<OnceCell<WireNode>>>>;

impl Graph {
    /// §4.3 CompleteGraph step 1: DFS from the anchor that assembles
    /// child transactions before parents, i.e. emits ancestors before any
    /// transaction that spends them (matching `Bundle`'s documented
    /// ancestor-first invariant).
    fn to_bundle(&self) -> Bundle {
        let mut transactions = Vec::new();
        let mut visited = HashSet::new();
        self.visit(self.anchor.txid, &mut visited, &mut transactions);
        Bundle {
            primary_txid: self.anchor.txid,
            transactions,
        }
    }

    fn visit(&self, txid: Txid, visited: &mut HashSet<Txid>, transactions: &mut Vec<BundleTx>) {
        if !visited.insert(txid) {
            return;
        }
        if let Some(node) = self.nodes.get(&txid) {
            for input in &node.tx.inputs {
                self.visit(input.txid, visited, transactions);
            }
            transactions.push(BundleTx {
                tx: node.tx.clone(),
                proof: node.proof.clone(),
            });
        }
    }
}

pub struct GaspEngine {
    storage: Arc<dyn Storage>,
    pipeline: Arc<SubmissionPipeline>,
    managers: HashMap<Topic, Arc<dyn TopicManager>>,
    chain_validator: Arc<dyn ChainValidator>,
    concurrency: usize,
    limits: GraphLimits,
}

impl GaspEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        pipeline: Arc<SubmissionPipeline>,
        managers: HashMap<Topic, Arc<dyn TopicManager>>,
        chain_validator: Arc<dyn ChainValidator>,
        concurrency: usize,
    ) -> Self {
        Self {
            storage,
            pipeline,
            managers,
            chain_validator,
            concurrency: concurrency.max(1),
            limits: GraphLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: GraphLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Page through `peer`'s UTXO list for `topic` starting at `since`,
    /// resolving and finalizing each returned UTXO's graph. Stops once a
    /// page returns fewer outpoints than `page_limit`. `unidirectional`
    /// governs whether the reply half (§4.3) runs after ingestion: the
    /// orchestrator (§4.4) always syncs `unidirectional=true`; passing
    /// `false` also pushes this node's own newer UTXOs to `peer` via
    /// `SubmitNode`, recursively satisfying whatever further nodes it asks
    /// for.
    pub async fn sync_with_peer(
        &self,
        peer: &dyn RemotePeer,
        topic: &Topic,
        since: f64,
        page_limit: u32,
        unidirectional: bool,
    ) -> Result<SyncOutcome, OverlayError> {
        if !self.managers.contains_key(topic) {
            return Err(OverlayError::UnknownTopic(topic.clone()));
        }

        let mut cursor = since;
        let mut outcome = SyncOutcome {
            last_score: since,
            ..Default::default()
        };
        let seen_outpoints: Mutex<HashSet<Outpoint>> = Mutex::new(HashSet::new());
        let inflight: Inflight = Mutex::new(HashMap::new());

        loop {
            let request = InitialRequest {
                version: PROTOCOL_VERSION,
                topic: topic.clone(),
                since: cursor,
                limit: page_limit,
            };
            let response = peer.request_initial(&request).await?;
            if response.version != PROTOCOL_VERSION {
                return Err(OverlayError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    actual: response.version,
                });
            }
            if response.utxo_list.is_empty() {
                break;
            }

            let page_len = response.utxo_list.len() as u32;
            let semaphore = Arc::new(Semaphore::new(self.concurrency));
            let tasks = response.utxo_list.into_iter().map(|outpoint| {
                let semaphore = semaphore.clone();
                let seen_outpoints = &seen_outpoints;
                let inflight = &inflight;
                async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                    self.process_utxo_to_completion(peer, topic, outpoint, seen_outpoints, inflight)
                        .await
                }
            });
            for result in join_all(tasks).await {
                match result? {
                    NodeOutcome::Admitted => outcome.admitted += 1,
                    NodeOutcome::AlreadyHeld => outcome.already_held += 1,
                    NodeOutcome::Discarded => outcome.discarded += 1,
                }
            }

            outcome.last_score = response.since;
            self.storage
                .update_last_interaction(peer.host(), topic, response.since)
                .await?;

            if page_len < page_limit {
                break;
            }
            cursor = response.since;
        }

        if !unidirectional {
            self.push_reply_half(peer, topic, since, &seen_outpoints).await?;
        }

        Ok(outcome)
    }

    /// The reply half of a bidirectional sync (§4.3): push every local
    /// UTXO newer than the original `since` cursor that this pull didn't
    /// already pull back in, then recursively satisfy whatever further
    /// nodes the peer asks for via its `SubmitNode` response.
    async fn push_reply_half(
        &self,
        peer: &dyn RemotePeer,
        topic: &Topic,
        since: f64,
        seen_outpoints: &Mutex<HashSet<Outpoint>>,
    ) -> Result<(), OverlayError> {
        let locals = self.storage.find_utxos_for_topic(topic, since, None, true).await?;
        let to_push: Vec<Output> = {
            let seen = seen_outpoints.lock().await;
            locals.into_iter().filter(|output| !seen.contains(&output.outpoint)).collect()
        };

        let mut pushed: HashSet<Outpoint> = HashSet::new();
        for output in to_push {
            if pushed.contains(&output.outpoint) {
                continue;
            }
            let node = Self::hydrate_node(&output)?;
            self.push_node_recursive(peer, topic, node, &mut pushed).await?;
        }
        Ok(())
    }

    fn hydrate_node(output: &Output) -> Result<WireNode, OverlayError> {
        let primary = output
            .beef
            .primary()
            .ok_or_else(|| OverlayError::MissingBeef(output.outpoint.txid))?;
        Ok(WireNode {
            graph_id: output.outpoint,
            tx: primary.tx.clone(),
            proof: primary.proof.clone(),
            ancillary_beef: output.ancillary_beef.clone(),
        })
    }

    /// Push `node` to `peer`, then recursively push whatever further nodes
    /// the peer's `SubmitNode` response says it's still missing, bounded by
    /// `pushed` so a dependency cycle (or a node the peer re-requests)
    /// can't recurse forever.
    fn push_node_recursive<'a>(
        &'a self,
        peer: &'a dyn RemotePeer,
        topic: &'a Topic,
        node: WireNode,
        pushed: &'a mut HashSet<Outpoint>,
    ) -> BoxFuture<'a, Result<(), OverlayError>> {
        async move {
            if !pushed.insert(node.graph_id) {
                return Ok(());
            }
            let requests = peer.submit_node(topic, &node).await?;
            for request in requests {
                if pushed.contains(&request.graph_id) {
                    continue;
                }
                let output = self
                    .storage
                    .find_output(&request.graph_id, Some(topic), None, true)
                    .await?;
                if let Some(output) = output {
                    let child = Self::hydrate_node(&output)?;
                    self.push_node_recursive(peer, topic, child, pushed).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Re-walk outputs this topic previously marked invalidated by a
    /// reorg (§4.4), discarding any whose anchor no longer resolves.
    pub async fn sync_invalidated_outputs(
        &self,
        peer: &dyn RemotePeer,
        topic: &Topic,
        limit: usize,
    ) -> Result<SyncOutcome, OverlayError> {
        let invalidated = self
            .storage
            .find_outpoints_by_merkle_state(topic, MerkleState::Invalidated, limit)
            .await?;
        let seen_outpoints: Mutex<HashSet<Outpoint>> = Mutex::new(HashSet::new());
        let inflight: Inflight = Mutex::new(HashMap::new());
        let mut outcome = SyncOutcome::default();
        for outpoint in invalidated {
            match self
                .process_utxo_to_completion(peer, topic, outpoint, &seen_outpoints, &inflight)
                .await?
            {
                NodeOutcome::Admitted => outcome.admitted += 1,
                NodeOutcome::AlreadyHeld => outcome.already_held += 1,
                NodeOutcome::Discarded => {
                    self.storage.delete_output(&outpoint, topic).await?;
                    outcome.discarded += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn process_utxo_to_completion(
        &self,
        peer: &dyn RemotePeer,
        topic: &Topic,
        anchor: Outpoint,
        seen_outpoints: &Mutex<HashSet<Outpoint>>,
        inflight: &Inflight,
    ) -> Result<NodeOutcome, OverlayError> {
        {
            let mut seen = seen_outpoints.lock().await;
            if !seen.insert(anchor) {
                return Ok(NodeOutcome::AlreadyHeld);
            }
        }

        if self.storage.does_applied_transaction_exist(&anchor.txid, topic).await? {
            return Ok(NodeOutcome::AlreadyHeld);
        }

        let mut nodes = HashMap::new();
        let mut seen_nodes = HashSet::new();
        self.fetch_node(peer, topic, anchor, 0, &mut nodes, &mut seen_nodes, inflight)
            .await?;

        let graph = Graph { anchor, nodes };
        match self.complete_graph(topic, &graph).await {
            Ok(true) => {
                self.finalize_graph(topic, &graph).await?;
                Ok(NodeOutcome::Admitted)
            }
            Ok(false) => Ok(NodeOutcome::Discarded),
            Err(err) if err.kind() == ErrorKind::Validation => Ok(NodeOutcome::Discarded),
            Err(err) => Err(err),
        }
    }

    /// Depth-first fetch of `outpoint`'s producing transaction and
    /// everything `needed_inputs` says is still missing from local
    /// storage, bounded by `self.limits`.
    fn fetch_node<'a>(
        &'a self,
        peer: &'a dyn RemotePeer,
        topic: &'a Topic,
        outpoint: Outpoint,
        depth: usize,
        nodes: &'a mut HashMap<Txid, WireNode>,
        seen_nodes: &'a mut HashSet<Txid>,
        inflight: &'a Inflight,
    ) -> BoxFuture<'a, Result<(), OverlayError>> {
        async move {
            if depth > self.limits.max_depth || nodes.len() >= self.limits.max_nodes {
                return Ok(());
            }
            if !seen_nodes.insert(outpoint.txid) {
                return Ok(());
            }

            let node = self.request_node_coalesced(peer, topic, outpoint, inflight).await?;

            let manager = self.managers.get(topic).expect("topic checked by caller");
            let needed = manager.needed_inputs(&node.tx);
            let needed_outpoints: Vec<Outpoint> = needed.iter().map(|input| input.outpoint).collect();
            let held = self.storage.has_outputs(&needed_outpoints, topic).await?;

            nodes.insert(node.tx.txid, node);

            for (needed_outpoint, already_held) in needed_outpoints.into_iter().zip(held) {
                if !already_held {
                    self.fetch_node(peer, topic, needed_outpoint, depth + 1, nodes, seen_nodes, inflight)
                        .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Fetch `outpoint`'s node from `peer`, coalescing concurrent callers
    /// within this sync session onto a single underlying `request_node`
    /// call. A failed fetch is not cached: the `OnceCell` stays empty and
    /// the next caller (if any) retries it directly.
    async fn request_node_coalesced(
        &self,
        peer: &dyn RemotePeer,
        topic: &Topic,
        outpoint: Outpoint,
        inflight: &Inflight,
    ) -> Result<WireNode, OverlayError> {
        let cell = {
            let mut map = inflight.lock().await;
            map.entry(outpoint).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        cell.get_or_try_init(|| async {
            peer.request_node(
                topic,
                &NodeRequest {
                    graph_id: outpoint,
                    metadata: true,
                },
            )
            .await
        })
        .await
        .map(|node| node.clone())
        .map_err(|err| OverlayError::Coalesced {
            kind: err.kind(),
            message: err.to_string(),
        })
    }

    /// §4.3 step 3: every node's producing transaction's Merkle proof
    /// checks out, and the topic manager's side-effect-free admissibility
    /// simulation actually admits the anchor outpoint.
    async fn complete_graph(&self, topic: &Topic, graph: &Graph) -> Result<bool, OverlayError> {
        let bundle = graph.to_bundle();
        if let Err(err) = self.chain_validator.verify_bundle(&bundle).await {
            if err.kind() == ErrorKind::Validation {
                return Ok(false);
            }
            return Err(err);
        }

        let manager = self.managers.get(topic).expect("topic checked by caller");
        let admitted = manager.simulate_admission(&bundle).await?;
        Ok(admitted.contains(&graph.anchor))
    }

    async fn finalize_graph(&self, topic: &Topic, graph: &Graph) -> Result<(), OverlayError> {
        let tagged = TaggedBeef {
            topics: vec![topic.clone()],
            beef: graph.to_bundle(),
            off_chain_values: None,
        };
        self.pipeline
            .submit(tagged, SubmitMode::Historical, &HashMap::new())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertiser::{Broadcaster, PeerPropagator};
    use crate::gasp::local::LocalGaspService;
    use crate::storage::MemoryStorage;
    use crate::testutil::{make_raw_tx, topic, txid_from_byte, MockBroadcaster, MockChainValidator, MockPeerPropagator, MockTopicManager};
    use async_trait::async_trait;

    /// Wraps a `LocalGaspService` backed by its own storage so the engine
    /// can sync "from a peer" entirely in-process.
    struct LoopbackPeer {
        service: LocalGaspService,
    }

    #[async_trait]
    impl RemotePeer for LoopbackPeer {
        fn host(&self) -> &str {
            "loopback"
        }

        async fn request_initial(
            &self,
            request: &InitialRequest,
        ) -> Result<super::super::wire::InitialResponse, OverlayError> {
            self.service.initial_response(request).await
        }

        async fn request_node(&self, _topic: &Topic, request: &NodeRequest) -> Result<WireNode, OverlayError> {
            self.service.node(request).await
        }

        async fn submit_node(&self, topic: &Topic, node: &WireNode) -> Result<Vec<NodeRequest>, OverlayError> {
            self.service.submit_node(topic, node).await
        }
    }

    fn engine_with_managers(t: Topic) -> (GaspEngine, Arc<dyn Storage>) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let validator = Arc::new(MockChainValidator::new());
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(MockBroadcaster::new());
        let propagator: Arc<dyn PeerPropagator> = Arc::new(MockPeerPropagator::new());
        let mut pipeline = SubmissionPipeline::new(storage.clone(), validator.clone(), broadcaster, propagator);
        pipeline.register_topic_manager(Arc::new(MockTopicManager::new(t.clone()).admit_all()));
        let mut managers: HashMap<Topic, Arc<dyn TopicManager>> = HashMap::new();
        managers.insert(t.clone(), Arc::new(MockTopicManager::new(t.clone()).admit_all()));
        let engine = GaspEngine::new(storage.clone(), Arc::new(pipeline), managers, validator, 4);
        (engine, storage)
    }

    #[tokio::test]
    async fn sync_with_peer_pulls_and_admits_remote_utxo() {
        let t = topic("alpha");
        let (engine, local_storage) = engine_with_managers(t.clone());

        let remote_storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let remote_validator = Arc::new(MockChainValidator::new());
        let remote_broadcaster: Arc<dyn Broadcaster> = Arc::new(MockBroadcaster::new());
        let remote_propagator: Arc<dyn PeerPropagator> = Arc::new(MockPeerPropagator::new());
        let mut remote_pipeline = SubmissionPipeline::new(
            remote_storage.clone(),
            remote_validator,
            remote_broadcaster,
            remote_propagator,
        );
        remote_pipeline.register_topic_manager(Arc::new(MockTopicManager::new(t.clone()).admit_all()));

        let txid = txid_from_byte(7);
        let tx = make_raw_tx(txid, Vec::new(), 1);
        remote_pipeline
            .submit(
                TaggedBeef {
                    topics: vec![t.clone()],
                    beef: Bundle::single(tx),
                    off_chain_values: None,
                },
                SubmitMode::Historical,
                &HashMap::new(),
            )
            .await
            .unwrap();

        let mut remote_managers: HashMap<Topic, Arc<dyn TopicManager>> = HashMap::new();
        remote_managers.insert(t.clone(), Arc::new(MockTopicManager::new(t.clone()).admit_all()));
        let peer = LoopbackPeer {
            service: LocalGaspService::new(remote_storage, remote_managers),
        };

        let outcome = engine.sync_with_peer(&peer, &t, 0.0, 10, true).await.unwrap();
        assert_eq!(outcome.admitted, 1);

        let found = local_storage
            .find_output(&Outpoint::new(txid, 0), Some(&t), None, false)
            .await
            .unwrap();
        assert!(found.is_some());
    }

    /// A manager that derives `needed_inputs` from a transaction's actual
    /// inputs rather than a fixed list, so it behaves correctly for more
    /// than one distinct transaction shape within a single test.
    struct DynamicTopicManager {
        t: Topic,
    }

    #[async_trait]
    impl TopicManager for DynamicTopicManager {
        fn topic(&self) -> &Topic {
            &self.t
        }

        async fn identify_admissible_outputs(
            &self,
            bundle: &Bundle,
            _previous_coins: &[crate::types::PreviousCoin],
        ) -> Result<crate::types::Admittance, OverlayError> {
            let outputs_to_admit = bundle
                .primary()
                .map(|entry| (0..entry.tx.outputs.len() as u32).collect())
                .unwrap_or_default();
            Ok(crate::types::Admittance {
                outputs_to_admit,
                coins_to_retain: Vec::new(),
                ancillary_txids: HashSet::new(),
            })
        }

        fn needed_inputs(&self, tx: &crate::codec::RawTx) -> Vec<crate::topic::NeededInput> {
            tx.inputs
                .iter()
                .map(|&outpoint| crate::topic::NeededInput {
                    outpoint,
                    metadata: true,
                })
                .collect()
        }
    }

    /// A peer serving a fixed, precomputed set of nodes, counting how many
    /// times each outpoint's node was actually requested.
    struct CountingPeer {
        utxo_list: Vec<Outpoint>,
        nodes: HashMap<Outpoint, WireNode>,
        calls: std::sync::Mutex<HashMap<Outpoint, usize>>,
    }

    #[async_trait]
    impl RemotePeer for CountingPeer {
        fn host(&self) -> &str {
            "counting"
        }

        async fn request_initial(
            &self,
            _request: &InitialRequest,
        ) -> Result<super::super::wire::InitialResponse, OverlayError> {
            Ok(super::super::wire::InitialResponse {
                version: PROTOCOL_VERSION,
                utxo_list: self.utxo_list.clone(),
                since: self.utxo_list.len() as f64,
            })
        }

        async fn request_node(&self, _topic: &Topic, request: &NodeRequest) -> Result<WireNode, OverlayError> {
            *self.calls.lock().unwrap().entry(request.graph_id).or_insert(0) += 1;
            self.nodes
                .get(&request.graph_id)
                .cloned()
                .ok_or(OverlayError::MissingOutput(request.graph_id))
        }

        async fn submit_node(&self, _topic: &Topic, _node: &WireNode) -> Result<Vec<NodeRequest>, OverlayError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn concurrent_roots_sharing_a_dependency_request_its_node_once() {
        let t = topic("alpha");
        let (engine, _local_storage) = {
            let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
            let validator = Arc::new(MockChainValidator::new());
            let broadcaster: Arc<dyn Broadcaster> = Arc::new(MockBroadcaster::new());
            let propagator: Arc<dyn PeerPropagator> = Arc::new(MockPeerPropagator::new());
            let mut pipeline =
                SubmissionPipeline::new(storage.clone(), validator.clone(), broadcaster, propagator);
            pipeline.register_topic_manager(Arc::new(DynamicTopicManager { t: t.clone() }));
            let mut managers: HashMap<Topic, Arc<dyn TopicManager>> = HashMap::new();
            managers.insert(t.clone(), Arc::new(DynamicTopicManager { t: t.clone() }));
            let engine = GaspEngine::new(storage.clone(), Arc::new(pipeline), managers, validator, 4);
            (engine, storage)
        };

        let x_txid = txid_from_byte(40);
        let a_txid = txid_from_byte(41);
        let b_txid = txid_from_byte(42);
        let x_outpoint = Outpoint::new(x_txid, 0);
        let a_outpoint = Outpoint::new(a_txid, 0);
        let b_outpoint = Outpoint::new(b_txid, 0);

        let mut nodes = HashMap::new();
        nodes.insert(
            x_outpoint,
            WireNode {
                graph_id: x_outpoint,
                tx: make_raw_tx(x_txid, Vec::new(), 1),
                proof: None,
                ancillary_beef: None,
            },
        );
        nodes.insert(
            a_outpoint,
            WireNode {
                graph_id: a_outpoint,
                tx: make_raw_tx(a_txid, vec![x_outpoint], 1),
                proof: None,
                ancillary_beef: None,
            },
        );
        nodes.insert(
            b_outpoint,
            WireNode {
                graph_id: b_outpoint,
                tx: make_raw_tx(b_txid, vec![x_outpoint], 1),
                proof: None,
                ancillary_beef: None,
            },
        );

        let peer = CountingPeer {
            utxo_list: vec![a_outpoint, b_outpoint],
            nodes,
            calls: std::sync::Mutex::new(HashMap::new()),
        };

        let outcome = engine.sync_with_peer(&peer, &t, 0.0, 10, true).await.unwrap();
        assert_eq!(outcome.admitted, 2);

        let calls = peer.calls.lock().unwrap();
        assert_eq!(calls.get(&x_outpoint).copied(), Some(1));
        assert_eq!(calls.get(&a_outpoint).copied(), Some(1));
        assert_eq!(calls.get(&b_outpoint).copied(), Some(1));
    }

    #[tokio::test]
    async fn bidirectional_sync_converges_both_sides_on_the_union() {
        let t = topic("alpha");

        let a_storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let a_validator: Arc<dyn crate::chain::ChainValidator> = Arc::new(MockChainValidator::new());
        let a_broadcaster: Arc<dyn Broadcaster> = Arc::new(MockBroadcaster::new());
        let a_propagator: Arc<dyn PeerPropagator> = Arc::new(MockPeerPropagator::new());
        let mut a_pipeline = SubmissionPipeline::new(a_storage.clone(), a_validator.clone(), a_broadcaster, a_propagator);
        a_pipeline.register_topic_manager(Arc::new(MockTopicManager::new(t.clone()).admit_all()));
        let a_pipeline = Arc::new(a_pipeline);

        let u1_txid = txid_from_byte(51);
        a_pipeline
            .submit(
                TaggedBeef {
                    topics: vec![t.clone()],
                    beef: Bundle::single(make_raw_tx(u1_txid, Vec::new(), 1)),
                    off_chain_values: None,
                },
                SubmitMode::Historical,
                &HashMap::new(),
            )
            .await
            .unwrap();

        let mut a_managers: HashMap<Topic, Arc<dyn TopicManager>> = HashMap::new();
        a_managers.insert(t.clone(), Arc::new(MockTopicManager::new(t.clone()).admit_all()));
        let a_service = LocalGaspService::new(a_storage.clone(), a_managers).with_submission(a_validator, a_pipeline);

        let (engine_b, b_storage) = engine_with_managers(t.clone());
        let u2_txid = txid_from_byte(52);
        engine_b
            .pipeline
            .submit(
                TaggedBeef {
                    topics: vec![t.clone()],
                    beef: Bundle::single(make_raw_tx(u2_txid, Vec::new(), 1)),
                    off_chain_values: None,
                },
                SubmitMode::Historical,
                &HashMap::new(),
            )
            .await
            .unwrap();

        let peer = LoopbackPeer { service: a_service };
        let outcome = engine_b.sync_with_peer(&peer, &t, 0.0, 10, false).await.unwrap();
        assert_eq!(outcome.admitted, 1);

        let b_has_u1 = b_storage
            .find_output(&Outpoint::new(u1_txid, 0), Some(&t), None, false)
            .await
            .unwrap();
        assert!(b_has_u1.is_some());

        let a_has_u2 = a_storage
            .find_output(&Outpoint::new(u2_txid, 0), Some(&t), None, false)
            .await
            .unwrap();
        assert!(a_has_u2.is_some(), "reply half must push B's own UTXO back to A");
    }

    #[tokio::test]
    async fn sync_with_peer_rejects_unknown_topic() {
        let (engine, _storage) = engine_with_managers(topic("alpha"));
        let remote_storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let peer = LoopbackPeer {
            service: LocalGaspService::new(remote_storage, HashMap::new()),
        };
        let err = engine
            .sync_with_peer(&peer, &topic("beta"), 0.0, 10, true)
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::UnknownTopic(_)));
    }
}
