//! The GASP node-lookup contract from the serving peer's side (§4.3): how
//! a node answers `InitialRequest`/`NodeRequest` from its own storage.
//! Transport (HTTP routes) is excluded (§1); this is the logic an
//! in-process caller or a route handler wired outside this crate would
//! call through.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::Txid;
use tokio::sync::Mutex;

use crate::chain::ChainValidator;
use crate::codec::{Bundle, BundleTx};
use crate::error::{ErrorKind, OverlayError};
use crate::storage::Storage;
use crate::submission::SubmissionPipeline;
use crate::topic::TopicManager;
use crate::types::{Outpoint, SubmitMode, TaggedBeef, Topic};

use super::wire::{InitialRequest, InitialResponse, Node, NodeRequest, PROTOCOL_VERSION};

/// Answers incoming GASP requests against local storage and registered
/// topic managers. [`Self::submit_node`] additionally serves the reply
/// half of a bidirectional sync (§4.3): accepting nodes pushed by the
/// requesting side and, once a pushed outpoint's dependency closure is
/// satisfied, finalizing it through `pipeline`.
pub struct LocalGaspService {
    storage: Arc<dyn Storage>,
    managers: HashMap<Topic, Arc<dyn TopicManager>>,
    submission: Option<(Arc<dyn ChainValidator>, Arc<SubmissionPipeline>)>,
    pending: Mutex<HashMap<(Topic, Txid), Node>>,
}

impl LocalGaspService {
    pub fn new(storage: Arc<dyn Storage>, managers: HashMap<Topic, Arc<dyn TopicManager>>) -> Self {
        Self {
            storage,
            managers,
            submission: None,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Enables [`Self::submit_node`]. Without this, pushed nodes are
    /// rejected as unsupported, mirroring a pull-only deployment.
    pub fn with_submission(mut self, chain_validator: Arc<dyn ChainValidator>, pipeline: Arc<SubmissionPipeline>) -> Self {
        self.submission = Some((chain_validator, pipeline));
        self
    }

    pub async fn initial_response(
        &self,
        request: &InitialRequest,
    ) -> Result<InitialResponse, OverlayError> {
        if !self.managers.contains_key(&request.topic) {
            return Err(OverlayError::UnknownTopic(request.topic.clone()));
        }
        let outputs = self
            .storage
            .find_utxos_for_topic(&request.topic, request.since, Some(request.limit), false)
            .await?;
        let since = outputs.last().map(|output| output.score).unwrap_or(request.since);
        Ok(InitialResponse {
            version: PROTOCOL_VERSION,
            utxo_list: outputs.into_iter().map(|output| output.outpoint).collect(),
            since,
        })
    }

    pub async fn node(&self, request: &NodeRequest) -> Result<Node, OverlayError> {
        let output = self
            .storage
            .find_output(&request.graph_id, None, None, true)
            .await?
            .ok_or(OverlayError::MissingOutput(request.graph_id))?;
        let primary = output
            .beef
            .primary()
            .ok_or_else(|| OverlayError::MissingBeef(request.graph_id.txid))?;
        if let Some(ancillary) = &output.ancillary_beef {
            validate_ancillary_bundle(ancillary, &primary.tx.txid)?;
        }
        Ok(Node {
            graph_id: request.graph_id,
            tx: primary.tx.clone(),
            proof: primary.proof.clone(),
            ancillary_beef: output.ancillary_beef.clone(),
        })
    }

    /// Accept a node pushed by the requesting side of a bidirectional sync.
    /// Returns the further nodes (by outpoint) still needed to complete
    /// `node`'s dependency graph; an empty list means `node`'s graph was
    /// already complete and, if admissible, has been finalized.
    pub async fn submit_node(&self, topic: &Topic, node: &Node) -> Result<Vec<NodeRequest>, OverlayError> {
        let (chain_validator, pipeline) = self
            .submission
            .as_ref()
            .ok_or_else(|| OverlayError::Unsupported("this service does not accept pushed nodes".into()))?;
        let manager = self
            .managers
            .get(topic)
            .ok_or_else(|| OverlayError::UnknownTopic(topic.clone()))?;

        if let Some(ancillary) = &node.ancillary_beef {
            validate_ancillary_bundle(ancillary, &node.tx.txid)?;
        }

        {
            let mut pending = self.pending.lock().await;
            pending.insert((topic.clone(), node.tx.txid), node.clone());
        }

        let needed = manager.needed_inputs(&node.tx);
        let needed_outpoints: Vec<Outpoint> = needed.iter().map(|input| input.outpoint).collect();
        let held = self.storage.has_outputs(&needed_outpoints, topic).await?;

        let mut missing = Vec::new();
        {
            let pending = self.pending.lock().await;
            for (outpoint, already_held) in needed_outpoints.into_iter().zip(held) {
                if already_held || pending.contains_key(&(topic.clone(), outpoint.txid)) {
                    continue;
                }
                missing.push(NodeRequest {
                    graph_id: outpoint,
                    metadata: true,
                });
            }
        }
        if !missing.is_empty() {
            return Ok(missing);
        }

        let bundle = {
            let pending = self.pending.lock().await;
            collect_bundle(&pending, topic, node.tx.txid)
        };

        if let Err(err) = chain_validator.verify_bundle(&bundle).await {
            if err.kind() == ErrorKind::Validation {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let tagged = TaggedBeef {
            topics: vec![topic.clone()],
            beef: bundle,
            off_chain_values: None,
        };
        pipeline.submit(tagged, SubmitMode::Historical, &HashMap::new()).await?;

        let mut pending = self.pending.lock().await;
        pending.retain(|(pending_topic, _), _| pending_topic != topic);
        Ok(Vec::new())
    }
}

/// Walk `pending`'s input chain starting at `root`, pulling in every
/// transaction reachable through `tx.inputs`, to assemble a bundle for
/// finalization. Inputs already satisfied from storage rather than a
/// pushed node are left for the submission pipeline to resolve as
/// previous coins. Ancestor-first: a DFS that visits a node's inputs
/// before the node itself, so parents precede consumers in the returned
/// bundle (matching `Bundle`'s documented ancestor-first invariant).
fn collect_bundle(pending: &HashMap<(Topic, Txid), Node>, topic: &Topic, root: Txid) -> Bundle {
    let mut transactions = Vec::new();
    let mut seen = std::collections::HashSet::new();
    collect_bundle_visit(pending, topic, root, &mut seen, &mut transactions);
    Bundle {
        primary_txid: root,
        transactions,
    }
}

fn collect_bundle_visit(
    pending: &HashMap<(Topic, Txid), Node>,
    topic: &Topic,
    txid: Txid,
    seen: &mut std::collections::HashSet<Txid>,
    transactions: &mut Vec<BundleTx>,
) {
    if !seen.insert(txid) {
        return;
    }
    if let Some(node) = pending.get(&(topic.clone(), txid)) {
        for input in &node.tx.inputs {
            collect_bundle_visit(pending, topic, input.txid, seen, transactions);
        }
        transactions.push(BundleTx {
            tx: node.tx.clone(),
            proof: node.proof.clone(),
        });
    }
}

/// An ancillary bundle may never carry the primary transaction itself; a
/// producer that does so has confused the two compartments and the whole
/// node is rejected rather than silently accepted with a misplaced
/// transaction (Design Note 9).
fn validate_ancillary_bundle(ancillary: &Bundle, primary_txid: &Txid) -> Result<(), OverlayError> {
    if ancillary.find(primary_txid).is_some() {
        return Err(OverlayError::InvalidBundle(
            "ancillary bundle must not carry the primary transaction".into(),
        ));
    }
    Ok(())
}
