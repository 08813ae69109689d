//! Sync orchestrator (C10, §4.4): per-topic peer discovery and GASP sync
//! dispatch, with per-peer progress tracked through `Storage`'s
//! last-interaction marks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::advertiser::{AdProtocol, Advertiser, LookupResolver, SyncMode};
use crate::error::OverlayError;
use crate::gasp::{GaspEngine, RemotePeer, SyncOutcome};
use crate::storage::{MerkleState, Storage};
use crate::types::Topic;

/// A topic's sync strategy and pagination size.
#[derive(Debug, Clone)]
pub struct TopicSyncConfig {
    pub topic: Topic,
    pub mode: SyncMode,
    pub page_limit: u32,
    /// Whether syncs against this topic's peers pull only (`true`) or also
    /// push this node's own newer UTXOs back (`false`, §4.3 reply half).
    pub unidirectional: bool,
}

/// Drives per-topic peer discovery and GASP sync on an operator's
/// schedule. Holds no network state itself; callers supply a
/// `peer_for_host` constructor so the orchestrator stays agnostic to the
/// transport [`RemotePeer`] implementation in use.
pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    engine: Arc<GaspEngine>,
    resolver: Arc<dyn LookupResolver>,
    advertiser: Arc<dyn Advertiser>,
    topics: Vec<TopicSyncConfig>,
    own_domain: Option<String>,
    trackers: Option<(Topic, Vec<String>)>,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        engine: Arc<GaspEngine>,
        resolver: Arc<dyn LookupResolver>,
        advertiser: Arc<dyn Advertiser>,
    ) -> Self {
        Self {
            storage,
            engine,
            resolver,
            advertiser,
            topics: Vec::new(),
            own_domain: None,
            trackers: None,
        }
    }

    /// This node's own advertised domain, dropped from SHIP discovery
    /// results so a node never syncs against itself.
    pub fn with_own_domain(mut self, domain: impl Into<String>) -> Self {
        self.own_domain = Some(domain.into());
        self
    }

    /// The SHIP/SLAP tracker topic and its statically configured tracker
    /// hosts. When a `Peers`-mode topic matches `tracker_topic`, these
    /// hosts are merged (deduplicated) into that topic's static peer list.
    pub fn with_trackers(mut self, tracker_topic: Topic, hosts: Vec<String>) -> Self {
        self.trackers = Some((tracker_topic, hosts));
        self
    }

    pub fn add_topic(&mut self, config: TopicSyncConfig) {
        self.topics.push(config);
    }

    pub fn topics(&self) -> &[TopicSyncConfig] {
        &self.topics
    }

    /// Resolve `topic`'s peer list per its configured [`SyncMode`]. SHIP
    /// discovery is bounded to 60 seconds per §4.4.
    pub async fn discover_peers(&self, topic: &Topic, mode: &SyncMode) -> Result<Vec<String>, OverlayError> {
        match mode {
            SyncMode::None => Ok(Vec::new()),
            SyncMode::Peers(peers) => {
                let mut merged: BTreeSet<String> = peers.iter().cloned().collect();
                if let Some((tracker_topic, hosts)) = &self.trackers {
                    if tracker_topic == topic {
                        merged.extend(hosts.iter().cloned());
                    }
                }
                Ok(merged.into_iter().collect())
            }
            SyncMode::Ship => {
                let raw = tokio::time::timeout(Duration::from_secs(60), self.resolver.query(topic))
                    .await
                    .map_err(|_| OverlayError::Cancelled)??;
                let ads = self.advertiser.parse_advertisements(&raw);
                Ok(ads
                    .into_iter()
                    .filter(|ad| ad.protocol == AdProtocol::Ship && ad.topic_or_service == topic.0)
                    .map(|ad| ad.domain)
                    .filter(|domain| self.own_domain.as_deref() != Some(domain.as_str()))
                    .collect())
            }
        }
    }

    /// Sync one topic against every peer its [`SyncMode`] discovers,
    /// resuming each peer from its own `get_last_interaction` cursor.
    pub async fn sync_topic(
        &self,
        config: &TopicSyncConfig,
        peer_for_host: impl Fn(&str) -> Result<Arc<dyn RemotePeer>, OverlayError>,
    ) -> Result<SyncOutcome, OverlayError> {
        let hosts = self.discover_peers(&config.topic, &config.mode).await?;
        let mut outcome = SyncOutcome::default();
        for host in hosts {
            let peer = peer_for_host(&host)?;
            let since = self.storage.get_last_interaction(&host, &config.topic).await?;
            let result = self
                .engine
                .sync_with_peer(peer.as_ref(), &config.topic, since, config.page_limit, config.unidirectional)
                .await?;
            outcome.admitted += result.admitted;
            outcome.already_held += result.already_held;
            outcome.discarded += result.discarded;
            outcome.last_score = result.last_score;
        }
        Ok(outcome)
    }

    /// Sync every configured topic in turn, returning each topic's tally.
    pub async fn sync_all(
        &self,
        peer_for_host: impl Fn(&str) -> Result<Arc<dyn RemotePeer>, OverlayError> + Copy,
    ) -> Result<Vec<(Topic, SyncOutcome)>, OverlayError> {
        let mut outcomes = Vec::with_capacity(self.topics.len());
        for config in &self.topics {
            let outcome = self.sync_topic(config, peer_for_host).await?;
            outcomes.push((config.topic.clone(), outcome));
        }
        Ok(outcomes)
    }

    /// Re-walk one topic's reorg-invalidated outputs against a single
    /// peer (§4.4 `SyncInvalidatedOutputs`).
    pub async fn sync_invalidated_outputs(
        &self,
        topic: &Topic,
        peer: &dyn RemotePeer,
        limit: usize,
    ) -> Result<SyncOutcome, OverlayError> {
        self.engine.sync_invalidated_outputs(peer, topic, limit).await
    }

    /// Count of this topic's outputs currently marked invalidated,
    /// useful for deciding whether `sync_invalidated_outputs` is worth
    /// running.
    pub async fn invalidated_count(&self, topic: &Topic, limit: usize) -> Result<usize, OverlayError> {
        Ok(self
            .storage
            .find_outpoints_by_merkle_state(topic, MerkleState::Invalidated, limit)
            .await?
            .len())
    }
}
