//! Node and sync configuration.
//!
//! Deliberately plain: a `serde`-deserializable struct with `Default`
//! impls for every field, loadable from a JSON config file or built up
//! by hand in tests and the demo binary. No dedicated config-file crate
//! is introduced; the teacher reads its own settings straight off `clap`
//! arguments, and this module keeps the same "just a struct" ethos for
//! the settings `clap` doesn't cover (per-topic sync policy).

use serde::{Deserialize, Serialize};

use crate::advertiser::SyncMode;
use crate::error::OverlayError;
use crate::orchestrator::TopicSyncConfig;
use crate::types::Topic;

/// One topic's entry in a config file: a plain JSON-friendly mirror of
/// [`TopicSyncConfig`] (`SyncMode` isn't `Deserialize` directly since its
/// `Peers` variant is the only one carrying data worth round-tripping).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncModeConfig {
    None,
    Ship,
    Peers { hosts: Vec<String> },
}

impl From<SyncModeConfig> for SyncMode {
    fn from(config: SyncModeConfig) -> Self {
        match config {
            SyncModeConfig::None => SyncMode::None,
            SyncModeConfig::Ship => SyncMode::Ship,
            SyncModeConfig::Peers { hosts } => SyncMode::Peers(hosts),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub topic: String,
    #[serde(flatten)]
    pub mode: SyncModeConfig,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// `false` also pushes this node's own newer UTXOs back to discovered
    /// peers during sync (§4.3 reply half). Defaults to `true` (pull-only)
    /// so existing one-way deployments opt in explicitly.
    #[serde(default = "default_unidirectional")]
    pub unidirectional: bool,
}

fn default_page_limit() -> u32 {
    500
}

fn default_unidirectional() -> bool {
    true
}

fn default_concurrency() -> usize {
    8
}

fn default_graph_max_nodes() -> usize {
    1000
}

fn default_graph_max_depth() -> usize {
    64
}

/// Root node configuration: GASP engine tuning plus the set of topics to
/// maintain and sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_concurrency")]
    pub gasp_concurrency: usize,
    #[serde(default = "default_graph_max_nodes")]
    pub graph_max_nodes: usize,
    #[serde(default = "default_graph_max_depth")]
    pub graph_max_depth: usize,
    #[serde(default)]
    pub topics: Vec<TopicConfig>,
    /// This node's own SHIP-advertised domain, dropped from SHIP discovery
    /// results so it never syncs against itself.
    #[serde(default)]
    pub own_domain: Option<String>,
    /// The SHIP/SLAP tracker topic name, if this deployment merges static
    /// tracker hosts into that topic's peer set (§4.4).
    #[serde(default)]
    pub tracker_topic: Option<String>,
    #[serde(default)]
    pub tracker_hosts: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            gasp_concurrency: default_concurrency(),
            graph_max_nodes: default_graph_max_nodes(),
            graph_max_depth: default_graph_max_depth(),
            topics: Vec::new(),
            own_domain: None,
            tracker_topic: None,
            tracker_hosts: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn from_json(raw: &str) -> Result<Self, OverlayError> {
        serde_json::from_str(raw).map_err(|err| OverlayError::InvalidBundle(format!("invalid config: {err}")))
    }

    pub fn topic_sync_configs(&self) -> Vec<TopicSyncConfig> {
        self.topics
            .iter()
            .cloned()
            .map(|entry| TopicSyncConfig {
                topic: Topic::new(entry.topic),
                mode: entry.mode.into(),
                page_limit: entry.page_limit,
                unidirectional: entry.unidirectional,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_topic_modes_from_json() {
        let raw = r#"{
            "topics": [
                {"topic": "alpha", "mode": "ship", "page_limit": 100},
                {"topic": "beta", "mode": "peers", "hosts": ["https://peer.example"]}
            ]
        }"#;
        let config = NodeConfig::from_json(raw).unwrap();
        assert_eq!(config.topics.len(), 2);
        assert_eq!(config.gasp_concurrency, default_concurrency());

        let synced = config.topic_sync_configs();
        assert_eq!(synced[0].topic, Topic::new("alpha"));
        assert!(matches!(synced[0].mode, SyncMode::Ship));
        assert_eq!(synced[1].page_limit, 500);
        assert!(matches!(&synced[1].mode, SyncMode::Peers(hosts) if hosts == &vec!["https://peer.example".to_string()]));
    }
}
