mod cli;
mod demo;

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};

use overlay_core::advertiser::{Advertiser, Broadcaster, LookupResolver, PeerPropagator};
use overlay_core::chain::ChainValidator;
use overlay_core::codec::Bundle;
use overlay_core::config::NodeConfig;
use overlay_core::gasp::{GaspEngine, GraphLimits, HttpRemotePeer, RemotePeer};
use overlay_core::orchestrator::Orchestrator;
use overlay_core::storage::{MemoryStorage, Storage};
use overlay_core::submission::SubmissionPipeline;
use overlay_core::topic::TopicManager;
use overlay_core::types::{SubmitMode, TaggedBeef, Topic};

use cli::{Cli, Command};
use demo::{AdmitAllTopicManager, LoggingBroadcaster, LoggingPeerPropagator, NoopAdvertiser, NoopLookupResolver, TrustingChainValidator};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("read config file {}", path.display()))?;
            NodeConfig::from_json(&raw).with_context(|| format!("parse config file {}", path.display()))?
        }
        None => NodeConfig::default(),
    };
    if let Some(concurrency) = args.gasp_concurrency {
        config.gasp_concurrency = concurrency;
    }

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let chain_validator: Arc<dyn ChainValidator> = Arc::new(TrustingChainValidator);
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(LoggingBroadcaster);
    let peer_propagator: Arc<dyn PeerPropagator> = Arc::new(LoggingPeerPropagator);
    let advertiser: Arc<dyn Advertiser> = Arc::new(NoopAdvertiser);
    let lookup_resolver: Arc<dyn LookupResolver> = Arc::new(NoopLookupResolver);

    let sync_configs = config.topic_sync_configs();
    let mut topics: Vec<Topic> = sync_configs.iter().map(|entry| entry.topic.clone()).collect();
    if let Command::Submit { topic, .. } = &args.command {
        let topic = Topic::new(topic.clone());
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }

    let mut managers: HashMap<Topic, Arc<dyn TopicManager>> = HashMap::new();
    for topic in &topics {
        managers.insert(topic.clone(), Arc::new(AdmitAllTopicManager::new(topic.clone())) as Arc<dyn TopicManager>);
    }

    let mut pipeline = SubmissionPipeline::new(storage.clone(), chain_validator.clone(), broadcaster, peer_propagator);
    for manager in managers.values() {
        pipeline.register_topic_manager(manager.clone());
    }
    let pipeline = Arc::new(pipeline);

    let engine = Arc::new(
        GaspEngine::new(storage.clone(), pipeline.clone(), managers, chain_validator, config.gasp_concurrency).with_limits(GraphLimits {
            max_nodes: config.graph_max_nodes,
            max_depth: config.graph_max_depth,
        }),
    );

    let mut orchestrator = Orchestrator::new(storage, engine, lookup_resolver, advertiser);
    if let Some(domain) = &config.own_domain {
        orchestrator = orchestrator.with_own_domain(domain.clone());
    }
    if let Some(tracker_topic) = &config.tracker_topic {
        orchestrator = orchestrator.with_trackers(Topic::new(tracker_topic.clone()), config.tracker_hosts.clone());
    }
    for sync_config in sync_configs {
        orchestrator.add_topic(sync_config);
    }

    match args.command {
        Command::Submit { topic, outputs } => {
            let topic = Topic::new(topic);
            let tx = demo::make_demo_tx(&topic, outputs);
            tracing::info!(txid = %tx.txid, %topic, outputs, "submitting demo transaction");
            let tagged = TaggedBeef {
                topics: vec![topic],
                beef: Bundle::single(tx),
                off_chain_values: None,
            };
            let steak = pipeline.submit(tagged, SubmitMode::Current, &HashMap::new()).await?;
            println!("{steak:#?}");
        }
        Command::Sync => {
            if orchestrator.topics().is_empty() {
                tracing::warn!("no topics configured; pass --config with at least one topic entry");
            }
            let outcomes = orchestrator
                .sync_all(|host| {
                    let peer = HttpRemotePeer::new(host)?;
                    Ok(Arc::new(peer) as Arc<dyn RemotePeer>)
                })
                .await?;
            for (topic, outcome) in outcomes {
                tracing::info!(
                    %topic,
                    admitted = outcome.admitted,
                    already_held = outcome.already_held,
                    discarded = outcome.discarded,
                    last_score = outcome.last_score,
                    "sync complete"
                );
            }
        }
    }

    Ok(())
}
