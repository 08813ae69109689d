//! Core domain logic for the overlay sync engine.
//!
//! Two systems, sharing one per-topic UTXO model: the [`submission`]
//! pipeline (tagged-bundle validation, per-topic admissibility,
//! persistent mutation, propagation) and the [`gasp`] sync engine (peer
//! UTXO-set pagination, concurrent dependency-graph resolution, anchor
//! validation and finalization). [`merkle`] upgrades stored outputs as
//! their producing transactions get mined, and [`orchestrator`] drives
//! per-topic peer discovery and sync on a schedule.
//!
//! External collaborators the pipeline and sync engine call through —
//! durable storage, per-topic admissibility rules, a side-channel lookup
//! index, SPV chain validation, and base-chain broadcast/peer
//! propagation — are modeled as traits ([`storage::Storage`],
//! [`topic::TopicManager`], [`lookup::LookupService`],
//! [`chain::ChainValidator`], [`advertiser::Broadcaster`] /
//! [`advertiser::PeerPropagator`]); constructing concrete instances of
//! any of them beyond the in-memory reference storage is outside this
//! crate's scope.

pub mod advertiser;
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod gasp;
pub mod lookup;
pub mod merkle;
pub mod orchestrator;
pub mod storage;
pub mod submission;
pub mod testutil;
pub mod topic;
pub mod types;

pub use error::{ErrorKind, OverlayError, StorageError};
pub use submission::SubmissionPipeline;
pub use types::{Outpoint, Output, Steak, SubmitMode, TaggedBeef, Topic};
