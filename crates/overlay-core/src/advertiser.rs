//! Advertiser + Lookup Resolver (C5, interfaces only) and the broadcast
//! seams the submission pipeline calls through.
//!
//! Discovering peer endpoints for a topic via on-chain SHIP/SLAP
//! advertisements, and constructing/parsing those advertisements, are
//! excluded (§1) — these traits are the call-through seam.

use async_trait::async_trait;

use crate::codec::RawTx;
use crate::error::OverlayError;
use crate::types::Topic;

/// Per-topic peer-discovery strategy (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// No peer discovery or sync for this topic.
    None,
    /// Discover peers by querying the configured lookup resolver for
    /// SHIP advertisements.
    Ship,
    /// Use a statically configured peer list.
    Peers(Vec<String>),
}

/// The advertised protocol an [`Advertisement`] announces support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdProtocol {
    Ship,
    Slap,
}

/// A parsed on-chain SHIP/SLAP advertisement.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub protocol: AdProtocol,
    pub domain: String,
    pub topic_or_service: String,
}

/// Parses on-chain advertisement outputs into [`Advertisement`]s. The
/// scripting format itself is excluded; only the parse/filter seam is
/// modeled here.
#[async_trait]
pub trait Advertiser: Send + Sync {
    fn parse_advertisements(&self, raw_outputs: &[Vec<u8>]) -> Vec<Advertisement>;
}

/// Queries for SHIP/SLAP advertisements on behalf of a topic (C5).
#[async_trait]
pub trait LookupResolver: Send + Sync {
    /// Query for every advertisement relevant to `topic`. §4.4 bounds
    /// this with a 60-second timeout at the call site.
    async fn query(&self, topic: &Topic) -> Result<Vec<Vec<u8>>, OverlayError>;
}

/// Broadcasts a transaction onto the base chain (§4.1 step 7).
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &RawTx) -> Result<(), OverlayError>;
}

/// Propagates a just-admitted transaction to discovered overlay peers
/// (§4.1 step 11). Distinct from [`Broadcaster`]: this gossips to overlay
/// peers rather than the base chain, and its failures are logged, not
/// surfaced.
#[async_trait]
pub trait PeerPropagator: Send + Sync {
    async fn propagate(
        &self,
        topic: &Topic,
        tx: &RawTx,
        peers: &[String],
    ) -> Result<(), OverlayError>;
}
