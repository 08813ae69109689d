//! Topic Manager (C3, interface only).
//!
//! Per-topic admissibility rules — which outputs to admit, which prior
//! coins to retain, which dependency transactions are ancillary, and
//! which inputs the GASP engine still needs to walk — are supplied by
//! whatever topic-specific scripting logic a deployment registers. That
//! scripting logic itself is excluded (§1); this module only defines the
//! seam.

use async_trait::async_trait;

use crate::codec::{Bundle, RawTx};
use crate::error::OverlayError;
use crate::types::{Admittance, Outpoint, PreviousCoin, Topic};

/// An input the GASP engine still needs to resolve before a node's
/// admissibility can be decided, with an optional request for the
/// producing transaction's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeededInput {
    pub outpoint: Outpoint,
    pub metadata: bool,
}

/// Per-topic admissibility rules (§4.1 step 5c, §4.3).
#[async_trait]
pub trait TopicManager: Send + Sync {
    fn topic(&self) -> &Topic;

    /// §4.1 step 5c: decide which outputs of `bundle`'s primary
    /// transaction to admit, which of `previous_coins` to retain, and
    /// which ancestor transactions are ancillary dependencies that must
    /// be retained alongside admitted outputs.
    async fn identify_admissible_outputs(
        &self,
        bundle: &Bundle,
        previous_coins: &[PreviousCoin],
    ) -> Result<Admittance, OverlayError>;

    /// §4.3 processIncomingNode: which of this node's inputs are needed
    /// to decide admissibility. The engine strips inputs the local store
    /// already holds before recursing.
    fn needed_inputs(&self, tx: &RawTx) -> Vec<NeededInput>;

    /// §4.3 CompleteGraph step 3: a side-effect-free admissibility check
    /// used while validating a candidate anchor, without reference to any
    /// previously-retained coins. Returns the primary transaction's
    /// admitted outpoints.
    async fn simulate_admission(&self, bundle: &Bundle) -> Result<Vec<Outpoint>, OverlayError> {
        let admittance = self.identify_admissible_outputs(bundle, &[]).await?;
        Ok(admittance
            .outputs_to_admit
            .into_iter()
            .map(|vout| Outpoint::new(bundle.primary_txid, vout))
            .collect())
    }
}
