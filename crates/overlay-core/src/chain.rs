//! Signed chain-header validator (external collaborator, interface only).
//!
//! The actual header-chain/SPV verification logic is excluded (§1); this
//! trait is the seam the submission pipeline and GASP engine call through.

use async_trait::async_trait;
use bitcoin::Txid;

use crate::codec::{Bundle, MerkleProof};
use crate::error::OverlayError;

/// Verifies bundles and Merkle proofs against a trusted chain of block
/// headers.
#[async_trait]
pub trait ChainValidator: Send + Sync {
    /// Verify `bundle`'s primary transaction by walking its embedded
    /// ancestor proofs. Returns `Ok(())` if every mined ancestor's proof
    /// validates against the known header chain.
    async fn verify_bundle(&self, bundle: &Bundle) -> Result<(), OverlayError>;

    /// Verify that `proof` is valid for `txid` at `proof.block_height`
    /// against the known header chain.
    async fn verify_proof(&self, txid: &Txid, proof: &MerkleProof) -> Result<(), OverlayError>;
}
