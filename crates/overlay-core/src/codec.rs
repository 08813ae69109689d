//! Structural stand-ins for the transaction bundle (BEEF) and Merkle-path
//! codec (C2).
//!
//! The production wire codec — serializing/deserializing BEEF bytes and
//! computing Merkle roots — is an excluded external concern (§1). This
//! module provides just enough structure for the submission pipeline and
//! GASP engine to manipulate bundles meaningfully: a flat list of
//! transactions (primary + ancestors) each optionally carrying a Merkle
//! proof, and a `Txid`/`OutPoint`/`Amount`-typed transaction shape reused
//! directly from the `bitcoin` crate rather than reinvented.

use std::collections::HashSet;

use bitcoin::{ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use crate::types::Outpoint;

// ==============================================================================
// Raw Transaction
// ==============================================================================

/// A minimal transaction shape: inputs as the outpoints they spend (in
/// vin order) and outputs as locking script + value (in vout order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTx {
    pub txid: Txid,
    pub inputs: Vec<Outpoint>,
    pub outputs: Vec<TxOut>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub script: ScriptBuf,
    pub satoshis: u64,
}

// ==============================================================================
// Merkle Proof
// ==============================================================================

/// A Merkle path for one block, enough to recover a transaction's offset
/// and to compare against a previously-applied proof for idempotence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub block_height: u32,
    /// `(txid, offset-within-block)` pairs for every leaf this proof
    /// covers. Real BEEF proofs carry a compact sibling path instead of
    /// the full leaf list; this stand-in keeps the leaves explicit since
    /// root computation itself is out of scope.
    pub leaves: Vec<(Txid, u64)>,
    pub root: [u8; 32],
}

impl MerkleProof {
    pub fn offset_of(&self, txid: &Txid) -> Option<u64> {
        self.leaves
            .iter()
            .find(|(leaf_txid, _)| leaf_txid == txid)
            .map(|(_, offset)| *offset)
    }

    /// The root this proof claims, computed at construction time by
    /// whatever produced it. Delegated to the chain validator (C2/C7 rely
    /// on an external root-computation + validation step); this accessor
    /// just exposes the value carried on the wire.
    pub fn computed_root(&self) -> [u8; 32] {
        self.root
    }
}

// ==============================================================================
// Bundle
// ==============================================================================

/// One transaction inside a [`Bundle`], with its proof if mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleTx {
    pub tx: RawTx,
    pub proof: Option<MerkleProof>,
}

/// A self-contained bundle: the primary transaction plus every ancestor
/// transaction needed to SPV-verify it, each optionally Merkle-proven.
///
/// `transactions` is ordered ancestor-first (a transaction always appears
/// before any transaction that spends one of its outputs); the primary
/// transaction is identified by `primary_txid` rather than assumed to be
/// last, since callers sometimes rebuild bundles by DFS traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub primary_txid: Txid,
    pub transactions: Vec<BundleTx>,
}

impl Bundle {
    pub fn single(tx: RawTx) -> Self {
        let primary_txid = tx.txid;
        Self {
            primary_txid,
            transactions: vec![BundleTx { tx, proof: None }],
        }
    }

    pub fn primary(&self) -> Option<&BundleTx> {
        self.find(&self.primary_txid)
    }

    pub fn find(&self, txid: &Txid) -> Option<&BundleTx> {
        self.transactions.iter().find(|entry| entry.tx.txid == *txid)
    }

    pub fn find_mut(&mut self, txid: &Txid) -> Option<&mut BundleTx> {
        self.transactions
            .iter_mut()
            .find(|entry| entry.tx.txid == *txid)
    }

    /// The primary transaction's input outpoints, in vin order.
    pub fn primary_input_outpoints(&self) -> Vec<Outpoint> {
        self.primary()
            .map(|entry| entry.tx.inputs.clone())
            .unwrap_or_default()
    }

    /// Ancestor transactions (everything except the primary), in the
    /// bundle's existing ancestor-first order.
    pub fn ancestors(&self) -> impl Iterator<Item = &BundleTx> {
        self.transactions
            .iter()
            .filter(move |entry| entry.tx.txid != self.primary_txid)
    }

    /// `true` if `txid`'s stored proof, if any, computes the same root as
    /// `proof` — used to make Merkle-proof application idempotent.
    pub fn has_equivalent_proof(&self, txid: &Txid, proof: &MerkleProof) -> bool {
        self.find(txid)
            .and_then(|entry| entry.proof.as_ref())
            .is_some_and(|existing| existing.computed_root() == proof.computed_root())
    }

    /// Attach `proof` to the transaction `txid` inside this bundle,
    /// returning `true` if a matching transaction was found.
    pub fn attach_proof(&mut self, txid: &Txid, proof: MerkleProof) -> bool {
        match self.find_mut(txid) {
            Some(entry) => {
                entry.proof = Some(proof);
                true
            }
            None => false,
        }
    }

    /// Split ancillary ancestor transactions out of this bundle into a
    /// compact side-bundle (§4.1 step 5d). The primary transaction is
    /// never spliced out even if named in `ancillary_txids`.
    pub fn splice_ancillary(&self, ancillary_txids: &HashSet<Txid>) -> (Bundle, Option<Bundle>) {
        if ancillary_txids.is_empty() {
            return (self.clone(), None);
        }

        let mut kept = Vec::new();
        let mut spliced = Vec::new();
        for entry in &self.transactions {
            if entry.tx.txid != self.primary_txid && ancillary_txids.contains(&entry.tx.txid) {
                spliced.push(entry.clone());
            } else {
                kept.push(entry.clone());
            }
        }

        let remaining = Bundle {
            primary_txid: self.primary_txid,
            transactions: kept,
        };
        let ancillary = spliced.last().map(|last| Bundle {
            primary_txid: last.tx.txid,
            transactions: spliced.clone(),
        });
        (remaining, ancillary)
    }

    /// Drop any ancestor transaction that no longer has a consumer inside
    /// the bundle and is not the primary — used after attaching a proof
    /// to prune now-redundant ancestors (§4.2 updateMerkleProof).
    pub fn prune_unreferenced_ancestors(&mut self) {
        loop {
            let referenced: HashSet<Txid> = self
                .transactions
                .iter()
                .flat_map(|entry| entry.tx.inputs.iter().map(|op| op.txid))
                .collect();
            let before = self.transactions.len();
            self.transactions.retain(|entry| {
                entry.tx.txid == self.primary_txid || referenced.contains(&entry.tx.txid)
            });
            if self.transactions.len() == before {
                break;
            }
        }
    }
}
