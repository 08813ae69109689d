//! Error types for overlay-core.

use bitcoin::Txid;

use crate::types::{Outpoint, Topic};

// ==============================================================================
// Storage Errors
// ==============================================================================

/// Structured errors a [`crate::storage::Storage`] implementation can return.
///
/// Each variant captures a specific failure mode rather than collapsing
/// everything into a single `String`, so callers can distinguish "not
/// found" from a genuine backend failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// ==============================================================================
// Overlay Errors
// ==============================================================================

/// Top-level error type returned by the submission pipeline, the Merkle
/// proof handler, and the GASP sync engine.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("unknown topic: {0}")]
    UnknownTopic(Topic),

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("missing input {outpoint} for {txid}")]
    MissingInput { txid: Txid, outpoint: Outpoint },

    #[error("missing output: {0}")]
    MissingOutput(Outpoint),

    #[error("input already spent: {0}")]
    InputSpent(Outpoint),

    #[error("missing source transaction: {0}")]
    MissingSourceTransaction(Txid),

    #[error("missing BEEF for {0}")]
    MissingBeef(Txid),

    #[error("missing dependency transaction: {0}")]
    MissingDependencyTransaction(Txid),

    #[error("merkle root mismatch for {0}")]
    MerkleRootMismatch(Txid),

    #[error("not found in proof: {0}")]
    NotFoundInProof(Txid),

    #[error("peer protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("peer HTTP error: status={status}, body={body}")]
    Http { status: u16, body: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("topic manager error: {0}")]
    Manager(String),

    #[error("lookup service error: {0}")]
    LookupService(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Replayed onto every waiter of a coalesced fetch (§4.3's request
    /// coalescing) whose single in-flight attempt failed; `kind` preserves
    /// the originating error's classification so callers branching on it
    /// behave the same as if the fetch had run uncoalesced.
    #[error("{message}")]
    Coalesced { kind: ErrorKind, message: String },

    /// A protocol direction the one-way GASP HTTP client deliberately
    /// doesn't implement (§6.2: `SubmitNode`, `GetInitialReply`).
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Coarse classification used by callers deciding whether to retry.
///
/// Mirrors §7's error taxonomy: validation errors are reported and not
/// retried, storage/network errors are transient and retry is a caller
/// decision, version mismatches abort the peer's sync immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Storage,
    Network,
    VersionMismatch,
    Cancelled,
}

impl OverlayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OverlayError::UnknownTopic(_)
            | OverlayError::InvalidBundle(_)
            | OverlayError::InvalidTransaction(_)
            | OverlayError::MissingInput { .. }
            | OverlayError::MissingOutput(_)
            | OverlayError::InputSpent(_)
            | OverlayError::MissingSourceTransaction(_)
            | OverlayError::MissingBeef(_)
            | OverlayError::MissingDependencyTransaction(_)
            | OverlayError::MerkleRootMismatch(_)
            | OverlayError::NotFoundInProof(_)
            | OverlayError::Manager(_) => ErrorKind::Validation,
            OverlayError::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            OverlayError::Http { .. } => ErrorKind::Network,
            OverlayError::Cancelled => ErrorKind::Cancelled,
            OverlayError::Storage(_) | OverlayError::LookupService(_) => ErrorKind::Storage,
            OverlayError::Broadcast(_) => ErrorKind::Network,
            OverlayError::Coalesced { kind, .. } => *kind,
            OverlayError::Unsupported(_) => ErrorKind::Validation,
        }
    }
}
