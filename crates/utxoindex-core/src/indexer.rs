//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// First height to index when the ledger is empty.
    pub start_height: u64,
    /// How far below the tip the common-ancestor search may go.
    pub max_reorg_depth: u64,
    /// Poll interval (milliseconds).
    pub poll_interval_ms: u64,
    /// Fetch `gettxoutproof` for relevant transactions and check it.
    /// Failures are reported but never block acceptance.
    pub verify_merkle_proofs: bool,
    /// Also enforce timestamp monotonicity on new headers.
    pub strict_header_validation: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            start_height: 0,
            max_reorg_depth: 6,
            poll_interval_ms: 5_000,
            verify_merkle_proofs: true,
            strict_header_validation: false,
        }
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Waiting for the next tick.
    Idle,
    /// Comparing the stored tip with the node.
    CheckingTip,
    /// Fetching and applying the next block.
    FetchingBlock,
    /// Rolling back to a common ancestor.
    ReorgRecovery,
    /// No common ancestor within `max_reorg_depth`; needs an operator.
    Degraded,
    /// Shut down after a cancellation signal.
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CheckingTip => write!(f, "checking-tip"),
            Self::FetchingBlock => write!(f, "fetching-block"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Degraded => write!(f, "degraded"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
