//! Observability seam for the indexer.
//!
//! The indexer never logs directly. It reports [`IndexEvent`]s to an injected
//! [`IndexObserver`]; [`TracingObserver`] forwards them to `tracing`, and
//! [`RecordingObserver`] keeps them in memory so tests can assert on them.

use std::sync::Mutex;

use tracing::Level;

/// Something the indexer did or noticed.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    BlockAccepted {
        height: u64,
        hash: String,
        relevant_txs: usize,
    },
    BlockRejected {
        height: u64,
        hash: String,
        reason: String,
    },
    TransactionIndexed {
        height: u64,
        txid: String,
        amount: i64,
    },
    MerkleProofVerified {
        height: u64,
        txid: String,
    },
    /// Best-effort confirmation failed; the transaction is still indexed.
    MerkleProofUnverified {
        height: u64,
        txid: String,
        reason: String,
    },
    ReorgDetected {
        height: u64,
        local_hash: String,
        remote_hash: String,
    },
    BlockRolledBack {
        height: u64,
        actions: usize,
    },
    /// `ancestor` is `None` when the whole stored chain was unwound.
    ReorgResolved {
        ancestor: Option<u64>,
        depth: u64,
    },
    TickFailed {
        error: String,
        retryable: bool,
    },
    Stopped {
        tip: Option<u64>,
    },
}

impl IndexEvent {
    /// Severity the event should be logged at.
    pub fn level(&self) -> Level {
        match self {
            Self::BlockAccepted { .. } | Self::ReorgResolved { .. } | Self::Stopped { .. } => {
                Level::INFO
            }
            Self::TransactionIndexed { .. } | Self::MerkleProofVerified { .. } => Level::DEBUG,
            Self::BlockRejected { .. }
            | Self::MerkleProofUnverified { .. }
            | Self::ReorgDetected { .. }
            | Self::BlockRolledBack { .. } => Level::WARN,
            Self::TickFailed { .. } => Level::ERROR,
        }
    }
}

/// Receives indexer events.
pub trait IndexObserver: Send + Sync {
    fn on_event(&self, event: &IndexEvent);
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl IndexObserver for TracingObserver {
    fn on_event(&self, event: &IndexEvent) {
        match event {
            IndexEvent::BlockAccepted {
                height,
                hash,
                relevant_txs,
            } => tracing::info!(height, hash = %hash, relevant_txs, "block indexed"),
            IndexEvent::BlockRejected { height, hash, reason } => {
                tracing::warn!(height, hash = %hash, reason = %reason, "block rejected")
            }
            IndexEvent::TransactionIndexed { height, txid, amount } => {
                tracing::debug!(height, txid = %txid, amount, "transaction indexed")
            }
            IndexEvent::MerkleProofVerified { height, txid } => {
                tracing::debug!(height, txid = %txid, "merkle proof verified")
            }
            IndexEvent::MerkleProofUnverified { height, txid, reason } => tracing::warn!(
                height,
                txid = %txid,
                reason = %reason,
                "merkle proof not verified, indexing anyway"
            ),
            IndexEvent::ReorgDetected {
                height,
                local_hash,
                remote_hash,
            } => tracing::warn!(
                height,
                local_hash = %local_hash,
                remote_hash = %remote_hash,
                "reorg detected"
            ),
            IndexEvent::BlockRolledBack { height, actions } => {
                tracing::warn!(height, actions, "block rolled back")
            }
            IndexEvent::ReorgResolved { ancestor, depth } => {
                tracing::info!(ancestor = ?ancestor, depth, "reorg resolved")
            }
            IndexEvent::TickFailed { error, retryable } => {
                tracing::error!(error = %error, retryable, "sync tick failed")
            }
            IndexEvent::Stopped { tip } => tracing::info!(tip = ?tip, "indexer stopped"),
        }
    }
}

/// Stores every event it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<IndexEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<IndexEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Events at or above `level` in severity.
    pub fn at_least(&self, level: Level) -> Vec<IndexEvent> {
        // tracing orders levels by verbosity: ERROR < WARN < INFO.
        self.events().into_iter().filter(|e| e.level() <= level).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl IndexObserver for RecordingObserver {
    fn on_event(&self, event: &IndexEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
