//! Undo log: compensating actions recorded per accepted block.
//!
//! Every ledger mutation made while accepting block `h` that cannot be
//! rebuilt from the chain source gets an [`UndoAction`] in bucket `h`.
//! Rolling back `h` replays that bucket and then drops it.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// What kind of mutation an action compensates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoKind {
    /// A UTXO was inserted; undone by deleting it.
    CreateUtxo,
    /// A UTXO was marked spent; undone by unspending it.
    SpendUtxo,
}

impl UndoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateUtxo => "create_utxo",
            Self::SpendUtxo => "spend_utxo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create_utxo" => Some(Self::CreateUtxo),
            "spend_utxo" => Some(Self::SpendUtxo),
            _ => None,
        }
    }
}

impl std::fmt::Display for UndoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single compensating action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoAction {
    pub block_height: u64,
    pub kind: UndoKind,
    pub txid: String,
    pub vout: u32,
}

impl UndoAction {
    pub fn create_utxo(block_height: u64, txid: impl Into<String>, vout: u32) -> Self {
        Self {
            block_height,
            kind: UndoKind::CreateUtxo,
            txid: txid.into(),
            vout,
        }
    }

    pub fn spend_utxo(block_height: u64, txid: impl Into<String>, vout: u32) -> Self {
        Self {
            block_height,
            kind: UndoKind::SpendUtxo,
            txid: txid.into(),
            vout,
        }
    }
}

/// In-memory journal of undo actions keyed by block height.
///
/// Owned by one indexer instance. Not persisted; the ledger store keeps its
/// own journal for use after a restart.
#[derive(Debug, Default)]
pub struct UndoLog {
    buckets: Mutex<BTreeMap<u64, Vec<UndoAction>>>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Vec<UndoAction>>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `action` to the bucket for its block height.
    pub fn add(&self, action: UndoAction) {
        self.lock().entry(action.block_height).or_default().push(action);
    }

    /// Append several actions, preserving their order.
    pub fn extend(&self, actions: impl IntoIterator<Item = UndoAction>) {
        let mut buckets = self.lock();
        for action in actions {
            buckets.entry(action.block_height).or_default().push(action);
        }
    }

    /// Actions recorded for `height`, in insertion order.
    pub fn get(&self, height: u64) -> Vec<UndoAction> {
        self.lock().get(&height).cloned().unwrap_or_default()
    }

    /// Drop the bucket for `height`.
    pub fn remove(&self, height: u64) {
        self.lock().remove(&height);
    }

    /// Drop every bucket strictly below `height`.
    pub fn prune_below(&self, height: u64) {
        let mut buckets = self.lock();
        let keep = buckets.split_off(&height);
        *buckets = keep;
    }

    /// Heights that currently have a bucket, ascending.
    pub fn heights(&self) -> Vec<u64> {
        self.lock().keys().copied().collect()
    }

    /// Total number of recorded actions.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_insertion_order() {
        let log = UndoLog::new();
        log.add(UndoAction::create_utxo(100, "a", 0));
        log.add(UndoAction::spend_utxo(100, "b", 1));
        log.add(UndoAction::create_utxo(101, "c", 0));

        let bucket = log.get(100);
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket[0].txid, "a");
        assert_eq!(bucket[1].kind, UndoKind::SpendUtxo);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn missing_bucket_is_empty() {
        let log = UndoLog::new();
        assert!(log.get(42).is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn remove_drops_only_that_height() {
        let log = UndoLog::new();
        log.extend([UndoAction::create_utxo(100, "a", 0), UndoAction::create_utxo(101, "b", 0)]);
        log.remove(101);
        assert!(log.get(101).is_empty());
        assert_eq!(log.get(100).len(), 1);
    }

    #[test]
    fn prune_below_keeps_recent_heights() {
        let log = UndoLog::new();
        for h in 95..=105 {
            log.add(UndoAction::create_utxo(h, format!("{h}"), 0));
        }
        log.prune_below(100);
        assert_eq!(log.heights(), (100..=105).collect::<Vec<_>>());
    }

    #[test]
    fn kind_string_roundtrip() {
        for kind in [UndoKind::CreateUtxo, UndoKind::SpendUtxo] {
            assert_eq!(UndoKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(UndoKind::parse("drop_table"), None);
    }
}
