//! In-memory ledger backend.
//!
//! Keeps headers, tracked addresses, transactions, UTXOs and the undo journal
//! in RAM. A transaction takes the state lock and writes in place, journaling
//! the inverse of every write; dropping it uncommitted replays the journal
//! backwards. Cost is proportional to what the transaction touches, not to the
//! size of the ledger.
//! Useful for tests and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use utxoindex_core::error::IndexerError;
use utxoindex_core::store::{LedgerStore, LedgerTx};
use utxoindex_core::types::{BlockHeader, LedgerTransaction, NewUtxo, TrackedAddress, Utxo};
use utxoindex_core::undo::UndoAction;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    headers: BTreeMap<u64, BlockHeader>,
    addresses: Vec<TrackedAddress>,
    transactions: Vec<LedgerTransaction>,
    utxos: Vec<Utxo>,
    undo: BTreeMap<u64, Vec<UndoAction>>,
    next_id: i64,
}

impl LedgerState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn address(&self, address: &str) -> Option<TrackedAddress> {
        self.addresses.iter().find(|a| a.address == address).cloned()
    }
}

/// In-memory ledger store.
///
/// All data is lost when the process exits.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored headers.
    pub async fn header_count(&self) -> usize {
        self.state.lock().await.headers.len()
    }

    /// Every stored UTXO, spent or not, in insertion order.
    pub async fn all_utxos(&self) -> Vec<Utxo> {
        self.state.lock().await.utxos.clone()
    }

    /// Every stored transaction in insertion order.
    pub async fn all_transactions(&self) -> Vec<LedgerTransaction> {
        self.state.lock().await.transactions.clone()
    }

    /// Heights that still have a persisted undo bucket.
    pub async fn undo_heights(&self) -> Vec<u64> {
        self.state.lock().await.undo.keys().copied().collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn tip(&self) -> Result<Option<BlockHeader>, IndexerError> {
        Ok(self.state.lock().await.headers.values().next_back().cloned())
    }

    async fn header_by_height(&self, height: u64) -> Result<Option<BlockHeader>, IndexerError> {
        Ok(self.state.lock().await.headers.get(&height).cloned())
    }

    async fn header_by_hash(&self, hash: &str) -> Result<Option<BlockHeader>, IndexerError> {
        Ok(self
            .state
            .lock()
            .await
            .headers
            .values()
            .find(|h| h.hash == hash)
            .cloned())
    }

    async fn address_by_string(
        &self,
        address: &str,
    ) -> Result<Option<TrackedAddress>, IndexerError> {
        Ok(self.state.lock().await.address(address))
    }

    async fn insert_address(
        &self,
        user_id: i64,
        address: &str,
    ) -> Result<TrackedAddress, IndexerError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.address(address) {
            return Ok(existing);
        }
        let row = TrackedAddress {
            id: state.next_id(),
            user_id,
            address: address.to_string(),
        };
        state.addresses.push(row.clone());
        Ok(row)
    }

    async fn transactions_by_address(
        &self,
        address_id: i64,
    ) -> Result<Vec<LedgerTransaction>, IndexerError> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| t.address_id == Some(address_id))
            .cloned()
            .collect())
    }

    async fn utxos_by_address(&self, address_id: i64) -> Result<Vec<Utxo>, IndexerError> {
        Ok(self
            .state
            .lock()
            .await
            .utxos
            .iter()
            .filter(|u| u.address_id == address_id)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, IndexerError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(InMemoryTx {
            next_id: guard.next_id,
            guard: Some(guard),
            journal: Vec::new(),
        }))
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// Inverse of one in-place write.
#[derive(Debug)]
enum Revert {
    Header(u64),
    Headers(BTreeMap<u64, BlockHeader>),
    TransactionPushed,
    Transactions(Vec<(usize, LedgerTransaction)>),
    UtxoPushed,
    Utxos(Vec<(usize, Utxo)>),
    UtxoRows(Vec<(usize, Utxo)>),
    UndoPushed(u64),
    UndoBuckets(BTreeMap<u64, Vec<UndoAction>>),
}

impl Revert {
    fn apply(self, state: &mut LedgerState) {
        match self {
            Revert::Header(height) => {
                state.headers.remove(&height);
            }
            Revert::Headers(removed) => state.headers.extend(removed),
            Revert::TransactionPushed => {
                state.transactions.pop();
            }
            Revert::Transactions(removed) => reinsert(&mut state.transactions, removed),
            Revert::UtxoPushed => {
                state.utxos.pop();
            }
            Revert::Utxos(removed) => reinsert(&mut state.utxos, removed),
            Revert::UtxoRows(rows) => {
                for (index, row) in rows {
                    if let Some(slot) = state.utxos.get_mut(index) {
                        *slot = row;
                    }
                }
            }
            Revert::UndoPushed(height) => {
                if let Some(bucket) = state.undo.get_mut(&height) {
                    bucket.pop();
                    if bucket.is_empty() {
                        state.undo.remove(&height);
                    }
                }
            }
            Revert::UndoBuckets(removed) => state.undo.extend(removed),
        }
    }
}

/// Remove matching rows, returning them with their original positions.
fn drain_where<T>(rows: &mut Vec<T>, mut remove: impl FnMut(&T) -> bool) -> Vec<(usize, T)> {
    let mut removed = Vec::new();
    let mut kept = Vec::with_capacity(rows.len());
    for (index, row) in std::mem::take(rows).into_iter().enumerate() {
        if remove(&row) {
            removed.push((index, row));
        } else {
            kept.push(row);
        }
    }
    *rows = kept;
    removed
}

/// Put rows back at their original positions (ascending).
fn reinsert<T>(rows: &mut Vec<T>, removed: Vec<(usize, T)>) {
    for (index, row) in removed {
        let index = index.min(rows.len());
        rows.insert(index, row);
    }
}

/// Open transaction over an [`InMemoryLedger`].
///
/// Holds the state lock until committed or dropped.
pub struct InMemoryTx {
    guard: Option<OwnedMutexGuard<LedgerState>>,
    journal: Vec<Revert>,
    next_id: i64,
}

impl InMemoryTx {
    fn parts(&mut self) -> Result<(&mut LedgerState, &mut Vec<Revert>), IndexerError> {
        match self.guard.as_deref_mut() {
            Some(state) => Ok((state, &mut self.journal)),
            None => Err(IndexerError::Storage("transaction already committed".into())),
        }
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if let Some(mut state) = self.guard.take() {
            while let Some(revert) = self.journal.pop() {
                revert.apply(&mut state);
            }
            state.next_id = self.next_id;
        }
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn insert_header(&mut self, header: &BlockHeader) -> Result<(), IndexerError> {
        let (state, journal) = self.parts()?;
        if state.headers.contains_key(&header.height) {
            return Err(IndexerError::Storage(format!(
                "header at height {} already stored",
                header.height
            )));
        }
        state.headers.insert(header.height, header.clone());
        journal.push(Revert::Header(header.height));
        Ok(())
    }

    async fn delete_headers_above(&mut self, height: u64) -> Result<u64, IndexerError> {
        let (state, journal) = self.parts()?;
        let removed = state.headers.split_off(&(height + 1));
        let count = removed.len() as u64;
        if count > 0 {
            journal.push(Revert::Headers(removed));
        }
        Ok(count)
    }

    async fn address_by_string(
        &mut self,
        address: &str,
    ) -> Result<Option<TrackedAddress>, IndexerError> {
        Ok(self.parts()?.0.address(address))
    }

    async fn insert_transaction(&mut self, tx: &LedgerTransaction) -> Result<i64, IndexerError> {
        let (state, journal) = self.parts()?;
        let id = state.next_id();
        state.transactions.push(LedgerTransaction { id, ..tx.clone() });
        journal.push(Revert::TransactionPushed);
        Ok(id)
    }

    async fn delete_transactions_above(&mut self, height: u64) -> Result<u64, IndexerError> {
        let (state, journal) = self.parts()?;
        let removed = drain_where(&mut state.transactions, |t| t.block_height > height);
        let count = removed.len() as u64;
        if count > 0 {
            journal.push(Revert::Transactions(removed));
        }
        Ok(count)
    }

    async fn utxo(&mut self, txid: &str, vout: u32) -> Result<Option<Utxo>, IndexerError> {
        Ok(self
            .parts()?
            .0
            .utxos
            .iter()
            .find(|u| u.txid == txid && u.vout == vout)
            .cloned())
    }

    async fn insert_utxo(&mut self, utxo: &NewUtxo) -> Result<Utxo, IndexerError> {
        let (state, journal) = self.parts()?;
        if state
            .utxos
            .iter()
            .any(|u| u.txid == utxo.txid && u.vout == utxo.vout)
        {
            return Err(IndexerError::Storage(format!(
                "utxo {}:{} already exists",
                utxo.txid, utxo.vout
            )));
        }
        let row = utxo.clone().into_utxo(state.next_id());
        state.utxos.push(row.clone());
        journal.push(Revert::UtxoPushed);
        Ok(row)
    }

    async fn mark_as_spent(
        &mut self,
        txid: &str,
        vout: u32,
        height: u64,
    ) -> Result<bool, IndexerError> {
        let (state, journal) = self.parts()?;
        let Some(index) = state
            .utxos
            .iter()
            .position(|u| u.txid == txid && u.vout == vout && !u.is_spent)
        else {
            return Ok(false);
        };
        let utxo = &mut state.utxos[index];
        journal.push(Revert::UtxoRows(vec![(index, utxo.clone())]));
        utxo.is_spent = true;
        utxo.spent_height = Some(height);
        Ok(true)
    }

    async fn unspend_by_height(&mut self, height: u64) -> Result<u64, IndexerError> {
        let (state, journal) = self.parts()?;
        let mut previous = Vec::new();
        for (index, utxo) in state.utxos.iter_mut().enumerate() {
            if utxo.spent_height == Some(height) {
                previous.push((index, utxo.clone()));
                utxo.is_spent = false;
                utxo.spent_height = None;
            }
        }
        let count = previous.len() as u64;
        if count > 0 {
            journal.push(Revert::UtxoRows(previous));
        }
        Ok(count)
    }

    async fn delete_utxos_above(&mut self, height: u64) -> Result<u64, IndexerError> {
        let (state, journal) = self.parts()?;
        let removed = drain_where(&mut state.utxos, |u| u.block_height > height);
        let count = removed.len() as u64;
        if count > 0 {
            journal.push(Revert::Utxos(removed));
        }
        Ok(count)
    }

    async fn record_undo(&mut self, action: &UndoAction) -> Result<(), IndexerError> {
        let (state, journal) = self.parts()?;
        state
            .undo
            .entry(action.block_height)
            .or_default()
            .push(action.clone());
        journal.push(Revert::UndoPushed(action.block_height));
        Ok(())
    }

    async fn undo_actions(&mut self, height: u64) -> Result<Vec<UndoAction>, IndexerError> {
        Ok(self.parts()?.0.undo.get(&height).cloned().unwrap_or_default())
    }

    async fn delete_undo(&mut self, height: u64) -> Result<(), IndexerError> {
        let (state, journal) = self.parts()?;
        if let Some(bucket) = state.undo.remove(&height) {
            journal.push(Revert::UndoBuckets(BTreeMap::from([(height, bucket)])));
        }
        Ok(())
    }

    async fn prune_undo_below(&mut self, height: u64) -> Result<(), IndexerError> {
        let (state, journal) = self.parts()?;
        let kept = state.undo.split_off(&height);
        let removed = std::mem::replace(&mut state.undo, kept);
        if !removed.is_empty() {
            journal.push(Revert::UndoBuckets(removed));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), IndexerError> {
        if self.guard.take().is_none() {
            return Err(IndexerError::Storage("transaction already committed".into()));
        }
        self.journal.clear();
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
