//! Ledger store contract consumed by the indexer.
//!
//! Reads go through [`LedgerStore`]. Every write goes through a
//! [`LedgerTx`] obtained from [`LedgerStore::begin`]: nothing is visible to
//! readers until [`LedgerTx::commit`] succeeds, and dropping the transaction
//! without committing discards every change made through it.
//!
//! Implementations: `InMemoryLedger`, `SqliteLedger` and `PostgresLedger` in
//! `utxoindex-storage`.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{BlockHeader, LedgerTransaction, NewUtxo, TrackedAddress, Utxo};
use crate::undo::UndoAction;

/// Read access plus the transaction entry point.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Highest stored header, if any.
    async fn tip(&self) -> Result<Option<BlockHeader>, IndexerError>;

    async fn header_by_height(&self, height: u64) -> Result<Option<BlockHeader>, IndexerError>;

    async fn header_by_hash(&self, hash: &str) -> Result<Option<BlockHeader>, IndexerError>;

    async fn address_by_string(&self, address: &str)
        -> Result<Option<TrackedAddress>, IndexerError>;

    /// Register an address for `user_id`. Registering the same string twice
    /// returns the existing row.
    async fn insert_address(
        &self,
        user_id: i64,
        address: &str,
    ) -> Result<TrackedAddress, IndexerError>;

    async fn transactions_by_address(
        &self,
        address_id: i64,
    ) -> Result<Vec<LedgerTransaction>, IndexerError>;

    async fn utxos_by_address(&self, address_id: i64) -> Result<Vec<Utxo>, IndexerError>;

    /// Open an atomic write transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, IndexerError>;
}

/// An open storage transaction.
#[async_trait]
pub trait LedgerTx: Send {
    // ── headers ───────────────────────────────────────────────────────────────

    async fn insert_header(&mut self, header: &BlockHeader) -> Result<(), IndexerError>;

    async fn delete_headers_above(&mut self, height: u64) -> Result<u64, IndexerError>;

    // ── addresses ─────────────────────────────────────────────────────────────

    async fn address_by_string(
        &mut self,
        address: &str,
    ) -> Result<Option<TrackedAddress>, IndexerError>;

    // ── transactions ──────────────────────────────────────────────────────────

    /// Insert the transaction with its line items; returns the row id.
    async fn insert_transaction(&mut self, tx: &LedgerTransaction) -> Result<i64, IndexerError>;

    async fn delete_transactions_above(&mut self, height: u64) -> Result<u64, IndexerError>;

    // ── UTXOs ─────────────────────────────────────────────────────────────────

    async fn utxo(&mut self, txid: &str, vout: u32) -> Result<Option<Utxo>, IndexerError>;

    /// Insert a new unspent output. Fails if `(txid, vout)` already exists.
    async fn insert_utxo(&mut self, utxo: &NewUtxo) -> Result<Utxo, IndexerError>;

    /// Mark `(txid, vout)` spent at `height`.
    ///
    /// Returns `true` only if an unspent row transitioned to spent.
    async fn mark_as_spent(
        &mut self,
        txid: &str,
        vout: u32,
        height: u64,
    ) -> Result<bool, IndexerError>;

    /// Unspend every UTXO spent by the block at `height`.
    async fn unspend_by_height(&mut self, height: u64) -> Result<u64, IndexerError>;

    /// Delete every UTXO created above `height`.
    async fn delete_utxos_above(&mut self, height: u64) -> Result<u64, IndexerError>;

    // ── undo journal ──────────────────────────────────────────────────────────

    async fn record_undo(&mut self, action: &UndoAction) -> Result<(), IndexerError>;

    async fn undo_actions(&mut self, height: u64) -> Result<Vec<UndoAction>, IndexerError>;

    async fn delete_undo(&mut self, height: u64) -> Result<(), IndexerError>;

    async fn prune_undo_below(&mut self, height: u64) -> Result<(), IndexerError>;

    /// Make every change in this transaction durable.
    async fn commit(&mut self) -> Result<(), IndexerError>;
}
