//! Reorg resolution: locate the common ancestor, then unwind block by block.
//!
//! Rolling back block `h` replays its undo bucket inside one ledger
//! transaction:
//! - `CreateUtxo` ⇒ delete UTXOs created above `h - 1`
//! - `SpendUtxo`  ⇒ unspend UTXOs spent at `h`
//!
//! followed by deleting transactions and headers above `h - 1` and the
//! persisted bucket for `h`. Blocks are only ever unwound from the tip down.
//! When no stored header inside the search bound matches, the whole stored
//! chain is unwound and the next tick resumes from `start_height`.

use utxoindex_core::error::IndexerError;
use utxoindex_core::indexer::IndexerState;
use utxoindex_core::observer::IndexEvent;
use utxoindex_core::undo::UndoKind;

use crate::index_loop::Indexer;
use crate::source::ChainSource;

impl<S: ChainSource> Indexer<S> {
    /// Highest height at or below `tip` where the stored hash matches the
    /// source's hash.
    ///
    /// Searches at most `max_reorg_depth` below `tip`; running past that bound
    /// is [`IndexerError::ReorgDepthExceeded`]. `None` means every stored
    /// header inside the bound was orphaned: the walk ran below the lowest
    /// stored header without a match.
    pub async fn find_common_ancestor(&self, tip: u64) -> Result<Option<u64>, IndexerError> {
        let max_depth = self.config.max_reorg_depth;
        let floor = tip.saturating_sub(max_depth);

        let mut height = tip;
        loop {
            let Some(local) = self.store.header_by_height(height).await? else {
                return Ok(None);
            };
            let remote = self.source.block_hash(height).await?;
            if remote.as_deref() == Some(local.hash.as_str()) {
                return Ok(Some(height));
            }
            tracing::debug!(height, local = %local.hash, remote = ?remote, "hash mismatch");
            if height == floor {
                return Err(IndexerError::ReorgDepthExceeded { tip, max_depth });
            }
            height -= 1;
        }
    }

    /// Unwind every block above the common ancestor of `tip`, or the whole
    /// stored chain when there is none. Returns the ancestor height and the
    /// number of blocks unwound.
    ///
    /// Nothing is rolled back when the search fails.
    pub async fn handle_reorg(&mut self, tip: u64) -> Result<(Option<u64>, u64), IndexerError> {
        self.state = IndexerState::ReorgRecovery;

        let ancestor = match self.find_common_ancestor(tip).await {
            Ok(ancestor) => ancestor,
            Err(e) => {
                if matches!(e, IndexerError::ReorgDepthExceeded { .. }) {
                    self.state = IndexerState::Degraded;
                }
                return Err(e);
            }
        };

        let mut depth = 0;
        while let Some(height) = self.current_tip().await? {
            if Some(height) == ancestor {
                break;
            }
            self.rollback_block(height).await?;
            depth += 1;
        }

        self.emit(IndexEvent::ReorgResolved { ancestor, depth });
        Ok((ancestor, depth))
    }

    /// Undo the tip block at `height`. Returns the number of actions replayed.
    ///
    /// Uses the in-memory undo bucket when present and the persisted journal
    /// otherwise (e.g. after a restart).
    pub async fn rollback_block(&mut self, height: u64) -> Result<usize, IndexerError> {
        if height == 0 {
            return Err(IndexerError::Other("the genesis block cannot be rolled back".into()));
        }
        let tip = self.current_tip().await?;
        if tip != Some(height) {
            return Err(IndexerError::OutOfOrder {
                expected: tip.unwrap_or_default(),
                actual: height,
            });
        }
        let below = height - 1;

        let mut tx = self.store.begin().await?;
        let mut actions = self.undo.get(height);
        if actions.is_empty() {
            actions = tx.undo_actions(height).await?;
        }

        let mut deleted = 0;
        let mut unspent = 0;
        for action in &actions {
            match action.kind {
                UndoKind::CreateUtxo => deleted += tx.delete_utxos_above(below).await?,
                UndoKind::SpendUtxo => unspent += tx.unspend_by_height(height).await?,
            }
        }
        let transactions = tx.delete_transactions_above(below).await?;
        tx.delete_headers_above(below).await?;
        tx.delete_undo(height).await?;
        tx.commit().await?;

        self.undo.remove(height);

        tracing::debug!(height, deleted, unspent, transactions, "block unwound");
        self.emit(IndexEvent::BlockRolledBack {
            height,
            actions: actions.len(),
        });
        Ok(actions.len())
    }
}
