//! The poll loop: one block per tick, reorg recovery when the tip moves.
//!
//! # Per tick
//! 1. Read the local tip; with no tip the next height is `start_height`.
//! 2. Ask the chain source for its hash at the tip height. A different hash
//!    means the tip was reorganized away: unwind to the common ancestor and
//!    end the tick.
//! 3. Fetch hash, header and transactions for the next height.
//! 4. Check proof-of-work and linkage to the tip (plus the timestamp rule when
//!    `strict_header_validation` is set).
//! 5. Apply the block inside one ledger transaction, journaling an undo action
//!    for every UTXO created or spent.
//!
//! Errors never end the loop; each failed tick is reported to the observer and
//! the next tick starts over from step 1.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use utxoindex_core::error::IndexerError;
use utxoindex_core::indexer::{IndexerConfig, IndexerState};
use utxoindex_core::observer::{IndexEvent, IndexObserver};
use utxoindex_core::spv::{self, ValidationError};
use utxoindex_core::store::{LedgerStore, LedgerTx};
use utxoindex_core::types::{
    BlockHeader, LedgerTransaction, NewUtxo, TrackedAddress, TransactionInput, TransactionOutput,
    Utxo,
};
use utxoindex_core::undo::{UndoAction, UndoLog};

use crate::source::{ChainOutput, ChainSource, ChainTransaction};

/// What one call to [`Indexer::sync_next_block`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new block was appended to the ledger.
    Accepted {
        height: u64,
        hash: String,
        relevant_txs: usize,
    },
    /// The tip was reorganized away and `depth` blocks were unwound down to
    /// `ancestor` (`None`: the whole stored chain was orphaned).
    Reorged { ancestor: Option<u64>, depth: u64 },
    /// The source has no block at the next height yet.
    UpToDate { tip: Option<u64> },
}

/// Reorg-safe address indexer over a [`ChainSource`] and a [`LedgerStore`].
pub struct Indexer<S> {
    pub(crate) config: IndexerConfig,
    pub(crate) source: S,
    pub(crate) store: Arc<dyn LedgerStore>,
    pub(crate) undo: UndoLog,
    pub(crate) observer: Arc<dyn IndexObserver>,
    pub(crate) state: IndexerState,
}

impl<S: ChainSource> Indexer<S> {
    pub fn new(
        config: IndexerConfig,
        source: S,
        store: Arc<dyn LedgerStore>,
        observer: Arc<dyn IndexObserver>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            undo: UndoLog::new(),
            observer,
            state: IndexerState::Idle,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Height of the highest accepted block.
    pub async fn current_tip(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.store.tip().await?.map(|h| h.height))
    }

    pub(crate) fn emit(&self, event: IndexEvent) {
        self.observer.on_event(&event);
    }

    /// Poll until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// The signal is only observed between ticks; a tick in progress always
    /// runs to completion.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            start_height = self.config.start_height,
            max_reorg_depth = self.config.max_reorg_depth,
            poll_interval_ms = self.config.poll_interval_ms,
            "indexer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.tick().await;
        }

        self.state = IndexerState::Stopped;
        let tip = self.current_tip().await.unwrap_or(None);
        self.emit(IndexEvent::Stopped { tip });
    }

    /// Run one sync step and report its failure, if any.
    pub async fn tick(&mut self) {
        match self.sync_next_block().await {
            Ok(_) => self.state = IndexerState::Idle,
            Err(e) => {
                let retryable = e.is_retryable();
                self.state = if retryable {
                    IndexerState::Idle
                } else {
                    IndexerState::Degraded
                };
                self.emit(IndexEvent::TickFailed {
                    error: e.to_string(),
                    retryable,
                });
            }
        }
    }

    /// Advance the ledger by at most one block, or recover from a reorg.
    pub async fn sync_next_block(&mut self) -> Result<SyncOutcome, IndexerError> {
        self.state = IndexerState::CheckingTip;
        let tip = self.store.tip().await?;

        let next = match &tip {
            Some(local) => {
                let remote = self.source.block_hash(local.height).await?;
                if remote.as_deref() != Some(local.hash.as_str()) {
                    self.emit(IndexEvent::ReorgDetected {
                        height: local.height,
                        local_hash: local.hash.clone(),
                        remote_hash: remote.unwrap_or_default(),
                    });
                    let (ancestor, depth) = self.handle_reorg(local.height).await?;
                    self.state = IndexerState::Idle;
                    return Ok(SyncOutcome::Reorged { ancestor, depth });
                }
                local.height + 1
            }
            None => self.config.start_height,
        };

        self.state = IndexerState::FetchingBlock;
        let Some(hash) = self.source.block_hash(next).await? else {
            self.state = IndexerState::Idle;
            return Ok(SyncOutcome::UpToDate {
                tip: tip.map(|t| t.height),
            });
        };

        let header = self.source.block_header(&hash).await?;
        if let Err(source) = self.validate(&header, tip.as_ref()) {
            self.emit(IndexEvent::BlockRejected {
                height: header.height,
                hash: header.hash.clone(),
                reason: source.to_string(),
            });
            return Err(IndexerError::Validation {
                height: header.height,
                hash: header.hash,
                source,
            });
        }

        let txs = self.source.block_transactions(&hash).await?;
        let outcome = self.accept_block(header, txs).await?;
        self.state = IndexerState::Idle;
        Ok(outcome)
    }

    fn validate(
        &self,
        header: &BlockHeader,
        tip: Option<&BlockHeader>,
    ) -> Result<(), ValidationError> {
        match tip {
            Some(prev) if self.config.strict_header_validation => {
                spv::validate_header(header, prev)
            }
            Some(prev) if header.previous_hash != prev.hash => {
                Err(ValidationError::PreviousHashMismatch {
                    expected: prev.hash.clone(),
                    actual: header.previous_hash.clone(),
                })
            }
            _ if !spv::check_proof_of_work(header) => Err(ValidationError::InsufficientProofOfWork {
                hash: header.hash.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Apply `header` and its transactions as the new tip.
    ///
    /// The block must sit exactly one above the current tip (or at
    /// `start_height` on an empty ledger), must link to the tip, and must not
    /// already be stored. Everything is written in one ledger transaction; the
    /// in-memory undo log only learns about the block after commit.
    pub async fn accept_block(
        &mut self,
        header: BlockHeader,
        txs: Vec<ChainTransaction>,
    ) -> Result<SyncOutcome, IndexerError> {
        let tip = self.store.tip().await?;
        let expected = tip
            .as_ref()
            .map_or(self.config.start_height, |t| t.height + 1);
        if header.height != expected || self.store.header_by_hash(&header.hash).await?.is_some() {
            return Err(IndexerError::OutOfOrder {
                expected,
                actual: header.height,
            });
        }
        if let Some(prev) = &tip {
            if header.previous_hash != prev.hash {
                return Err(IndexerError::Validation {
                    height: header.height,
                    hash: header.hash.clone(),
                    source: ValidationError::PreviousHashMismatch {
                        expected: prev.hash.clone(),
                        actual: header.previous_hash.clone(),
                    },
                });
            }
        }

        let mut tx = self.store.begin().await?;
        tx.insert_header(&header).await?;

        let mut actions = Vec::new();
        let mut relevant_txs = 0;
        for chain_tx in &txs {
            if self
                .apply_transaction(tx.as_mut(), &header, chain_tx, &mut actions)
                .await?
            {
                relevant_txs += 1;
            }
        }

        let keep_from = header.height.saturating_sub(self.config.max_reorg_depth);
        tx.prune_undo_below(keep_from).await?;
        tx.commit().await?;

        self.undo.extend(actions);
        self.undo.prune_below(keep_from);

        self.emit(IndexEvent::BlockAccepted {
            height: header.height,
            hash: header.hash.clone(),
            relevant_txs,
        });
        Ok(SyncOutcome::Accepted {
            height: header.height,
            hash: header.hash,
            relevant_txs,
        })
    }

    /// Record `chain_tx` if it touches a tracked address. Returns whether it
    /// did.
    async fn apply_transaction(
        &self,
        tx: &mut dyn LedgerTx,
        header: &BlockHeader,
        chain_tx: &ChainTransaction,
        actions: &mut Vec<UndoAction>,
    ) -> Result<bool, IndexerError> {
        let mut received: Vec<(&ChainOutput, TrackedAddress)> = Vec::new();
        for output in &chain_tx.outputs {
            if let Some(address) = &output.address {
                if let Some(tracked) = tx.address_by_string(address).await? {
                    received.push((output, tracked));
                }
            }
        }

        let mut spent: Vec<Utxo> = Vec::new();
        for input in &chain_tx.inputs {
            if let Some(prev_txid) = &input.prev_txid {
                if let Some(utxo) = tx.utxo(prev_txid, input.vout).await? {
                    if !utxo.is_spent {
                        spent.push(utxo);
                    }
                }
            }
        }

        if received.is_empty() && spent.is_empty() {
            return Ok(false);
        }

        if self.config.verify_merkle_proofs {
            self.confirm_inclusion(header, &chain_tx.txid).await;
        }

        let height = header.height;
        for utxo in &spent {
            if tx.mark_as_spent(&utxo.txid, utxo.vout, height).await? {
                let action = UndoAction::spend_utxo(height, &utxo.txid, utxo.vout);
                tx.record_undo(&action).await?;
                actions.push(action);
            }
        }

        // Net effect per touched address, in first-touch order.
        let mut per_address: Vec<(i64, i64)> = Vec::new();
        let touches = received
            .iter()
            .map(|(o, a)| (a.id, o.value_sat))
            .chain(spent.iter().map(|u| (u.address_id, -u.amount)));
        for (address_id, delta) in touches {
            match per_address.iter_mut().find(|(id, _)| *id == address_id) {
                Some((_, amount)) => *amount += delta,
                None => per_address.push((address_id, delta)),
            }
        }

        let inputs: Vec<TransactionInput> = chain_tx
            .inputs
            .iter()
            .map(|input| {
                let known = spent
                    .iter()
                    .find(|u| Some(&u.txid) == input.prev_txid.as_ref() && u.vout == input.vout);
                TransactionInput {
                    txid: chain_tx.txid.clone(),
                    vout: input.vout,
                    address: input.address.clone().unwrap_or_default(),
                    amount: known
                        .map(|u| u.amount)
                        .or(input.value_sat)
                        .unwrap_or_default(),
                    prev_txid: input.prev_txid.clone(),
                }
            })
            .collect();
        let outputs: Vec<TransactionOutput> = chain_tx
            .outputs
            .iter()
            .map(|o| TransactionOutput {
                txid: chain_tx.txid.clone(),
                vout: o.vout,
                address: o.address.clone().unwrap_or_default(),
                amount: o.value_sat,
            })
            .collect();

        for (address_id, amount) in per_address {
            let record = LedgerTransaction {
                id: 0,
                txid: chain_tx.txid.clone(),
                address_id: Some(address_id),
                amount,
                block_height: height,
                block_hash: header.hash.clone(),
                inputs: inputs.clone(),
                outputs: outputs.clone(),
                created_at: Utc::now(),
            };
            tx.insert_transaction(&record).await?;
            self.emit(IndexEvent::TransactionIndexed {
                height,
                txid: chain_tx.txid.clone(),
                amount,
            });
        }

        for (output, tracked) in &received {
            tx.insert_utxo(&NewUtxo {
                address_id: tracked.id,
                txid: chain_tx.txid.clone(),
                vout: output.vout,
                amount: output.value_sat,
                block_height: height,
            })
            .await?;
            let action = UndoAction::create_utxo(height, &chain_tx.txid, output.vout);
            tx.record_undo(&action).await?;
            actions.push(action);
        }
        Ok(true)
    }

    /// Best-effort inclusion check; the outcome is only reported.
    async fn confirm_inclusion(&self, header: &BlockHeader, txid: &str) {
        let event = match self.source.tx_out_proof(txid, &header.hash).await {
            Ok(raw) => match spv::verify_tx_out_proof(&raw, txid, &header.merkle_root) {
                Ok(true) => IndexEvent::MerkleProofVerified {
                    height: header.height,
                    txid: txid.to_string(),
                },
                Ok(false) => IndexEvent::MerkleProofUnverified {
                    height: header.height,
                    txid: txid.to_string(),
                    reason: "proof does not fold to the header merkle root".into(),
                },
                Err(e) => IndexEvent::MerkleProofUnverified {
                    height: header.height,
                    txid: txid.to_string(),
                    reason: e.to_string(),
                },
            },
            Err(e) => IndexEvent::MerkleProofUnverified {
                height: header.height,
                txid: txid.to_string(),
                reason: e.to_string(),
            },
        };
        self.emit(event);
    }
}
