//! Ledger records shared by the indexer and the storage backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// A block header as accepted into the local main chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block hash, hex in the node's display byte order.
    pub hash: String,
    /// Hash of the parent block (empty for genesis).
    pub previous_hash: String,
    pub height: u64,
    pub merkle_root: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
    /// Difficulty as reported by the node (fractional on test networks).
    pub difficulty: f64,
    pub nonce: u32,
    /// Number of transactions in the block.
    pub tx_count: u32,
}

impl BlockHeader {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.height == parent.height + 1 && self.previous_hash == parent.hash
    }
}

// ─── Addresses ────────────────────────────────────────────────────────────────

/// An address some user asked to have indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAddress {
    pub id: i64,
    pub user_id: i64,
    pub address: String,
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// One chain transaction as seen by one tracked address.
///
/// A transaction touching several tracked addresses is stored as one row per
/// address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Storage row id (`0` until inserted).
    pub id: i64,
    pub txid: String,
    /// Tracked address this row belongs to.
    pub address_id: Option<i64>,
    /// Net effect on `address_id`, in satoshis (received minus spent).
    pub amount: i64,
    pub block_height: u64,
    pub block_hash: String,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub created_at: DateTime<Utc>,
}

/// Denormalized input line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    /// Spending transaction.
    pub txid: String,
    /// Output index in the previous transaction.
    pub vout: u32,
    /// Address of the spent output, when known.
    pub address: String,
    /// Amount of the spent output in satoshis, when known (`0` otherwise).
    pub amount: i64,
    /// Previous transaction; `None` for coinbase inputs.
    pub prev_txid: Option<String>,
}

/// Denormalized output line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    pub amount: i64,
}

// ─── UTXOs ────────────────────────────────────────────────────────────────────

/// An output paying a tracked address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub id: i64,
    pub address_id: i64,
    pub txid: String,
    pub vout: u32,
    /// Amount in satoshis.
    pub amount: i64,
    /// Height of the block that created the output.
    pub block_height: u64,
    pub is_spent: bool,
    /// Height of the block that spent the output.
    pub spent_height: Option<u64>,
}

/// Insert payload for a new UTXO row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUtxo {
    pub address_id: i64,
    pub txid: String,
    pub vout: u32,
    pub amount: i64,
    pub block_height: u64,
}

impl NewUtxo {
    /// Materialize the row once the backend has assigned an id.
    pub fn into_utxo(self, id: i64) -> Utxo {
        Utxo {
            id,
            address_id: self.address_id,
            txid: self.txid,
            vout: self.vout,
            amount: self.amount,
            block_height: self.block_height,
            is_spent: false,
            spent_height: None,
        }
    }
}

// ─── Balance ──────────────────────────────────────────────────────────────────

/// Confirmed and total unspent balance for one address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Unspent satoshis with at least `min_confirmations`.
    pub confirmed: i64,
    /// All unspent satoshis.
    pub total: i64,
    pub utxo_count: usize,
}

impl Balance {
    /// Sum the unspent outputs given the current tip height.
    ///
    /// A UTXO created at the tip has one confirmation.
    pub fn from_utxos(utxos: &[Utxo], tip_height: u64, min_confirmations: u64) -> Self {
        let mut balance = Balance::default();
        for utxo in utxos.iter().filter(|u| !u.is_spent) {
            balance.total += utxo.amount;
            balance.utxo_count += 1;
            let confirmations = (tip_height + 1).saturating_sub(utxo.block_height);
            if confirmations >= min_confirmations {
                balance.confirmed += utxo.amount;
            }
        }
        balance
    }
}

/// Convert a BTC amount as reported by the node into satoshis.
pub fn btc_to_sat(value: f64) -> i64 {
    (value * 100_000_000.0).round() as i64
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn header(height: u64, hash: &str, prev: &str) -> BlockHeader {
        BlockHeader {
            hash: hash.into(),
            previous_hash: prev.into(),
            height,
            merkle_root: String::new(),
            timestamp: height as i64 * 600,
            difficulty: 1.0,
            nonce: 0,
            tx_count: 1,
        }
    }

    fn utxo(amount: i64, height: u64, spent: bool) -> Utxo {
        Utxo {
            id: 0,
            address_id: 1,
            txid: "aa".into(),
            vout: 0,
            amount,
            block_height: height,
            is_spent: spent,
            spent_height: spent.then_some(height + 1),
        }
    }

    #[test]
    fn header_extends_parent() {
        let parent = header(100, "aa", "99");
        let child = header(101, "bb", "aa");
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
    }

    #[test]
    fn header_extends_false_on_gap() {
        let a = header(100, "aa", "99");
        let b = header(102, "cc", "aa");
        assert!(!b.extends(&a));
    }

    #[test]
    fn balance_splits_confirmed_and_total() {
        let utxos = vec![utxo(5_000, 100, false), utxo(700, 105, false), utxo(9_999, 90, true)];
        let balance = Balance::from_utxos(&utxos, 105, 6);
        assert_eq!(balance.total, 5_700);
        assert_eq!(balance.confirmed, 5_000);
        assert_eq!(balance.utxo_count, 2);
    }

    #[test]
    fn btc_amounts_round_to_satoshis() {
        assert_eq!(btc_to_sat(0.00005), 5_000);
        assert_eq!(btc_to_sat(0.1 + 0.2), 30_000_000);
        assert_eq!(btc_to_sat(50.0), 5_000_000_000);
    }
}
