//! SQLite ledger backend.
//!
//! Persists headers, tracked addresses, transactions with their line items,
//! UTXOs and the undo journal to a single SQLite file. Uses `sqlx` with WAL
//! mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use utxoindex_storage::sqlite::SqliteLedger;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteLedger::open("./ledger.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteLedger::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use utxoindex_core::error::IndexerError;
use utxoindex_core::store::{LedgerStore, LedgerTx};
use utxoindex_core::types::{
    BlockHeader, LedgerTransaction, NewUtxo, TrackedAddress, TransactionInput, TransactionOutput,
    Utxo,
};
use utxoindex_core::undo::{UndoAction, UndoKind};

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS block_headers (
        height        INTEGER PRIMARY KEY,
        hash          TEXT    NOT NULL UNIQUE,
        previous_hash TEXT    NOT NULL,
        merkle_root   TEXT    NOT NULL,
        timestamp     INTEGER NOT NULL,
        difficulty    REAL    NOT NULL,
        nonce         INTEGER NOT NULL,
        tx_count      INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS addresses (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        address TEXT    NOT NULL UNIQUE
    );",
    "CREATE TABLE IF NOT EXISTS transactions (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        tx_id        TEXT    NOT NULL,
        address_id   INTEGER,
        amount       INTEGER NOT NULL,
        block_height INTEGER NOT NULL,
        block_hash   TEXT    NOT NULL,
        created_at   TEXT    NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS transaction_inputs (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id INTEGER NOT NULL,
        tx_id          TEXT    NOT NULL,
        vout           INTEGER NOT NULL,
        address        TEXT    NOT NULL,
        amount         INTEGER NOT NULL,
        prev_tx_id     TEXT
    );",
    "CREATE TABLE IF NOT EXISTS transaction_outputs (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        transaction_id INTEGER NOT NULL,
        tx_id          TEXT    NOT NULL,
        vout           INTEGER NOT NULL,
        address        TEXT    NOT NULL,
        amount         INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS utxos (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        address_id   INTEGER NOT NULL,
        tx_id        TEXT    NOT NULL,
        vout         INTEGER NOT NULL,
        amount       INTEGER NOT NULL,
        block_height INTEGER NOT NULL,
        is_spent     INTEGER NOT NULL DEFAULT 0,
        spent_height INTEGER,
        UNIQUE (tx_id, vout)
    );",
    "CREATE TABLE IF NOT EXISTS undo_actions (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        block_height INTEGER NOT NULL,
        kind         TEXT    NOT NULL,
        tx_id        TEXT    NOT NULL,
        vout         INTEGER NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_transactions_height ON transactions (block_height);",
    "CREATE INDEX IF NOT EXISTS idx_transactions_address ON transactions (address_id);",
    "CREATE INDEX IF NOT EXISTS idx_utxos_address ON utxos (address_id);",
    "CREATE INDEX IF NOT EXISTS idx_utxos_spent_height ON utxos (spent_height);",
    "CREATE INDEX IF NOT EXISTS idx_undo_height ON undo_actions (block_height);",
];

// ─── Row mapping ──────────────────────────────────────────────────────────────

fn header_from_row(r: &SqliteRow) -> BlockHeader {
    BlockHeader {
        hash: r.get("hash"),
        previous_hash: r.get("previous_hash"),
        height: r.get::<i64, _>("height") as u64,
        merkle_root: r.get("merkle_root"),
        timestamp: r.get("timestamp"),
        difficulty: r.get("difficulty"),
        nonce: r.get::<i64, _>("nonce") as u32,
        tx_count: r.get::<i64, _>("tx_count") as u32,
    }
}

fn address_from_row(r: &SqliteRow) -> TrackedAddress {
    TrackedAddress {
        id: r.get("id"),
        user_id: r.get("user_id"),
        address: r.get("address"),
    }
}

fn utxo_from_row(r: &SqliteRow) -> Utxo {
    Utxo {
        id: r.get("id"),
        address_id: r.get("address_id"),
        txid: r.get("tx_id"),
        vout: r.get::<i64, _>("vout") as u32,
        amount: r.get("amount"),
        block_height: r.get::<i64, _>("block_height") as u64,
        is_spent: r.get("is_spent"),
        spent_height: r.get::<Option<i64>, _>("spent_height").map(|h| h as u64),
    }
}

fn undo_from_row(r: &SqliteRow) -> Result<UndoAction, IndexerError> {
    let kind: String = r.get("kind");
    Ok(UndoAction {
        block_height: r.get::<i64, _>("block_height") as u64,
        kind: UndoKind::parse(&kind)
            .ok_or_else(|| IndexerError::Storage(format!("unknown undo kind {kind:?}")))?,
        txid: r.get("tx_id"),
        vout: r.get::<i64, _>("vout") as u32,
    })
}

// ─── SqliteLedger ─────────────────────────────────────────────────────────────

/// SQLite-backed ledger store.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ledger.db"`) or a full
    /// SQLite URL (`"sqlite:./ledger.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the
    /// pool is pinned to one connection that never expires. All data is lost
    /// when the pool is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    async fn line_items(
        &self,
        tx: &mut LedgerTransaction,
    ) -> Result<(), IndexerError> {
        let inputs = sqlx::query(
            "SELECT tx_id, vout, address, amount, prev_tx_id
             FROM transaction_inputs WHERE transaction_id = ? ORDER BY id",
        )
        .bind(tx.id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        tx.inputs = inputs
            .iter()
            .map(|r| TransactionInput {
                txid: r.get("tx_id"),
                vout: r.get::<i64, _>("vout") as u32,
                address: r.get("address"),
                amount: r.get("amount"),
                prev_txid: r.get("prev_tx_id"),
            })
            .collect();

        let outputs = sqlx::query(
            "SELECT tx_id, vout, address, amount
             FROM transaction_outputs WHERE transaction_id = ? ORDER BY id",
        )
        .bind(tx.id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        tx.outputs = outputs
            .iter()
            .map(|r| TransactionOutput {
                txid: r.get("tx_id"),
                vout: r.get::<i64, _>("vout") as u32,
                address: r.get("address"),
                amount: r.get("amount"),
            })
            .collect();
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn tip(&self) -> Result<Option<BlockHeader>, IndexerError> {
        let row = sqlx::query("SELECT * FROM block_headers ORDER BY height DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(header_from_row))
    }

    async fn header_by_height(&self, height: u64) -> Result<Option<BlockHeader>, IndexerError> {
        let row = sqlx::query("SELECT * FROM block_headers WHERE height = ?")
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(header_from_row))
    }

    async fn header_by_hash(&self, hash: &str) -> Result<Option<BlockHeader>, IndexerError> {
        let row = sqlx::query("SELECT * FROM block_headers WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(header_from_row))
    }

    async fn address_by_string(
        &self,
        address: &str,
    ) -> Result<Option<TrackedAddress>, IndexerError> {
        let row = sqlx::query("SELECT id, user_id, address FROM addresses WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(address_from_row))
    }

    async fn insert_address(
        &self,
        user_id: i64,
        address: &str,
    ) -> Result<TrackedAddress, IndexerError> {
        sqlx::query(
            "INSERT INTO addresses (user_id, address) VALUES (?, ?)
             ON CONFLICT (address) DO NOTHING",
        )
        .bind(user_id)
        .bind(address)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(address, user_id, "address tracked");
        self.address_by_string(address)
            .await?
            .ok_or_else(|| IndexerError::Storage(format!("address {address} vanished")))
    }

    async fn transactions_by_address(
        &self,
        address_id: i64,
    ) -> Result<Vec<LedgerTransaction>, IndexerError> {
        let rows = sqlx::query(
            "SELECT id, tx_id, address_id, amount, block_height, block_hash, created_at
             FROM transactions WHERE address_id = ? ORDER BY block_height, id",
        )
        .bind(address_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut txs = Vec::with_capacity(rows.len());
        for r in rows {
            let mut tx = LedgerTransaction {
                id: r.get("id"),
                txid: r.get("tx_id"),
                address_id: r.get("address_id"),
                amount: r.get("amount"),
                block_height: r.get::<i64, _>("block_height") as u64,
                block_hash: r.get("block_hash"),
                inputs: vec![],
                outputs: vec![],
                created_at: r.get::<DateTime<Utc>, _>("created_at"),
            };
            self.line_items(&mut tx).await?;
            txs.push(tx);
        }
        Ok(txs)
    }

    async fn utxos_by_address(&self, address_id: i64) -> Result<Vec<Utxo>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM utxos WHERE address_id = ? ORDER BY id")
            .bind(address_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows.iter().map(utxo_from_row).collect())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, IndexerError> {
        let tx = self.pool.begin().await.map_err(storage_err)?;
        Ok(Box::new(SqliteTx { tx: Some(tx) }))
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// Open transaction over a [`SqliteLedger`]. Rolls back on drop.
pub struct SqliteTx {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteTx {
    fn conn(&mut self) -> Result<&mut SqliteConnection, IndexerError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| IndexerError::Storage("transaction already committed".into()))
    }
}

#[async_trait]
impl LedgerTx for SqliteTx {
    async fn insert_header(&mut self, header: &BlockHeader) -> Result<(), IndexerError> {
        let conn = self.conn()?;
        sqlx::query(
            "INSERT INTO block_headers
             (height, hash, previous_hash, merkle_root, timestamp, difficulty, nonce, tx_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(header.height as i64)
        .bind(&header.hash)
        .bind(&header.previous_hash)
        .bind(&header.merkle_root)
        .bind(header.timestamp)
        .bind(header.difficulty)
        .bind(header.nonce as i64)
        .bind(header.tx_count as i64)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_headers_above(&mut self, height: u64) -> Result<u64, IndexerError> {
        let conn = self.conn()?;
        let res = sqlx::query("DELETE FROM block_headers WHERE height > ?")
            .bind(height as i64)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
        Ok(res.rows_affected())
    }

    async fn address_by_string(
        &mut self,
        address: &str,
    ) -> Result<Option<TrackedAddress>, IndexerError> {
        let conn = self.conn()?;
        let row = sqlx::query("SELECT id, user_id, address FROM addresses WHERE address = ?")
            .bind(address)
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(address_from_row))
    }

    async fn insert_transaction(&mut self, tx: &LedgerTransaction) -> Result<i64, IndexerError> {
        let conn = self.conn()?;
        let id = sqlx::query(
            "INSERT INTO transactions
             (tx_id, address_id, amount, block_height, block_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&tx.txid)
        .bind(tx.address_id)
        .bind(tx.amount)
        .bind(tx.block_height as i64)
        .bind(&tx.block_hash)
        .bind(tx.created_at)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?
        .last_insert_rowid();

        for input in &tx.inputs {
            sqlx::query(
                "INSERT INTO transaction_inputs
                 (transaction_id, tx_id, vout, address, amount, prev_tx_id)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&input.txid)
            .bind(input.vout as i64)
            .bind(&input.address)
            .bind(input.amount)
            .bind(&input.prev_txid)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
        }

        for output in &tx.outputs {
            sqlx::query(
                "INSERT INTO transaction_outputs
                 (transaction_id, tx_id, vout, address, amount)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&output.txid)
            .bind(output.vout as i64)
            .bind(&output.address)
            .bind(output.amount)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
        }
        Ok(id)
    }

    async fn delete_transactions_above(&mut self, height: u64) -> Result<u64, IndexerError> {
        let conn = self.conn()?;
        for table in ["transaction_inputs", "transaction_outputs"] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE transaction_id IN
                 (SELECT id FROM transactions WHERE block_height > ?)"
            ))
            .bind(height as i64)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
        }
        let res = sqlx::query("DELETE FROM transactions WHERE block_height > ?")
            .bind(height as i64)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
        Ok(res.rows_affected())
    }

    async fn utxo(&mut self, txid: &str, vout: u32) -> Result<Option<Utxo>, IndexerError> {
        let conn = self.conn()?;
        let row = sqlx::query("SELECT * FROM utxos WHERE tx_id = ? AND vout = ?")
            .bind(txid)
            .bind(vout as i64)
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage_err)?;
        Ok(row.as_ref().map(utxo_from_row))
    }

    async fn insert_utxo(&mut self, utxo: &NewUtxo) -> Result<Utxo, IndexerError> {
        let conn = self.conn()?;
        let id = sqlx::query(
            "INSERT INTO utxos (address_id, tx_id, vout, amount, block_height)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(utxo.address_id)
        .bind(&utxo.txid)
        .bind(utxo.vout as i64)
        .bind(utxo.amount)
        .bind(utxo.block_height as i64)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?
        .last_insert_rowid();
        Ok(utxo.clone().into_utxo(id))
    }

    async fn mark_as_spent(
        &mut self,
        txid: &str,
        vout: u32,
        height: u64,
    ) -> Result<bool, IndexerError> {
        let conn = self.conn()?;
        let res = sqlx::query(
            "UPDATE utxos SET is_spent = 1, spent_height = ?
             WHERE tx_id = ? AND vout = ? AND is_spent = 0",
        )
        .bind(height as i64)
        .bind(txid)
        .bind(vout as i64)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
        Ok(res.rows_affected() == 1)
    }

    async fn unspend_by_height(&mut self, height: u64) -> Result<u64, IndexerError> {
        let conn = self.conn()?;
        let res = sqlx::query(
            "UPDATE utxos SET is_spent = 0, spent_height = NULL WHERE spent_height = ?",
        )
        .bind(height as i64)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
        Ok(res.rows_affected())
    }

    async fn delete_utxos_above(&mut self, height: u64) -> Result<u64, IndexerError> {
        let conn = self.conn()?;
        let res = sqlx::query("DELETE FROM utxos WHERE block_height > ?")
            .bind(height as i64)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
        Ok(res.rows_affected())
    }

    async fn record_undo(&mut self, action: &UndoAction) -> Result<(), IndexerError> {
        let conn = self.conn()?;
        sqlx::query(
            "INSERT INTO undo_actions (block_height, kind, tx_id, vout) VALUES (?, ?, ?, ?)",
        )
        .bind(action.block_height as i64)
        .bind(action.kind.as_str())
        .bind(&action.txid)
        .bind(action.vout as i64)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn undo_actions(&mut self, height: u64) -> Result<Vec<UndoAction>, IndexerError> {
        let conn = self.conn()?;
        let rows = sqlx::query(
            "SELECT block_height, kind, tx_id, vout FROM undo_actions
             WHERE block_height = ? ORDER BY id",
        )
        .bind(height as i64)
        .fetch_all(&mut *conn)
        .await
        .map_err(storage_err)?;
        rows.iter().map(undo_from_row).collect()
    }

    async fn delete_undo(&mut self, height: u64) -> Result<(), IndexerError> {
        let conn = self.conn()?;
        sqlx::query("DELETE FROM undo_actions WHERE block_height = ?")
            .bind(height as i64)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn prune_undo_below(&mut self, height: u64) -> Result<(), IndexerError> {
        let conn = self.conn()?;
        sqlx::query("DELETE FROM undo_actions WHERE block_height < ?")
            .bind(height as i64)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), IndexerError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| IndexerError::Storage("transaction already committed".into()))?;
        tx.commit().await.map_err(storage_err)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
