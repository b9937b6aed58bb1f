//! utxoindex-storage: ledger store backends for UtxoIndex.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `sqlite`: SQLite via `sqlx` (embedded, single-file persistence)
//! - `postgres`: PostgreSQL via `sqlx` (shared production deployments)
//!
//! Every backend implements [`LedgerStore`](utxoindex_core::LedgerStore)
//! and hands out [`LedgerTx`](utxoindex_core::LedgerTx) transactions.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryLedger;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedger;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresLedger, PostgresOptions};
