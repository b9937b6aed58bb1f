//! utxoindex-core: foundation for the reorg-safe Bitcoin address indexer.
//!
//! # Architecture
//!
//! ```text
//! Indexer (utxoindex-bitcoin)
//!     ├── ChainSource      (node RPC, utxoindex-rpc)
//!     ├── spv              (proof-of-work, header linkage, Merkle proofs)
//!     ├── UndoLog          (compensating actions per block height)
//!     ├── IndexObserver    (leveled, fielded events)
//!     └── LedgerStore      (memory / SQLite / Postgres, utxoindex-storage)
//! ```

pub mod error;
pub mod indexer;
pub mod observer;
pub mod spv;
pub mod store;
pub mod types;
pub mod undo;

pub use error::IndexerError;
pub use indexer::{IndexerConfig, IndexerState};
pub use observer::{IndexEvent, IndexObserver, RecordingObserver, TracingObserver};
pub use spv::{MerkleBlock, MerkleNode, ProofError, ValidationError};
pub use store::{LedgerStore, LedgerTx};
pub use types::{
    Balance, BlockHeader, LedgerTransaction, NewUtxo, TrackedAddress, TransactionInput,
    TransactionOutput, Utxo,
};
pub use undo::{UndoAction, UndoKind, UndoLog};
