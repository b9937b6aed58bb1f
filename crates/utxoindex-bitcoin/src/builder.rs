//! Fluent builder API for creating indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use utxoindex_bitcoin::IndexerBuilder;
//! use utxoindex_rpc::{BitcoindClient, HttpClientConfig};
//! use utxoindex_storage::InMemoryLedger;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let node = BitcoindClient::http(
//!     "http://127.0.0.1:18443",
//!     HttpClientConfig::with_auth("user", "pass"),
//! )?;
//! let _indexer = IndexerBuilder::new()
//!     .start_height(800_000)
//!     .max_reorg_depth(6)
//!     .poll_interval_ms(5_000)
//!     .build(node, Arc::new(InMemoryLedger::new()));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use utxoindex_core::indexer::IndexerConfig;
use utxoindex_core::observer::{IndexObserver, TracingObserver};
use utxoindex_core::store::LedgerStore;

use crate::index_loop::Indexer;
use crate::source::ChainSource;

/// Fluent builder for [`IndexerConfig`] and [`Indexer`].
pub struct IndexerBuilder {
    config: IndexerConfig,
    observer: Arc<dyn IndexObserver>,
}

impl Default for IndexerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// First height to index when the ledger is empty.
    pub fn start_height(mut self, height: u64) -> Self {
        self.config.start_height = height;
        self
    }

    /// How far below the tip the common-ancestor search may go.
    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.config.max_reorg_depth = depth;
        self
    }

    /// Set the polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Fetch and check inclusion proofs for relevant transactions.
    pub fn verify_merkle_proofs(mut self, enabled: bool) -> Self {
        self.config.verify_merkle_proofs = enabled;
        self
    }

    /// Also reject headers whose timestamp goes backwards.
    pub fn strict_header_validation(mut self, enabled: bool) -> Self {
        self.config.strict_header_validation = enabled;
        self
    }

    /// Receive indexer events (defaults to [`TracingObserver`]).
    pub fn observer(mut self, observer: Arc<dyn IndexObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build an indexer over `source` and `store`.
    pub fn build<S: ChainSource>(self, source: S, store: Arc<dyn LedgerStore>) -> Indexer<S> {
        Indexer::new(self.config, source, store, self.observer)
    }
}
