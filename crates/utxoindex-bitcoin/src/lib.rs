//! utxoindex-bitcoin: the reorg-safe Bitcoin address indexer.
//!
//! - [`source`]: the [`ChainSource`] seam and its bitcoind adapter
//! - [`index_loop`]: [`Indexer`]: poll loop, block acceptance
//! - [`reorg`]: common-ancestor search and rollback
//! - [`builder`]: fluent [`IndexerBuilder`]

pub mod builder;
pub mod index_loop;
pub mod reorg;
pub mod source;

pub use builder::IndexerBuilder;
pub use index_loop::{Indexer, SyncOutcome};
pub use source::{ChainInput, ChainOutput, ChainSource, ChainTransaction};
