//! Chain source seam.
//!
//! The indexer only sees [`ChainSource`]: block hashes by height, headers and
//! decoded transactions by hash, and raw inclusion proofs. The production
//! implementation is [`BitcoindClient`]; tests script their own chains.

use std::sync::Arc;

use async_trait::async_trait;

use utxoindex_core::error::IndexerError;
use utxoindex_core::types::{btc_to_sat, BlockHeader};
use utxoindex_rpc::types::{RpcBlockHeader, RpcTransaction, RpcTxIn, RpcTxOut};
use utxoindex_rpc::{BitcoindClient, RpcTransport, TransportError};

/// Bitcoin Core's `RPC_INVALID_PARAMETER`, returned by `getblockhash` for a
/// height above the node's tip.
pub const RPC_INVALID_PARAMETER: i64 = -8;

// ─── Chain data ───────────────────────────────────────────────────────────────

/// A transaction as fetched from the chain source, amounts in satoshis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub txid: String,
    pub inputs: Vec<ChainInput>,
    pub outputs: Vec<ChainOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInput {
    /// Spent transaction; `None` for coinbase inputs.
    pub prev_txid: Option<String>,
    pub vout: u32,
    /// Address of the spent output, when the node reports the prevout.
    pub address: Option<String>,
    pub value_sat: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutput {
    pub vout: u32,
    pub value_sat: i64,
    /// `None` for non-standard and `OP_RETURN` outputs.
    pub address: Option<String>,
}

impl From<RpcTxIn> for ChainInput {
    fn from(input: RpcTxIn) -> Self {
        let (address, value_sat) = match &input.prevout {
            Some(prev) => (
                prev.script_pub_key.destination().map(str::to_string),
                Some(btc_to_sat(prev.value)),
            ),
            None => (None, None),
        };
        let prev_txid = if input.is_coinbase() { None } else { input.txid };
        Self {
            prev_txid,
            vout: input.vout.unwrap_or_default(),
            address,
            value_sat,
        }
    }
}

impl From<RpcTxOut> for ChainOutput {
    fn from(output: RpcTxOut) -> Self {
        Self {
            vout: output.vout,
            value_sat: btc_to_sat(output.value),
            address: output.destination().map(str::to_string),
        }
    }
}

impl From<RpcTransaction> for ChainTransaction {
    fn from(tx: RpcTransaction) -> Self {
        Self {
            txid: tx.txid,
            inputs: tx.inputs.into_iter().map(ChainInput::from).collect(),
            outputs: tx.outputs.into_iter().map(ChainOutput::from).collect(),
        }
    }
}

/// Convert a node header into the ledger's header record.
pub fn header_from_rpc(h: RpcBlockHeader) -> BlockHeader {
    BlockHeader {
        hash: h.hash,
        previous_hash: h.previous_hash.unwrap_or_default(),
        height: h.height,
        merkle_root: h.merkle_root,
        timestamp: h.time,
        difficulty: h.difficulty,
        nonce: h.nonce,
        tx_count: h.tx_count,
    }
}

// ─── ChainSource ──────────────────────────────────────────────────────────────

/// Read access to the source chain.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Hash of the main-chain block at `height`, or `None` if the source has
    /// no block there yet.
    async fn block_hash(&self, height: u64) -> Result<Option<String>, IndexerError>;

    async fn block_header(&self, hash: &str) -> Result<BlockHeader, IndexerError>;

    /// Every transaction in the block, in block order.
    async fn block_transactions(&self, hash: &str) -> Result<Vec<ChainTransaction>, IndexerError>;

    /// Raw inclusion proof for `txid` in block `block_hash`.
    async fn tx_out_proof(&self, txid: &str, block_hash: &str) -> Result<Vec<u8>, IndexerError>;
}

#[async_trait]
impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    async fn block_hash(&self, height: u64) -> Result<Option<String>, IndexerError> {
        (**self).block_hash(height).await
    }

    async fn block_header(&self, hash: &str) -> Result<BlockHeader, IndexerError> {
        (**self).block_header(hash).await
    }

    async fn block_transactions(&self, hash: &str) -> Result<Vec<ChainTransaction>, IndexerError> {
        (**self).block_transactions(hash).await
    }

    async fn tx_out_proof(&self, txid: &str, block_hash: &str) -> Result<Vec<u8>, IndexerError> {
        (**self).tx_out_proof(txid, block_hash).await
    }
}

// ─── bitcoind adapter ─────────────────────────────────────────────────────────

/// Classify a transport failure for `method`.
pub fn source_error(method: &str, e: TransportError) -> IndexerError {
    match e {
        TransportError::Rpc(err) => IndexerError::Rpc {
            method: method.to_string(),
            code: err.code,
            message: err.message,
        },
        other => IndexerError::Network {
            method: method.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl<T: RpcTransport> ChainSource for BitcoindClient<T> {
    async fn block_hash(&self, height: u64) -> Result<Option<String>, IndexerError> {
        match self.get_block_hash(height).await {
            Ok(hash) => Ok(Some(hash)),
            Err(TransportError::Rpc(err)) if err.code == RPC_INVALID_PARAMETER => Ok(None),
            Err(e) => Err(source_error("getblockhash", e)),
        }
    }

    async fn block_header(&self, hash: &str) -> Result<BlockHeader, IndexerError> {
        self.get_block_header(hash)
            .await
            .map(header_from_rpc)
            .map_err(|e| source_error("getblockheader", e))
    }

    async fn block_transactions(&self, hash: &str) -> Result<Vec<ChainTransaction>, IndexerError> {
        let block = self
            .get_block(hash)
            .await
            .map_err(|e| source_error("getblock", e))?;
        tracing::debug!(hash = %block.hash, txs = block.transactions.len(), "block fetched");
        Ok(block
            .transactions
            .into_iter()
            .map(ChainTransaction::from)
            .collect())
    }

    async fn tx_out_proof(&self, txid: &str, block_hash: &str) -> Result<Vec<u8>, IndexerError> {
        self.get_tx_out_proof(txid, block_hash)
            .await
            .map_err(|e| source_error("gettxoutproof", e))
    }
}
