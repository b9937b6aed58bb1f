//! Typed response payloads for the Bitcoin Core methods the indexer uses.

use serde::{Deserialize, Serialize};

/// `getblockheader <hash>` (verbose).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcBlockHeader {
    pub hash: String,
    /// Absent for the genesis block.
    #[serde(rename = "previousblockhash", default)]
    pub previous_hash: Option<String>,
    pub height: u64,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub time: i64,
    #[serde(default)]
    pub bits: String,
    pub nonce: u32,
    #[serde(rename = "nTx", default)]
    pub tx_count: u32,
    pub difficulty: f64,
}

/// `getblock <hash> 2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcBlock {
    pub hash: String,
    #[serde(default)]
    pub height: u64,
    #[serde(rename = "tx")]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcTransaction {
    pub txid: String,
    #[serde(rename = "vin", default)]
    pub inputs: Vec<RpcTxIn>,
    #[serde(rename = "vout", default)]
    pub outputs: Vec<RpcTxOut>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcTxIn {
    /// Previous transaction; absent on coinbase inputs.
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
    /// Only present with verbosity 3.
    #[serde(default)]
    pub prevout: Option<RpcPrevOut>,
}

impl RpcTxIn {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some() || self.txid.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcPrevOut {
    pub value: f64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: RpcScriptPubKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcTxOut {
    /// Amount in BTC.
    pub value: f64,
    #[serde(rename = "n")]
    pub vout: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: RpcScriptPubKey,
    #[serde(default)]
    pub address: Option<String>,
}

impl RpcTxOut {
    /// Destination address, checking the top-level field, then
    /// `scriptPubKey.address`, then the legacy `scriptPubKey.addresses` list.
    pub fn destination(&self) -> Option<&str> {
        self.address
            .as_deref()
            .filter(|a| !a.is_empty())
            .or_else(|| self.script_pub_key.destination())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcScriptPubKey {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl RpcScriptPubKey {
    pub fn destination(&self) -> Option<&str> {
        self.address
            .as_deref()
            .filter(|a| !a.is_empty())
            .or_else(|| self.addresses.first().map(String::as_str))
    }
}
