//! Typed Bitcoin Core calls on top of any [`RpcTransport`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::client::{HttpClientConfig, HttpRpcClient};
use crate::error::TransportError;
use crate::request::JsonRpcRequest;
use crate::transport::RpcTransport;
use crate::types::{RpcBlock, RpcBlockHeader};

/// Bitcoin Core RPC client.
pub struct BitcoindClient<T = HttpRpcClient> {
    transport: T,
    next_id: AtomicU64,
}

impl BitcoindClient<HttpRpcClient> {
    /// Connect over HTTP with basic-auth credentials.
    pub fn http(
        url: impl Into<String>,
        config: HttpClientConfig,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(HttpRpcClient::new(url, config)?))
    }
}

impl<T: RpcTransport> BitcoindClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    /// Call `method` and decode the `result` member into `R`.
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<R, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self
            .transport
            .send(JsonRpcRequest::new(id, method, params))
            .await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }

    /// `getblockcount`
    pub async fn get_block_count(&self) -> Result<u64, TransportError> {
        self.call("getblockcount", vec![]).await
    }

    /// `getblockhash <height>`
    pub async fn get_block_hash(&self, height: u64) -> Result<String, TransportError> {
        self.call("getblockhash", vec![json!(height)]).await
    }

    /// `getblockheader <hash>`
    pub async fn get_block_header(&self, hash: &str) -> Result<RpcBlockHeader, TransportError> {
        self.call("getblockheader", vec![json!(hash)]).await
    }

    /// `getblock <hash> 2`: block with decoded transactions.
    pub async fn get_block(&self, hash: &str) -> Result<RpcBlock, TransportError> {
        self.call("getblock", vec![json!(hash), json!(2)]).await
    }

    /// `gettxoutproof [txid] <blockhash>`: raw serialized merkle block.
    pub async fn get_tx_out_proof(
        &self,
        txid: &str,
        block_hash: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let proof_hex: String = self
            .call("gettxoutproof", vec![json!([txid]), json!(block_hash)])
            .await?;
        hex::decode(&proof_hex)
            .map_err(|e| TransportError::InvalidResponse(format!("proof is not hex: {e}")))
    }
}
