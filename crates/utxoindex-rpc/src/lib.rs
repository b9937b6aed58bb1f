//! utxoindex-rpc: Bitcoin Core JSON-RPC client.
//!
//! - [`RpcTransport`]: sends one request, no retries
//! - [`HttpRpcClient`]: `reqwest` transport with basic auth and a timeout
//! - [`BitcoindClient`]: typed `getblockhash` / `getblockheader` /
//!   `getblock` / `gettxoutproof` calls
//! - [`types`]: response payloads decoded once at this boundary

pub mod bitcoind;
pub mod client;
pub mod error;
pub mod request;
pub mod transport;
pub mod types;

pub use bitcoind::BitcoindClient;
pub use client::{HttpClientConfig, HttpRpcClient};
pub use error::TransportError;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::RpcTransport;
pub use types::{RpcBlock, RpcBlockHeader, RpcTransaction, RpcTxIn, RpcTxOut};
