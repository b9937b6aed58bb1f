//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! One POST per call, basic-auth credentials, a hard per-request timeout and
//! no retries.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::RpcTransport;

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl HttpClientConfig {
    /// Config with basic-auth credentials and the default timeout.
    pub fn with_auth(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            password: Some(password.into()),
            ..Self::default()
        }
    }
}

/// HTTP JSON-RPC client for a single node.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    user: Option<String>,
    password: Option<String>,
    request_timeout: Duration,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            user: config.user,
            password: config.password,
            request_timeout: config.request_timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut builder = self.http.post(&self.url).json(&req);
        if let Some(user) = &self.user {
            builder = builder.basic_auth(user, self.password.as_ref());
        }

        let resp = builder.send().await.map_err(|e| self.map_send_error(e))?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| self.map_send_error(e))?;

        tracing::trace!(
            method = %req.method,
            status = status.as_u16(),
            bytes = body.len(),
            "rpc response"
        );

        // bitcoind answers failed calls with HTTP 500 and a JSON-RPC body.
        match serde_json::from_slice::<JsonRpcResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) if status.is_success() => Err(TransportError::Deserialization(e)),
            Err(_) => Err(TransportError::Http(format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            ))),
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}
