//! Error types for the indexing pipeline.

use thiserror::Error;

use crate::spv::ValidationError;

/// Errors that can occur while syncing or rolling back blocks.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The chain source could not be reached or timed out.
    #[error("network error calling {method}: {reason}")]
    Network { method: String, reason: String },

    /// The chain source answered with a JSON-RPC error object.
    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("block {height} ({hash}) rejected: {source}")]
    Validation {
        height: u64,
        hash: String,
        #[source]
        source: ValidationError,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    /// No common ancestor within the configured search bound.
    #[error("no common ancestor within {max_depth} blocks of tip {tip}")]
    ReorgDepthExceeded { tip: u64, max_depth: u64 },

    #[error("block out of order: expected height {expected}, got {actual}")]
    OutOfOrder { expected: u64, actual: u64 },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the next poll tick may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ReorgDepthExceeded { .. })
    }

    /// Returns `true` if the error came from talking to the chain source.
    pub fn is_chain_source(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Rpc { .. })
    }
}
