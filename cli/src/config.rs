//! YAML configuration for the `utxoindex` binary.
//!
//! ```yaml
//! bitcoin:
//!   url: http://127.0.0.1:8332
//!   user: rpcuser
//!   password: rpcpass
//!   timeout_secs: 10
//! indexer:
//!   start_height: 800000
//!   max_reorg_depth: 6
//! database:
//!   url: sqlite:./utxoindex.db?mode=rwc
//! log:
//!   level: info
//!   components:
//!     utxoindex_bitcoin: debug
//!   json: false
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use utxoindex_core::{IndexerConfig, LedgerStore};
use utxoindex_rpc::HttpClientConfig;
use utxoindex_storage::{InMemoryLedger, PostgresLedger, PostgresOptions, SqliteLedger};

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bitcoin: RpcConfig,
    pub indexer: IndexerConfig,
    pub database: DatabaseConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Read `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config file '{}'", path.display()))
    }
}

// ─── Node RPC ─────────────────────────────────────────────────────────────────

/// Connection settings for the bitcoind JSON-RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8332".into(),
            user: None,
            password: None,
            timeout_secs: 10,
        }
    }
}

impl RpcConfig {
    pub fn client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            user: self.user.clone(),
            password: self.password.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

// ─── Database ─────────────────────────────────────────────────────────────────

/// Where the ledger lives.
///
/// `url` selects the backend: `postgres://…` / `postgresql://…` for
/// PostgreSQL, `memory` for a throwaway in-process ledger, anything else is
/// handed to SQLite as a path or `sqlite:` URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let pg = PostgresOptions::default();
        Self {
            url: "sqlite:utxoindex.db?mode=rwc".into(),
            max_connections: pg.max_connections,
            min_connections: pg.min_connections,
            connect_timeout_secs: pg.connect_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
    Postgres,
}

impl DatabaseConfig {
    pub fn backend(&self) -> Backend {
        let url = self.url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Backend::Postgres
        } else if url == "memory" {
            Backend::Memory
        } else {
            Backend::Sqlite
        }
    }

    /// Connect to the configured backend and make sure the schema exists.
    pub async fn open(&self) -> Result<Arc<dyn LedgerStore>> {
        let store: Arc<dyn LedgerStore> = match self.backend() {
            Backend::Memory => Arc::new(InMemoryLedger::new()),
            Backend::Sqlite => Arc::new(
                SqliteLedger::open(&self.url)
                    .await
                    .with_context(|| format!("open SQLite ledger '{}'", self.url))?,
            ),
            Backend::Postgres => {
                let options = PostgresOptions {
                    max_connections: self.max_connections,
                    min_connections: self.min_connections,
                    connect_timeout_secs: self.connect_timeout_secs,
                };
                Arc::new(
                    PostgresLedger::connect_with_options(&self.url, options)
                        .await
                        .context("connect to PostgreSQL ledger")?,
                )
            }
        };
        tracing::debug!(backend = ?self.backend(), "ledger store opened");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let cfg = AppConfig::load(None).unwrap();
        assert_eq!(cfg.bitcoin.url, "http://127.0.0.1:8332");
        assert_eq!(cfg.bitcoin.timeout_secs, 10);
        assert_eq!(cfg.indexer.max_reorg_depth, 6);
        assert_eq!(cfg.indexer.poll_interval_ms, 5_000);
        assert_eq!(cfg.database.backend(), Backend::Sqlite);
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg: AppConfig = serde_yaml::from_str(
            "bitcoin:\n  url: http://node:18443\n  user: alice\nindexer:\n  start_height: 100\n",
        )
        .unwrap();
        assert_eq!(cfg.bitcoin.url, "http://node:18443");
        assert_eq!(cfg.bitcoin.user.as_deref(), Some("alice"));
        assert_eq!(cfg.bitcoin.timeout_secs, 10);
        assert_eq!(cfg.indexer.start_height, 100);
        assert_eq!(cfg.indexer.max_reorg_depth, 6);
        assert!(cfg.indexer.verify_merkle_proofs);
    }

    #[test]
    fn log_components_parse() {
        let cfg: AppConfig = serde_yaml::from_str(
            "log:\n  level: warn\n  json: true\n  components:\n    utxoindex-bitcoin: debug\n",
        )
        .unwrap();
        assert_eq!(cfg.log.level, "warn");
        assert!(cfg.log.json);
        assert_eq!(
            cfg.log.components.get("utxoindex-bitcoin").map(String::as_str),
            Some("debug")
        );
    }

    #[test]
    fn backend_follows_url_scheme() {
        let db = |url: &str| DatabaseConfig {
            url: url.into(),
            ..DatabaseConfig::default()
        };
        assert_eq!(db("postgres://u:p@localhost/ledger").backend(), Backend::Postgres);
        assert_eq!(db("postgresql://localhost/ledger").backend(), Backend::Postgres);
        assert_eq!(db("memory").backend(), Backend::Memory);
        assert_eq!(db("./ledger.db").backend(), Backend::Sqlite);
        assert_eq!(db("sqlite::memory:").backend(), Backend::Sqlite);
    }

    #[test]
    fn rpc_client_config_carries_credentials() {
        let rpc = RpcConfig {
            user: Some("u".into()),
            password: Some("p".into()),
            timeout_secs: 3,
            ..RpcConfig::default()
        };
        let client = rpc.client_config();
        assert_eq!(client.user.as_deref(), Some("u"));
        assert_eq!(client.request_timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn memory_backend_opens() {
        let db = DatabaseConfig {
            url: "memory".into(),
            ..DatabaseConfig::default()
        };
        let store = db.open().await.unwrap();
        assert!(store.tip().await.unwrap().is_none());
    }
}
