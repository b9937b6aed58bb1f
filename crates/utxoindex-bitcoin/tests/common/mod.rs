//! Scripted chain source and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use utxoindex_bitcoin::{ChainInput, ChainOutput, ChainSource, ChainTransaction, Indexer};
use utxoindex_core::{BlockHeader, IndexerConfig, IndexerError, RecordingObserver};
use utxoindex_storage::InMemoryLedger;

pub const ALICE: &str = "bcrt1qalice0000000000000000000000000000000";
pub const BOB: &str = "bcrt1qbob00000000000000000000000000000000";
pub const STRANGER: &str = "bcrt1qstranger000000000000000000000000000";

fn double_sha256(left: &[u8], right: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    Sha256::digest(hasher.finalize()).into()
}

/// Serialized merkle block: sibling leaf, then `txid` (matched).
pub fn two_leaf_proof(txid: &str) -> Vec<u8> {
    let mut leaf = hex::decode(txid).unwrap();
    leaf.reverse();
    let sibling = [0xab_u8; 32];
    let root = double_sha256(&sibling, &leaf);

    let mut raw = vec![0u8; 36];
    raw.extend_from_slice(&root);
    raw.extend_from_slice(&[0u8; 12]);
    raw.extend_from_slice(&2u32.to_le_bytes());
    raw.push(2);
    raw.extend_from_slice(&sibling);
    raw.extend_from_slice(&leaf);
    // Flags, depth first: root, sibling (unmatched), txid (matched).
    raw.extend_from_slice(&[1, 0b0000_0101]);
    raw
}

/// Deterministic, valid-hex block hash for `height` on `branch`.
pub fn block_hash(branch: u32, height: u64) -> String {
    format!("{branch:08x}{height:056x}")
}

#[derive(Debug, Clone)]
pub struct ScriptedBlock {
    pub header: BlockHeader,
    pub txs: Vec<ChainTransaction>,
}

/// An in-memory main chain that tests can extend, reorganize and take offline.
#[derive(Default)]
pub struct ScriptedChain {
    blocks: Mutex<BTreeMap<u64, ScriptedBlock>>,
    proofs: Mutex<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
}

impl ScriptedChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append (or replace) the block at `height` on `branch`, linked to
    /// whatever block currently sits at `height - 1`.
    pub fn mine(&self, branch: u32, height: u64, txs: Vec<ChainTransaction>) -> BlockHeader {
        let mut blocks = self.blocks.lock().unwrap();
        let previous_hash = height
            .checked_sub(1)
            .and_then(|h| blocks.get(&h))
            .map(|b| b.header.hash.clone())
            .unwrap_or_else(|| "00".repeat(32));
        let header = BlockHeader {
            hash: block_hash(branch, height),
            previous_hash,
            height,
            merkle_root: "00".repeat(32),
            timestamp: 1_700_000_000 + height as i64 * 600,
            difficulty: 1.0,
            nonce: branch,
            tx_count: txs.len() as u32,
        };
        blocks.insert(
            height,
            ScriptedBlock {
                header: header.clone(),
                txs,
            },
        );
        header
    }

    /// Mine empty blocks for every height in `range` on `branch`.
    pub fn mine_empty(&self, branch: u32, range: std::ops::RangeInclusive<u64>) {
        for height in range {
            self.mine(branch, height, vec![coinbase(&format!("cb-{branch}-{height}"))]);
        }
    }

    /// Replace the block at `height` with an arbitrary header.
    pub fn put(&self, header: BlockHeader, txs: Vec<ChainTransaction>) {
        self.blocks
            .lock()
            .unwrap()
            .insert(header.height, ScriptedBlock { header, txs });
    }

    /// Drop every block above `height`.
    pub fn truncate_above(&self, height: u64) {
        self.blocks.lock().unwrap().split_off(&(height + 1));
    }

    pub fn header_at(&self, height: u64) -> Option<BlockHeader> {
        self.blocks
            .lock()
            .unwrap()
            .get(&height)
            .map(|b| b.header.clone())
    }

    pub fn block_at(&self, height: u64) -> Option<ScriptedBlock> {
        self.blocks.lock().unwrap().get(&height).cloned()
    }

    /// Serve `raw` for `txid` and make `height`'s merkle root match it.
    /// Two-leaf BIP37 merkle block matching `txid` (display hex) as the second
    /// leaf; the header root at `height` is set to match.
    pub fn set_valid_proof(&self, height: u64, txid: &str) {
        let raw = two_leaf_proof(txid);
        let mut root: [u8; 32] = raw[36..68].try_into().unwrap();
        root.reverse();
        if let Some(block) = self.blocks.lock().unwrap().get_mut(&height) {
            block.header.merkle_root = hex::encode(root);
        }
        self.proofs.lock().unwrap().insert(txid.to_string(), raw);
    }

    pub fn set_proof(&self, txid: &str, raw: Vec<u8>) {
        self.proofs.lock().unwrap().insert(txid.to_string(), raw);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self, method: &str) -> Result<(), IndexerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IndexerError::Network {
                method: method.into(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    fn by_hash(&self, method: &str, hash: &str) -> Result<ScriptedBlock, IndexerError> {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .find(|b| b.header.hash == hash)
            .cloned()
            .ok_or_else(|| IndexerError::Rpc {
                method: method.into(),
                code: -5,
                message: "Block not found".into(),
            })
    }
}

#[async_trait]
impl ChainSource for ScriptedChain {
    async fn block_hash(&self, height: u64) -> Result<Option<String>, IndexerError> {
        self.check_online("getblockhash")?;
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&height)
            .map(|b| b.header.hash.clone()))
    }

    async fn block_header(&self, hash: &str) -> Result<BlockHeader, IndexerError> {
        self.check_online("getblockheader")?;
        Ok(self.by_hash("getblockheader", hash)?.header)
    }

    async fn block_transactions(&self, hash: &str) -> Result<Vec<ChainTransaction>, IndexerError> {
        self.check_online("getblock")?;
        Ok(self.by_hash("getblock", hash)?.txs)
    }

    async fn tx_out_proof(&self, txid: &str, _block_hash: &str) -> Result<Vec<u8>, IndexerError> {
        self.check_online("gettxoutproof")?;
        self.proofs
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| IndexerError::Rpc {
                method: "gettxoutproof".into(),
                code: -5,
                message: "Transaction not yet in block".into(),
            })
    }
}

// ─── Transaction fixtures ─────────────────────────────────────────────────────

pub fn coinbase(txid: &str) -> ChainTransaction {
    ChainTransaction {
        txid: txid.into(),
        inputs: vec![ChainInput {
            prev_txid: None,
            vout: 0,
            address: None,
            value_sat: None,
        }],
        outputs: vec![ChainOutput {
            vout: 0,
            value_sat: 5_000_000_000,
            address: Some("bcrt1qminer".into()),
        }],
    }
}

/// A transaction with one input spending `spends` and outputs `(address, sats)`.
pub fn payment(txid: &str, spends: Option<(&str, u32)>, outputs: &[(&str, i64)]) -> ChainTransaction {
    let input = match spends {
        Some((prev, vout)) => ChainInput {
            prev_txid: Some(prev.into()),
            vout,
            address: None,
            value_sat: None,
        },
        None => ChainInput {
            prev_txid: Some(format!("funding-{txid}")),
            vout: 0,
            address: None,
            value_sat: None,
        },
    };
    ChainTransaction {
        txid: txid.into(),
        inputs: vec![input],
        outputs: outputs
            .iter()
            .enumerate()
            .map(|(n, (address, value))| ChainOutput {
                vout: n as u32,
                value_sat: *value,
                address: Some(address.to_string()),
            })
            .collect(),
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub chain: Arc<ScriptedChain>,
    pub ledger: Arc<InMemoryLedger>,
    pub observer: Arc<RecordingObserver>,
    pub indexer: Indexer<Arc<ScriptedChain>>,
}

impl Harness {
    pub fn new(config: IndexerConfig) -> Self {
        let chain = ScriptedChain::new();
        let ledger = Arc::new(InMemoryLedger::new());
        let observer = Arc::new(RecordingObserver::new());
        let indexer = Indexer::new(config, chain.clone(), ledger.clone(), observer.clone());
        Self {
            chain,
            ledger,
            observer,
            indexer,
        }
    }

    /// Rebuild the indexer over the same chain and ledger, with a fresh
    /// in-memory undo log (as after a process restart).
    pub fn restart(&mut self) {
        let config = self.indexer.config().clone();
        self.indexer = Indexer::new(
            config,
            self.chain.clone(),
            self.ledger.clone(),
            self.observer.clone(),
        );
    }

    /// Sync until the ledger reaches the chain tip or a tick fails.
    pub async fn sync_all(&mut self) {
        for _ in 0..1_000 {
            match self.indexer.sync_next_block().await {
                Ok(utxoindex_bitcoin::SyncOutcome::UpToDate { .. }) => return,
                Ok(_) => {}
                Err(e) => panic!("sync failed: {e}"),
            }
        }
        panic!("sync did not converge");
    }
}

pub fn config(start_height: u64) -> IndexerConfig {
    IndexerConfig {
        start_height,
        verify_merkle_proofs: false,
        ..IndexerConfig::default()
    }
}
