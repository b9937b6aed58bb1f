//! SPV-style checks: proof-of-work, header linkage and Merkle inclusion.
//!
//! These are cheap re-verifications of what the node already reports, not
//! consensus validation. The difficulty-to-target conversion in particular is
//! an approximation (`(2^256 - 1) / difficulty`) that is good enough to catch
//! garbage headers but is not the node's compact-bits rule.
//!
//! `gettxoutproof` payloads are BIP37 merkle blocks: an 80-byte header, the
//! block's transaction count, and a depth-first partial Merkle tree of hashes
//! and flag bits. [`MerkleBlock`] parses one and extracts the ordered branch
//! for a matched txid.

use std::collections::HashMap;

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::BlockHeader;

/// Why a header was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("previous hash mismatch: expected {expected}, got {actual}")]
    PreviousHashMismatch { expected: String, actual: String },

    #[error("insufficient proof of work for hash {hash}")]
    InsufficientProofOfWork { hash: String },

    #[error("timestamp {current} is before parent timestamp {previous}")]
    TimestampRegression { previous: i64, current: i64 },
}

// ─── Proof of work ────────────────────────────────────────────────────────────

fn max_target() -> BigUint {
    (BigUint::one() << 256usize) - BigUint::one()
}

/// Target implied by `difficulty`: `floor((2^256 - 1) / difficulty)`.
///
/// The division is exact over the binary value of the `f64`. Non-positive
/// difficulty yields the maximum target; NaN and infinities yield `None`.
pub fn target_from_difficulty(difficulty: f64) -> Option<BigUint> {
    if !difficulty.is_finite() {
        return None;
    }
    if difficulty <= 0.0 {
        return Some(max_target());
    }

    // difficulty == mantissa * 2^exponent
    let bits = difficulty.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i64;
    let fraction = bits & 0x000f_ffff_ffff_ffff;
    let mantissa = if biased == 0 {
        fraction << 1
    } else {
        fraction | 0x0010_0000_0000_0000
    };
    let exponent = biased - 1075;

    let mantissa = BigUint::from(mantissa);
    let target = if exponent >= 0 {
        max_target() / (mantissa << exponent as usize)
    } else {
        (max_target() << exponent.unsigned_abs() as usize) / mantissa
    };
    Some(target)
}

/// Interpret a hex block hash as a big-endian unsigned integer.
fn hash_to_int(hash: &str) -> Option<BigUint> {
    if hash.is_empty() || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    BigUint::parse_bytes(hash.as_bytes(), 16)
}

/// Returns `true` if the header hash is at or below the difficulty target.
pub fn check_proof_of_work(header: &BlockHeader) -> bool {
    let Some(hash) = hash_to_int(&header.hash) else {
        return false;
    };
    match target_from_difficulty(header.difficulty) {
        Some(target) => hash <= target,
        None => false,
    }
}

/// Validate `header` against its parent `prev`.
///
/// Checks run in order (linkage, proof-of-work, timestamp) and the first
/// failure is returned.
pub fn validate_header(header: &BlockHeader, prev: &BlockHeader) -> Result<(), ValidationError> {
    if header.previous_hash != prev.hash {
        return Err(ValidationError::PreviousHashMismatch {
            expected: prev.hash.clone(),
            actual: header.previous_hash.clone(),
        });
    }
    if !check_proof_of_work(header) {
        return Err(ValidationError::InsufficientProofOfWork {
            hash: header.hash.clone(),
        });
    }
    if header.timestamp < prev.timestamp {
        return Err(ValidationError::TimestampRegression {
            previous: prev.timestamp,
            current: header.timestamp,
        });
    }
    Ok(())
}

// ─── Merkle proofs ────────────────────────────────────────────────────────────

/// One sibling in a Merkle branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    /// Sibling payload, hex encoded.
    pub hash: String,
    /// `true` if the sibling sits on the left of the running hash.
    pub is_left: bool,
}

impl MerkleNode {
    pub fn left(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            is_left: true,
        }
    }

    pub fn right(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            is_left: false,
        }
    }

}

/// Verify that `txid` folds up to `expected_root` through `proof`.
///
/// The running hash starts as SHA-256 of the txid; each node is concatenated
/// on the side its `is_left` flag names and the pair is re-hashed.
pub fn verify_merkle_proof(txid: &str, proof: &[MerkleNode], expected_root: &str) -> bool {
    let mut hash: [u8; 32] = Sha256::digest(txid.as_bytes()).into();
    for node in proof {
        let Ok(sibling) = hex::decode(&node.hash) else {
            return false;
        };
        let mut hasher = Sha256::new();
        if node.is_left {
            hasher.update(&sibling);
            hasher.update(hash);
        } else {
            hasher.update(hash);
            hasher.update(&sibling);
        }
        hash = hasher.finalize().into();
    }
    hex::encode(hash).eq_ignore_ascii_case(expected_root)
}

// ─── gettxoutproof ────────────────────────────────────────────────────────────

/// Why a raw `gettxoutproof` payload could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("proof truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("malformed partial merkle tree: {0}")]
    Malformed(&'static str),

    #[error("txid {0} is not a 32-byte hex hash")]
    InvalidTxid(String),

    #[error("transaction {0} is not matched by the proof")]
    NotMatched(String),
}

const HEADER_LEN: usize = 80;

fn double_sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Sha256::digest(hasher.finalize()).into()
}

/// Hex hashes are displayed byte-reversed; tree nodes use internal order.
fn internal_hash(display_hex: &str) -> Option<[u8; 32]> {
    let mut bytes: [u8; 32] = hex::decode(display_hex).ok()?.try_into().ok()?;
    bytes.reverse();
    Some(bytes)
}

fn display_hex(internal: &[u8; 32]) -> String {
    let mut bytes = *internal;
    bytes.reverse();
    hex::encode(bytes)
}

struct Reader<'a> {
    raw: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ProofError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.raw.len())
            .ok_or(ProofError::Truncated {
                offset: self.raw.len(),
            })?;
        let bytes = &self.raw[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn u32_le(&mut self) -> Result<u32, ProofError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn var_int(&mut self) -> Result<u64, ProofError> {
        let prefix = self.take(1)?[0];
        let width = match prefix {
            0xfd => 2,
            0xfe => 4,
            0xff => 8,
            n => return Ok(u64::from(n)),
        };
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(self.take(width)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn remaining(&self) -> usize {
        self.raw.len() - self.offset
    }
}

/// Parsed `gettxoutproof` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlock {
    root: [u8; 32],
    tx_count: u32,
    hashes: Vec<[u8; 32]>,
    flags: Vec<bool>,
}

impl MerkleBlock {
    pub fn parse(raw: &[u8]) -> Result<Self, ProofError> {
        let mut reader = Reader { raw, offset: 0 };
        let header = reader.take(HEADER_LEN)?;
        let mut root = [0u8; 32];
        root.copy_from_slice(&header[36..68]);

        let tx_count = reader.u32_le()?;
        if tx_count == 0 {
            return Err(ProofError::Malformed("no transactions"));
        }

        let hash_count = reader.var_int()?;
        if hash_count > u64::from(tx_count) {
            return Err(ProofError::Malformed("more hashes than transactions"));
        }
        if hash_count.saturating_mul(32) > reader.remaining() as u64 {
            return Err(ProofError::Truncated { offset: raw.len() });
        }
        let hashes = (0..hash_count)
            .map(|_| {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(reader.take(32)?);
                Ok(hash)
            })
            .collect::<Result<Vec<_>, ProofError>>()?;

        let flag_bytes = reader.var_int()?;
        if flag_bytes > reader.remaining() as u64 {
            return Err(ProofError::Truncated { offset: raw.len() });
        }
        let flags: Vec<bool> = reader
            .take(flag_bytes as usize)?
            .iter()
            .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
            .collect();
        if flags.len() < hashes.len() {
            return Err(ProofError::Malformed("fewer flag bits than hashes"));
        }

        Ok(Self {
            root,
            tx_count,
            hashes,
            flags,
        })
    }

    /// Merkle root from the embedded header, display hex.
    pub fn merkle_root(&self) -> String {
        display_hex(&self.root)
    }

    pub fn tx_count(&self) -> u32 {
        self.tx_count
    }

    fn width(&self, height: u32) -> u64 {
        (u64::from(self.tx_count) + (1u64 << height) - 1) >> height
    }

    fn tree_height(&self) -> u32 {
        let mut height = 0;
        while self.width(height) > 1 {
            height += 1;
        }
        height
    }

    /// Rebuild every visited node and check it against the embedded root.
    fn walk(&self) -> Result<Walk, ProofError> {
        let mut walk = Walk::default();
        let height = self.tree_height();
        let root = walk.visit(self, height, 0)?;
        if walk.hashes_used != self.hashes.len() {
            return Err(ProofError::Malformed("unused hashes"));
        }
        if walk.bits_used.div_ceil(8) != self.flags.len() / 8 {
            return Err(ProofError::Malformed("unused flag bytes"));
        }
        if root != self.root {
            return Err(ProofError::Malformed("tree does not hash to the header root"));
        }
        walk.height = height;
        Ok(walk)
    }

    /// Txids matched by the proof, display hex, in block order.
    pub fn matched_txids(&self) -> Result<Vec<String>, ProofError> {
        let walk = self.walk()?;
        Ok(walk.matched.iter().map(|(_, hash)| display_hex(hash)).collect())
    }

    /// Ordered siblings from the leaf of `txid` up to the root.
    ///
    /// Node hashes are internal byte order, as [`verify_merkle_branch`] expects.
    pub fn branch(&self, txid: &str) -> Result<Vec<MerkleNode>, ProofError> {
        let leaf = internal_hash(txid).ok_or_else(|| ProofError::InvalidTxid(txid.into()))?;
        let walk = self.walk()?;
        let mut pos = walk
            .matched
            .iter()
            .find(|(_, hash)| *hash == leaf)
            .map(|(pos, _)| *pos)
            .ok_or_else(|| ProofError::NotMatched(txid.into()))?;

        let mut branch = Vec::with_capacity(walk.height as usize);
        for level in 0..walk.height {
            let sibling = pos ^ 1;
            let key = if sibling < self.width(level) {
                (level, sibling)
            } else {
                (level, pos)
            };
            let hash = walk
                .nodes
                .get(&key)
                .ok_or(ProofError::Malformed("missing sibling on the matched path"))?;
            branch.push(MerkleNode {
                hash: hex::encode(hash),
                is_left: pos & 1 == 1,
            });
            pos >>= 1;
        }
        Ok(branch)
    }
}

#[derive(Default)]
struct Walk {
    height: u32,
    bits_used: usize,
    hashes_used: usize,
    nodes: HashMap<(u32, u64), [u8; 32]>,
    matched: Vec<(u64, [u8; 32])>,
}

impl Walk {
    fn visit(&mut self, block: &MerkleBlock, height: u32, pos: u64) -> Result<[u8; 32], ProofError> {
        let flag = *block
            .flags
            .get(self.bits_used)
            .ok_or(ProofError::Malformed("ran out of flag bits"))?;
        self.bits_used += 1;

        let hash = if height == 0 || !flag {
            let hash = *block
                .hashes
                .get(self.hashes_used)
                .ok_or(ProofError::Malformed("ran out of hashes"))?;
            self.hashes_used += 1;
            if height == 0 && flag {
                self.matched.push((pos, hash));
            }
            hash
        } else {
            let left = self.visit(block, height - 1, pos * 2)?;
            let right = if pos * 2 + 1 < block.width(height - 1) {
                let right = self.visit(block, height - 1, pos * 2 + 1)?;
                if right == left {
                    return Err(ProofError::Malformed("identical sibling hashes"));
                }
                right
            } else {
                left
            };
            double_sha256(&[&left, &right])
        };
        self.nodes.insert((height, pos), hash);
        Ok(hash)
    }
}

/// Fold a Bitcoin Merkle branch: double SHA-256 over internal byte order.
///
/// `txid` and `expected_root` are display hex as reported by the node.
pub fn verify_merkle_branch(txid: &str, branch: &[MerkleNode], expected_root: &str) -> bool {
    let Some(mut hash) = internal_hash(txid) else {
        return false;
    };
    for node in branch {
        let Ok(sibling) = hex::decode(&node.hash) else {
            return false;
        };
        hash = if node.is_left {
            double_sha256(&[&sibling, &hash])
        } else {
            double_sha256(&[&hash, &sibling])
        };
    }
    display_hex(&hash).eq_ignore_ascii_case(expected_root)
}

/// Check a raw `gettxoutproof` payload for `txid` against a header root.
///
/// `Ok(false)` means the proof is well formed but belongs to another root.
pub fn verify_tx_out_proof(raw: &[u8], txid: &str, expected_root: &str) -> Result<bool, ProofError> {
    let block = MerkleBlock::parse(raw)?;
    let branch = block.branch(txid)?;
    Ok(verify_merkle_branch(txid, &branch, expected_root))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
