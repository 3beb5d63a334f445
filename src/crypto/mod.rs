//! Cryptography Module - hashing primitives and the deterministic byte generator
//!
//! Everything here is pure: no wall clock, no ambient randomness. The
//! generator expands a 32-byte seed into a reproducible counter-mode stream.

pub mod dbg;

pub use dbg::DeterministicByteGenerator;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of a seed and of one generator block
pub const BLOCK_SIZE: usize = 32;

/// Blocks addressable by the 32-bit counter
pub const MAX_BLOCKS: u64 = 1 << 32;

/// Domain tag mixed into every generator block
pub const PRNG_DOMAIN_TAG: &[u8] = b"gpg-deterministic-prng-v2";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbgError {
    #[error("Seed too short: got {len} bytes, need 32")]
    SeedTooShort { len: usize },

    #[error("Deterministic buffer exhausted: requested {requested} bytes, {remaining} remaining")]
    BufferExhausted { requested: usize, remaining: usize },

    #[error("Stream of {requested} bytes exceeds the counter range")]
    StreamTooLong { requested: usize },

    #[error("Stream already pre-generated")]
    AlreadyPregenerated,
}

/// How a single 32-byte block is computed from `(seed, counter)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockFunction {
    /// `SHA-256(SHA-256(seed || counter_be32 || tag))`
    #[default]
    DoubleSha256,

    /// `HMAC-SHA256(seed, counter_be32 || tag)`
    HmacSha256,
}

impl BlockFunction {
    /// Compute the block for `counter`
    pub fn block(&self, seed: &[u8; BLOCK_SIZE], counter: u32) -> [u8; BLOCK_SIZE] {
        match self {
            BlockFunction::DoubleSha256 => {
                let mut hasher = Sha256::new();
                hasher.update(seed);
                hasher.update(counter.to_be_bytes());
                hasher.update(PRNG_DOMAIN_TAG);
                double_finish(hasher)
            }
            BlockFunction::HmacSha256 => hmac_sha256(seed, &[&counter.to_be_bytes(), PRNG_DOMAIN_TAG]),
        }
    }
}

/// SHA-256 over the concatenation of `parts`
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// SHA-256 applied twice over the concatenation of `parts`
pub fn double_sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    double_finish(hasher)
}

fn double_finish(hasher: Sha256) -> [u8; 32] {
    let first = hasher.finalize();
    Sha256::digest(first).into()
}

/// HMAC-SHA256 keyed with `key` over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    // HMAC accepts keys of any length
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC-SHA256 takes keys of any length"));
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}
