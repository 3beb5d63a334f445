//! Key Engine - the asymmetric key generator consumed by the deriver
//!
//! The engine is treated as an external collaborator: it knows how to build
//! and serialize key pairs, but reads its randomness from the ambient random
//! source and may try a platform primitive first. Determinism is imposed on
//! it from the outside (see [`crate::ambient`] and [`primitive`]).

pub mod armor;
mod bundled;
pub mod primitive;

pub use bundled::BundledEngine;
pub use primitive::{with_forced_fallback, FallbackStrategy, NativeKeyGen, PlatformKeyGen, RawKeyPair};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unsupported algorithm id: {0}")]
    UnsupportedAlgorithm(u8),

    #[error("Operation not supported by {0}")]
    NotSupported(String),

    #[error("Malformed key data: {0}")]
    Malformed(String),

    #[error("Random source failed: {0}")]
    Randomness(String),

    #[error("Engine failure: {0}")]
    Internal(String),
}

/// Key algorithms the engine can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// Ed25519 signing key
    #[default]
    Ed25519,

    /// X25519 key agreement key
    X25519,
}

impl Algorithm {
    /// Wire identifier used in serialized packets
    pub fn id(&self) -> u8 {
        match self {
            Algorithm::Ed25519 => 22,
            Algorithm::X25519 => 18,
        }
    }

    pub fn from_id(id: u8) -> Result<Self, EngineError> {
        match id {
            22 => Ok(Algorithm::Ed25519),
            18 => Ok(Algorithm::X25519),
            other => Err(EngineError::UnsupportedAlgorithm(other)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Ed25519 => write!(f, "ed25519"),
            Algorithm::X25519 => write!(f, "x25519"),
        }
    }
}

/// Parameters for one key generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub algorithm: Algorithm,

    /// Identity label bound into the public key (e.g. a user id)
    pub identity_label: String,

    /// Creation time in Unix seconds; the engine reads its clock when `None`
    pub creation_time: Option<u64>,
}

/// Serialized output of the engine
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedKeyPair {
    /// Armored public key block
    pub public_key: String,

    /// Armored private key block
    pub private_key: String,

    pub algorithm: Algorithm,

    /// Creation time embedded in both blocks
    pub created_at: u64,
}

impl fmt::Debug for GeneratedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Contract of an asymmetric key generation engine
pub trait KeyEngine: Send + Sync {
    /// Generate a key pair for `request`
    fn generate_key_pair(&self, request: &KeyRequest) -> Result<GeneratedKeyPair, EngineError>;

    /// Parse an armored public key and return its fingerprint
    fn read_fingerprint(&self, public_key: &str) -> Result<String, EngineError>;
}
