//! Deterministic Keygen - reproducible key pairs from a currency and a secret
//!
//! This crate turns `(currency, secret material)` into key material that is
//! byte-for-byte identical on every run. The key engine draws randomness and
//! time from ambient sources, so generation runs inside a window where those
//! sources are redirected to a seeded, pre-expanded byte stream and a fixed
//! timestamp.

pub mod ambient;
pub mod crypto;
pub mod derivation;
pub mod engine;

pub use derivation::{KeyDeriver, KeyMaterial};

use crypto::BlockFunction;
use engine::{Algorithm, FallbackStrategy};
use thiserror::Error;

/// Main error type for key derivation operations
#[derive(Error, Debug)]
pub enum KeygenError {
    #[error("Derivation error: {0}")]
    Derivation(#[from] derivation::DerivationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KeygenError>;

/// Default size of the pre-generated deterministic stream (2 MiB)
pub const DEFAULT_PREGENERATE_BYTES: usize = 2 * 1024 * 1024;

/// Largest accepted `pregenerate_bytes` (256 MiB)
pub const MAX_PREGENERATE_BYTES: usize = 256 * 1024 * 1024;

/// Default creation timestamp embedded in every key (2020-09-13T12:26:40Z)
pub const DEFAULT_CREATION_TIMESTAMP: u64 = 1_600_000_000;

/// Configuration for a [`KeyDeriver`]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeriverConfig {
    /// Bytes of deterministic stream expanded before each generation
    pub pregenerate_bytes: usize,

    /// Fixed key creation time (Unix seconds)
    pub creation_timestamp: u64,

    /// Upper bound on one engine call (milliseconds)
    pub timeout_ms: u64,

    /// Identity label bound into keys by `generate`
    pub identity_label: String,

    /// Key algorithm requested from the engine
    pub algorithm: Algorithm,

    /// Block construction of the deterministic stream
    pub block_function: BlockFunction,

    /// How the native key primitive is intercepted
    pub fallback_strategy: FallbackStrategy,
}

impl Default for DeriverConfig {
    fn default() -> Self {
        Self {
            pregenerate_bytes: DEFAULT_PREGENERATE_BYTES,
            creation_timestamp: DEFAULT_CREATION_TIMESTAMP,
            timeout_ms: 30_000, // 30 s
            identity_label: "Deterministic Key".to_string(),
            algorithm: Algorithm::default(),
            block_function: BlockFunction::default(),
            fallback_strategy: FallbackStrategy::default(),
        }
    }
}

impl DeriverConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate().map_err(KeygenError::Config)?;
        Ok(config)
    }

    /// Check the values are usable
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.pregenerate_bytes == 0 {
            return Err("pregenerate_bytes must be greater than zero".to_string());
        }
        if self.pregenerate_bytes > MAX_PREGENERATE_BYTES {
            return Err(format!(
                "pregenerate_bytes {} exceeds the {} byte limit",
                self.pregenerate_bytes, MAX_PREGENERATE_BYTES
            ));
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than zero".to_string());
        }
        if self.creation_timestamp > u64::from(u32::MAX) {
            return Err(format!(
                "creation_timestamp {} does not fit in 32 bits",
                self.creation_timestamp
            ));
        }
        Ok(())
    }
}

/// Derive key material for `(currency, secret_hex)` with the default configuration
pub async fn generate(currency: &str, secret_hex: &str) -> Result<KeyMaterial> {
    let deriver = KeyDeriver::new(DeriverConfig::default())?;
    Ok(deriver.generate(currency, secret_hex).await?)
}
