//! Derivation Module - deterministic key generation from currency + secret
//!
//! Each call derives a seed, expands it into a pre-generated byte stream,
//! installs that stream as the ambient random source, and runs the key
//! engine inside the override window. Calls are serialized process-wide.

mod keys;
mod seed;

pub use keys::KeyMaterial;
pub use seed::{derive_seed, validate_secret_hex, Seed, SEED_DOMAIN_TAG};

use crate::ambient::{self, OverrideError, OverrideReport};
use crate::crypto::{DbgError, DeterministicByteGenerator};
use crate::engine::{
    with_forced_fallback, BundledEngine, EngineError, GeneratedKeyPair, KeyEngine, KeyRequest,
};
use crate::DeriverConfig;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("Invalid secret material: {0}")]
    InvalidSecret(String),

    #[error("Seed too short: got {len} bytes")]
    SeedTooShort { len: usize },

    #[error("Deterministic buffer exhausted: requested {requested} bytes, {remaining} remaining")]
    BufferExhausted { requested: usize, remaining: usize },

    #[error("Key engine error: {0}")]
    ExternalEngine(#[from] EngineError),

    #[error("Key engine did not finish within {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("Ambient override error: {0}")]
    Override(#[from] OverrideError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<DbgError> for DerivationError {
    fn from(err: DbgError) -> Self {
        match err {
            DbgError::SeedTooShort { len } => DerivationError::SeedTooShort { len },
            DbgError::BufferExhausted { requested, remaining } => {
                DerivationError::BufferExhausted { requested, remaining }
            }
            DbgError::StreamTooLong { .. } | DbgError::AlreadyPregenerated => {
                DerivationError::Config(err.to_string())
            }
        }
    }
}

/// Builds a fresh engine for each call, after the override is in place
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn KeyEngine> + Send + Sync>;

type EngineOutcome = Result<(GeneratedKeyPair, String), EngineError>;

/// Deterministic key generator
#[derive(Clone)]
pub struct KeyDeriver {
    config: DeriverConfig,
    engine_factory: EngineFactory,
}

impl KeyDeriver {
    /// Create a deriver using the bundled engine
    pub fn new(config: DeriverConfig) -> Result<Self, DerivationError> {
        config.validate().map_err(DerivationError::Config)?;
        Ok(Self {
            config,
            engine_factory: Arc::new(|| -> Box<dyn KeyEngine> { Box::new(BundledEngine::new()) }),
        })
    }

    /// Replace the engine used for generation
    pub fn with_engine_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn KeyEngine> + Send + Sync + 'static,
    {
        self.engine_factory = Arc::new(factory);
        self
    }

    pub fn config(&self) -> &DeriverConfig {
        &self.config
    }

    /// Generate the key material for `(currency, secret_hex)` with the
    /// configured identity label
    pub async fn generate(&self, currency: &str, secret_hex: &str) -> Result<KeyMaterial, DerivationError> {
        let label = self.config.identity_label.clone();
        self.generate_with_label(currency, secret_hex, &label).await
    }

    /// Generate the key material for `(currency, secret_hex)`, binding
    /// `identity_label` into the public key
    pub async fn generate_with_label(
        &self,
        currency: &str,
        secret_hex: &str,
        identity_label: &str,
    ) -> Result<KeyMaterial, DerivationError> {
        validate_secret_hex(secret_hex)?;

        let dbg = {
            let seed = derive_seed(currency, secret_hex);
            let mut dbg = DeterministicByteGenerator::new(seed.as_bytes())?
                .with_block_function(self.config.block_function);
            dbg.pregenerate(self.config.pregenerate_bytes)?;
            dbg
        };

        let request = KeyRequest {
            algorithm: self.config.algorithm,
            identity_label: identity_label.to_string(),
            creation_time: Some(self.config.creation_timestamp),
        };

        // The window runs as its own task so that a caller dropping this
        // future cannot release the gate while the engine is still running.
        let gate = ambient::lock_gate().await;
        let window = tokio::spawn(run_window(
            gate,
            dbg,
            request,
            self.config.clone(),
            self.engine_factory.clone(),
        ));

        let material = window
            .await
            .map_err(|e| DerivationError::ExternalEngine(EngineError::Internal(e.to_string())))??;

        tracing::info!(
            "Derived {} key for {}: {}",
            material.algorithm,
            currency,
            material.fingerprint
        );
        Ok(material)
    }
}

/// What the blocking half of a window hands back
struct WindowOutcome {
    engine: std::thread::Result<EngineOutcome>,
    report: Option<OverrideReport>,
}

/// Steps 3 to 6: activate, run the engine, release. Holds `gate` throughout.
async fn run_window(
    gate: OwnedMutexGuard<()>,
    dbg: DeterministicByteGenerator,
    request: KeyRequest,
    config: DeriverConfig,
    engine_factory: EngineFactory,
) -> Result<KeyMaterial, DerivationError> {
    let override_guard = ambient::activate(dbg, config.creation_timestamp)?;
    let activation = override_guard.id();

    let algorithm = request.algorithm;
    let strategy = config.fallback_strategy;

    // Gate and override move onto the blocking thread. Blocking tasks are
    // never cancelled, so the gate outlives this task and its runtime and
    // is only unlocked after the engine has returned and the override is gone.
    let engine_task = tokio::task::spawn_blocking(move || {
        let _gate = gate;
        let result = panic::catch_unwind(AssertUnwindSafe(|| -> EngineOutcome {
            let engine = engine_factory();
            with_forced_fallback(move |alg| alg == algorithm, strategy, || -> EngineOutcome {
                let pair = engine.generate_key_pair(&request)?;
                let fingerprint = engine.read_fingerprint(&pair.public_key)?;
                Ok((pair, fingerprint))
            })
        }));
        let report = override_guard.release();
        WindowOutcome {
            engine: result,
            report,
        }
    });

    let timeout = Duration::from_millis(config.timeout_ms);
    let outcome = match tokio::time::timeout(timeout, engine_task).await {
        Ok(joined) => {
            joined.map_err(|e| DerivationError::ExternalEngine(EngineError::Internal(e.to_string())))?
        }
        Err(_) => {
            // The abandoned engine sees OS entropy from here on
            ambient::deactivate_id(activation);
            tracing::warn!(
                "Key engine timed out after {} ms; gate stays locked until it exits",
                config.timeout_ms
            );
            return Err(DerivationError::Timeout {
                after_ms: config.timeout_ms,
            });
        }
    };

    // Exhaustion wins over whatever the engine made of the failed draw
    if let Some(fault) = outcome.report.and_then(|r| {
        tracing::debug!(
            "Deterministic stream: {} bytes consumed, {} unused",
            r.bytes_consumed,
            r.bytes_remaining
        );
        r.fault
    }) {
        return Err(fault.into());
    }

    let (pair, fingerprint) = match outcome.engine {
        Ok(result) => result?,
        Err(payload) => {
            return Err(DerivationError::ExternalEngine(EngineError::Internal(format!(
                "key engine panicked: {}",
                panic_message(payload.as_ref())
            ))))
        }
    };

    Ok(KeyMaterial {
        public_key: pair.public_key,
        private_key: pair.private_key,
        fingerprint,
        algorithm: pair.algorithm,
        created_at: pair.created_at,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown"
    }
}
