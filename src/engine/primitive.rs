//! Platform key-generation primitive and its interception
//!
//! The engine asks the installed [`NativeKeyGen`] for a key pair before
//! doing the work itself. The platform implementation draws from the OS
//! directly and so bypasses the ambient override. [`with_forced_fallback`]
//! swaps in an interceptor for the duration of a closure so that matching
//! algorithms are produced from the ambient source instead.

use super::{Algorithm, EngineError};
use crate::ambient::rng::fill_random;
use ed25519_dalek::SigningKey;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

static NATIVE: Lazy<RwLock<Arc<dyn NativeKeyGen>>> = Lazy::new(|| RwLock::new(Arc::new(PlatformKeyGen)));
static INTERCEPT: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Raw key pair as produced by a primitive
pub struct RawKeyPair {
    pub algorithm: Algorithm,
    pub public: [u8; 32],
    pub secret: Zeroizing<[u8; 32]>,
}

impl RawKeyPair {
    /// Import a raw 32-byte secret and derive its public half
    pub fn import(algorithm: Algorithm, secret: [u8; 32]) -> Self {
        let secret = Zeroizing::new(secret);
        let public = match algorithm {
            Algorithm::Ed25519 => SigningKey::from_bytes(&secret).verifying_key().to_bytes(),
            Algorithm::X25519 => PublicKey::from(&StaticSecret::from(*secret)).to_bytes(),
        };
        Self {
            algorithm,
            public,
            secret,
        }
    }
}

/// Accelerated "generate key pair" primitive
pub trait NativeKeyGen: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce a key pair, or `EngineError::NotSupported` to make the
    /// caller take its own path
    fn generate(&self, algorithm: Algorithm) -> Result<RawKeyPair, EngineError>;
}

/// Default primitive: OS entropy, never the ambient source
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformKeyGen;

impl NativeKeyGen for PlatformKeyGen {
    fn name(&self) -> &'static str {
        "platform"
    }

    fn generate(&self, algorithm: Algorithm) -> Result<RawKeyPair, EngineError> {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Ok(RawKeyPair::import(algorithm, secret))
    }
}

/// How intercepted algorithms are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FallbackStrategy {
    /// Draw the secret from the ambient source and import it
    #[default]
    SynthesizeFromAmbient,

    /// Report `NotSupported` so the engine falls back to its own
    /// ambient-reading path. Relies on that fallback existing.
    ForceUnsupported,
}

struct InterceptingKeyGen<P> {
    predicate: P,
    strategy: FallbackStrategy,
    original: Arc<dyn NativeKeyGen>,
}

impl<P> NativeKeyGen for InterceptingKeyGen<P>
where
    P: Fn(Algorithm) -> bool + Send + Sync,
{
    fn name(&self) -> &'static str {
        "intercepted"
    }

    fn generate(&self, algorithm: Algorithm) -> Result<RawKeyPair, EngineError> {
        if !(self.predicate)(algorithm) {
            return self.original.generate(algorithm);
        }

        match self.strategy {
            FallbackStrategy::SynthesizeFromAmbient => {
                let mut secret = [0u8; 32];
                fill_random(&mut secret).map_err(|e| EngineError::Randomness(e.to_string()))?;
                Ok(RawKeyPair::import(algorithm, secret))
            }
            FallbackStrategy::ForceUnsupported => Err(EngineError::NotSupported(format!(
                "{} primitive (intercepted)",
                algorithm
            ))),
        }
    }
}

/// The primitive currently installed
pub fn current() -> Arc<dyn NativeKeyGen> {
    NATIVE.read().clone()
}

/// Install `primitive`, returning the previous one
pub fn install(primitive: Arc<dyn NativeKeyGen>) -> Arc<dyn NativeKeyGen> {
    std::mem::replace(&mut *NATIVE.write(), primitive)
}

struct RestoreOnDrop(Option<Arc<dyn NativeKeyGen>>);

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        if let Some(original) = self.0.take() {
            install(original);
            tracing::debug!("Native key primitive restored");
        }
    }
}

/// Run `body` with the native primitive intercepted for algorithms
/// matching `predicate`. The original primitive is put back afterwards,
/// also when `body` panics.
///
/// Interceptions are serialized; calling this again from inside `body`
/// deadlocks.
pub fn with_forced_fallback<P, F, T>(predicate: P, strategy: FallbackStrategy, body: F) -> T
where
    P: Fn(Algorithm) -> bool + Send + Sync + 'static,
    F: FnOnce() -> T,
{
    let _serial = INTERCEPT.lock();

    if strategy == FallbackStrategy::ForceUnsupported {
        tracing::warn!("Forcing engine fallback via NotSupported; revalidate after engine upgrades");
    }

    let original = current();
    tracing::debug!("Intercepting native key primitive '{}'", original.name());

    let interceptor = InterceptingKeyGen {
        predicate,
        strategy,
        original: original.clone(),
    };
    let _restore = RestoreOnDrop(Some(install(Arc::new(interceptor))));

    body()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::{activate, blocking_lock_gate};
    use crate::crypto::DeterministicByteGenerator;

    #[test]
    fn test_platform_keys_are_random() {
        let a = PlatformKeyGen.generate(Algorithm::Ed25519).unwrap();
        let b = PlatformKeyGen.generate(Algorithm::Ed25519).unwrap();
        assert_ne!(a.public, b.public);
    }

    #[test]
    fn test_import_matches_dalek() {
        let raw = RawKeyPair::import(Algorithm::Ed25519, [3u8; 32]);
        let expected = SigningKey::from_bytes(&[3u8; 32]).verifying_key().to_bytes();
        assert_eq!(raw.public, expected);
    }

    #[test]
    fn test_forced_unsupported_only_for_matching() {
        let _gate = blocking_lock_gate();

        with_forced_fallback(
            |alg| alg == Algorithm::X25519,
            FallbackStrategy::ForceUnsupported,
            || {
                let primitive = current();
                assert_eq!(primitive.name(), "intercepted");
                assert!(matches!(
                    primitive.generate(Algorithm::X25519),
                    Err(EngineError::NotSupported(_))
                ));
                assert!(primitive.generate(Algorithm::Ed25519).is_ok());
            },
        );

        assert_eq!(current().name(), "platform");
    }

    #[test]
    fn test_synthesize_reads_ambient() {
        let _gate = blocking_lock_gate();

        let mut dbg = DeterministicByteGenerator::new(&[8u8; 32]).unwrap();
        dbg.pregenerate(32).unwrap();
        let mut reference = DeterministicByteGenerator::new(&[8u8; 32]).unwrap();
        reference.pregenerate(32).unwrap();
        let secret: [u8; 32] = reference.get_next_bytes(32).unwrap().try_into().unwrap();

        let guard = activate(dbg, 0).unwrap();
        let raw = with_forced_fallback(|_| true, FallbackStrategy::SynthesizeFromAmbient, || {
            current().generate(Algorithm::Ed25519)
        })
        .unwrap();
        drop(guard);

        assert_eq!(*raw.secret, secret);
    }

    #[test]
    fn test_restored_after_panic() {
        let _gate = blocking_lock_gate();

        let result = std::panic::catch_unwind(|| {
            with_forced_fallback(|_| true, FallbackStrategy::ForceUnsupported, || {
                panic!("engine blew up");
            })
        });

        assert!(result.is_err());
        assert_eq!(current().name(), "platform");
    }
}
