//! Built-in Curve25519 engine

use super::armor::{self, BlockKind, KeyPacket};
use super::primitive::{self, RawKeyPair};
use super::{Algorithm, EngineError, GeneratedKeyPair, KeyEngine, KeyRequest};
use crate::ambient::{clock, AmbientRng};
use ed25519_dalek::SigningKey;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

/// Curve25519 key engine.
///
/// Tries the installed native primitive first; when it answers
/// `NotSupported`, generates from [`AmbientRng`] instead.
#[derive(Debug, Default)]
pub struct BundledEngine {
    _private: (),
}

impl BundledEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_raw(&self, algorithm: Algorithm) -> Result<RawKeyPair, EngineError> {
        let native = primitive::current();
        match native.generate(algorithm) {
            Err(EngineError::NotSupported(reason)) => {
                tracing::debug!("Native primitive declined ({}), using ambient path", reason);
                Ok(Self::generate_from_ambient(algorithm))
            }
            other => other,
        }
    }

    /// Randomness-parameterized path fed by the ambient source
    fn generate_from_ambient(algorithm: Algorithm) -> RawKeyPair {
        match algorithm {
            Algorithm::Ed25519 => {
                let signing_key = SigningKey::generate(&mut AmbientRng);
                RawKeyPair {
                    algorithm,
                    public: signing_key.verifying_key().to_bytes(),
                    secret: Zeroizing::new(signing_key.to_bytes()),
                }
            }
            Algorithm::X25519 => {
                let secret = StaticSecret::random_from_rng(AmbientRng);
                RawKeyPair {
                    algorithm,
                    public: x25519_dalek::PublicKey::from(&secret).to_bytes(),
                    secret: Zeroizing::new(secret.to_bytes()),
                }
            }
        }
    }
}

impl KeyEngine for BundledEngine {
    fn generate_key_pair(&self, request: &KeyRequest) -> Result<GeneratedKeyPair, EngineError> {
        let created_at = request.creation_time.unwrap_or_else(clock::unix_now);
        let created = u32::try_from(created_at)
            .map_err(|_| EngineError::Malformed(format!("creation time {} out of range", created_at)))?;

        let raw = self.generate_raw(request.algorithm)?;

        let packet = KeyPacket {
            algorithm: raw.algorithm,
            created_at: created,
            public: raw.public.to_vec(),
            label: request.identity_label.clone(),
            secret: Some(Zeroizing::new(raw.secret.to_vec())),
        };

        let public_key = armor::armor(BlockKind::PublicKey, &packet.encode_public()?);
        let private_key = armor::armor(BlockKind::PrivateKey, &packet.encode_private()?);

        Ok(GeneratedKeyPair {
            public_key,
            private_key,
            algorithm: raw.algorithm,
            created_at,
        })
    }

    fn read_fingerprint(&self, public_key: &str) -> Result<String, EngineError> {
        let body = armor::dearmor(BlockKind::PublicKey, public_key)?;
        KeyPacket::decode(&body, false)?.fingerprint()
    }
}
