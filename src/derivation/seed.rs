//! Seed derivation from a currency identifier and secret material

use super::DerivationError;
use crate::crypto::sha256;
use std::fmt;
use zeroize::Zeroize;

/// Domain tag prefixed to every seed hash input
pub const SEED_DOMAIN_TAG: &[u8] = b"gpg-deterministic-seed-v2";

const SEPARATOR: &[u8] = &[0x00];

/// 32-byte generation seed. Wiped on drop, never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Seed([u8; 32]);

impl Seed {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed(<redacted>)")
    }
}

impl Drop for Seed {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Hash `tag | 0x00 | currency | 0x00 | secret_hex` into a seed.
/// The currency only separates domains; the secret is taken as text.
pub fn derive_seed(currency: &str, secret_hex: &str) -> Seed {
    Seed(sha256(&[
        SEED_DOMAIN_TAG,
        SEPARATOR,
        currency.as_bytes(),
        SEPARATOR,
        secret_hex.as_bytes(),
    ]))
}

/// Reject secret material that is not a non-empty, even-length hex string
pub fn validate_secret_hex(secret_hex: &str) -> Result<(), DerivationError> {
    if secret_hex.is_empty() {
        return Err(DerivationError::InvalidSecret("secret material is empty".into()));
    }

    hex::decode(secret_hex)
        .map(|mut bytes| bytes.zeroize())
        .map_err(|e| DerivationError::InvalidSecret(e.to_string()))
}
