//! Key material handed back to callers

use crate::engine::Algorithm;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Result of one deterministic generation
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Armored public key block
    pub public_key: String,

    /// Armored private key block
    pub private_key: String,

    /// Uppercase hex fingerprint in 2-byte groups
    pub fingerprint: String,

    pub algorithm: Algorithm,

    /// Creation timestamp embedded in the key (Unix seconds)
    pub created_at: u64,
}

impl KeyMaterial {
    /// Detach into `(public_key, private_key, fingerprint)`
    pub fn into_parts(mut self) -> (String, String, String) {
        (
            std::mem::take(&mut self.public_key),
            std::mem::take(&mut self.private_key),
            std::mem::take(&mut self.fingerprint),
        )
    }

    /// Fingerprint without spaces
    pub fn fingerprint_compact(&self) -> String {
        self.fingerprint.split_whitespace().collect()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .field("private_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}
