//! Platform secure-random primitive

use crate::crypto::DbgError;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

/// Fill `dest` with secure random bytes.
///
/// Served by the active override's generator if one is installed,
/// otherwise by the operating system.
pub fn fill_random(dest: &mut [u8]) -> Result<(), DbgError> {
    match super::draw(dest) {
        Some(result) => result,
        None => {
            OsRng.fill_bytes(dest);
            Ok(())
        }
    }
}

/// Secure random bytes of length `len`
pub fn random_bytes(len: usize) -> Result<Vec<u8>, DbgError> {
    let mut bytes = vec![0u8; len];
    fill_random(&mut bytes)?;
    Ok(bytes)
}

/// `RngCore` handle over [`fill_random`], for code that expects an RNG.
///
/// `fill_bytes` panics when the deterministic buffer runs out; the fault
/// is recorded on the override before that, so callers can still tell
/// exhaustion apart from other failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientRng;

impl RngCore for AmbientRng {
    fn next_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.fill_bytes(&mut bytes);
        u32::from_le_bytes(bytes)
    }

    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.fill_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if let Err(e) = fill_random(dest) {
            panic!("ambient random source failed: {}", e);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        fill_random(dest).map_err(rand::Error::new)
    }
}

impl CryptoRng for AmbientRng {}
