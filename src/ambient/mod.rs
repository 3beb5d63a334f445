//! Ambient Source Override
//!
//! Process-wide redirection of the secure-random and wall-clock primitives.
//! While an override is active, [`rng::fill_random`] is served from the
//! installed [`DeterministicByteGenerator`] and [`clock::now`] returns a fixed
//! timestamp. When inactive both fall through to the real platform sources.
//!
//! This is global mutable state. It exists only because the key engine
//! reads randomness and time ambiently instead of taking them as arguments,
//! so keep its use confined to one generation at a time: hold the
//! [`lock_gate`] guard for the whole window.

pub mod clock;
pub mod rng;

pub use rng::AmbientRng;

use crate::crypto::{DbgError, DeterministicByteGenerator};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverrideError {
    #[error("An ambient override is already active (activation #{0})")]
    AlreadyActive(u64),
}

/// State installed for one generation window
struct ActiveOverride {
    id: u64,
    dbg: DeterministicByteGenerator,
    fixed_timestamp: u64,
    fault: Option<DbgError>,
}

static AMBIENT: Lazy<Mutex<Option<ActiveOverride>>> = Lazy::new(|| Mutex::new(None));
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static GATE: Lazy<Arc<tokio::sync::Mutex<()>>> = Lazy::new(|| Arc::new(tokio::sync::Mutex::new(())));

/// What happened during an override window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideReport {
    /// Bytes drawn from the generator
    pub bytes_consumed: usize,

    /// Bytes left unused
    pub bytes_remaining: usize,

    /// First exhaustion fault hit while active, if any
    pub fault: Option<DbgError>,
}

/// Serializes every piece of code that activates an override (or needs
/// to observe the real sources). Async callers await it.
pub async fn lock_gate() -> OwnedMutexGuard<()> {
    GATE.clone().lock_owned().await
}

/// Blocking variant of [`lock_gate`]. Must not be called from async context.
pub fn blocking_lock_gate() -> OwnedMutexGuard<()> {
    GATE.clone().blocking_lock_owned()
}

/// Install `dbg` as the ambient random source and freeze the clock at
/// `fixed_timestamp` (Unix seconds). The override ends when the returned
/// guard is released or dropped.
pub fn activate(dbg: DeterministicByteGenerator, fixed_timestamp: u64) -> Result<OverrideGuard, OverrideError> {
    let mut state = AMBIENT.lock();
    if let Some(active) = state.as_ref() {
        return Err(OverrideError::AlreadyActive(active.id));
    }

    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(
        "Ambient override #{} active: {} bytes buffered, clock fixed at {}",
        id,
        dbg.remaining(),
        fixed_timestamp
    );

    *state = Some(ActiveOverride {
        id,
        dbg,
        fixed_timestamp,
        fault: None,
    });

    Ok(OverrideGuard { id, released: false })
}

/// Remove whatever override is installed. Idempotent.
pub fn deactivate() -> Option<OverrideReport> {
    let taken = AMBIENT.lock().take();
    taken.map(finish)
}

/// Whether an override is currently installed
pub fn is_active() -> bool {
    AMBIENT.lock().is_some()
}

/// Remove the override only if it is activation `id`. A guard or caller
/// holding a finished activation never touches a newer one.
pub fn deactivate_id(id: u64) -> Option<OverrideReport> {
    let taken = {
        let mut state = AMBIENT.lock();
        if state.as_ref().is_some_and(|active| active.id == id) {
            state.take()
        } else {
            None
        }
    };
    taken.map(finish)
}

fn finish(active: ActiveOverride) -> OverrideReport {
    let report = OverrideReport {
        bytes_consumed: active.dbg.consumed(),
        bytes_remaining: active.dbg.remaining(),
        fault: active.fault,
    };
    tracing::debug!(
        "Ambient override #{} released: {} bytes consumed",
        active.id,
        report.bytes_consumed
    );
    report
}

/// Draw from the active generator, `None` when no override is installed.
/// Exhaustion is recorded on the override and every later draw fails too.
fn draw(dest: &mut [u8]) -> Option<Result<(), DbgError>> {
    let mut state = AMBIENT.lock();
    let active = state.as_mut()?;

    if let Some(fault) = &active.fault {
        return Some(Err(fault.clone()));
    }

    let result = active.dbg.fill(dest);
    if let Err(e) = &result {
        tracing::warn!("Ambient override #{} exhausted: {}", active.id, e);
        active.fault = Some(e.clone());
    }
    Some(result)
}

fn fixed_timestamp() -> Option<u64> {
    AMBIENT.lock().as_ref().map(|active| active.fixed_timestamp)
}

/// Scoped ownership of one activation
#[derive(Debug)]
#[must_use = "the override ends as soon as the guard is dropped"]
pub struct OverrideGuard {
    id: u64,
    released: bool,
}

impl OverrideGuard {
    /// Activation number, unique per process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// End the override now and collect its report
    pub fn release(mut self) -> Option<OverrideReport> {
        self.released = true;
        deactivate_id(self.id)
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if !self.released {
            deactivate_id(self.id);
        }
    }
}
