//! Platform "now" primitive

use chrono::{DateTime, Utc};

/// Current time, or the fixed timestamp while an override is active
pub fn now() -> DateTime<Utc> {
    match super::fixed_timestamp() {
        Some(ts) => DateTime::from_timestamp(ts as i64, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        None => Utc::now(),
    }
}

/// [`now`] as Unix seconds
pub fn unix_now() -> u64 {
    match super::fixed_timestamp() {
        Some(ts) => ts,
        None => Utc::now().timestamp().max(0) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::{activate, blocking_lock_gate};
    use crate::crypto::DeterministicByteGenerator;

    #[test]
    fn test_clock_frozen_while_active() {
        let _gate = blocking_lock_gate();

        let dbg = DeterministicByteGenerator::new(&[0u8; 32]).unwrap();
        let guard = activate(dbg, 1_600_000_000).unwrap();

        assert_eq!(now().timestamp(), 1_600_000_000);
        assert_eq!(unix_now(), 1_600_000_000);

        drop(guard);
        assert!(now().timestamp() > 1_600_000_000);
    }
}
