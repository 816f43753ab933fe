//! Injectable millisecond clock.

use parking_lot::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of timestamps for audit records and timestamped entities.
///
/// Reads the system clock unless a fixed time has been set. Tests pin the
/// clock with [`TimeProvider::set_time`] and move it with
/// [`TimeProvider::advance_time`].
#[derive(Debug, Default)]
pub struct TimeProvider {
    fixed: RwLock<Option<i64>>,
}

impl TimeProvider {
    /// Creates a provider backed by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider pinned at `millis`.
    #[must_use]
    pub fn fixed(millis: i64) -> Self {
        Self {
            fixed: RwLock::new(Some(millis)),
        }
    }

    /// Returns the current time in milliseconds since the Unix epoch.
    pub fn now(&self) -> i64 {
        if let Some(millis) = *self.fixed.read() {
            return millis;
        }
        system_millis()
    }

    /// Pins the clock at `millis`.
    pub fn set_time(&self, millis: i64) {
        *self.fixed.write() = Some(millis);
    }

    /// Moves the clock forward by `millis`, pinning it if it was not already.
    pub fn advance_time(&self, millis: i64) {
        let mut fixed = self.fixed.write();
        let current = fixed.unwrap_or_else(system_millis);
        *fixed = Some(current.saturating_add(millis));
    }

    /// Returns to the system clock.
    pub fn clear_time(&self) {
        *self.fixed.write() = None;
    }

    /// Returns true if the clock is pinned.
    pub fn is_fixed(&self) -> bool {
        self.fixed.read().is_some()
    }
}

fn system_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_time_is_returned() {
        let clock = TimeProvider::fixed(1_000);
        assert!(clock.is_fixed());
        assert_eq!(clock.now(), 1_000);
    }

    #[test]
    fn advance_moves_fixed_time() {
        let clock = TimeProvider::new();
        clock.set_time(5_000);
        clock.advance_time(250);
        assert_eq!(clock.now(), 5_250);
    }

    #[test]
    fn advance_pins_system_time() {
        let clock = TimeProvider::new();
        assert!(!clock.is_fixed());
        let before = clock.now();
        clock.advance_time(60_000);
        assert!(clock.is_fixed());
        assert!(clock.now() >= before + 60_000);
    }

    #[test]
    fn clear_returns_to_system_clock() {
        let clock = TimeProvider::fixed(1);
        clock.clear_time();
        assert!(!clock.is_fixed());
        assert!(clock.now() > 1);
    }
}
