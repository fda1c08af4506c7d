//! Time sources
//!
//! Nothing in the system schedules work. "Time passing" is a clock reading
//! compared against stored timestamps at call time.

use std::cell::Cell;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// A monotonically non-decreasing source of the current time.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time via `chrono`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // Pre-epoch system clocks read as zero.
        chrono::Utc::now().timestamp().max(0) as Timestamp
    }
}

/// A clock that only moves when told to. Used by tests and the simulator.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    /// Move forward by `secs`, saturating at `u64::MAX`.
    pub fn advance(&self, secs: u64) -> Timestamp {
        let next = self.now.get().saturating_add(secs);
        self.now.set(next);
        next
    }

    /// Jump to `ts` if it is not in the past. Returns the resulting time.
    pub fn advance_to(&self, ts: Timestamp) -> Timestamp {
        if ts > self.now.get() {
            self.now.set(ts);
        }
        self.now.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_700_000_000);
        assert_eq!(clock.now(), 1_700_000_000);

        clock.advance(30);
        assert_eq!(clock.now(), 1_700_000_030);
    }

    #[test]
    fn test_manual_clock_never_goes_back() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.advance_to(500), 1000);
        assert_eq!(clock.advance_to(2000), 2000);
        assert_eq!(clock.advance(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }
}
