//! Clock abstraction.
//!
//! The allocator numbers cases by the calendar year of the moment it runs,
//! not by the date written on the case, so the clock is injected and tests
//! can move it across a year boundary.

use crate::Timestamp;
use chrono::{Datelike, Local};
use std::sync::Mutex;

/// Source of local wall-clock time.
pub trait WallClock: Send + Sync {
    fn now(&self) -> Timestamp;

    fn current_year(&self) -> i32 {
        self.now().year()
    }
}

/// Production clock using the host's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> Timestamp {
        Local::now().naive_local()
    }
}

/// Settable clock for deterministic tests.
#[derive(Debug)]
pub struct FixedClock(Mutex<Timestamp>);

impl FixedClock {
    pub fn new(at: Timestamp) -> Self {
        Self(Mutex::new(at))
    }

    /// Midday on January 1st of `year`.
    pub fn at_year(year: i32) -> Self {
        Self::new(start_of_year(year))
    }

    pub fn set(&self, at: Timestamp) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = at;
    }

    pub fn set_year(&self, year: i32) {
        self.set(start_of_year(year));
    }
}

impl WallClock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn start_of_year(year: i32) -> Timestamp {
    chrono::NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_moves_across_years() {
        let clock = FixedClock::at_year(2025);
        assert_eq!(clock.current_year(), 2025);
        clock.set_year(2026);
        assert_eq!(clock.current_year(), 2026);
    }

    #[test]
    fn test_system_clock_year_is_plausible() {
        assert!(SystemClock.current_year() >= 2024);
    }
}
