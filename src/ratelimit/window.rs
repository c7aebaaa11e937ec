//! Fixed window arithmetic and clocks.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

/// Length of one counting window in seconds.
pub const WINDOW_SECS: i64 = 60;

/// Length of one counting window.
pub const WINDOW: Duration = Duration::from_secs(WINDOW_SECS as u64);

/// Counter TTL. A counter must stay readable as the previous window one
/// period after its own window closes.
pub const COUNTER_TTL: Duration = Duration::from_secs(2 * WINDOW_SECS as u64);

/// Where an instant falls relative to the fixed window grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPosition {
    /// Unix seconds at which the current window started
    pub start: i64,
    /// Unix seconds at which the previous window started
    pub previous_start: i64,
    /// Fraction of the current window already elapsed, in `[0, 1)`
    pub elapsed_fraction: f64,
    /// Unix seconds at which the current window closes
    pub reset_at: i64,
    /// Seconds (fractional) remaining until `reset_at`
    pub until_reset: f64,
}

impl WindowPosition {
    /// Locate `now` on the window grid.
    pub fn at(now: DateTime<Utc>) -> Self {
        let now_ms = now.timestamp_millis();
        let window_ms = WINDOW_SECS * 1000;

        let start_ms = now_ms.div_euclid(window_ms) * window_ms;
        let elapsed_ms = now_ms - start_ms;
        let start = start_ms / 1000;
        let reset_at = start + WINDOW_SECS;

        Self {
            start,
            previous_start: start - WINDOW_SECS,
            elapsed_fraction: elapsed_ms as f64 / window_ms as f64,
            reset_at,
            until_reset: (window_ms - elapsed_ms) as f64 / 1000.0,
        }
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock fixed at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Create a clock fixed at the given unix time in milliseconds.
    pub fn at_millis(millis: i64) -> Self {
        let now = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(now)
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_millis(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn test_window_constants() {
        assert_eq!(WINDOW, Duration::from_secs(60));
        assert_eq!(COUNTER_TTL, Duration::from_secs(120));
    }

    #[test]
    fn test_position_on_boundary() {
        let pos = WindowPosition::at(at_millis(1_700_000_040_000));
        assert_eq!(pos.start, 1_700_000_040);
        assert_eq!(pos.previous_start, 1_699_999_980);
        assert_eq!(pos.elapsed_fraction, 0.0);
        assert_eq!(pos.reset_at, 1_700_000_100);
        assert_eq!(pos.until_reset, 60.0);
    }

    #[test]
    fn test_position_mid_window() {
        let pos = WindowPosition::at(at_millis(1_700_000_070_000));
        assert_eq!(pos.start, 1_700_000_040);
        assert!((pos.elapsed_fraction - 0.5).abs() < 1e-9);
        assert_eq!(pos.until_reset, 30.0);
    }

    #[test]
    fn test_position_just_before_rollover() {
        let pos = WindowPosition::at(at_millis(1_700_000_099_999));
        assert_eq!(pos.start, 1_700_000_040);
        assert!(pos.elapsed_fraction < 1.0);
        assert!(pos.elapsed_fraction > 0.9999);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at_millis(1_000);
        clock.advance(Duration::from_millis(2_500));
        assert_eq!(clock.now().timestamp_millis(), 3_500);

        clock.set(at_millis(10));
        assert_eq!(clock.now().timestamp_millis(), 10);
    }
}
