//! Progress sampling policy for the real-time channel.
//!
//! The engine can emit a progress message for every sampler step. The
//! throttle keeps only samples that moved by at least one percentage point
//! and arrived at least 200 ms after the previously accepted one.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Minimum change, in percentage points, for a sample to be accepted.
pub const MIN_PERCENT_DELTA: u8 = 1;

/// Minimum wall-clock gap between two accepted samples.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Completion percentage of the running job (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ProgressSample {
    pub percent: u8,
}

/// Convert a `value / max` step counter into a rounded percentage.
///
/// Returns `None` for payloads that cannot describe progress (non-positive
/// or non-finite `max`, non-finite `value`). Out-of-range ratios are clamped.
pub fn percent_from_steps(value: f64, max: f64) -> Option<u8> {
    if !value.is_finite() || !max.is_finite() || max <= 0.0 {
        return None;
    }
    let percent = (value / max * 100.0).round().clamp(0.0, 100.0);
    Some(percent as u8)
}

/// Explicit sampling state; updated only when a sample is accepted.
#[derive(Debug, Clone, Default)]
pub struct ProgressThrottle {
    last_accepted_percent: u8,
    last_accepted_at: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a sample observed at `now`; returns it if accepted.
    pub fn offer(&mut self, percent: u8, now: Instant) -> Option<ProgressSample> {
        if percent.abs_diff(self.last_accepted_percent) < MIN_PERCENT_DELTA {
            return None;
        }
        if let Some(last) = self.last_accepted_at {
            if now.saturating_duration_since(last) < MIN_SAMPLE_INTERVAL {
                return None;
            }
        }

        self.last_accepted_percent = percent;
        self.last_accepted_at = Some(now);
        Some(ProgressSample { percent })
    }

    pub fn last_accepted_percent(&self) -> u8 {
        self.last_accepted_percent
    }

    /// Forget all accepted samples.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_to_nearest() {
        assert_eq!(percent_from_steps(1.0, 3.0), Some(33));
        assert_eq!(percent_from_steps(2.0, 3.0), Some(67));
        assert_eq!(percent_from_steps(20.0, 20.0), Some(100));
    }

    #[test]
    fn malformed_step_counts_are_rejected() {
        assert_eq!(percent_from_steps(1.0, 0.0), None);
        assert_eq!(percent_from_steps(1.0, -4.0), None);
        assert_eq!(percent_from_steps(f64::NAN, 10.0), None);
    }

    #[test]
    fn overshoot_is_clamped() {
        assert_eq!(percent_from_steps(30.0, 20.0), Some(100));
        assert_eq!(percent_from_steps(-1.0, 20.0), Some(0));
    }

    #[test]
    fn first_nonzero_sample_is_accepted_immediately() {
        let mut throttle = ProgressThrottle::new();
        let now = Instant::now();
        assert_eq!(throttle.offer(5, now), Some(ProgressSample { percent: 5 }));
    }

    #[test]
    fn zero_is_dropped_as_unchanged() {
        let mut throttle = ProgressThrottle::new();
        assert_eq!(throttle.offer(0, Instant::now()), None);
    }

    #[test]
    fn samples_inside_window_are_dropped() {
        let mut throttle = ProgressThrottle::new();
        let t0 = Instant::now();
        assert!(throttle.offer(10, t0).is_some());
        assert!(throttle.offer(20, t0 + Duration::from_millis(199)).is_none());
        // Dropped samples do not move the window.
        assert!(throttle.offer(30, t0 + Duration::from_millis(200)).is_some());
        assert_eq!(throttle.last_accepted_percent(), 30);
    }

    #[test]
    fn unchanged_percent_is_dropped_even_after_window() {
        let mut throttle = ProgressThrottle::new();
        let t0 = Instant::now();
        throttle.offer(40, t0);
        assert!(throttle.offer(40, t0 + Duration::from_secs(5)).is_none());
        assert!(throttle.offer(41, t0 + Duration::from_secs(5)).is_some());
    }

    #[test]
    fn accepted_sequence_respects_both_rules() {
        let mut throttle = ProgressThrottle::new();
        let t0 = Instant::now();
        let mut accepted: Vec<(u8, Instant)> = Vec::new();

        for step in 0..=100u64 {
            let at = t0 + Duration::from_millis(step * 37);
            if let Some(sample) = throttle.offer(step as u8, at) {
                accepted.push((sample.percent, at));
            }
        }

        assert!(!accepted.is_empty());
        for pair in accepted.windows(2) {
            let (p0, t0) = pair[0];
            let (p1, t1) = pair[1];
            assert!(p1 >= p0 + MIN_PERCENT_DELTA);
            assert!(t1 - t0 >= MIN_SAMPLE_INTERVAL);
        }
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut throttle = ProgressThrottle::new();
        throttle.offer(50, Instant::now());
        throttle.reset();
        assert_eq!(throttle.last_accepted_percent(), 0);
        assert!(throttle.offer(1, Instant::now()).is_some());
    }
}
