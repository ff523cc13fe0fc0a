//! Windowed frame-rate estimation

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;

/// Timestamps kept for the estimate.
const WINDOW_SIZE: usize = 60;

/// Delivered frame rate over a sliding window of arrival timestamps.
///
/// The window is the one core structure behind a conventional mutex: the
/// capture thread writes and any thread may read, so there is no SPSC
/// contract to lean on. The lock is held only for O(1) buffer operations.
pub struct FrameRateTracker {
    window: Mutex<VecDeque<f64>>,
    origin: Instant,
}

impl FrameRateTracker {
    pub fn new() -> Self {
        FrameRateTracker {
            window: Mutex::new(VecDeque::with_capacity(WINDOW_SIZE)),
            origin: Instant::now(),
        }
    }

    /// Record an arrival at the current time.
    pub fn record(&self) {
        self.record_at(self.origin.elapsed().as_secs_f64());
    }

    /// Record an arrival at an explicit timestamp in seconds. Timestamps
    /// are expected to be monotonically non-decreasing.
    pub fn record_at(&self, timestamp: f64) {
        let mut window = self.window.lock();
        if window.len() == WINDOW_SIZE {
            window.pop_front();
        }
        window.push_back(timestamp);
    }

    /// Estimated frames per second: `(samples - 1) / (newest - oldest)`,
    /// or 0.0 with fewer than two samples.
    pub fn rate(&self) -> f32 {
        let window = self.window.lock();
        if window.len() < 2 {
            return 0.0;
        }
        // non-empty by the check above
        let oldest = window.front().copied().unwrap_or(0.0);
        let newest = window.back().copied().unwrap_or(0.0);
        let elapsed = newest - oldest;
        if elapsed <= 0.0 {
            return 0.0;
        }
        ((window.len() - 1) as f64 / elapsed) as f32
    }
}

impl Default for FrameRateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_samples_is_zero() {
        let tracker = FrameRateTracker::new();
        assert_eq!(tracker.rate(), 0.0);
    }

    #[test]
    fn test_single_sample_is_zero() {
        let tracker = FrameRateTracker::new();
        tracker.record_at(0.5);
        assert_eq!(tracker.rate(), 0.0);
    }

    #[test]
    fn test_two_samples_one_second_apart() {
        let tracker = FrameRateTracker::new();
        tracker.record_at(0.0);
        tracker.record_at(1.0);
        assert!((tracker.rate() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sixty_samples_at_thirty_fps() {
        let tracker = FrameRateTracker::new();
        for i in 0..60 {
            tracker.record_at(i as f64 / 30.0);
        }
        assert!((tracker.rate() - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let tracker = FrameRateTracker::new();
        // a slow stretch that the window must forget
        tracker.record_at(0.0);
        // followed by well over a window of samples at 10 fps
        for i in 0..70 {
            tracker.record_at(100.0 + i as f64 / 10.0);
        }
        // only the 10 fps samples remain
        assert!((tracker.rate() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_identical_timestamps_do_not_divide_by_zero() {
        let tracker = FrameRateTracker::new();
        tracker.record_at(2.0);
        tracker.record_at(2.0);
        assert_eq!(tracker.rate(), 0.0);
    }
}
