//! Caps the presentation rate by sleeping out the remainder of a minimum
//! frame interval.

use core::time::Duration;
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct FrameRateThrottler {
    min_frame_time: Option<Duration>,
    interval_start: Option<Instant>,
}

impl FrameRateThrottler {
    /// `None` disables throttling.
    #[must_use]
    pub const fn new(min_frame_time: Option<Duration>) -> Self {
        Self {
            min_frame_time,
            interval_start: None,
        }
    }

    /// Mark the start of a frame interval, right after presentation.
    pub fn begin_interval(&mut self) {
        self.interval_start = Some(Instant::now());
    }

    /// End the interval before presenting, sleeping if it was shorter than
    /// the minimum frame time. Returns the time slept.
    pub fn end_interval(&mut self) -> Duration {
        let (Some(min_frame_time), Some(start)) = (self.min_frame_time, self.interval_start.take())
        else {
            return Duration::ZERO;
        };
        let remaining = min_frame_time.saturating_sub(start.elapsed());
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unthrottled_never_sleeps() {
        let mut throttler = FrameRateThrottler::new(None);
        throttler.begin_interval();
        assert_eq!(throttler.end_interval(), Duration::ZERO);
    }

    #[test]
    fn short_intervals_are_padded() {
        let mut throttler = FrameRateThrottler::new(Some(Duration::from_millis(20)));
        // No interval has begun yet.
        assert_eq!(throttler.end_interval(), Duration::ZERO);
        throttler.begin_interval();
        let start = Instant::now();
        let slept = throttler.end_interval();
        assert!(slept > Duration::ZERO);
        assert!(start.elapsed() >= slept);
    }
}
