//! Time utilities for the client simulation

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Default frame rate of the host redraw callback
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Duration of one simulation frame at `frame_rate` frames per second
pub fn frame_duration(frame_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / frame_rate.max(1) as u64)
}

/// Match-local clock in milliseconds.
///
/// Built on the tokio clock so paused-time tests drive cooldowns and
/// watchdogs without sleeping.
#[derive(Debug, Clone, Copy)]
pub struct MatchClock {
    start: Instant,
}

impl MatchClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for MatchClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        assert_eq!(frame_duration(60), Duration::from_micros(16_666));
        assert_eq!(frame_duration(0), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_clock_follows_tokio_time() {
        let clock = MatchClock::new();
        assert_eq!(clock.now_ms(), 0);
        tokio::time::advance(Duration::from_millis(1250)).await;
        assert_eq!(clock.now_ms(), 1250);
    }
}
