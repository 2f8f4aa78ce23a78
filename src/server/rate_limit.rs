use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Rolling-window rate limiter for a single connection.
///
/// Tracks the timestamps of accepted hits; a hit is allowed while fewer than
/// `capacity` accepted hits fall inside the trailing window. Rejected hits
/// are not recorded, so a flooding client recovers as soon as it slows down.
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1) as usize,
            window,
            hits: VecDeque::new(),
        }
    }

    pub fn allow(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.hits.front() {
            if *oldest + self.window <= now {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() < self.capacity {
            self.hits.push_back(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundred_and_first_hit_in_a_second_is_rejected() {
        let mut limiter = RateLimiter::new(100, Duration::from_secs(1));
        let now = Instant::now();
        for _ in 0..100 {
            assert!(limiter.allow(now));
        }
        assert!(!limiter.allow(now));
    }

    #[test]
    fn window_rolls_forward() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();
        assert!(limiter.allow(start));
        assert!(limiter.allow(start + Duration::from_millis(500)));
        assert!(!limiter.allow(start + Duration::from_millis(900)));
        // the first hit has left the window
        assert!(limiter.allow(start + Duration::from_millis(1100)));
    }

    #[test]
    fn rejections_do_not_extend_the_penalty() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(1));
        let start = Instant::now();
        assert!(limiter.allow(start));
        for ms in [100u64, 200, 300] {
            assert!(!limiter.allow(start + Duration::from_millis(ms)));
        }
        assert!(limiter.allow(start + Duration::from_millis(1001)));
    }
}
