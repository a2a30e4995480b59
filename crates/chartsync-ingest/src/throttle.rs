//! Cooperative provider throttle
//!
//! After every `every` provider calls the caller sleeps for a fixed delay.
//! This keeps a run polite towards rate limits; it is not a hard limiter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct Throttle {
    every: u32,
    delay: Duration,
    calls: AtomicU32,
}

impl Throttle {
    pub fn new(every: u32, delay: Duration) -> Self {
        Self {
            every,
            delay,
            calls: AtomicU32::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Record one provider call, pausing when the call count hits the interval.
    pub async fn tick(&self) {
        let calls = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.every == 0 || self.delay.is_zero() || calls % self.every != 0 {
            return;
        }
        debug!(calls, delay_ms = self.delay.as_millis() as u64, "Throttling provider calls");
        tokio::time::sleep(self.delay).await;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_every_nth_call() {
        let throttle = Throttle::new(2, Duration::from_millis(500));
        let start = Instant::now();

        throttle.tick().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        throttle.tick().await;
        assert!(start.elapsed() >= Duration::from_millis(500));

        throttle.tick().await;
        throttle.tick().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert_eq!(throttle.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_sleeps() {
        let throttle = Throttle::disabled();
        let start = Instant::now();
        for _ in 0..10 {
            throttle.tick().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
