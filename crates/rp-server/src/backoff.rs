//! Exponential reconnect backoff with jitter.
//!
//! Used by the feed listener so a relay outage doesn't turn into a tight
//! reconnect loop and a log storm.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            failures: 0,
            jitter_ratio: 0.2,
        }
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.failures = 0;
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn fail(&mut self) -> Duration {
        let delay = add_jitter(self.current, self.jitter_ratio);
        self.failures = self.failures.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

fn add_jitter(delay: Duration, ratio: f64) -> Duration {
    if !(0.0..=1.0).contains(&ratio) {
        return delay;
    }

    let jitter_ms_max = ((delay.as_millis() as f64) * ratio) as u128;
    if jitter_ms_max == 0 {
        return delay;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u128)
        .unwrap_or(0);
    let jitter_ms = now_nanos % (jitter_ms_max + 1);
    delay + Duration::from_millis(jitter_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_waits_about_base() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        let delay = backoff.fail();
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(120));
        assert_eq!(backoff.failures(), 1);
    }

    #[test]
    fn delays_double_then_saturate() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(40));
        let delays: Vec<Duration> = (0..5).map(|_| backoff.fail()).collect();
        assert!(delays[1] >= Duration::from_millis(20));
        assert!(delays[2] >= Duration::from_millis(40));
        assert!(delays[4] <= Duration::from_millis(48));
    }

    #[test]
    fn reset_restores_base_delay() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(5));
        backoff.fail();
        backoff.fail();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert!(backoff.fail() <= Duration::from_millis(60));
    }
}
