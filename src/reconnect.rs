use rand::Rng;
use std::time::Duration;

use crate::config::WatchConfig;

/// Linear backoff: attempt n waits `base_delay × n`, up to `max_attempts`.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_attempts: u32,
    pub jitter_factor: f64,
    attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(1000, 5)
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_attempts,
            jitter_factor: 0.0,
            attempts: 0,
        }
    }

    pub fn from_config(cfg: &WatchConfig) -> Self {
        Self {
            jitter_factor: cfg.reconnect_jitter.clamp(0.0, 1.0),
            ..Self::new(cfg.reconnect_base_ms, cfg.reconnect_max_attempts)
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay before attempt `n` (1-based), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(attempt as u64))
    }

    /// Called after an unintentional close. Returns the wait before the next
    /// attempt, or `None` once the cap is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }
        self.attempts += 1;
        let base = self.delay_for_attempt(self.attempts);
        if self.jitter_factor <= 0.0 {
            return Some(base);
        }
        let ms = base.as_millis() as f64;
        let jitter_range = ms * self.jitter_factor;
        let jitter: f64 = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Some(Duration::from_millis((ms + jitter).max(0.0) as u64))
    }

    /// Successful open, or an explicit re-subscription.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_schedule_and_cap() {
        let mut policy = ReconnectPolicy::new(1000, 5);
        let delays: Vec<u128> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 3000, 4000, 5000]);
        assert!(policy.exhausted());
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn test_reset_rearms_policy() {
        let mut policy = ReconnectPolicy::new(100, 2);
        policy.next_delay();
        policy.next_delay();
        assert!(policy.next_delay().is_none());
        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut policy = ReconnectPolicy {
            jitter_factor: 0.5,
            ..ReconnectPolicy::new(1000, 3)
        };
        for attempt in 1..=3u64 {
            let d = policy.next_delay().unwrap().as_millis() as u64;
            assert!(d >= 500 * attempt && d <= 1500 * attempt, "attempt {} got {}", attempt, d);
        }
    }

    #[test]
    fn test_from_config_clamps_jitter() {
        let cfg = WatchConfig {
            reconnect_jitter: 4.0,
            reconnect_base_ms: 250,
            reconnect_max_attempts: 1,
            ..WatchConfig::default()
        };
        let policy = ReconnectPolicy::from_config(&cfg);
        assert_eq!(policy.jitter_factor, 1.0);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
    }
}
