use ntex_util::time::Millis;
use rand::{rngs::ThreadRng, Rng};

use crate::config::BackoffConfig;

/// Exponential backoff with full jitter.
///
/// Every delay is picked uniformly from `0..=window`, the window starts at
/// base delay and doubles after each attempt until it reaches max delay.
#[derive(Debug)]
pub struct Backoff<R = ThreadRng> {
    cfg: BackoffConfig,
    window: u32,
    attempts: u32,
    rng: R,
}

impl Backoff<ThreadRng> {
    pub fn new(cfg: BackoffConfig) -> Self {
        Backoff::with_rng(cfg, rand::thread_rng())
    }
}

impl<R: Rng> Backoff<R> {
    pub fn with_rng(cfg: BackoffConfig, rng: R) -> Self {
        Backoff { window: cfg.base.0, attempts: 0, cfg, rng }
    }

    /// Delay before next attempt, `None` if attempts are exhausted
    pub fn next_backoff(&mut self) -> Option<Millis> {
        if self.cfg.max_attempts != 0 && self.attempts >= self.cfg.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = self.rng.gen_range(0..=self.window);
        self.window = if self.window <= self.cfg.max_delay.0 / 2 {
            self.window.saturating_mul(2)
        } else {
            self.cfg.max_delay.0
        };
        Some(Millis(delay))
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.window = self.cfg.base.0;
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;

    use super::*;

    #[test]
    fn test_attempts_exhausted() {
        let cfg = BackoffConfig::new().set_max_attempts(3);
        let mut backoff = Backoff::with_rng(cfg, StepRng::new(0, 0));

        assert_eq!(backoff.next_backoff(), Some(Millis(0)));
        assert_eq!(backoff.next_backoff(), Some(Millis(0)));
        assert_eq!(backoff.next_backoff(), Some(Millis(0)));
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.attempts(), 3);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_backoff().is_some());
    }

    #[test]
    fn test_window_capped() {
        let cfg = BackoffConfig::new()
            .set_base(Millis(500))
            .set_max_delay(Millis(5_000))
            .set_max_attempts(0);
        let mut backoff = Backoff::with_rng(cfg, StepRng::new(0, 0));

        let mut windows = Vec::new();
        for _ in 0..6 {
            windows.push(backoff.window);
            let delay = backoff.next_backoff().unwrap();
            assert!(delay.0 <= *windows.last().unwrap());
        }
        assert_eq!(windows, vec![500, 1_000, 2_000, 4_000, 5_000, 5_000]);
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_thread_rng() {
        let mut backoff = Backoff::new(BackoffConfig::new());
        for _ in 0..5 {
            assert!(backoff.next_backoff().unwrap().0 <= 5_000);
        }
        assert_eq!(backoff.next_backoff(), None);
    }
}
