// Copyright (c) James Kassemi, SC, US. All rights reserved.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{thread, time::Duration};

/// Jittered exponential backoff policy for short, bounded critical-section retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: usize,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_pct: f64,
    ) -> Self {
        let clamped_attempts = max_attempts.max(1);
        let clamped_base = base_delay_ms.max(1);
        let clamped_max_delay = max_delay_ms.max(clamped_base);
        let clamped_jitter = jitter_pct.clamp(0.0, 1.0);
        Self {
            max_attempts: clamped_attempts,
            base_delay_ms: clamped_base,
            max_delay_ms: clamped_max_delay,
            jitter_pct: clamped_jitter,
        }
    }

    /// Policy tuned for in-process lock and counter contention.
    pub fn default_contention() -> Self {
        Self::new(5, 2, 50, 0.25)
    }

    /// Single attempt, no sleeping. Useful in tests.
    pub fn no_retry() -> Self {
        Self::new(1, 1, 1, 0.0)
    }

    pub(crate) fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let mut delay = self.base_delay_ms.saturating_mul(exp);
        if delay > self.max_delay_ms {
            delay = self.max_delay_ms;
        }
        let jitter = if self.jitter_pct > 0.0 {
            let mut rng = rand::thread_rng();
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rng.gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(jitter)
    }

    /// Runs `op` until it succeeds or `max_attempts` is reached, sleeping between attempts.
    pub fn retry<F, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Result<T, E>,
    {
        self.retry_if(op, |_| true)
    }

    /// Like [`RetryPolicy::retry`], but errors rejected by `retryable` are returned immediately.
    pub fn retry_if<F, P, T, E>(&self, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut(usize) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !retryable(&err) {
                        return Err(err);
                    }
                    thread::sleep(self.next_delay(attempt - 1));
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_contention()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn new_clamps_input_parameters() {
        let policy = RetryPolicy::new(0, 0, 0, 2.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
        assert_eq!(policy.jitter_pct, 1.0);
    }

    #[test]
    fn next_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, 100, 500, 0.0);
        let delays: Vec<_> = (0..5).map(|attempt| policy.next_delay(attempt)).collect();
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(500)); // capped
        assert_eq!(delays[4], Duration::from_millis(500));
    }

    #[test]
    fn retry_runs_until_success() {
        let policy = RetryPolicy::new(3, 1, 1, 0.0);
        let attempts = Cell::new(0);
        let result: Result<&'static str, &str> = policy.retry(|attempt| {
            attempts.set(attempts.get() + 1);
            if attempt < 2 {
                Err("busy")
            } else {
                Ok("ok")
            }
        });
        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn retry_stops_after_max_attempts() {
        let policy = RetryPolicy::new(2, 1, 1, 0.0);
        let attempts = Cell::new(0);
        let result: Result<(), &str> = policy.retry(|_| {
            attempts.set(attempts.get() + 1);
            Err("nope")
        });
        assert_eq!(result, Err("nope"));
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn retry_if_returns_permanent_errors_immediately() {
        let policy = RetryPolicy::new(5, 1, 1, 0.0);
        let attempts = Cell::new(0);
        let result: Result<(), &str> = policy.retry_if(
            |_| {
                attempts.set(attempts.get() + 1);
                Err("out of range")
            },
            |err| *err == "busy",
        );
        assert_eq!(result, Err("out of range"));
        assert_eq!(attempts.get(), 1);
    }
}
