//! Token-bucket admission control for page navigations
//!
//! The crawl runner asks the limiter how long to wait before a navigation
//! could be admitted, sleeps without holding any lock, then re-checks the
//! balance and takes a token. Separating the read-only wait projection from
//! the mutating take keeps that loop correct when several consumers share one
//! bucket and wake concurrently.

use std::time::Duration;
use tokio::time::Instant;

/// Smoothing factor for the observed-rate moving average
const RATE_EMA_ALPHA: f64 = 0.3;

/// A token-bucket rate limiter
///
/// Tokens refill continuously at `refill_rate` per second and are clamped to
/// `[0, capacity]`. The bucket starts empty: admission is earned by refill,
/// which paces navigations at the configured rate from the first page onward.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum token balance
    capacity: f64,

    /// Tokens added per second
    refill_rate: f64,

    /// Balance as of `last_refill`
    tokens: f64,

    /// When `tokens` was last brought up to date
    last_refill: Instant,

    /// Smoothed interval between takes, for reporting only
    avg_take_interval: Option<f64>,

    /// When a token was last taken
    last_take: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter with the given capacity and refill rate (tokens/second)
    ///
    /// The balance starts at zero.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        debug_assert!(capacity > 0.0 && refill_rate > 0.0);
        Self {
            capacity,
            refill_rate,
            tokens: 0.0,
            last_refill: Instant::now(),
            avg_take_interval: None,
            last_take: None,
        }
    }

    /// Creates a single-token bucket refilling at `ppm` pages per minute
    pub fn per_minute(ppm: f64) -> Self {
        Self::new(1.0, ppm / 60.0)
    }

    /// Projects the balance at `now` without mutating state
    fn balance_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate).min(self.capacity)
    }

    /// Returns how long the caller must wait before `n` tokens could be available
    ///
    /// Pure projection: repeated calls without an intervening `take_tokens`
    /// return the same value, modulo wall-clock refill.
    pub fn delay_for_tokens(&self, n: f64) -> Duration {
        let balance = self.balance_at(Instant::now());
        if balance >= n {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((n - balance) / self.refill_rate)
        }
    }

    /// Returns whether the current (post-refill) balance covers `n` tokens
    pub fn has_tokens(&self, n: f64) -> bool {
        self.balance_at(Instant::now()) >= n
    }

    /// Refills from elapsed time, then subtracts `n` tokens
    ///
    /// The balance is clamped at zero if it would go negative; callers are
    /// expected to have checked `has_tokens` first.
    pub fn take_tokens(&mut self, n: f64) {
        let now = Instant::now();
        self.tokens = self.balance_at(now);
        self.last_refill = now;

        if self.tokens < n {
            tracing::trace!(
                balance = self.tokens,
                requested = n,
                "token take exceeds balance, clamping to zero"
            );
        }
        self.tokens = (self.tokens - n).max(0.0);

        if let Some(last) = self.last_take {
            let interval = now.saturating_duration_since(last).as_secs_f64();
            self.avg_take_interval = Some(match self.avg_take_interval {
                Some(avg) => RATE_EMA_ALPHA * interval + (1.0 - RATE_EMA_ALPHA) * avg,
                None => interval,
            });
        }
        self.last_take = Some(now);
    }

    /// Returns the smoothed observed take rate (tokens/second), for reporting only
    ///
    /// Zero until two takes have happened.
    pub fn average_rate(&self) -> f64 {
        match self.avg_take_interval {
            Some(interval) if interval > 0.0 => 1.0 / interval,
            Some(_) => self.refill_rate,
            None => 0.0,
        }
    }

    /// Returns the configured refill rate (tokens/second)
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}
