use std::time::{Duration, Instant};

/// Admission state for a single client identity.
///
/// `tokens` stays within `0..=capacity`. Refill is lazy: every access adds
/// `elapsed * refill_rate` tokens, capped at capacity.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
        }
    }

    /// Bucket for an identity seen for the first time, with the token for
    /// that first request already spent.
    pub fn first_seen(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        let mut bucket = Self::new(capacity, refill_rate, now);
        bucket.tokens = (capacity - 1.0).max(0.0);
        bucket
    }

    /// Refill, then spend one token if one is available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// True once the bucket has not been touched for longer than `max_idle`.
    pub fn is_idle(&self, now: Instant, max_idle: Duration) -> bool {
        now.saturating_duration_since(self.last_refill) > max_idle
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let tokens_to_add = self.refill_rate * elapsed.as_secs_f64();

        self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
        // A racing caller may have refilled with a later instant already.
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// How long until one token is available, `None` if one is available now.
    pub fn time_until_available(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);

        if self.tokens >= 1.0 {
            return None;
        }

        if self.refill_rate <= 0.0 {
            return Some(Duration::MAX);
        }

        let tokens_needed = 1.0 - self.tokens;
        Some(Duration::from_secs_f64(tokens_needed / self.refill_rate))
    }
}

#[cfg(test)]
impl TokenBucket {
    fn available_tokens(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens.floor() as u32
    }
}
