use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::token_bucket::TokenBucket;

/// Buckets untouched for this many sweep intervals are evicted.
const IDLE_SWEEPS: u32 = 3;

/// Parameters for one request class.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Name used in log fields, e.g. "read" or "write".
    pub name: &'static str,
    /// Tokens per second.
    pub rate: f64,
    /// Maximum burst.
    pub capacity: f64,
    pub sweep_interval: Duration,
}

impl LimiterSettings {
    pub fn new(name: &'static str, rate: f64, capacity: f64) -> Self {
        Self {
            name,
            rate,
            capacity,
            sweep_interval: Duration::from_secs(60),
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Idle time after which a bucket is considered stale.
    pub fn max_idle(&self) -> Duration {
        self.sweep_interval * IDLE_SWEEPS
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Time until the next token, set only on denial.
    pub retry_after: Option<Duration>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }
}

/// Per-identity token bucket limiter.
///
/// Buckets live in a [`DashMap`], so a check only locks the shard holding
/// that identity. The eviction sweep goes through the same shard locks, which
/// means it never removes a bucket while a check on it is in progress.
///
/// Cheap to clone; all clones share state.
pub struct RateLimiter<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for RateLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C: Clock> {
    buckets: DashMap<String, TokenBucket>,
    settings: LimiterSettings,
    clock: C,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter<SystemClock> {
    pub fn new(settings: LimiterSettings) -> Self {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(settings: LimiterSettings, clock: C) -> Self {
        tracing::info!(
            limiter = settings.name,
            rate = settings.rate,
            capacity = settings.capacity,
            "creating token bucket rate limiter"
        );

        Self {
            inner: Arc::new(Inner {
                buckets: DashMap::new(),
                settings,
                clock,
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.inner.settings
    }

    /// Admit or deny one request from `identity`.
    pub fn allow(&self, identity: &str) -> bool {
        self.check(identity).allowed
    }

    /// Like [`allow`](Self::allow), but also reports when to retry.
    pub fn check(&self, identity: &str) -> Decision {
        let inner = &self.inner;

        if let Some(mut bucket) = inner.buckets.get_mut(identity) {
            return Self::acquire(&mut bucket, inner.clock.now());
        }

        match inner.buckets.entry(identity.to_string()) {
            Entry::Occupied(mut entry) => Self::acquire(entry.get_mut(), inner.clock.now()),
            Entry::Vacant(entry) => {
                let settings = &inner.settings;
                entry.insert(TokenBucket::first_seen(
                    settings.capacity,
                    settings.rate,
                    inner.clock.now(),
                ));
                Decision::allow()
            }
        }
    }

    fn acquire(bucket: &mut TokenBucket, now: std::time::Instant) -> Decision {
        if bucket.try_acquire(now) {
            Decision::allow()
        } else {
            Decision {
                allowed: false,
                retry_after: bucket.time_until_available(now),
            }
        }
    }

    /// Remove buckets idle for longer than three sweep intervals.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.inner.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.buckets.is_empty()
    }

    /// Spawn the periodic sweep on the current tokio runtime.
    ///
    /// The task only holds a weak reference, so it ends on its own once the
    /// last limiter handle is dropped. Calling this twice replaces the
    /// previous task.
    pub fn start_sweeper(&self) {
        let weak: Weak<Inner<C>> = Arc::downgrade(&self.inner);
        let interval = self.inner.settings.sweep_interval;
        let name = self.inner.settings.name;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.sweep();
            }

            tracing::debug!(limiter = name, "rate limiter sweeper stopped");
        });

        if let Ok(mut slot) = self.inner.sweeper.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop the background sweep. Buckets are kept.
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.inner.sweeper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
                tracing::debug!(limiter = self.inner.settings.name, "rate limiter sweeper aborted");
            }
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }
}

impl<C: Clock> Inner<C> {
    fn sweep(&self) -> usize {
        let max_idle = self.settings.max_idle();
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| {
            // Read the clock under the shard lock so a bucket refreshed just
            // before is never judged against an older instant.
            !bucket.is_idle(self.clock.now(), max_idle)
        });

        let removed = before.saturating_sub(self.buckets.len());
        tracing::debug!(
            limiter = self.settings.name,
            removed,
            remaining = self.buckets.len(),
            "token bucket sweep complete"
        );
        removed
    }
}

impl<C: Clock> Drop for Inner<C> {
    fn drop(&mut self) {
        if let Ok(slot) = self.sweeper.get_mut() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limiter(rate: f64, capacity: f64) -> (RateLimiter<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let settings = LimiterSettings::new("test", rate, capacity)
            .with_sweep_interval(Duration::from_secs(60));
        (RateLimiter::with_clock(settings, clock.clone()), clock)
    }

    #[test]
    fn test_admits_capacity_then_denies() {
        let (limiter, _clock) = limiter(10.0, 5.0);

        for i in 0..5 {
            assert!(limiter.allow("client"), "request {} should be admitted", i);
        }
        assert!(!limiter.allow("client"));
    }

    #[test]
    fn test_first_request_always_admitted() {
        let (limiter, _clock) = limiter(1.0, 1.0);
        assert!(limiter.allow("client"));
        assert!(!limiter.allow("client"));
    }

    #[test]
    fn test_refills_full_burst_after_capacity_over_rate() {
        let (limiter, clock) = limiter(10.0, 20.0);

        for _ in 0..20 {
            assert!(limiter.allow("client"));
        }
        assert!(!limiter.allow("client"));

        // capacity / rate = 2s
        clock.advance(Duration::from_secs(2));
        for _ in 0..20 {
            assert!(limiter.allow("client"));
        }
        assert!(!limiter.allow("client"));
    }

    #[test]
    fn test_refill_at_rate() {
        let (limiter, clock) = limiter(2.0, 2.0);
        assert!(limiter.allow("client"));
        assert!(limiter.allow("client"));
        assert!(!limiter.allow("client"));

        clock.advance(Duration::from_millis(500));
        assert!(limiter.allow("client"));
        assert!(!limiter.allow("client"));
    }

    #[test]
    fn test_denial_reports_retry_after() {
        let (limiter, _clock) = limiter(4.0, 1.0);
        assert!(limiter.check("client").allowed);

        let decision = limiter.check("client");
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_independent_identities() {
        let (limiter, _clock) = limiter(1.0, 2.0);

        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));

        assert!(limiter.allow("b"));
        assert!(limiter.allow("b"));
    }

    #[test]
    fn test_sweep_evicts_idle_buckets() {
        let (limiter, clock) = limiter(1.0, 3.0);
        limiter.allow("stale");
        limiter.allow("stale");
        limiter.allow("stale");
        assert!(!limiter.allow("stale"));

        clock.advance(Duration::from_secs(100));
        limiter.allow("active");

        clock.advance(Duration::from_secs(100));
        limiter.allow("active");

        // "stale" idle 200s > 180s, "active" just touched
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.len(), 1);

        // Treated as first seen again: full burst available.
        for _ in 0..3 {
            assert!(limiter.allow("stale"));
        }
        assert!(!limiter.allow("stale"));
    }

    #[test]
    fn test_sweep_keeps_recent_buckets() {
        let (limiter, clock) = limiter(1.0, 3.0);
        limiter.allow("client");
        clock.advance(Duration::from_secs(179));
        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_capacity() {
        let (limiter, _clock) = limiter(1.0, 50.0);
        let admitted = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        if limiter.allow("shared") {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_heavy_identity_does_not_starve_others() {
        let (limiter, _clock) = limiter(1.0, 5.0);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..10_000 {
                    limiter.allow("noisy");
                }
            });
            scope.spawn(|| {
                for i in 0..5 {
                    assert!(limiter.allow(&format!("quiet-{}", i)));
                }
            });
        });

        for i in 0..5 {
            assert!(limiter.allow(&format!("quiet-{}", i)));
        }
    }

    #[tokio::test]
    async fn test_background_sweeper_evicts() {
        let clock = ManualClock::new();
        let settings = LimiterSettings::new("test", 1.0, 1.0)
            .with_sweep_interval(Duration::from_millis(20));
        let limiter = RateLimiter::with_clock(settings, clock.clone());

        limiter.allow("client");
        limiter.start_sweeper();
        assert!(limiter.is_sweeping());

        clock.advance(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(limiter.is_empty());

        limiter.shutdown();
        assert!(!limiter.is_sweeping());
    }
}
