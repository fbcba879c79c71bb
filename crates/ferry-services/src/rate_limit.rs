//! Rate limiting: a fixed one-second window shared by every writer.
//!
//! Each write asks for a byte budget with `acquire(wanted)` and is granted
//! at most what is left in the current window. Once the window is spent,
//! callers sleep until it resets. All clones of a `RateLimiter` draw from
//! the same window, so the cap applies to the aggregate of every chunk of
//! every transfer sharing it.
//!
//! A limit of 0 disables throttling.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Window {
    limit: u64,
    started: Instant,
    used: u64,
}

/// Budget granted out of one specific window.
#[derive(Debug, Clone, Copy)]
struct Grant {
    bytes: usize,
    window: Instant,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Arc<Mutex<Window>>,
}

impl RateLimiter {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            window: Arc::new(Mutex::new(Window {
                limit: bytes_per_sec,
                started: Instant::now(),
                used: 0,
            })),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Overwrite the ceiling. Takes effect for the next `acquire` call.
    pub fn set_limit(&self, bytes_per_sec: u64) {
        self.lock().limit = bytes_per_sec;
        tracing::debug!(bytes_per_sec, "rate limit updated");
    }

    pub fn limit(&self) -> u64 {
        self.lock().limit
    }

    /// Ask for up to `wanted` bytes of budget. Returns how many bytes the
    /// caller may write now (at least 1 when `wanted > 0`), waiting for the
    /// next window if the current one is spent.
    pub async fn acquire(&self, wanted: usize) -> usize {
        self.take(wanted).await.bytes
    }

    async fn take(&self, wanted: usize) -> Grant {
        loop {
            let resume_at = {
                let mut w = self.lock();
                let now = Instant::now();
                if now.duration_since(w.started) >= WINDOW {
                    w.started = now;
                    w.used = 0;
                }
                if w.limit == 0 || wanted == 0 {
                    return Grant {
                        bytes: wanted,
                        window: w.started,
                    };
                }
                let remaining = w.limit.saturating_sub(w.used);
                if remaining > 0 {
                    let grant = remaining.min(wanted as u64);
                    w.used += grant;
                    return Grant {
                        bytes: grant as usize,
                        window: w.started,
                    };
                }
                w.started + WINDOW
            };
            tracing::trace!("rate limit window spent, waiting");
            tokio::time::sleep_until(resume_at).await;
        }
    }

    /// Hand back unused budget. Ignored once the window it came from has
    /// been replaced.
    fn refund(&self, window: Instant, bytes: u64) {
        let mut w = self.lock();
        if w.started == window {
            w.used = w.used.saturating_sub(bytes);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Acquire from every limiter in turn; the grant is the smallest budget
/// any of them allows. Limiters that granted more than that get the
/// difference back, so a narrow limiter never drains a wider shared one.
///
/// Put the narrowest limiter first: budget taken from earlier limiters is
/// held while later ones wait for their window.
pub async fn acquire_all(limiters: &[&RateLimiter], wanted: usize) -> usize {
    let mut taken = Vec::with_capacity(limiters.len());
    let mut grant = wanted;
    for limiter in limiters {
        let g = limiter.take(grant).await;
        grant = g.bytes;
        taken.push((*limiter, g));
    }
    for (limiter, g) in taken {
        if g.bytes > grant {
            limiter.refund(g.window, (g.bytes - grant) as u64);
        }
    }
    grant
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn get_returns_what_was_set() {
        let limiter = RateLimiter::unlimited();
        assert_eq!(limiter.limit(), 0);
        limiter.set_limit(2048);
        assert_eq!(limiter.limit(), 2048);
        assert_eq!(limiter.clone().limit(), 2048);
    }

    #[tokio::test]
    async fn unlimited_grants_everything() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..100 {
            assert_eq!(limiter.acquire(1 << 20).await, 1 << 20);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn grant_is_capped_by_window_budget() {
        let limiter = RateLimiter::new(2048);
        let start = Instant::now();

        assert_eq!(limiter.acquire(5000).await, 2048);
        // Window spent: the next grant only arrives after the reset.
        assert_eq!(limiter.acquire(10).await, 10);
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn lowering_limit_mid_window_never_goes_negative() {
        let limiter = RateLimiter::new(1000);
        assert_eq!(limiter.acquire(800).await, 800);
        limiter.set_limit(500);

        let start = Instant::now();
        assert_eq!(limiter.acquire(100).await, 100);
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn aggregate_throughput_of_concurrent_writers_is_capped() {
        const LIMIT: u64 = 2048;
        const PER_WRITER: usize = 4096;
        const WRITERS: usize = 4;

        let limiter = RateLimiter::new(LIMIT);
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..WRITERS {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let mut grants = Vec::new();
                let mut left = PER_WRITER;
                while left > 0 {
                    let got = limiter.acquire(left.min(1000)).await;
                    grants.push((start.elapsed(), got as u64));
                    left -= got;
                }
                grants
            }));
        }

        let mut per_window: BTreeMap<u64, u64> = BTreeMap::new();
        for handle in handles {
            for (at, bytes) in handle.await.unwrap() {
                *per_window.entry(at.as_secs()).or_default() += bytes;
            }
        }

        let total: u64 = per_window.values().sum();
        assert_eq!(total, (PER_WRITER * WRITERS) as u64);
        for (second, bytes) in &per_window {
            assert!(*bytes <= LIMIT, "window {second} carried {bytes} bytes");
        }
        // 16 KiB at 2 KiB/s needs eight windows: t = 0..=7.
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_all_takes_the_tightest_budget() {
        let engine_wide = RateLimiter::new(10_000);
        let per_transfer = RateLimiter::new(100);
        assert_eq!(acquire_all(&[&per_transfer, &engine_wide], 4096).await, 100);
        assert_eq!(acquire_all(&[], 4096).await, 4096);
    }

    #[tokio::test(start_paused = true)]
    async fn narrow_limiter_does_not_drain_shared_budget() {
        let engine_wide = RateLimiter::new(10_000);
        let per_transfer = RateLimiter::new(100);

        // Wide limiter first: it grants 4096, then gets 3996 back.
        assert_eq!(acquire_all(&[&engine_wide, &per_transfer], 4096).await, 100);
        assert_eq!(engine_wide.acquire(10_000).await, 9_900);

        let engine_wide = RateLimiter::new(10_000);
        let per_transfer = RateLimiter::new(100);
        assert_eq!(acquire_all(&[&per_transfer, &engine_wide], 4096).await, 100);
        assert_eq!(engine_wide.acquire(10_000).await, 9_900);
    }

    #[tokio::test(start_paused = true)]
    async fn refund_from_an_old_window_is_dropped() {
        let limiter = RateLimiter::new(1000);
        let old = limiter.take(600).await;
        assert_eq!(old.bytes, 600);

        tokio::time::advance(WINDOW).await;
        assert_eq!(limiter.acquire(900).await, 900);
        limiter.refund(old.window, 600);
        // Only 100 left in the new window; the stale refund did not add any.
        assert_eq!(limiter.acquire(1000).await, 100);
    }
}
