use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use dispatch_core::SessionId;

/// Per-session counter for the current window.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

/// Result of one admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the session's window resets. Set on rejection only.
    pub retry_after: Option<Duration>,
}

/// Fixed-window admission gate keyed by session.
///
/// The session map is a `DashMap`, so the read-modify-write for one session
/// happens under that key's shard lock and concurrent sessions do not
/// serialise on each other.
pub struct RateLimiter {
    entries: DashMap<SessionId, RateLimitEntry>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_requests: max_requests.max(1),
            window,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn admit(&self, session: &SessionId) -> Admission {
        self.admit_at(session, Instant::now())
    }

    pub fn admit_at(&self, session: &SessionId, now: Instant) -> Admission {
        let mut entry = self.entries.entry(session.clone()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if entry.count == 0 || now.saturating_duration_since(entry.window_start) >= self.window {
            entry.count = 1;
            entry.window_start = now;
            return Admission {
                allowed: true,
                remaining: self.max_requests - 1,
                retry_after: None,
            };
        }

        if entry.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(entry.window_start);
            return Admission {
                allowed: false,
                remaining: 0,
                retry_after: Some(self.window.saturating_sub(elapsed)),
            };
        }

        entry.count += 1;
        Admission {
            allowed: true,
            remaining: self.max_requests - entry.count,
            retry_after: None,
        }
    }

    /// Drop sessions idle for more than two windows. Returns how many were
    /// removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let stale_after = self.window.saturating_mul(2);
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.window_start) <= stale_after);
        before.saturating_sub(self.entries.len())
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn tracked_sessions(&self) -> usize {
        self.entries.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = self.tracked_sessions(), "rate limiter sweep");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn session(id: &str) -> SessionId {
        SessionId::from_raw(id)
    }

    #[test]
    fn first_call_opens_window() {
        let limiter = RateLimiter::new(20, HOUR);
        let a = limiter.admit_at(&session("s1"), Instant::now());
        assert!(a.allowed);
        assert_eq!(a.remaining, 19);
    }

    #[test]
    fn twenty_first_call_in_window_is_rejected() {
        let limiter = RateLimiter::new(20, HOUR);
        let start = Instant::now();
        for i in 0..20 {
            let a = limiter.admit_at(&session("s1"), start + Duration::from_secs(i));
            assert!(a.allowed, "call {} should be admitted", i + 1);
            assert_eq!(a.remaining, 19 - i as u32);
        }
        let rejected = limiter.admit_at(&session("s1"), start + Duration::from_secs(60));
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.retry_after, Some(HOUR - Duration::from_secs(60)));
    }

    #[test]
    fn window_elapse_resets_counter() {
        let limiter = RateLimiter::new(20, HOUR);
        let start = Instant::now();
        for _ in 0..20 {
            limiter.admit_at(&session("s1"), start);
        }
        assert!(!limiter.admit_at(&session("s1"), start + HOUR - Duration::from_secs(1)).allowed);

        let after = limiter.admit_at(&session("s1"), start + HOUR);
        assert!(after.allowed);
        assert_eq!(after.remaining, 19);
        assert_eq!(limiter.entries.get(&session("s1")).map(|e| e.count), Some(1));
    }

    #[test]
    fn rejection_does_not_consume_quota() {
        let limiter = RateLimiter::new(2, HOUR);
        let now = Instant::now();
        limiter.admit_at(&session("s1"), now);
        limiter.admit_at(&session("s1"), now);
        for _ in 0..5 {
            limiter.admit_at(&session("s1"), now);
        }
        assert_eq!(limiter.entries.get(&session("s1")).map(|e| e.count), Some(2));
    }

    #[test]
    fn sessions_are_independent() {
        let limiter = RateLimiter::new(1, HOUR);
        let now = Instant::now();
        assert!(limiter.admit_at(&session("a"), now).allowed);
        assert!(!limiter.admit_at(&session("a"), now).allowed);
        assert!(limiter.admit_at(&session("b"), now).allowed);
    }

    #[test]
    fn sweep_removes_entries_older_than_two_windows() {
        let limiter = RateLimiter::new(5, HOUR);
        let start = Instant::now();
        limiter.admit_at(&session("old"), start);
        limiter.admit_at(&session("recent"), start + HOUR);

        assert_eq!(limiter.sweep_at(start + HOUR * 2), 0);
        assert_eq!(limiter.sweep_at(start + HOUR * 2 + Duration::from_secs(1)), 1);
        assert_eq!(limiter.tracked_sessions(), 1);
        assert!(limiter.entries.contains_key(&session("recent")));
    }

    #[tokio::test]
    async fn concurrent_admissions_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(20, HOUR));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.admit(&session("shared")).allowed }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(10)));
        limiter.admit(&session("idle"));

        let cancel = CancellationToken::new();
        let handle = limiter.clone().spawn_sweeper(Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(limiter.tracked_sessions(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
