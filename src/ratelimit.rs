//! Per-IP fixed-window rate limiting for the beacon endpoint
//!
//! The limiter is constructor-injected into the track handler and owns no
//! background thread of its own; `main` spawns a periodic sweep the same way
//! it runs other maintenance. Time is injected so tests can move the window
//! by hand.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Source of the current time in whole seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: u64,
    count: u32,
}

/// Fixed-window counter per client IP.
///
/// A window admits up to `limit` events; excess is reported as not allowed
/// and the caller drops silently. Expired windows are swept when the map
/// grows past `max_tracked` and by the periodic [`sweep`](Self::sweep).
pub struct FixedWindowLimiter {
    windows: DashMap<IpAddr, Window>,
    limit: u32,
    window_secs: u64,
    max_tracked: usize,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window_secs: u64, max_tracked: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window_secs: window_secs.max(1),
            max_tracked,
            clock,
        }
    }

    /// Record one event for `ip` and report whether it is within the limit.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let now = self.clock.now_secs();
        let start = now - now % self.window_secs;

        if !self.windows.contains_key(&ip) && self.windows.len() >= self.max_tracked {
            self.sweep_expired(now);
            if self.windows.len() >= self.max_tracked {
                // Saturated with live windows. Denying here would let a
                // flood starve legitimate clients of their budget, so
                // untracked IPs pass through until the sweep frees room.
                return true;
            }
        }

        let mut entry = self.windows.entry(ip).or_insert(Window { start, count: 0 });
        if entry.start != start {
            *entry = Window { start, count: 0 };
        }
        if entry.count >= self.limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drop windows that ended before the current one. Called periodically
    /// from the maintenance task.
    pub fn sweep(&self) {
        self.sweep_expired(self.clock.now_secs());
    }

    fn sweep_expired(&self, now: u64) {
        let start = now - now % self.window_secs;
        self.windows.retain(|_, w| w.start == start);
    }

    pub fn tracked_ips(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn new(secs: u64) -> Arc<Self> {
            Arc::new(Self(AtomicU64::new(secs)))
        }

        fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_secs(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([203, 0, 113, last])
    }

    #[test]
    fn test_limit_within_window() {
        let clock = ManualClock::new(1_000_000);
        let limiter = FixedWindowLimiter::new(3, 600, 1024, clock.clone());

        assert!(limiter.allow(ip(1)));
        assert!(limiter.allow(ip(1)));
        assert!(limiter.allow(ip(1)));
        assert!(!limiter.allow(ip(1)));
        // A different client has its own budget.
        assert!(limiter.allow(ip(2)));
    }

    #[test]
    fn test_window_rollover_resets_budget() {
        let clock = ManualClock::new(1_000_000);
        let limiter = FixedWindowLimiter::new(2, 600, 1024, clock.clone());

        assert!(limiter.allow(ip(1)));
        assert!(limiter.allow(ip(1)));
        assert!(!limiter.allow(ip(1)));

        clock.advance(600);
        assert!(limiter.allow(ip(1)));
    }

    #[test]
    fn test_size_triggered_sweep_evicts_expired_windows() {
        let clock = ManualClock::new(1_000_000);
        let limiter = FixedWindowLimiter::new(5, 600, 2, clock.clone());

        assert!(limiter.allow(ip(1)));
        assert!(limiter.allow(ip(2)));
        assert_eq!(limiter.tracked_ips(), 2);

        // Map is full of expired windows; a new client triggers the sweep.
        clock.advance(600);
        assert!(limiter.allow(ip(3)));
        assert_eq!(limiter.tracked_ips(), 1);
    }

    #[test]
    fn test_saturated_map_fails_open() {
        let clock = ManualClock::new(1_000_000);
        let limiter = FixedWindowLimiter::new(1, 600, 2, clock.clone());

        assert!(limiter.allow(ip(1)));
        assert!(limiter.allow(ip(2)));
        // Both tracked windows are live, so the newcomer passes untracked.
        assert!(limiter.allow(ip(3)));
        assert!(limiter.allow(ip(3)));
        assert_eq!(limiter.tracked_ips(), 2);
    }

    #[test]
    fn test_periodic_sweep_clears_expired() {
        let clock = ManualClock::new(1_000_000);
        let limiter = FixedWindowLimiter::new(5, 600, 1024, clock.clone());

        limiter.allow(ip(1));
        limiter.allow(ip(2));
        clock.advance(1200);
        limiter.sweep();
        assert_eq!(limiter.tracked_ips(), 0);
    }
}
