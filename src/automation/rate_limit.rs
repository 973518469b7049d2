//! Fixed-window request counting per remote address

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Entries are pruned once the map grows past this many addresses
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, addr: IpAddr, limit: u64) -> bool {
        self.check_at(addr, limit, Instant::now())
    }

    /// Count one request from `addr` at `now`; false once `limit` requests
    /// were already seen in the current window.
    pub fn check_at(&self, addr: IpAddr, limit: u64, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| now.duration_since(w.started) < RATE_WINDOW);
        }

        let window = windows.entry(addr).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= RATE_WINDOW {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count >= limit {
            return false;
        }
        window.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_exactly_limit_requests_per_window() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for i in 0..5 {
            assert!(
                limiter.check_at(LOCAL, 5, start + Duration::from_secs(i)),
                "request {} should pass",
                i + 1
            );
        }
        assert!(!limiter.check_at(LOCAL, 5, start + Duration::from_secs(10)));
        assert!(!limiter.check_at(LOCAL, 5, start + Duration::from_secs(59)));

        // Next window starts fresh
        assert!(limiter.check_at(LOCAL, 5, start + RATE_WINDOW));
    }

    #[test]
    fn test_addresses_are_counted_separately() {
        let limiter = RateLimiter::new();
        let other = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2));
        let now = Instant::now();

        assert!(limiter.check_at(LOCAL, 1, now));
        assert!(!limiter.check_at(LOCAL, 1, now));
        assert!(limiter.check_at(other, 1, now));
    }
}
