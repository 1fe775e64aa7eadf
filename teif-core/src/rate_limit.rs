//! Fixed-window request limiter keyed by user.
//!
//! The key map is bounded: when it is full, expired windows are swept and,
//! failing that, the window closest to its reset is evicted.
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};
use thiserror::Error;

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs())]
    Exceeded { retry_after: Duration },
    #[error("rate limiter state is poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    capacity: usize,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32, capacity: usize) -> Self {
        Self {
            window,
            max_requests,
            capacity: capacity.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// 10 signatures per minute.
    pub fn signing() -> Self {
        Self::new(Duration::from_secs(60), 10, DEFAULT_CAPACITY)
    }

    /// 5 uploads per hour.
    pub fn uploads() -> Self {
        Self::new(Duration::from_secs(60 * 60), 5, DEFAULT_CAPACITY)
    }

    pub fn check(&self, key: &str) -> Result<RateLimitStatus, RateLimitError> {
        self.check_at(key, Instant::now())
    }

    /// Count one request for `key` at `now`.
    ///
    /// # Examples
    /// ```rust
    /// use std::time::{Duration, Instant};
    /// use teif_core::rate_limit::RateLimiter;
    ///
    /// let limiter = RateLimiter::new(Duration::from_secs(60), 2, 16);
    /// let now = Instant::now();
    /// assert_eq!(limiter.check_at("user", now)?.remaining, 1);
    /// assert_eq!(limiter.check_at("user", now)?.remaining, 0);
    /// assert!(limiter.check_at("user", now).is_err());
    /// assert!(limiter.check_at("user", now + Duration::from_secs(61)).is_ok());
    /// # Ok::<(), teif_core::rate_limit::RateLimitError>(())
    /// ```
    pub fn check_at(&self, key: &str, now: Instant) -> Result<RateLimitStatus, RateLimitError> {
        let mut windows = self.windows.lock().map_err(|_| RateLimitError::Poisoned)?;

        if !windows.contains_key(key) && windows.len() >= self.capacity {
            make_room(&mut windows, now, self.capacity);
        }

        let window = windows
            .entry(key.to_owned())
            .and_modify(|w| {
                if now >= w.reset_at {
                    *w = Window {
                        count: 0,
                        reset_at: now + self.window,
                    };
                }
            })
            .or_insert(Window {
                count: 0,
                reset_at: now + self.window,
            });

        let reset_after = window.reset_at.saturating_duration_since(now);
        if window.count >= self.max_requests {
            tracing::debug!(key, retry_after = ?reset_after, "rate limit exceeded");
            return Err(RateLimitError::Exceeded {
                retry_after: reset_after,
            });
        }
        window.count += 1;

        Ok(RateLimitStatus {
            limit: self.max_requests,
            remaining: self.max_requests - window.count,
            reset_after,
        })
    }

    /// Drop every expired window.
    pub fn sweep(&self, now: Instant) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.retain(|_, w| w.reset_at > now);
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn make_room(windows: &mut HashMap<String, Window>, now: Instant, capacity: usize) {
    windows.retain(|_, w| w.reset_at > now);
    if windows.len() < capacity {
        return;
    }
    let oldest = windows
        .iter()
        .min_by_key(|(_, w)| w.reset_at)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        windows.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1, 16);
        let now = Instant::now();
        assert!(limiter.check_at("a", now).is_ok());
        assert!(limiter.check_at("b", now).is_ok());
        assert!(matches!(
            limiter.check_at("a", now + Duration::from_secs(10)),
            Err(RateLimitError::Exceeded { retry_after }) if retry_after == Duration::from_secs(50)
        ));
    }

    #[test]
    fn capacity_is_bounded() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 5, 2);
        let now = Instant::now();
        limiter.check_at("a", now).expect("a");
        limiter.check_at("b", now + Duration::from_secs(1)).expect("b");
        limiter.check_at("c", now + Duration::from_secs(2)).expect("c");
        assert_eq!(limiter.len(), 2);

        // "a" had the earliest reset and was evicted, so it starts fresh.
        let status = limiter.check_at("a", now + Duration::from_secs(3)).expect("a again");
        assert_eq!(status.remaining, 4);
    }

    #[test]
    fn sweep_removes_expired_windows() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 5, 16);
        let now = Instant::now();
        limiter.check_at("a", now).expect("a");
        limiter.sweep(now + Duration::from_secs(2));
        assert!(limiter.is_empty());
    }

    #[test]
    fn presets() {
        let now = Instant::now();
        let signing = RateLimiter::signing();
        for _ in 0..10 {
            signing.check_at("u", now).expect("within limit");
        }
        assert!(signing.check_at("u", now).is_err());
        assert_eq!(RateLimiter::uploads().check_at("u", now).expect("ok").limit, 5);
    }
}
