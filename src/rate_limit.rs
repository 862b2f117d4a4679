//! Per-user, per-class fixed-window rate limiting.
//!
//! Each (user, rate class) pair gets an independent window. A rejected
//! request performs no partial work and carries a retry hint. The limiter
//! never coordinates across unrelated users.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::ApiError;

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    window: Duration,
    windows: RwLock<HashMap<(String, String), Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    /// Window length is injectable for tests.
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Admit or reject one request for `user_id` in `class`, with at most
    /// `limit` requests per window.
    pub fn check(&self, user_id: &str, class: &str, limit: u32) -> Result<(), ApiError> {
        let now = Instant::now();
        let key = (user_id.to_string(), class.to_string());
        let mut windows = self.windows.write().unwrap();

        let window = windows.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= limit {
            let elapsed = now.duration_since(window.started);
            let retry_after_secs = self.window.saturating_sub(elapsed).as_secs().max(1);
            return Err(ApiError::RateLimited {
                class: class.to_string(),
                retry_after_secs,
            });
        }

        window.count += 1;
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
