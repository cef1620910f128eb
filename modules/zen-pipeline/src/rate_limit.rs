//! A minimal rate-limited warning gate so a persistently-failing source
//! can't flood logs once per event. Not a general-purpose limiter — the
//! pipeline only ever needs "at most one warning per window per source".

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimitedWarn {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimitedWarn {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Returns true if the caller should log now (and records that it did).
    pub fn should_log(&self) -> bool {
        let mut last = self.last.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_first_then_suppresses_until_interval_elapses() {
        let limiter = RateLimitedWarn::new(Duration::from_secs(3600));
        assert!(limiter.should_log());
        assert!(!limiter.should_log());
    }
}
