use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Result of consulting the limiter before an authentication attempt.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    pub attempts_remaining: u32,
    pub retry_after: Option<Duration>,
}

#[derive(Default)]
struct AttemptState {
    failures: VecDeque<Instant>,
    locked_until: Option<Instant>,
}

/// Sliding-window failure tracking keyed by `identifier:origin`.
///
/// Reaching the failure threshold inside the window locks the key out for a
/// fixed duration. A successful authentication resets the key. Lockouts are
/// always recoverable after `retry_after`; they never escalate.
pub struct RateLimiter {
    window: Duration,
    max_attempts: u32,
    lockout: Duration,
    state: Mutex<HashMap<String, AttemptState>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_attempts: u32, lockout: Duration) -> Self {
        Self {
            window,
            max_attempts,
            lockout,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            Duration::from_secs(config.window_secs),
            config.max_attempts,
            Duration::from_secs(config.lockout_secs),
        )
    }

    fn key(identifier: &str, origin: &str) -> String {
        format!("{}:{}", identifier, origin)
    }

    pub fn check_attempt(&self, identifier: &str, origin: &str) -> RateDecision {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(Self::key(identifier, origin)).or_default();

        Self::prune(entry, now, self.window);

        if let Some(locked_until) = entry.locked_until {
            if locked_until > now {
                return RateDecision {
                    allowed: false,
                    attempts_remaining: 0,
                    retry_after: Some(locked_until - now),
                };
            }
            entry.locked_until = None;
        }

        RateDecision {
            allowed: true,
            attempts_remaining: self
                .max_attempts
                .saturating_sub(entry.failures.len() as u32),
            retry_after: None,
        }
    }

    /// Records one failed attempt; hitting the threshold starts the lockout.
    pub fn record_failure(&self, identifier: &str, origin: &str) -> RateDecision {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(Self::key(identifier, origin)).or_default();

        Self::prune(entry, now, self.window);
        entry.failures.push_back(now);

        if entry.failures.len() as u32 >= self.max_attempts {
            entry.locked_until = Some(now + self.lockout);
            return RateDecision {
                allowed: false,
                attempts_remaining: 0,
                retry_after: Some(self.lockout),
            };
        }

        RateDecision {
            allowed: true,
            attempts_remaining: self
                .max_attempts
                .saturating_sub(entry.failures.len() as u32),
            retry_after: None,
        }
    }

    /// Clears the key after a successful authentication.
    pub fn reset(&self, identifier: &str, origin: &str) {
        self.state
            .lock()
            .unwrap()
            .remove(&Self::key(identifier, origin));
    }

    /// Drops keys with no live failures or lockout, bounding memory growth.
    pub fn sweep(&self) {
        let now = Instant::now();
        let window = self.window;
        self.state.lock().unwrap().retain(|_, entry| {
            Self::prune(entry, now, window);
            !entry.failures.is_empty() || entry.locked_until.map_or(false, |t| t > now)
        });
    }

    fn prune(entry: &mut AttemptState, now: Instant, window: Duration) {
        while let Some(oldest) = entry.failures.front() {
            if now.duration_since(*oldest) >= window {
                entry.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_locks_out_with_retry_hint() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 5, Duration::from_secs(30));

        for _ in 0..4 {
            let decision = limiter.record_failure("ada", "10.0.0.1");
            assert!(decision.allowed);
        }
        let decision = limiter.record_failure("ada", "10.0.0.1");
        assert!(!decision.allowed);
        assert!(decision.retry_after.unwrap() > Duration::ZERO);

        let decision = limiter.check_attempt("ada", "10.0.0.1");
        assert!(!decision.allowed);
        assert_eq!(decision.attempts_remaining, 0);
        assert!(decision.retry_after.unwrap() > Duration::ZERO);
    }

    #[test]
    fn keys_are_scoped_by_identifier_and_origin() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2, Duration::from_secs(30));

        limiter.record_failure("ada", "10.0.0.1");
        limiter.record_failure("ada", "10.0.0.1");
        assert!(!limiter.check_attempt("ada", "10.0.0.1").allowed);
        assert!(limiter.check_attempt("ada", "10.0.0.2").allowed);
        assert!(limiter.check_attempt("grace", "10.0.0.1").allowed);
    }

    #[test]
    fn successful_auth_resets_the_counter() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 5, Duration::from_secs(30));

        limiter.record_failure("ada", "10.0.0.1");
        limiter.record_failure("ada", "10.0.0.1");
        assert_eq!(limiter.check_attempt("ada", "10.0.0.1").attempts_remaining, 3);

        limiter.reset("ada", "10.0.0.1");
        assert_eq!(limiter.check_attempt("ada", "10.0.0.1").attempts_remaining, 5);
    }

    #[test]
    fn lockout_expires_after_duration() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1, Duration::from_millis(50));

        assert!(!limiter.record_failure("ada", "10.0.0.1").allowed);
        assert!(!limiter.check_attempt("ada", "10.0.0.1").allowed);

        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.check_attempt("ada", "10.0.0.1").allowed);
    }

    #[test]
    fn window_forgets_old_failures() {
        let limiter = RateLimiter::new(Duration::from_millis(50), 2, Duration::from_secs(30));

        limiter.record_failure("ada", "10.0.0.1");
        std::thread::sleep(Duration::from_millis(80));
        let decision = limiter.check_attempt("ada", "10.0.0.1");
        assert_eq!(decision.attempts_remaining, 2);
    }

    #[test]
    fn sweep_drops_idle_keys() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 5, Duration::from_millis(20));

        limiter.record_failure("ada", "10.0.0.1");
        std::thread::sleep(Duration::from_millis(50));
        limiter.sweep();
        assert!(limiter.state.lock().unwrap().is_empty());
    }
}
