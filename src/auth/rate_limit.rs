//! Rate limiting for sensitive auth endpoints.
//!
//! Sliding-window attempt counter with lockout, keyed by
//! `<action>_<identifier>` (e.g. `login_203.0.113.9`). Counters live behind
//! an injected backend so multiple stateless instances can share one store.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Limits for one action namespace.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    /// Failed attempts allowed inside a window before lockout.
    pub max_attempts: u32,
    /// Sliding-window duration.
    pub window: Duration,
    /// Lockout duration once the threshold is crossed.
    pub lockout: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            lockout: Duration::from_secs(15 * 60),
        }
    }
}

/// Outcome of a pre-flight check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Remaining lockout in whole seconds, when not allowed.
    pub retry_after: Option<u64>,
}

impl Decision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    fn locked(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after.as_secs().max(1)),
        }
    }
}

/// Storage for attempt counters.
///
/// Both operations must be atomic per identifier: concurrent failed attempts
/// on the same key must all be counted, never lost to a read-modify-write
/// race.
pub trait RateLimitBackend: Send + Sync {
    fn check(&self, identifier: &str, policy: &RatePolicy) -> Decision;
    fn record(&self, identifier: &str, success: bool, policy: &RatePolicy);
    /// Drop counters whose window has long elapsed.
    fn cleanup(&self);
}

struct AttemptState {
    attempts: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

/// In-memory backend. Counters for one identifier are mutated under a single
/// lock acquisition, which gives the per-key atomicity the trait requires.
pub struct MemoryRateLimitBackend {
    state: Mutex<HashMap<String, AttemptState>>,
    // Longest window across registered policies, used by cleanup().
    max_window: Mutex<Duration>,
}

impl MemoryRateLimitBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            max_window: Mutex::new(Duration::from_secs(60 * 60)),
        }
    }
}

impl Default for MemoryRateLimitBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitBackend for MemoryRateLimitBackend {
    fn check(&self, identifier: &str, policy: &RatePolicy) -> Decision {
        let mut state = self.state.lock();
        let now = Instant::now();

        let Some(entry) = state.get_mut(identifier) else {
            return Decision::allowed();
        };

        if let Some(locked_until) = entry.locked_until {
            if locked_until > now {
                return Decision::locked(locked_until - now);
            }
            // Lockout elapsed: the entry starts a fresh window.
            entry.attempts = 0;
            entry.window_start = now;
            entry.locked_until = None;
        }

        if now.duration_since(entry.window_start) >= policy.window {
            entry.attempts = 0;
            entry.window_start = now;
        }

        Decision::allowed()
    }

    fn record(&self, identifier: &str, success: bool, policy: &RatePolicy) {
        let mut state = self.state.lock();
        let now = Instant::now();

        if success {
            // A recorded success resets the counter and clears any lockout.
            state.remove(identifier);
            return;
        }

        let entry = state
            .entry(identifier.to_string())
            .or_insert(AttemptState {
                attempts: 0,
                window_start: now,
                locked_until: None,
            });

        if now.duration_since(entry.window_start) >= policy.window {
            entry.attempts = 0;
            entry.window_start = now;
        }

        entry.attempts += 1;

        if entry.attempts >= policy.max_attempts {
            entry.locked_until = Some(now + policy.lockout);
            warn!(
                identifier,
                attempts = entry.attempts,
                lockout_secs = policy.lockout.as_secs(),
                "Rate limit lockout triggered"
            );
        }

        let mut max_window = self.max_window.lock();
        if policy.window > *max_window {
            *max_window = policy.window;
        }
    }

    fn cleanup(&self) {
        let max_window = *self.max_window.lock();
        let mut state = self.state.lock();
        let now = Instant::now();

        state.retain(|_, entry| {
            entry.locked_until.map_or(false, |until| until > now)
                || now.duration_since(entry.window_start) < max_window * 2
        });
    }
}

/// Per-action attempt limiter over an injected backend.
pub struct RateLimiter {
    backend: Arc<dyn RateLimitBackend>,
    policies: HashMap<&'static str, RatePolicy>,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn RateLimitBackend>) -> Self {
        Self {
            backend,
            policies: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, action: &'static str, policy: RatePolicy) -> Self {
        self.policies.insert(action, policy);
        self
    }

    fn policy(&self, action: &str) -> RatePolicy {
        self.policies.get(action).copied().unwrap_or_default()
    }

    fn identifier(action: &str, key: &str) -> String {
        format!("{action}_{key}")
    }

    /// Is another attempt for `key` under `action` currently allowed?
    pub fn check_attempts(&self, action: &str, key: &str) -> Decision {
        self.backend
            .check(&Self::identifier(action, key), &self.policy(action))
    }

    /// Record the outcome of an attempt. Failures count toward lockout;
    /// a success resets the counter for this identifier.
    pub fn record_attempt(&self, action: &str, key: &str, success: bool) {
        self.backend
            .record(&Self::identifier(action, key), success, &self.policy(action));
    }

    pub fn cleanup(&self) {
        self.backend.cleanup();
    }
}
