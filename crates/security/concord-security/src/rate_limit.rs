//! Per-agent rate limiting and DDoS circuit breaking for secure message
//! sends.

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

/// Simple fixed-window token bucket: `max_per_window` sends allowed per
/// `window` duration, reset at window boundaries.
struct TokenBucket {
    remaining: u32,
    window_started: chrono::DateTime<chrono::Utc>,
}

/// Per-agent rate limiter.
pub struct RateLimiter {
    max_per_window: u32,
    window: chrono::Duration,
    buckets: DashMap<Uuid, Mutex<TokenBucket>>,
}

impl RateLimiter {
    /// Construct a limiter allowing `max_per_window` sends per `window_secs`.
    #[must_use]
    pub fn new(max_per_window: u32, window_secs: i64) -> Self {
        Self { max_per_window, window: chrono::Duration::seconds(window_secs), buckets: DashMap::new() }
    }

    /// Consume one token for `agent_id`. Returns `false` if the agent is
    /// currently out of budget.
    pub fn try_consume(&self, agent_id: Uuid) -> bool {
        let entry = self.buckets.entry(agent_id).or_insert_with(|| {
            Mutex::new(TokenBucket { remaining: self.max_per_window, window_started: chrono::Utc::now() })
        });
        let mut bucket = entry.lock();
        let now = chrono::Utc::now();
        if now - bucket.window_started >= self.window {
            bucket.remaining = self.max_per_window;
            bucket.window_started = now;
        }
        if bucket.remaining == 0 {
            false
        } else {
            bucket.remaining -= 1;
            true
        }
    }
}

/// Breaker state for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open { opened_at: chrono::DateTime<chrono::Utc> },
}

struct AgentBreaker {
    state: BreakerState,
    consecutive_failures: u32,
}

/// Opens per-agent after repeated failed sends (the detector's signal for
/// likely DDoS behaviour), blocking further sends until `recovery_timeout`
/// elapses.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: chrono::Duration,
    agents: DashMap<Uuid, Mutex<AgentBreaker>>,
}

impl CircuitBreaker {
    /// Construct a breaker that opens after `failure_threshold` consecutive
    /// failures and recovers after `recovery_timeout_secs`.
    #[must_use]
    pub fn new(failure_threshold: u32, recovery_timeout_secs: i64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout: chrono::Duration::seconds(recovery_timeout_secs),
            agents: DashMap::new(),
        }
    }

    /// Whether `agent_id` is currently allowed through. A breaker past its
    /// recovery timeout transitions back to closed (half-open trial).
    pub fn is_open(&self, agent_id: Uuid) -> bool {
        let entry = self.agents.entry(agent_id).or_insert_with(|| {
            Mutex::new(AgentBreaker { state: BreakerState::Closed, consecutive_failures: 0 })
        });
        let mut breaker = entry.lock();
        if let BreakerState::Open { opened_at } = breaker.state {
            if chrono::Utc::now() - opened_at >= self.recovery_timeout {
                breaker.state = BreakerState::Closed;
                breaker.consecutive_failures = 0;
            }
        }
        matches!(breaker.state, BreakerState::Open { .. })
    }

    /// Record a failed send, opening the breaker once failures reach the
    /// threshold.
    pub fn record_failure(&self, agent_id: Uuid) {
        let entry = self.agents.entry(agent_id).or_insert_with(|| {
            Mutex::new(AgentBreaker { state: BreakerState::Closed, consecutive_failures: 0 })
        });
        let mut breaker = entry.lock();
        breaker.consecutive_failures += 1;
        if breaker.consecutive_failures >= self.failure_threshold {
            breaker.state = BreakerState::Open { opened_at: chrono::Utc::now() };
        }
    }

    /// Record a successful send, resetting the failure count.
    pub fn record_success(&self, agent_id: Uuid) {
        if let Some(entry) = self.agents.get(&agent_id) {
            let mut breaker = entry.lock();
            breaker.consecutive_failures = 0;
            breaker.state = BreakerState::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_blocks_after_budget_exhausted() {
        let limiter = RateLimiter::new(2, 60);
        let agent = Uuid::new_v4();
        assert!(limiter.try_consume(agent));
        assert!(limiter.try_consume(agent));
        assert!(!limiter.try_consume(agent));
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, 60);
        let agent = Uuid::new_v4();
        assert!(!breaker.is_open(agent));
        breaker.record_failure(agent);
        breaker.record_failure(agent);
        assert!(!breaker.is_open(agent));
        breaker.record_failure(agent);
        assert!(breaker.is_open(agent));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, 60);
        let agent = Uuid::new_v4();
        breaker.record_failure(agent);
        breaker.record_success(agent);
        breaker.record_failure(agent);
        assert!(!breaker.is_open(agent));
    }
}
