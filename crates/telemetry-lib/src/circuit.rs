//! Circuit breaker state machine
//!
//! Plain data plus transition functions. Callers pass `now` explicitly so the
//! machine can be driven deterministically in tests without a clock or a
//! network. The agent owns one breaker toward the hub; every sink owns one
//! toward its backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, sends are attempted
    #[default]
    Closed,
    /// Cooling down, sends are suppressed
    Open,
    /// Cooldown elapsed, a single probe is allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding: 0 closed, 1 half-open, 2 open
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (K) that open a closed breaker
    pub failure_threshold: u32,
    /// Cooldown after the first opening
    pub base_cooldown: Duration,
    /// Upper bound for the exponentially growing cooldown
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown: Duration::from_secs(5),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    /// Openings since the last success; drives the cooldown exponent
    consecutive_opens: u32,
    open_until: Option<Instant>,
    probe_in_flight: bool,
    transitions: u64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_opens: 0,
            open_until: None,
            probe_in_flight: false,
            transitions: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Instant at which an open breaker becomes eligible for a probe
    pub fn retry_at(&self) -> Option<Instant> {
        match self.state {
            CircuitState::Open => self.open_until,
            _ => None,
        }
    }

    /// Cooldown that the next opening would use
    pub fn next_cooldown(&self) -> Duration {
        cooldown_for(&self.config, self.consecutive_opens + 1)
    }

    /// Ask permission to send. Grants at most one probe while half-open.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => match self.open_until {
                Some(until) if now >= until => {
                    self.transition(CircuitState::HalfOpen);
                    self.probe_in_flight = true;
                    true
                }
                _ => false,
            },
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Forget a granted probe whose outcome will never be reported
    pub fn abandon_probe(&mut self) {
        self.probe_in_flight = false;
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_opens = 0;
        self.open_until = None;
        self.probe_in_flight = false;
        if self.state != CircuitState::Closed {
            self.transition(CircuitState::Closed);
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            // A failed probe re-opens with a longer cooldown
            CircuitState::HalfOpen => self.open(now),
            CircuitState::Open => {}
        }
    }

    fn open(&mut self, now: Instant) {
        self.consecutive_opens = self.consecutive_opens.saturating_add(1);
        self.open_until = Some(now + cooldown_for(&self.config, self.consecutive_opens));
        self.probe_in_flight = false;
        self.transition(CircuitState::Open);
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.transitions += 1;
    }
}

/// Current instant on the runtime clock.
///
/// Follows tokio's clock, so paused-time tests drive breaker cooldowns too.
pub fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn cooldown_for(config: &CircuitBreakerConfig, opening: u32) -> Duration {
    let exponent = opening.saturating_sub(1).min(20);
    config
        .base_cooldown
        .saturating_mul(1u32 << exponent)
        .min(config.max_cooldown)
}
