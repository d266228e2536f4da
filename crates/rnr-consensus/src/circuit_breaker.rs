//! Circuit breaker guarding the storage path of the block-production loop.
//!
//! Closed: writes pass through. Open: after too many consecutive failures,
//! slots are skipped outright instead of hammering a failing database.
//! HalfOpen: after a cool-down, one probe is allowed through; success closes
//! the circuit, failure reopens it.
//!
//! Timings use `Instant` deliberately: the breaker gates local work only and
//! never touches consensus state.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_duration: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            name: "storage".to_string(),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Whether the protected operation may run now
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        matches!(inner.state, CircuitState::Closed | CircuitState::HalfOpen)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            info!(name = %self.config.name, "circuit closed after recovery");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        name = %self.config.name,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(name = %self.config.name, "probe failed, circuit reopened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.open_duration {
                    info!(name = %self.config.name, "circuit half-open, probing");
                    inner.state = CircuitState::HalfOpen;
                }
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
