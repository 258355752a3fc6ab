//! Circuit breaker guarding one remote service.
//!
//! ```text
//!            failure ratio tripped             timeout elapsed
//!   Closed ------------------------> Open -----------------------> HalfOpen
//!     ^                               ^                               |
//!     |                               +------- any failure -----------+
//!     +---------------- max_requests consecutive successes -----------+
//! ```
//!
//! A request outcome is only counted against the generation it started in, so
//! late results from before a state change never move the new state.

use super::config::CircuitBreakerConfig;
use std::fmt;
use std::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        })
    }
}

/// Outcome counts for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

/// Why the breaker refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Open,
    TooManyRequests,
}

/// Admission ticket for one request.
#[derive(Debug)]
pub struct Permit {
    generation: u64,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    counts: Counts,
    generation: u64,
    /// End of the current closed window or open period.
    expiry: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        let mut inner = Inner {
            state: BreakerState::Closed,
            counts: Counts::default(),
            generation: 0,
            expiry: None,
        };
        inner.expiry = closed_expiry(&config, now);
        Self {
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Admits a request, or explains why not.
    pub fn try_acquire(&self) -> Result<Permit, Rejection> {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        match inner.state {
            BreakerState::Open => return Err(Rejection::Open),
            BreakerState::HalfOpen if inner.counts.requests >= self.config.max_requests => {
                return Err(Rejection::TooManyRequests)
            }
            _ => {}
        }
        inner.counts.requests += 1;
        Ok(Permit {
            generation: inner.generation,
        })
    }

    /// Records the outcome of a request admitted by [`try_acquire`](Self::try_acquire).
    pub fn record(&self, permit: Permit, success: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        if inner.generation != permit.generation {
            return;
        }

        match (inner.state, success) {
            (BreakerState::Closed, true) => inner.counts.on_success(),
            (BreakerState::Closed, false) => {
                inner.counts.on_failure();
                if self.ready_to_trip(&inner.counts) {
                    self.transition(&mut inner, BreakerState::Open, now);
                }
            }
            (BreakerState::HalfOpen, true) => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.config.max_requests {
                    self.transition(&mut inner, BreakerState::Closed, now);
                }
            }
            (BreakerState::HalfOpen, false) => {
                self.transition(&mut inner, BreakerState::Open, now)
            }
            (BreakerState::Open, _) => {}
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.config.min_requests
            && f64::from(counts.total_failures) / f64::from(counts.requests.max(1))
                >= self.config.failure_ratio
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // counts stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies time-based transitions: closed windows roll over, open periods end.
    fn refresh(&self, inner: &mut Inner, now: Instant) {
        let expired = inner.expiry.is_some_and(|at| at <= now);
        match inner.state {
            BreakerState::Closed if expired => self.new_generation(inner, now),
            BreakerState::Open if expired => self.transition(inner, BreakerState::HalfOpen, now),
            _ => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.new_generation(inner, now);
        match to {
            BreakerState::Open => warn!(breaker = %self.config.name, %from, %to, "Circuit breaker state changed"),
            _ => info!(breaker = %self.config.name, %from, %to, "Circuit breaker state changed"),
        }
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            BreakerState::Closed => closed_expiry(&self.config, now),
            BreakerState::Open => Some(now + self.config.timeout),
            BreakerState::HalfOpen => None,
        };
    }
}

fn closed_expiry(config: &CircuitBreakerConfig, now: Instant) -> Option<Instant> {
    (!config.interval.is_zero()).then(|| now + config.interval)
}
