// =============================================================================
// circuit_breaker.rs — KEEPING THE MODEL FROM DRAGGING INTAKE DOWN WITH IT
// =============================================================================
//
// Every report makes four calls to the text-classification model. When the
// model endpoint is down, each of those calls would otherwise sit in a
// timeout before falling back to a default, and a citizen filing a report
// about a burst main would wait the sum of all four.
//
// The breaker trips after N consecutive failures. While open, calls are
// refused instantly and the boundary goes straight to its defaults. After the
// cooldown a probe is let through (half-open); enough successes close the
// circuit again, a single failure re-opens it.
// =============================================================================

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Tripped. Calls are refused until the cooldown elapses.
    Open,
    /// Cooldown over; probing whether the endpoint recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    last_transition: Instant,
    total_trips: u64,
}

/// Thread-safe breaker shared by every intake request.
pub struct CircuitBreaker {
    name: String,
    state: RwLock<BreakerState>,
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        let name = name.into();
        info!(
            name = %name,
            failure_threshold,
            reset_timeout_secs = reset_timeout.as_secs(),
            success_threshold,
            "Circuit breaker armed"
        );

        Self {
            name,
            state: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
                last_transition: Instant::now(),
                total_trips: 0,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            success_threshold: success_threshold.max(1),
        }
    }

    /// Whether a call may go out right now. Moves Open → HalfOpen once the
    /// cooldown has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut s = self.state.write();

        match s.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = s
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);

                if cooled_down {
                    info!(name = %self.name, "Circuit breaker OPEN -> HALF_OPEN, probing model endpoint");
                    s.state = CircuitState::HalfOpen;
                    s.half_open_successes = 0;
                    s.last_transition = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut s = self.state.write();

        match s.state {
            CircuitState::Closed => {
                s.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                s.half_open_successes += 1;
                if s.half_open_successes >= self.success_threshold {
                    info!(
                        name = %self.name,
                        successes = s.half_open_successes,
                        "Circuit breaker HALF_OPEN -> CLOSED, model endpoint healthy"
                    );
                    s.state = CircuitState::Closed;
                    s.consecutive_failures = 0;
                    s.half_open_successes = 0;
                    s.last_transition = Instant::now();
                }
            }
            // A call that was let through before the trip finished late.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut s = self.state.write();

        match s.state {
            CircuitState::Closed => {
                s.consecutive_failures += 1;
                if s.consecutive_failures >= self.failure_threshold {
                    warn!(
                        name = %self.name,
                        failures = s.consecutive_failures,
                        "Circuit breaker TRIPPED, CLOSED -> OPEN"
                    );
                    s.state = CircuitState::Open;
                    s.opened_at = Some(Instant::now());
                    s.total_trips += 1;
                    s.last_transition = Instant::now();
                }
            }
            CircuitState::HalfOpen => {
                warn!(name = %self.name, "Probe failed, HALF_OPEN -> OPEN");
                s.state = CircuitState::Open;
                s.consecutive_failures = self.failure_threshold;
                s.opened_at = Some(Instant::now());
                s.total_trips += 1;
                s.last_transition = Instant::now();
            }
            CircuitState::Open => {
                s.opened_at = Some(Instant::now());
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.read().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let s = self.state.read();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: s.state,
            consecutive_failures: s.consecutive_failures,
            total_trips: s.total_trips,
            time_in_current_state_secs: s.last_transition.elapsed().as_secs(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_trips: u64,
    pub time_in_current_state_secs: u64,
}
