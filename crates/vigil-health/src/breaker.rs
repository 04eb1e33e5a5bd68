//! Per-service circuit breaking.
//!
//! A breaker moves through three states:
//!
//! ```text
//! Closed ──(requests ≥ min_requests && failure ratio ≥ threshold)──▶ Open
//! Open ──(timeout elapsed)──▶ HalfOpen
//! HalfOpen ──(max_requests consecutive successes)──▶ Closed
//! HalfOpen ──(any failure)──▶ Open
//! ```
//!
//! Counts are reset on every transition and, while closed, at the end of
//! each rolling `interval`. Each reset bumps a generation number so that
//! outcomes of calls admitted under an older generation are ignored.

use std::future::Future;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vigil_core::{BreakerState, CircuitBreakerConfig};
use vigil_metrics::HealthMetrics;

use crate::clock::deadline_after;
use crate::registry::Registry;

/// Called with `(service, from, to)` after every transition.
pub type StateHook = Box<dyn Fn(&str, BreakerState, BreakerState) + Send + Sync>;

/// Why a call was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakerRejection {
    #[error("circuit breaker is open")]
    Open,
    #[error("circuit breaker is half-open and its trial budget is spent")]
    TooManyRequests,
}

impl BreakerRejection {
    pub fn state(self) -> BreakerState {
        match self {
            BreakerRejection::Open => BreakerState::Open,
            BreakerRejection::TooManyRequests => BreakerState::HalfOpen,
        }
    }
}

/// Request outcomes within the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.total_failures) / f64::from(self.requests)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    /// `window_end` is `None` when counts never roll over.
    Closed { window_end: Option<Instant> },
    Open { until: Instant },
    HalfOpen,
}

impl State {
    fn public(&self) -> BreakerState {
        match self {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen => BreakerState::HalfOpen,
        }
    }
}

struct Inner {
    state: State,
    generation: u64,
    counts: Counts,
}

type Transition = (BreakerState, BreakerState);

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    on_change: Option<StateHook>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        let window_end = window_end(&config, now);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: State::Closed { window_end },
                generation: 0,
                counts: Counts::default(),
            }),
            on_change: None,
        }
    }

    pub fn with_hook(mut self, hook: StateHook) -> Self {
        self.on_change = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, advancing Open to HalfOpen once the timeout elapsed.
    pub fn state(&self) -> BreakerState {
        let (state, transition) = {
            let mut inner = self.inner.lock().expect("breaker lock");
            let transition = self.advance(&mut inner, Instant::now());
            (inner.state.public(), transition)
        };
        self.notify(transition);
        state
    }

    pub fn counts(&self) -> Counts {
        self.inner.lock().expect("breaker lock").counts
    }

    /// Admit one call, or reject it without running anything.
    pub fn try_acquire(&self) -> Result<Permit<'_>, BreakerRejection> {
        let (admitted, transition) = {
            let mut inner = self.inner.lock().expect("breaker lock");
            let transition = self.advance(&mut inner, Instant::now());
            let admitted = match inner.state {
                State::Open { .. } => Err(BreakerRejection::Open),
                State::HalfOpen if inner.counts.requests >= self.config.max_requests => {
                    Err(BreakerRejection::TooManyRequests)
                }
                _ => {
                    inner.counts.requests += 1;
                    Ok(inner.generation)
                }
            };
            (admitted, transition)
        };
        self.notify(transition);

        admitted.map(|generation| Permit {
            breaker: self,
            generation,
            recorded: false,
        })
    }

    /// Run `fut` if admitted and record its outcome through `is_success`.
    pub async fn execute<F, T>(
        &self,
        fut: F,
        is_success: impl FnOnce(&T) -> bool,
    ) -> Result<T, BreakerRejection>
    where
        F: Future<Output = T>,
    {
        let permit = self.try_acquire()?;
        let output = fut.await;
        permit.record(is_success(&output));
        Ok(output)
    }

    fn record(&self, generation: u64, success: bool) {
        let transition = {
            let mut inner = self.inner.lock().expect("breaker lock");
            let now = Instant::now();
            let mut transition = self.advance(&mut inner, now);
            if inner.generation != generation {
                debug!(service = %self.name, "stale breaker outcome ignored");
            } else if success {
                transition = transition.or(self.on_success(&mut inner, now));
            } else {
                transition = transition.or(self.on_failure(&mut inner, now));
            }
            transition
        };
        self.notify(transition);
    }

    fn release(&self, generation: u64) {
        let mut inner = self.inner.lock().expect("breaker lock");
        if inner.generation == generation {
            inner.counts.requests = inner.counts.requests.saturating_sub(1);
        }
    }

    fn on_success(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        let counts = &mut inner.counts;
        counts.total_successes += 1;
        counts.consecutive_successes += 1;
        counts.consecutive_failures = 0;

        let recovered = matches!(inner.state, State::HalfOpen)
            && inner.counts.consecutive_successes >= self.config.max_requests;
        recovered.then(|| {
            let window_end = window_end(&self.config, now);
            self.set_state(inner, State::Closed { window_end })
        })
    }

    fn on_failure(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        let counts = &mut inner.counts;
        counts.total_failures += 1;
        counts.consecutive_failures += 1;
        counts.consecutive_successes = 0;

        let trip = match inner.state {
            State::Closed { .. } => {
                inner.counts.requests >= self.config.min_requests
                    && inner.counts.failure_ratio() >= self.config.failure_ratio
            }
            State::HalfOpen => true,
            State::Open { .. } => false,
        };

        trip.then(|| {
            let until = deadline_after(now, self.config.timeout);
            self.set_state(inner, State::Open { until })
        })
    }

    /// Apply time-driven changes: Open expiry and Closed window rollover.
    fn advance(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        match inner.state {
            State::Open { until } if now >= until => Some(self.set_state(inner, State::HalfOpen)),
            State::Closed {
                window_end: Some(end),
            } if now >= end => {
                inner.generation += 1;
                inner.counts = Counts::default();
                inner.state = State::Closed {
                    window_end: window_end(&self.config, now),
                };
                None
            }
            _ => None,
        }
    }

    fn set_state(&self, inner: &mut Inner, next: State) -> Transition {
        let from = inner.state.public();
        inner.state = next;
        inner.generation += 1;
        inner.counts = Counts::default();
        (from, next.public())
    }

    /// Runs outside the lock so hooks may query the breaker.
    fn notify(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            BreakerState::Open => warn!(service = %self.name, %from, "circuit breaker opened"),
            BreakerState::Closed => info!(service = %self.name, %from, "circuit breaker closed"),
            BreakerState::HalfOpen => debug!(service = %self.name, %from, "circuit breaker half-open"),
        }
        if let Some(hook) = &self.on_change {
            hook(&self.name, from, to);
        }
    }
}

fn window_end(config: &CircuitBreakerConfig, now: Instant) -> Option<Instant> {
    (!config.interval.is_zero()).then(|| deadline_after(now, config.interval))
}

/// An admitted call. Dropping it without [`Permit::record`] gives the slot back.
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    recorded: bool,
}

impl Permit<'_> {
    pub fn record(mut self, success: bool) {
        self.recorded = true;
        self.breaker.record(self.generation, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.release(self.generation);
        }
    }
}

/// One breaker per service name, with transitions forwarded to metrics.
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    metrics: Arc<dyn HealthMetrics>,
    breakers: Registry<CircuitBreaker>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, metrics: Arc<dyn HealthMetrics>) -> Self {
        Self {
            config,
            metrics,
            breakers: Registry::new(),
        }
    }

    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(service, || {
            let metrics = Arc::clone(&self.metrics);
            CircuitBreaker::new(service, self.config.clone()).with_hook(Box::new(
                move |name, _from, to| metrics.record_breaker_state(name, to),
            ))
        })
    }

    /// The breaker for `service`, if one was ever created.
    pub fn lookup(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
