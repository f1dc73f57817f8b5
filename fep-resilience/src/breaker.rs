//! Per-route circuit breaker (spec §4.6, C6).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use fep_config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Slow,
}

/// Raised when a call is rejected because the breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen;

impl std::fmt::Display for CircuitOpen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "circuit breaker is open")
    }
}

impl std::error::Error for CircuitOpen {}

type StateChangeCallback = Box<dyn Fn(BreakerState, BreakerState) + Send + Sync>;

struct Inner {
    state: BreakerState,
    window: VecDeque<Outcome>,
    opened_at: Option<Instant>,
    half_open_probes_issued: u32,
    half_open_outcomes: Vec<Outcome>,
    callbacks: Vec<StateChangeCallback>,
}

/// A circuit breaker scoped to one route (spec §3 "Circuit-breaker state",
/// §4.6, §8.5/§8.6 testable properties).
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Arc<Self> {
        Arc::new(CircuitBreaker {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_probes_issued: 0,
                half_open_outcomes: Vec::new(),
                callbacks: Vec::new(),
            }),
        })
    }

    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(BreakerState, BreakerState) + Send + Sync + 'static,
    {
        self.inner.lock().callbacks.push(Box::new(callback));
    }

    pub fn state(&self) -> BreakerState {
        self.maybe_transition_to_half_open();
        self.inner.lock().state
    }

    /// Returns `Ok(())` if a call is permitted right now, or `Err` if the
    /// breaker is OPEN (spec §4.6 "OPEN: all calls rejected").
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        self.maybe_transition_to_half_open();
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(CircuitOpen),
            BreakerState::HalfOpen => {
                if inner.half_open_probes_issued < self.config.permitted_probes {
                    inner.half_open_probes_issued += 1;
                    Ok(())
                } else {
                    Err(CircuitOpen)
                }
            }
        }
    }

    /// Record the outcome of a call that `try_acquire` permitted.
    pub fn record(&self, outcome: Outcome) {
        let mut inner = self.inner.lock();
        let effective = if outcome == Outcome::Slow && self.config.slow_calls_count_as_failures {
            Outcome::Failure
        } else {
            outcome
        };

        match inner.state {
            BreakerState::Closed => {
                inner.window.push_back(effective);
                while inner.window.len() > self.config.sliding_window_size as usize {
                    inner.window.pop_front();
                }
                let calls = inner.window.len() as u32;
                if calls >= self.config.minimum_calls {
                    let failures = inner.window.iter().filter(|o| **o == Outcome::Failure).count() as u32;
                    let failure_rate = failures * 100 / calls;
                    if failure_rate >= self.config.failure_rate_threshold_pct as u32 {
                        self.transition(&mut inner, BreakerState::Open);
                    }
                }
            }
            BreakerState::HalfOpen => {
                inner.half_open_outcomes.push(effective);
                if effective == Outcome::Failure {
                    self.transition(&mut inner, BreakerState::Open);
                } else if inner.half_open_outcomes.len() as u32 >= self.config.permitted_probes {
                    let successes = inner.half_open_outcomes.iter().filter(|o| **o == Outcome::Success).count() as u32;
                    let total = inner.half_open_outcomes.len() as u32;
                    let success_rate = successes * 100 / total;
                    if success_rate >= self.config.success_threshold_pct as u32 {
                        self.transition(&mut inner, BreakerState::Closed);
                    } else {
                        self.transition(&mut inner, BreakerState::Open);
                    }
                }
            }
            BreakerState::Open => {
                // A call shouldn't have been permitted while OPEN; ignore.
            }
        }
    }

    fn maybe_transition_to_half_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.wait_in_open() {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                }
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.window.clear();
            }
            BreakerState::HalfOpen => {
                inner.half_open_probes_issued = 0;
                inner.half_open_outcomes.clear();
            }
            BreakerState::Closed => {
                inner.window.clear();
                inner.opened_at = None;
            }
        }
        tracing::info!(?from, ?to, "circuit breaker state change");
        for cb in &inner.callbacks {
            cb(from, to);
        }
    }

    #[cfg(test)]
    fn force_open_for_tests(&self, age: Duration) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now() - age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_rate_threshold_pct: 50,
            minimum_calls: 20,
            sliding_window_size: 20,
            wait_in_open_ms: 50,
            permitted_probes: 5,
            success_threshold_pct: 80,
            slow_call_threshold_ms: 1_000,
            slow_calls_count_as_failures: true,
        }
    }

    /// Spec §8.5 "Breaker trip": exactly threshold% failures over
    /// minCalls trips the breaker on the next failure.
    #[test]
    fn trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..10 {
            breaker.try_acquire().unwrap();
            breaker.record(Outcome::Success);
        }
        for _ in 0..9 {
            breaker.try_acquire().unwrap();
            breaker.record(Outcome::Failure);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.try_acquire().unwrap();
        breaker.record(Outcome::Failure);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn open_rejects_calls() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.force_open_for_tests(Duration::from_millis(0));
        assert!(breaker.try_acquire().is_err());
    }

    /// Spec §8.6 "Breaker recovery": after wait-in-open, permitted probes
    /// are allowed; all-success closes, any failure re-opens.
    #[test]
    fn half_open_all_success_closes() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.force_open_for_tests(Duration::from_millis(100));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        for _ in 0..5 {
            breaker.try_acquire().unwrap();
            breaker.record(Outcome::Success);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_any_failure_reopens() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.force_open_for_tests(Duration::from_millis(100));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.try_acquire().unwrap();
        breaker.record(Outcome::Success);
        breaker.try_acquire().unwrap();
        breaker.record(Outcome::Failure);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_caps_probes_at_permitted_count() {
        let breaker = CircuitBreaker::new(test_config());
        breaker.force_open_for_tests(Duration::from_millis(100));
        for _ in 0..5 {
            breaker.try_acquire().unwrap();
        }
        assert!(breaker.try_acquire().is_err());
    }
}
