//! Per-dependency circuit breaker: a lock-free three-state gate with sliding metrics.

use crate::clock::{Clock, MonotonicClock};
use crate::error::{FabricError, FabricResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub success_threshold: usize,
    pub recovery_timeout: Duration,
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
            call_timeout: None,
        }
    }
}

/// Point-in-time snapshot of a breaker, as exposed by `get_status()` and the registry.
#[derive(Debug, Clone)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub timeouts: u64,
    pub failure_count: usize,
    pub success_rate: f64,
}

struct Counters {
    state: AtomicU8,
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
    timeouts: AtomicU64,
    failure_count: AtomicUsize,
    half_open_successes: AtomicUsize,
    half_open_calls: AtomicUsize,
    last_failure_millis: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            failure_count: AtomicUsize::new(0),
            half_open_successes: AtomicUsize::new(0),
            half_open_calls: AtomicUsize::new(0),
            last_failure_millis: AtomicU64::new(0),
        }
    }
}

/// A single named circuit breaker.
///
/// Cheap to clone: all mutable state lives behind `Arc`.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    counters: Arc<Counters>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            counters: Arc::new(Counters::new()),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.counters.state.load(Ordering::Acquire))
    }

    /// Run `operation`, recording the outcome against this breaker.
    ///
    /// `operation` returns `FabricResult<T>`; an `Err(FabricError::Cancelled)`
    /// is a tie-break: it releases the half-open slot without counting as
    /// either a success or a failure.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> FabricResult<T>
    where
        Fut: Future<Output = FabricResult<T>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let was_half_open = loop {
            let current = self.counters.state.load(Ordering::Acquire);
            match current {
                STATE_OPEN => {
                    let opened_at = self.counters.last_failure_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = now.saturating_sub(opened_at);
                    if elapsed >= self.config.recovery_timeout.as_millis() as u64 {
                        match self.counters.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                self.counters.half_open_successes.store(0, Ordering::Release);
                                self.counters.half_open_calls.store(1, Ordering::Release);
                                break true;
                            }
                            Err(_) => continue,
                        }
                    } else {
                        self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
                        return Err(FabricError::CircuitOpenRejection {
                            name: self.name.to_string(),
                            failure_count: self.counters.failure_count.load(Ordering::Acquire),
                            open_for: Duration::from_millis(elapsed),
                        });
                    }
                }
                STATE_HALF_OPEN => {
                    let in_flight = self.counters.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if in_flight >= 1 {
                        self.counters.half_open_calls.fetch_sub(1, Ordering::Release);
                        self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
                        return Err(FabricError::CircuitOpenRejection {
                            name: self.name.to_string(),
                            failure_count: self.counters.failure_count.load(Ordering::Acquire),
                            open_for: Duration::ZERO,
                        });
                    }
                    break true;
                }
                STATE_CLOSED => break false,
                _ => unreachable!("invalid circuit breaker state"),
            }
        };

        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);

        let result = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(r) => r,
                Err(_) => {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    Err(FabricError::Timeout { name: self.name.to_string(), elapsed: limit, limit })
                }
            },
            None => operation().await,
        };

        if was_half_open {
            self.counters.half_open_calls.fetch_sub(1, Ordering::Release);
        }

        match &result {
            Ok(_) => self.on_success(was_half_open),
            Err(FabricError::Cancelled) => {
                // Neither success nor failure; slot already released above.
            }
            Err(_) => self.on_failure(was_half_open),
        }

        result
    }

    fn on_success(&self, was_half_open: bool) {
        self.counters.successful_calls.fetch_add(1, Ordering::Relaxed);
        if was_half_open {
            let successes = self.counters.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
            if successes >= self.config.success_threshold
                && self
                    .counters
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                self.counters.failure_count.store(0, Ordering::Release);
                tracing::info!(circuit = %self.name, "circuit breaker closed");
            }
        } else {
            self.counters.failure_count.store(0, Ordering::Release);
        }
    }

    fn on_failure(&self, was_half_open: bool) {
        self.counters.failed_calls.fetch_add(1, Ordering::Relaxed);
        let failures = self.counters.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        if was_half_open {
            if self
                .counters
                .state
                .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.counters.last_failure_millis.store(self.now_millis(), Ordering::Release);
                tracing::warn!(circuit = %self.name, "circuit breaker probe failed, reopening");
            }
            return;
        }

        if failures >= self.config.failure_threshold
            && self
                .counters
                .state
                .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.counters.last_failure_millis.store(self.now_millis(), Ordering::Release);
            tracing::error!(circuit = %self.name, failures, threshold = self.config.failure_threshold, "circuit breaker opened");
        }
    }

    /// Force the breaker open administratively, as if recovery just started.
    pub fn force_open(&self) {
        self.counters.state.store(STATE_OPEN, Ordering::Release);
        self.counters.last_failure_millis.store(self.now_millis(), Ordering::Release);
    }

    /// Reset the breaker to a fresh `CLOSED` state, clearing counters.
    pub fn reset(&self) {
        self.counters.state.store(STATE_CLOSED, Ordering::Release);
        self.counters.failure_count.store(0, Ordering::Release);
        self.counters.half_open_successes.store(0, Ordering::Release);
        self.counters.half_open_calls.store(0, Ordering::Release);
        self.counters.last_failure_millis.store(0, Ordering::Release);
    }

    /// Record a failure observed outside of `execute` (e.g. a caller-reported
    /// MCP connection failure). Used by the connection manager's failure path.
    pub fn record_external_failure(&self) {
        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        self.on_failure(self.state() == CircuitState::HalfOpen);
    }

    pub fn get_status(&self) -> CircuitStatus {
        let total = self.counters.total_calls.load(Ordering::Relaxed);
        let success = self.counters.successful_calls.load(Ordering::Relaxed);
        CircuitStatus {
            name: self.name.to_string(),
            state: self.state(),
            total_calls: total,
            successful_calls: success,
            failed_calls: self.counters.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.counters.rejected_calls.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            failure_count: self.counters.failure_count.load(Ordering::Acquire),
            success_rate: success as f64 / total.max(1) as f64,
        }
    }

    pub fn last_failure_elapsed(&self) -> Duration {
        let last = self.counters.last_failure_millis.load(Ordering::Acquire);
        if last == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.now_millis().saturating_sub(last))
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}
