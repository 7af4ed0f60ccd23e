//! Per-Target Circuit Breaker collaborator contract (spec §4.5) and a
//! default sliding-window implementation.
//!
//! The breaker is treated as an opaque decision object by the rest of the
//! crate: the Routing Transport only ever calls `execute_with` and
//! `classify`. Internal tripping policy (response ratios, recovery
//! timeouts) is this module's own business, mirroring the closed/open/
//! half-open state machine in `backworks-proxy-plugin`'s
//! `circuit_breaker.rs`.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Something that can actually deliver a request, wrapped by a breaker.
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error>;
}

/// A `reqwest::Client` is the natural delegate: it already knows how to
/// execute a built `reqwest::Request`.
#[async_trait]
impl Delegate for reqwest::Client {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        reqwest::Client::execute(self, request).await
    }
}

/// Errors flowing out of `Breaker::execute_with`.
#[derive(Debug)]
pub enum BreakerError {
    /// The breaker was open and short-circuited without invoking the delegate.
    Open,
    /// The delegate was invoked and returned this error.
    Delivery(reqwest::Error),
}

/// Capability set for a per-target circuit breaker (spec §4.5).
#[async_trait]
pub trait Breaker: Send + Sync {
    /// Runs `request` through `delegate` when closed or half-open; short-circuits
    /// with `BreakerError::Open` without invoking the delegate when open.
    async fn execute_with(
        &self,
        request: reqwest::Request,
        delegate: &dyn Delegate,
    ) -> Result<reqwest::Response, BreakerError>;

    /// True iff `error` is this breaker's own open-sentinel rejection.
    fn classify(&self, error: &BreakerError) -> bool {
        matches!(error, BreakerError::Open)
    }
}

/// Creates breakers on demand. Injected into the `BreakerRegistry` so
/// alternate tripping policies can be swapped without touching registry
/// logic (mirrors the Go original's `newCBFn func() (*OxyCircuitBreakerShim, error)`).
pub trait BreakerFactory: Send + Sync {
    fn new_breaker(&self) -> crate::error::RoutingResult<Box<dyn Breaker>>;
}

/// Sliding-window closed/open/half-open breaker: opens after
/// `failure_threshold` consecutive failures once `request_volume_threshold`
/// requests have been observed, half-opens after `recovery_timeout`, and
/// closes again once the half-open trial succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowedBreakerPolicy {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub request_volume_threshold: u32,
    pub success_rate_threshold: f64,
}

impl Default for WindowedBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            request_volume_threshold: 1,
            success_rate_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Window {
    requests: u32,
    failures: u32,
    successes: u32,
}

impl Window {
    fn fresh() -> Self {
        Self {
            requests: 0,
            failures: 0,
            successes: 0,
        }
    }

    fn record_success(&mut self) {
        self.requests += 1;
        self.successes += 1;
    }

    fn record_failure(&mut self) {
        self.requests += 1;
        self.failures += 1;
    }

    fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }
}

struct Inner {
    state: State,
    window: Window,
    last_state_change: Instant,
}

/// Default `Breaker` implementation, grounded on
/// `backworks-proxy-plugin/src/circuit_breaker.rs`'s sliding-window design.
pub struct WindowedBreaker {
    policy: WindowedBreakerPolicy,
    inner: RwLock<Inner>,
}

impl WindowedBreaker {
    pub fn new(policy: WindowedBreakerPolicy) -> Self {
        Self {
            policy,
            inner: RwLock::new(Inner {
                state: State::Closed,
                window: Window::fresh(),
                last_state_change: Instant::now(),
            }),
        }
    }

    /// Returns true if the circuit currently admits a request, transitioning
    /// Open -> HalfOpen if the recovery timeout has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                if inner.last_state_change.elapsed() >= self.policy.recovery_timeout {
                    tracing::info!("breaker half-open, testing recovery");
                    inner.state = State::HalfOpen;
                    inner.window = Window::fresh();
                    inner.last_state_change = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.write();
        inner.window.record_success();
        if inner.state == State::HalfOpen {
            let enough = inner.window.requests >= self.policy.request_volume_threshold;
            let recovered = inner.window.success_rate() >= self.policy.success_rate_threshold;
            if enough && recovered {
                tracing::info!("breaker closed, target recovered");
                inner.state = State::Closed;
                inner.window = Window::fresh();
                inner.last_state_change = Instant::now();
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.write();
        inner.window.record_failure();
        match inner.state {
            State::Closed => {
                let enough = inner.window.requests >= self.policy.request_volume_threshold;
                if enough && inner.window.failures >= self.policy.failure_threshold {
                    tracing::warn!("breaker opened after {} consecutive failures", inner.window.failures);
                    inner.state = State::Open;
                    inner.last_state_change = Instant::now();
                }
            }
            State::HalfOpen => {
                tracing::warn!("breaker reopened: half-open trial failed");
                inner.state = State::Open;
                inner.window = Window::fresh();
                inner.last_state_change = Instant::now();
            }
            State::Open => {}
        }
    }

    #[cfg(test)]
    fn force_open(&self) {
        let mut inner = self.inner.write();
        inner.state = State::Open;
        inner.last_state_change = Instant::now();
    }

    /// Test helper: records a failure without going through the delegate.
    #[cfg(test)]
    pub fn force_mark_failure(&self) {
        self.on_failure();
    }

    /// Test helper: records a success without going through the delegate.
    #[cfg(test)]
    pub fn force_mark_success(&self) {
        self.on_success();
    }

    #[cfg(test)]
    fn current_state(&self) -> State {
        self.inner.read().state
    }
}

#[async_trait]
impl Breaker for WindowedBreaker {
    async fn execute_with(
        &self,
        request: reqwest::Request,
        delegate: &dyn Delegate,
    ) -> Result<reqwest::Response, BreakerError> {
        if !self.admit() {
            return Err(BreakerError::Open);
        }

        match delegate.send(request).await {
            Ok(response) => {
                self.on_success();
                Ok(response)
            }
            Err(error) => {
                self.on_failure();
                Err(BreakerError::Delivery(error))
            }
        }
    }
}

/// Builds `WindowedBreaker`s from a single shared policy.
pub struct WindowedBreakerFactory {
    policy: WindowedBreakerPolicy,
}

impl WindowedBreakerFactory {
    pub fn new(policy: WindowedBreakerPolicy) -> Self {
        Self { policy }
    }
}

impl BreakerFactory for WindowedBreakerFactory {
    fn new_breaker(&self) -> crate::error::RoutingResult<Box<dyn Breaker>> {
        Ok(Box::new(WindowedBreaker::new(self.policy.clone())))
    }
}
