//! Circuit breaker for resilient external calls.
//!
//! Each named breaker is a small state machine wrapped around an async
//! operation:
//!
//! ```text
//! closed ──(failure_threshold consecutive failures)──▶ open
//! open ──(recovery_timeout elapsed)──▶ half-open
//! half-open ──(success_threshold successes)──▶ closed
//! half-open ──(any failure)──▶ open
//! ```
//!
//! While open, calls are rejected immediately with
//! [`CircuitBreakerError::Open`] — the wrapped operation is never started.
//! Every call is additionally bounded by a request timeout; a timeout
//! counts as a failure and increments the timeout counter. State checks and
//! transitions are guarded by a per-breaker mutex so they are linearizable.
//!
//! # Example
//!
//! ```rust,no_run
//! use sam::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn demo() {
//! let breaker = CircuitBreaker::new("llm", CircuitBreakerConfig::default());
//! let result: Result<u32, _> = breaker
//!     .call(async { Ok::<_, std::io::Error>(42) })
//!     .await;
//! # let _ = result;
//! # }
//! ```

use lazy_static::lazy_static;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// States of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing; reject all calls.
    Open,
    /// Probing whether the service recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{}", s)
    }
}

/// Tunables for one breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long to stay open before admitting a probe.
    pub recovery_timeout: Duration,
    /// Successes needed to close again from half-open.
    pub success_threshold: u32,
    /// Deadline applied to every wrapped call.
    pub request_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerStats {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    total_requests: u64,
    total_failures: u64,
    total_timeouts: u64,
}

impl BreakerStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            total_requests: 0,
            total_failures: 0,
            total_timeouts: 0,
        }
    }
}

/// Observable snapshot for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatsSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub failure_rate: f64,
    /// Seconds since the last counted failure, if any.
    pub seconds_since_last_failure: Option<f64>,
}

/// Error returned from [`CircuitBreaker::call`].
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call before issuing the request.
    Open(String),
    /// The wrapped call exceeded the request timeout.
    Timeout(String),
    /// The wrapped call itself failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::Open(name) => {
                write!(f, "Circuit breaker '{}' is open", name)
            }
            CircuitBreakerError::Timeout(name) => {
                write!(f, "Circuit breaker '{}' request timed out", name)
            }
            CircuitBreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CircuitBreakerError<E> {}

/// Per-name fail-fast wrapper around external calls.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    stats: Mutex<BreakerStats>,
}

impl CircuitBreaker {
    /// Create a breaker with the given name and tunables.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            "Circuit breaker '{}' initialized (failure_threshold: {}, recovery: {:?})",
            name, config.failure_threshold, config.recovery_timeout
        );
        Self {
            name,
            config,
            stats: Mutex::new(BreakerStats::new()),
        }
    }

    /// The breaker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `fut` with breaker protection and the configured timeout.
    ///
    /// Rejected calls still count toward `total_requests` so the rejection
    /// rate is observable.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        {
            let mut stats = self.stats.lock().await;
            self.check_state(&mut stats);
            stats.total_requests += 1;

            if stats.state == CircuitState::Open {
                warn!("Circuit breaker '{}' is OPEN, rejecting call", self.name);
                return Err(CircuitBreakerError::Open(self.name.clone()));
            }
        }

        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                warn!("Circuit breaker '{}' - failure: {}", self.name, e);
                self.on_failure(false).await;
                Err(CircuitBreakerError::Inner(e))
            }
            Err(_) => {
                warn!("Circuit breaker '{}' - request timeout", self.name);
                self.on_failure(true).await;
                Err(CircuitBreakerError::Timeout(self.name.clone()))
            }
        }
    }

    /// Current state (after applying any pending open → half-open
    /// transition).
    pub async fn state(&self) -> CircuitState {
        let mut stats = self.stats.lock().await;
        self.check_state(&mut stats);
        stats.state
    }

    /// Snapshot the breaker's counters.
    pub async fn stats(&self) -> CircuitBreakerStatsSnapshot {
        let stats = self.stats.lock().await;
        CircuitBreakerStatsSnapshot {
            name: self.name.clone(),
            state: stats.state,
            failure_count: stats.failure_count,
            total_requests: stats.total_requests,
            total_failures: stats.total_failures,
            total_timeouts: stats.total_timeouts,
            failure_rate: if stats.total_requests > 0 {
                stats.total_failures as f64 / stats.total_requests as f64
            } else {
                0.0
            },
            seconds_since_last_failure: stats
                .last_failure_time
                .map(|t| t.elapsed().as_secs_f64()),
        }
    }

    fn check_state(&self, stats: &mut BreakerStats) {
        if stats.state == CircuitState::Open {
            let recovered = stats
                .last_failure_time
                .map(|t| t.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true);
            if recovered {
                info!("Circuit breaker '{}' transitioning to HALF_OPEN", self.name);
                stats.state = CircuitState::HalfOpen;
                stats.success_count = 0;
            }
        }
    }

    async fn on_success(&self) {
        let mut stats = self.stats.lock().await;
        match stats.state {
            CircuitState::HalfOpen => {
                stats.success_count += 1;
                if stats.success_count >= self.config.success_threshold {
                    info!("Circuit breaker '{}' transitioning to CLOSED", self.name);
                    stats.state = CircuitState::Closed;
                    stats.failure_count = 0;
                }
            }
            CircuitState::Closed => {
                stats.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self, timed_out: bool) {
        let mut stats = self.stats.lock().await;
        stats.failure_count += 1;
        stats.total_failures += 1;
        if timed_out {
            stats.total_timeouts += 1;
        }
        stats.last_failure_time = Some(Instant::now());

        match stats.state {
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker '{}' transitioning to OPEN (half-open failure)",
                    self.name
                );
                stats.state = CircuitState::Open;
            }
            CircuitState::Closed if stats.failure_count >= self.config.failure_threshold => {
                warn!("Circuit breaker '{}' transitioning to OPEN", self.name);
                stats.state = CircuitState::Open;
            }
            _ => {}
        }
    }
}

lazy_static! {
    static ref BREAKERS: StdMutex<HashMap<String, Arc<CircuitBreaker>>> =
        StdMutex::new(HashMap::new());
}

/// Get or create a process-wide breaker by name.
///
/// The config is only applied on first creation; later callers share the
/// existing breaker.
pub fn get_circuit_breaker(name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
    let mut breakers = BREAKERS.lock().unwrap_or_else(|e| e.into_inner());
    breakers
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
        .clone()
}

/// Snapshot every registered breaker, for health endpoints.
pub async fn all_circuit_breaker_stats() -> Vec<CircuitBreakerStatsSnapshot> {
    let breakers: Vec<Arc<CircuitBreaker>> = {
        let map = BREAKERS.lock().unwrap_or_else(|e| e.into_inner());
        map.values().cloned().collect()
    };
    let mut out = Vec::with_capacity(breakers.len());
    for b in breakers {
        out.push(b.stats().await);
    }
    out
}

/// Drop every registered breaker. Test-only escape hatch so suites start
/// from a clean registry.
pub fn reset_circuit_breakers() {
    let mut breakers = BREAKERS.lock().unwrap_or_else(|e| e.into_inner());
    breakers.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(50),
            success_threshold: 1,
            request_timeout: Duration::from_millis(100),
        }
    }

    async fn fail(b: &CircuitBreaker) {
        let _ = b
            .call(async { Err::<(), _>(std::io::Error::other("down")) })
            .await;
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let b = CircuitBreaker::new("t1", fast_config());
        assert_eq!(b.state().await, CircuitState::Closed);
        fail(&b).await;
        assert_eq!(b.state().await, CircuitState::Closed);
        fail(&b).await;
        assert_eq!(b.state().await, CircuitState::Open);

        // Rejected immediately, operation never runs
        let result = b.call(async { Ok::<_, std::io::Error>(1) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
    }

    #[tokio::test]
    async fn test_half_open_probe_then_close() {
        let b = CircuitBreaker::new("t2", fast_config());
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(b.state().await, CircuitState::HalfOpen);

        let ok = b.call(async { Ok::<_, std::io::Error>(7) }).await;
        assert!(ok.is_ok());
        assert_eq!(b.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let b = CircuitBreaker::new("t3", fast_config());
        fail(&b).await;
        fail(&b).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(b.state().await, CircuitState::HalfOpen);
        fail(&b).await;
        assert_eq!(b.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let b = CircuitBreaker::new("t4", fast_config());
        let result = b
            .call(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, std::io::Error>(1)
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Timeout(_))));

        let stats = b.stats().await;
        assert_eq!(stats.total_timeouts, 1);
        assert_eq!(stats.total_failures, 1);
    }

    #[tokio::test]
    async fn test_rejections_count_requests() {
        let b = CircuitBreaker::new("t5", fast_config());
        fail(&b).await;
        fail(&b).await;
        let _ = b.call(async { Ok::<_, std::io::Error>(1) }).await;
        let stats = b.stats().await;
        assert_eq!(stats.total_requests, 3);
    }
}
