//! Per-operation circuit breaking.
//!
//! Each [`OperationKey`] owns one [`CircuitBreaker`], created lazily by the
//! [`BreakerRegistry`] and kept for the registry's lifetime. Every caller of
//! the same operation shares that breaker; its counters sit behind a mutex.
//!
//! ```text
//!            failures >= threshold              recovery timeout elapsed
//!   Closed ------------------------> Open ------------------------------> HalfOpen
//!     ^                               ^                                     |
//!     |        probe succeeded        |           probe failed              |
//!     +-------------------------------+-------------------------------------+
//! ```

use dynrpc_common::{ErrorKind, Result, RpcError};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Normal operation, failures are counted
    Closed,
    /// Tripped, calls are short-circuited
    Open,
    /// One probe call is let through to test recovery
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive counted failures that trip the breaker
    pub failure_threshold: u32,
    /// Time after the last failure before a probe is allowed
    pub recovery_timeout: Duration,
    /// Error kinds that count as failures. Anything else passes through
    /// without touching the breaker.
    pub counted_errors: BTreeSet<ErrorKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(10),
            counted_errors: BTreeSet::from([
                ErrorKind::Transport,
                ErrorKind::Timeout,
                ErrorKind::Registry,
                ErrorKind::NoHealthyInstance,
                ErrorKind::EndpointMetadata,
            ]),
        }
    }
}

impl BreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_counted_errors(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.counted_errors = kinds.into_iter().collect();
        self
    }

    pub fn counts(&self, err: &RpcError) -> bool {
        self.counted_errors.contains(&err.kind())
    }
}

/// Identity of a guarded operation: the owning component and the operation
/// within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OperationKey {
    pub component: String,
    pub operation: String,
}

impl OperationKey {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.operation)
    }
}

/// Replacement outcome for a call the breaker did not let succeed: invoked
/// with the counted failure, or with `CircuitOpen` while the breaker is open.
pub type Fallback<T> = Arc<dyn Fn(&OperationKey, RpcError) -> Result<T> + Send + Sync>;

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub key: OperationKey,
    pub state: CircuitState,
    pub failure_count: u32,
    /// Milliseconds since the last counted failure, if any.
    pub since_last_failure_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

enum Admission {
    Allowed { probe: bool },
    Rejected,
}

/// Failure tracker for one operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: OperationKey,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(key: OperationKey, config: BreakerConfig) -> Self {
        Self {
            key,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            key: self.key.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            since_last_failure_ms: inner.last_failure.map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Forces the breaker back to closed with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    /// Runs `operation` under the breaker.
    ///
    /// - Closed: the operation runs; counted failures accumulate.
    /// - Open: the operation is not run until the recovery timeout has passed
    ///   since the last failure. The call resolves to the fallback, or to
    ///   `CircuitOpen` without one.
    /// - HalfOpen: exactly one caller runs the operation as a probe; others
    ///   are short-circuited as if open.
    ///
    /// A counted failure is handed to the fallback when one is given, and
    /// returned otherwise. Failures outside the allow-list are returned
    /// untouched and leave the breaker as it was.
    pub async fn guard<T, F, Fut>(&self, operation: F, fallback: Option<&Fallback<T>>) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let probe = match self.admit() {
            Admission::Allowed { probe } => probe,
            Admission::Rejected => {
                return self.fallback_or(RpcError::CircuitOpen(self.key.to_string()), fallback);
            }
        };

        // Releases the probe slot if the call is dropped before it finishes.
        let mut probe_guard = ProbeGuard {
            breaker: self,
            armed: probe,
        };

        let result = operation().await;
        probe_guard.armed = false;

        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) if self.config.counts(&err) => {
                self.record_failure(probe);
                self.fallback_or(err, fallback)
            }
            Err(err) => {
                if probe {
                    self.release_probe();
                }
                Err(err)
            }
        }
    }

    fn fallback_or<T>(&self, err: RpcError, fallback: Option<&Fallback<T>>) -> Result<T> {
        match fallback {
            Some(fallback) => {
                warn!(operation = %self.key, error = %err, "Circuit breaker invoking fallback");
                fallback(&self.key, err)
            }
            None => Err(err),
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed { probe: false },
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(operation = %self.key, "Circuit half-open, allowing probe");
                    Admission::Allowed { probe: true }
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                Admission::Allowed { probe: true }
            }
            CircuitState::HalfOpen => Admission::Rejected,
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(operation = %self.key, "Circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if probe || inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.probe_in_flight = false;
            error!(operation = %self.key, "Probe failed, circuit reopened");
        } else if inner.state == CircuitState::Closed && inner.failure_count >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            error!(
                operation = %self.key,
                failures = inner.failure_count,
                "Circuit opened"
            );
        }
    }

    fn release_probe(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
    }
}

struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe();
        }
    }
}

/// Lazily created breakers, one per operation key.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<OperationKey, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// The breaker for `key`, created on first use.
    pub fn breaker(&self, key: &OperationKey) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key.clone(), self.config.clone())))
            .clone()
    }

    /// Snapshots of every breaker created so far, ordered by key.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<_> = {
            let map = self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.values().cloned().collect()
        };
        let mut snapshots: Vec<_> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            OperationKey::new("RpcClient", "Predict"),
            BreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_recovery_timeout(Duration::from_secs(10)),
        )
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<u32> {
        breaker
            .guard(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RpcError::Transport("connection refused".into()))
                },
                None,
            )
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<u32> {
        breaker
            .guard(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                },
                None,
            )
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_short_circuit_probe_close() {
        let breaker = breaker(3);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(matches!(fail(&breaker, &calls).await, Err(RpcError::Transport(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Within the recovery window the operation is not invoked.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(matches!(succeed(&breaker, &calls).await, Err(RpcError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.snapshot().since_last_failure_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_and_restarts_window() {
        let breaker = breaker(1);
        let calls = AtomicU32::new(0);

        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(matches!(succeed(&breaker, &calls).await, Err(RpcError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_probe_in_half_open() {
        let breaker = Arc::new(breaker(1));
        let calls = Arc::new(AtomicU32::new(0));
        let _ = fail(&breaker, &calls).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let breaker = breaker.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                breaker
                    .guard(
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            let _ = release_rx.await;
                            Ok(1)
                        },
                        None,
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(matches!(succeed(&breaker, &calls).await, Err(RpcError::CircuitOpen(_))));

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_one_fallback() {
        let breaker = breaker(1);
        let calls = AtomicU32::new(0);
        let fallback: Fallback<u32> = Arc::new(|_key, _err| Ok(99));

        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.guard(|| async { Ok(1) }, Some(&fallback)).await;
        assert_eq!(result.unwrap(), 99);
    }

    #[tokio::test]
    async fn test_counted_failure_uses_fallback() {
        let breaker = breaker(5);
        let fallback: Fallback<u32> =
            Arc::new(|key, err| Err(RpcError::ServiceUnavailable(format!("{}: {}", key, err))));

        let result = breaker
            .guard(|| async { Err(RpcError::Timeout(100)) }, Some(&fallback))
            .await;
        assert!(matches!(result, Err(RpcError::ServiceUnavailable(ref m)) if m.starts_with("RpcClient/Predict")));
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_uncounted_errors_bypass_breaker() {
        let breaker = breaker(1);
        let fallback: Fallback<u32> = Arc::new(|_key, _err| Ok(99));

        for _ in 0..3 {
            let result = breaker
                .guard(|| async { Err(RpcError::InvalidRequest("bad".into())) }, Some(&fallback))
                .await;
            assert!(matches!(result, Err(RpcError::InvalidRequest(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_success_resets_count() {
        let breaker = breaker(3);
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.failure_count(), 2);
        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.failure_count(), 0);
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_shares_breakers_per_key() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.breaker(&OperationKey::new("RpcClient", "A"));
        let a2 = registry.breaker(&OperationKey::new("RpcClient", "A"));
        let b = registry.breaker(&OperationKey::new("RpcClient", "B"));
        assert!(Arc::ptr_eq(&a, &a2));
        assert!(!Arc::ptr_eq(&a, &b));

        let keys: Vec<_> = registry.snapshots().into_iter().map(|s| s.key.operation).collect();
        assert_eq!(keys, ["A", "B"]);
    }

    #[test]
    fn test_config_default() {
        let config = BreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(10));
        assert!(config.counts(&RpcError::Transport("x".into())));
        assert!(!config.counts(&RpcError::MethodNotFound("x".into())));
    }
}
