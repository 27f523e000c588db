//! Retry, circuit-breaker and endpoint-fallback wrappers around vendor calls.
//!
//! Every adapter call that should survive transient failures goes through a
//! [`RecoveryEngine`]. The engine never imposes timeouts itself; it reacts to
//! the classified result of each attempt.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use relay_core::{LogLevel, LogSink, RetryConfig};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, ProviderError, codes};

/// Jitter spreads a delay by up to this fraction in either direction.
const JITTER_FRACTION: f64 = 0.25;

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// A call handed to a breaker: the wrapped operation with its value stashed
/// elsewhere, so only the failure crosses the seam.
pub type BreakerCall<'a> = Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>>;

/// A guard that short-circuits calls to a dependency known to be failing.
///
/// `call` either runs `f` and returns its error, or refuses without running
/// it. The breaker owns its state machine.
#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    async fn call(&self, f: BreakerCall<'_>) -> Result<(), ProviderError>;
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Opens after `threshold` consecutive transient failures and lets a trial
/// call through once `cooldown` has elapsed.
#[derive(Debug)]
pub struct ConsecutiveFailureBreaker {
    vendor: String,
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl ConsecutiveFailureBreaker {
    pub fn new(vendor: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            vendor: vendor.into(),
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// `true` while calls must not reach the network.
    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        match state.opened_at {
            Some(at) => at.elapsed() < self.cooldown,
            None => false,
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.threshold {
            // Re-arms the cooldown when a half-open trial fails.
            state.opened_at = Some(Instant::now());
        }
    }
}

#[async_trait]
impl CircuitBreaker for ConsecutiveFailureBreaker {
    async fn call(&self, f: BreakerCall<'_>) -> Result<(), ProviderError> {
        if self.is_open() {
            return Err(ProviderError::new(
                self.vendor.clone(),
                ErrorKind::Server,
                codes::CIRCUIT_OPEN,
                "circuit breaker is open",
                true,
            ));
        }
        let result = f.await;
        match &result {
            Ok(()) => self.record_success(),
            // Only failures that say something about the dependency's health
            // count against it.
            Err(err) if err.kind.is_transient() && !err.is_cancelled() => self.record_failure(),
            Err(_) => {}
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RecoveryEngine {
    vendor: String,
    config: RetryConfig,
    sink: Arc<dyn LogSink>,
}

impl RecoveryEngine {
    pub fn new(vendor: impl Into<String>, config: RetryConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            vendor: vendor.into(),
            config,
            sink,
        }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retry iff the error is retryable, of a transient kind, listed in the
    /// policy (by code substring or exact status) and attempts remain.
    pub fn should_retry(&self, err: &ProviderError, attempt: u32) -> bool {
        if !err.retryable || !err.kind.is_transient() || attempt >= self.config.max_retries {
            return false;
        }
        let status = err.status.map(|s| s.to_string());
        self.config.retryable_errors.iter().any(|entry| {
            !entry.is_empty()
                && (err.code.contains(entry.as_str()) || status.as_deref() == Some(entry.as_str()))
        })
    }

    /// `Retry-After` when the vendor sent one, otherwise
    /// `min(initial × factor^attempt, max)`, optionally jittered.
    pub fn retry_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(after) = retry_after.filter(|d| !d.is_zero()) {
            return after;
        }

        let cap = self.config.max_delay;
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.config.initial_delay.as_nanos() as f64 * self.config.backoff_factor.powi(exp);
        let base = if !nanos.is_finite() || nanos >= cap.as_nanos() as f64 {
            cap
        } else {
            Duration::from_nanos(nanos.round() as u64)
        };

        if self.config.jitter {
            let spread = rand::rng().random_range((1.0 - JITTER_FRACTION)..=(1.0 + JITTER_FRACTION));
            base.mul_f64(spread)
        } else {
            base
        }
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    /// Sleeps between attempts end early when `cancel` fires.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::cancelled(&self.vendor));
            }

            let err = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.log(
                            LogLevel::Info,
                            "call recovered after retries",
                            relay_core::fields!("attempts" => attempt + 1),
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.should_retry(&err, attempt) {
                if attempt > 0 || err.retryable {
                    self.log(
                        LogLevel::Error,
                        "giving up",
                        relay_core::fields!(
                            "attempts" => attempt + 1,
                            "code" => err.code.clone(),
                            "kind" => err.kind.to_string(),
                        ),
                    );
                }
                return Err(err);
            }

            let delay = self.retry_delay(attempt, err.retry_after);
            self.log(
                LogLevel::Warning,
                "retrying after failure",
                relay_core::fields!(
                    "attempt" => attempt + 1,
                    "code" => err.code.clone(),
                    "delay_ms" => delay.as_millis() as u64,
                ),
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::cancelled(&self.vendor)),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Run `op` once through `breaker`. A breaker that refuses the call
    /// returns its own error and `op` never runs.
    pub async fn execute_with_breaker<T, F, Fut>(
        &self,
        breaker: &dyn CircuitBreaker,
        op: F,
    ) -> Result<T, ProviderError>
    where
        T: Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let mut value = None;
        let fut = op();
        let outcome = breaker
            .call(Box::pin(async {
                let v = fut.await?;
                value = Some(v);
                Ok::<(), ProviderError>(())
            }))
            .await;

        match (outcome, value) {
            (Ok(()), Some(value)) => Ok(value),
            (Err(err), _) => {
                if err.code == codes::CIRCUIT_OPEN {
                    self.log(LogLevel::Warning, "circuit open, call short-circuited", relay_core::fields!());
                }
                Err(err)
            }
            (Ok(()), None) => Err(ProviderError::new(
                self.vendor.clone(),
                ErrorKind::Server,
                codes::CIRCUIT_OPEN,
                "circuit breaker skipped the call without an error",
                true,
            )),
        }
    }

    /// Try each endpoint in order. The first success wins; otherwise the
    /// last failure is returned.
    ///
    /// An empty list is a `NO_ENDPOINTS` error rather than a silent success
    /// with no value: callers get no `T` to return, and a missing endpoint
    /// list is a configuration mistake.
    pub async fn execute_with_fallback<T, E, F, Fut>(
        &self,
        endpoints: &[E],
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        E: AsRef<str>,
        F: FnMut(&E) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_err = None;
        for (index, endpoint) in endpoints.iter().enumerate() {
            match op(endpoint).await {
                Ok(value) => {
                    if index > 0 {
                        self.log(
                            LogLevel::Info,
                            "fallback endpoint succeeded",
                            relay_core::fields!("endpoint" => endpoint.as_ref()),
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    self.log(
                        LogLevel::Warning,
                        "endpoint failed",
                        relay_core::fields!("endpoint" => endpoint.as_ref(), "code" => err.code.clone()),
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ProviderError::new(
                self.vendor.clone(),
                ErrorKind::InvalidRequest,
                codes::NO_ENDPOINTS,
                "no fallback endpoints configured",
                false,
            )
        }))
    }

    fn log(&self, level: LogLevel, message: &str, mut fields: relay_core::Fields) {
        fields.insert("vendor".into(), self.vendor.clone().into());
        self.sink.log(level, message, &fields);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
