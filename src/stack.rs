//! Resilience stack builder for composing policies.
//!
//! Doppler uses this to compose a single syslog write attempt out of
//! independently testable layers: retry, circuit breaker, timeout.

use crate::{CircuitBreakerConfig, CircuitBreakerPolicy, ResilienceError, RetryPolicy, TimeoutPolicy};
use std::future::Future;
use std::time::Duration;

#[derive(Clone)]
pub struct ResilienceStack<E> {
    pub(crate) timeout: TimeoutPolicy,
    pub(crate) circuit_breaker: CircuitBreakerPolicy,
    pub(crate) retry: RetryPolicy<E>,
}

impl<E> ResilienceStack<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn builder() -> ResilienceStackBuilder<E> {
        ResilienceStackBuilder::new()
    }

    /// Stack order: Retry → CircuitBreaker → Timeout → Operation.
    /// Each layer wraps the next, building from inside out.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        use std::sync::{Arc, Mutex};

        let op_cell = Arc::new(Mutex::new(operation));

        self.retry
            .execute(|| {
                let op = op_cell.clone();
                let circuit_breaker = self.circuit_breaker.clone();
                let timeout = self.timeout.clone();

                async move {
                    circuit_breaker
                        .execute(|| {
                            let op = op.clone();
                            let timeout = timeout.clone();
                            async move {
                                timeout
                                    .execute(|| {
                                        let mut op = op.lock().unwrap_or_else(|p| p.into_inner());
                                        op()
                                    })
                                    .await
                            }
                        })
                        .await
                }
            })
            .await
    }
}

pub struct ResilienceStackBuilder<E> {
    timeout: Option<TimeoutPolicy>,
    circuit_breaker: Option<CircuitBreakerPolicy>,
    retry: Option<RetryPolicy<E>>,
}

impl<E> ResilienceStackBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { timeout: None, circuit_breaker: None, retry: None }
    }

    pub fn timeout(mut self, duration: Duration) -> Result<Self, crate::TimeoutError> {
        self.timeout = Some(TimeoutPolicy::new(duration)?);
        Ok(self)
    }

    pub fn circuit_breaker(mut self, failures: usize, recovery_timeout: Duration) -> Self {
        self.circuit_breaker = Some(CircuitBreakerPolicy::new(failures, recovery_timeout));
        self
    }

    pub fn circuit_breaker_with_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(CircuitBreakerPolicy::with_config(config));
        self
    }

    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn build(self) -> ResilienceStack<E> {
        ResilienceStack {
            timeout: self.timeout.unwrap_or_else(|| {
                TimeoutPolicy::new(Duration::from_secs(30)).expect("30s is a valid timeout")
            }),
            circuit_breaker: self
                .circuit_breaker
                .unwrap_or_else(|| CircuitBreakerPolicy::new(5, Duration::from_secs(60))),
            retry: self.retry.unwrap_or_else(|| {
                RetryPolicy::builder().max_attempts(1).expect("1 is a valid attempt count").build()
            }),
        }
    }
}

impl<E> Default for ResilienceStackBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
