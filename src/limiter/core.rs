//! Per-endpoint admission control with retry.
//!
//! The [`RateLimiter`] wraps caller operations in three admission gates
//! (sliding window, concurrency cap, minimum spacing) and an exponential
//! backoff retry loop. Endpoints are fully independent; requests for the
//! same endpoint are admitted in first-come order.
//!
//! # Example
//!
//! ```no_run
//! use scrape_governor::{RateLimiter, Result};
//!
//! # async fn example() -> Result<()> {
//! let limiter = RateLimiter::with_market_defaults();
//!
//! let body = limiter
//!     .execute("market-api", || async {
//!         // fetch a price overview from the provider
//!         Ok(String::from("..."))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Admission
//!
//! A waiter holds the endpoint's turn while it evaluates gates, so the
//! gates are checked against state only the waiter itself can change:
//!
//! 1. Sliding window: if `max_requests` admissions happened within the
//!    trailing `window`, sleep until the oldest rolls out.
//! 2. Concurrency: acquire one of `max_concurrent` permits; held until the
//!    operation completes.
//! 3. Min delay: sleep out the remainder of `min_delay` since the last
//!    admission.
//!
//! Only then is the admission recorded and the operation started. A retry
//! goes through all three gates again and counts as a fresh admission.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::endpoint::EndpointState;
use super::policy::{EndpointPolicy, PolicySet};

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the limiter.
struct LimiterInner {
    /// Named policies plus the default.
    policies: RwLock<PolicySet>,

    /// Per-endpoint admission state, created on first use.
    endpoints: Mutex<FxHashMap<String, Arc<EndpointState>>>,
}

// ============================================================================
// RateLimiter
// ============================================================================

/// Per-endpoint admission control: sliding window, concurrency cap,
/// minimum spacing, and retry with exponential backoff.
///
/// Cheap to clone; clones share the same endpoint state.
///
/// The limiter never inspects or transforms an operation's result; it
/// only decides *when* the operation runs and whether to run it again.
#[derive(Clone)]
pub struct RateLimiter {
    /// Shared inner state.
    inner: Arc<LimiterInner>,
}

// ============================================================================
// RateLimiter - Display
// ============================================================================

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("endpoint_count", &self.endpoint_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RateLimiter - Constructors
// ============================================================================

impl RateLimiter {
    /// Creates a limiter from a validated policy set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Policy`] if any entry in the set is invalid.
    pub fn new(policies: PolicySet) -> Result<Self> {
        policies.validate()?;
        Ok(Self {
            inner: Arc::new(LimiterInner {
                policies: RwLock::new(policies),
                endpoints: Mutex::new(FxHashMap::default()),
            }),
        })
    }

    /// Creates a limiter with the game-market provider presets.
    #[must_use]
    pub fn with_market_defaults() -> Self {
        Self::new(PolicySet::market_defaults())
            .expect("market preset policies are valid")
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(PolicySet::default()).expect("default policy set is valid")
    }
}

// ============================================================================
// RateLimiter - Configuration
// ============================================================================

impl RateLimiter {
    /// Registers (or replaces) the policy for an endpoint.
    ///
    /// Takes effect when the endpoint's state is first created; an
    /// endpoint that already served traffic keeps its original policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Policy`] if the policy is invalid.
    pub fn register(&self, endpoint: impl Into<String>, policy: EndpointPolicy) -> Result<()> {
        let endpoint = endpoint.into();
        if self.inner.endpoints.lock().contains_key(&endpoint) {
            warn!(
                endpoint = %endpoint,
                "policy registered for an already-active endpoint; existing state keeps its policy"
            );
        }
        self.inner.policies.write().insert(endpoint, policy)
    }

    /// Returns the number of endpoints with live admission state.
    #[inline]
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.lock().len()
    }
}

// ============================================================================
// RateLimiter - Execute
// ============================================================================

impl RateLimiter {
    /// Runs `op` against `endpoint` under its admission policy.
    ///
    /// The operation may be invoked multiple times (retries), so it must
    /// be safe to repeat; the limiter does not deduplicate side effects.
    ///
    /// # Errors
    ///
    /// - [`Error::RetriesExhausted`] wrapping the final failure once the
    ///   retry budget is spent
    /// - [`Error::Policy`] if the endpoint's configured policy is invalid
    pub async fn execute<T, F, Fut>(&self, endpoint: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(endpoint, None, None, op).await
    }

    /// Runs `op` with a caller-supplied policy override.
    ///
    /// The override applies when the endpoint is first seen; an endpoint
    /// that is already active keeps its original policy (logged).
    ///
    /// # Errors
    ///
    /// Same as [`RateLimiter::execute`], plus [`Error::Policy`] if the
    /// override is invalid.
    pub async fn execute_with_policy<T, F, Fut>(
        &self,
        endpoint: &str,
        policy: EndpointPolicy,
        op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(endpoint, Some(policy), None, op).await
    }

    /// Runs `op`, bounding each admission wait by `ceiling`.
    ///
    /// The ceiling covers gate waiting only, not the operation itself or
    /// backoff sleeps.
    ///
    /// # Errors
    ///
    /// - [`Error::AdmissionTimeout`] if a gate wait exceeds `ceiling`
    /// - otherwise as [`RateLimiter::execute`]
    pub async fn execute_with_admission_timeout<T, F, Fut>(
        &self,
        endpoint: &str,
        ceiling: Duration,
        op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(endpoint, None, Some(ceiling), op).await
    }
}

// ============================================================================
// RateLimiter - Internal
// ============================================================================

impl RateLimiter {
    /// Admission + retry loop shared by the execute variants.
    async fn run<T, F, Fut>(
        &self,
        endpoint: &str,
        policy_override: Option<EndpointPolicy>,
        admission_ceiling: Option<Duration>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let state = self.endpoint_state(endpoint, policy_override.as_ref())?;
        let mut attempt: u32 = 0;

        loop {
            let permit = match admission_ceiling {
                Some(ceiling) => match timeout(ceiling, admit(&state)).await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return Err(Error::admission_timeout(
                            endpoint,
                            ceiling.as_millis() as u64,
                        ));
                    }
                },
                None => admit(&state).await,
            };

            trace!(endpoint = %endpoint, attempt, in_flight = state.in_flight(), "operation admitted");

            let result = op().await;
            drop(permit);

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= state.policy().retry_attempts {
                        let attempts = attempt + 1;
                        debug!(
                            endpoint = %endpoint,
                            attempts,
                            error = %err,
                            "retry budget exhausted"
                        );
                        return Err(Error::retries_exhausted(endpoint, attempts, err));
                    }

                    let delay = state.policy().backoff_delay(attempt);
                    debug!(
                        endpoint = %endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Returns the endpoint's admission state, creating it on first use.
    ///
    /// Lookup-then-create happens under one lock, so two concurrent
    /// callers never build two states for the same endpoint.
    fn endpoint_state(
        &self,
        endpoint: &str,
        policy_override: Option<&EndpointPolicy>,
    ) -> Result<Arc<EndpointState>> {
        let mut endpoints = self.inner.endpoints.lock();

        if let Some(state) = endpoints.get(endpoint) {
            if let Some(requested) = policy_override
                && requested != state.policy()
            {
                warn!(
                    endpoint = %endpoint,
                    "policy override ignored: endpoint already active with a different policy"
                );
            }
            return Ok(Arc::clone(state));
        }

        let policy = match policy_override {
            Some(requested) => {
                requested.validate(endpoint)?;
                requested.clone()
            }
            None => self.inner.policies.read().get(endpoint).clone(),
        };

        let state = Arc::new(EndpointState::new(endpoint, policy));
        endpoints.insert(endpoint.to_string(), Arc::clone(&state));
        debug!(endpoint = %endpoint, "endpoint admission state created");

        Ok(state)
    }
}

// ============================================================================
// Admission
// ============================================================================

/// Waits out all three gates in order and records the admission.
///
/// Runs entirely under the endpoint's turn lock: waiters queue FIFO, and
/// while this waiter sleeps, nobody else can admit on this endpoint. The
/// window can only drain, so an earlier gate result never goes stale.
async fn admit(state: &EndpointState) -> OwnedSemaphorePermit {
    let _turn = state.turn().lock().await;

    // Gate 1: sliding window.
    loop {
        match state.window_wait(Instant::now()) {
            None => break,
            Some(wait) => {
                trace!(endpoint = %state.key(), wait_ms = wait.as_millis() as u64, "window full");
                sleep(wait).await;
            }
        }
    }

    // Gate 2: concurrency slot.
    let permit = state
        .slots()
        .clone()
        .acquire_owned()
        .await
        .expect("admission semaphore is never closed");

    // Gate 3: minimum spacing.
    loop {
        match state.min_delay_wait(Instant::now()) {
            None => break,
            Some(wait) => sleep(wait).await,
        }
    }

    state.record_admission(Instant::now());
    permit
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use futures_util::future::join_all;

    fn limiter_with(endpoint: &str, policy: EndpointPolicy) -> RateLimiter {
        let limiter = RateLimiter::default();
        limiter.register(endpoint, policy).expect("valid policy");
        limiter
    }

    fn fast_policy() -> EndpointPolicy {
        EndpointPolicy::new()
            .with_max_requests(100)
            .with_window(Duration::from_secs(60))
            .with_min_delay(Duration::from_millis(1))
            .with_max_concurrent(16)
            .with_retry_attempts(2)
            .with_retry_base_delay(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_execute_passes_result_through() {
        let limiter = limiter_with("e", fast_policy());
        let value = limiter.execute("e", || async { Ok(42u64) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_uses_default_policy() {
        let limiter = RateLimiter::default();
        let value = limiter
            .execute("never-configured", || async { Ok("ok") })
            .await
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(limiter.endpoint_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_bound() {
        let policy = EndpointPolicy::new()
            .with_max_requests(3)
            .with_window(Duration::from_millis(1000))
            .with_min_delay(Duration::from_millis(1))
            .with_max_concurrent(10);
        let limiter = limiter_with("e", policy);

        let times = Arc::new(Mutex::new(Vec::new()));
        let t0 = Instant::now();

        let futs: Vec<_> = (0..6)
            .map(|_| {
                let limiter = limiter.clone();
                let times = Arc::clone(&times);
                async move {
                    limiter
                        .execute("e", || {
                            let times = Arc::clone(&times);
                            async move {
                                times.lock().push(Instant::now());
                                Ok(())
                            }
                        })
                        .await
                }
            })
            .collect();

        for result in join_all(futs).await {
            result.unwrap();
        }

        let times = times.lock();
        assert_eq!(times.len(), 6);

        // In any trailing 1s window at most 3 admissions.
        for (i, &t) in times.iter().enumerate() {
            let in_window = times[..=i]
                .iter()
                .filter(|&&s| t - s < Duration::from_millis(1000))
                .count();
            assert!(in_window <= 3, "admission {i} saw {in_window} in window");
        }

        // The fourth admission had to wait for the window to roll.
        assert!(times[3] - t0 >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let policy = fast_policy()
            .with_max_concurrent(2)
            .with_min_delay(Duration::from_millis(1));
        let limiter = limiter_with("e", policy);

        let current = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let futs: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                async move {
                    limiter
                        .execute("e", || {
                            let current = Arc::clone(&current);
                            let peak = Arc::clone(&peak);
                            async move {
                                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                sleep(Duration::from_millis(50)).await;
                                current.fetch_sub(1, Ordering::SeqCst);
                                Ok(())
                            }
                        })
                        .await
                }
            })
            .collect();

        for result in join_all(futs).await {
            result.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_delay_bound() {
        let policy = fast_policy().with_min_delay(Duration::from_millis(100));
        let limiter = limiter_with("e", policy);

        let times = Arc::new(Mutex::new(Vec::new()));

        let futs: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                let times = Arc::clone(&times);
                async move {
                    limiter
                        .execute("e", || {
                            let times = Arc::clone(&times);
                            async move {
                                times.lock().push(Instant::now());
                                Ok(())
                            }
                        })
                        .await
                }
            })
            .collect();

        for result in join_all(futs).await {
            result.unwrap();
        }

        let times = times.lock();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_admission_order() {
        let policy = fast_policy()
            .with_max_concurrent(1)
            .with_min_delay(Duration::from_millis(50));
        let limiter = limiter_with("e", policy);

        let order = Arc::new(Mutex::new(Vec::new()));

        let futs: Vec<_> = (0..5usize)
            .map(|i| {
                let limiter = limiter.clone();
                let order = Arc::clone(&order);
                async move {
                    limiter
                        .execute("e", || {
                            let order = Arc::clone(&order);
                            async move {
                                order.lock().push(i);
                                Ok(())
                            }
                        })
                        .await
                }
            })
            .collect();

        for result in join_all(futs).await {
            result.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_law() {
        let limiter = limiter_with("e", fast_policy());

        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = limiter
            .execute("e", || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(Error::operation("transient"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 200ms after the first failure, 400ms after the second.
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_attempt_count() {
        let limiter = limiter_with("e", fast_policy().with_retry_attempts(2));

        let calls = Arc::new(AtomicU32::new(0));

        let err = limiter
            .execute("e", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::operation("permanent"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            Error::RetriesExhausted { attempts, source, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.to_string(), "Operation failed: permanent");
            }
            other => panic!("expected RetriesExhausted, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_single_attempt() {
        let limiter = limiter_with("e", fast_policy().with_retry_attempts(0));

        let calls = Arc::new(AtomicU32::new(0));

        let err = limiter
            .execute("e", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::operation("nope"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_exhausted());
    }

    /// Literal scenario: `{max_requests:5, window:1s, min_delay:100ms,
    /// max_concurrent:2, retry_attempts:2, retry_base_delay:200ms}`,
    /// eight instantaneous operations fired together.
    #[tokio::test(start_paused = true)]
    async fn test_burst_of_eight_spills_into_second_window() {
        let policy = EndpointPolicy {
            max_requests: 5,
            window: Duration::from_millis(1000),
            min_delay: Duration::from_millis(100),
            max_concurrent: 2,
            retry_attempts: 2,
            retry_base_delay: Duration::from_millis(200),
        };
        let limiter = limiter_with("e", policy);

        let times = Arc::new(Mutex::new(Vec::new()));
        let t0 = Instant::now();

        let futs: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let times = Arc::clone(&times);
                async move {
                    limiter
                        .execute("e", || {
                            let times = Arc::clone(&times);
                            async move {
                                times.lock().push(Instant::now());
                                Ok(())
                            }
                        })
                        .await
                }
            })
            .collect();

        for result in join_all(futs).await {
            result.unwrap();
        }

        let times = times.lock();
        assert_eq!(times.len(), 8);

        // Calls 1-5 land in the first window, spaced by min_delay.
        assert!(times[4] - t0 <= Duration::from_millis(600));
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }

        // Calls 6-8 wait for the window to roll past t0 + 1s.
        assert!(times[5] - t0 >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_timeout_surfaces() {
        let policy = fast_policy().with_max_concurrent(1);
        let limiter = limiter_with("slow", policy);

        let blocker = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .execute("slow", || async {
                        sleep(Duration::from_secs(10)).await;
                        Ok(())
                    })
                    .await
            })
        };

        // Let the blocker take the only concurrency slot.
        tokio::task::yield_now().await;

        let err = limiter
            .execute_with_admission_timeout("slow", Duration::from_secs(1), || async { Ok(()) })
            .await
            .unwrap_err();

        assert!(err.is_timeout());

        blocker.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_override_applies_on_first_use() {
        let limiter = RateLimiter::default();
        let override_policy = fast_policy().with_min_delay(Duration::from_millis(100));

        let times = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let times = Arc::clone(&times);
            limiter
                .execute_with_policy("fresh", override_policy.clone(), move || {
                    let times = Arc::clone(&times);
                    async move {
                        times.lock().push(Instant::now());
                        Ok(())
                    }
                })
                .await
                .unwrap();
        }

        let times = times.lock();
        let spacing = times[1] - times[0];
        // Override spacing (100ms), not the default policy's 250ms.
        assert!(spacing >= Duration::from_millis(100));
        assert!(spacing < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_invalid_override_rejected() {
        let limiter = RateLimiter::default();
        let err = limiter
            .execute_with_policy(
                "bad",
                EndpointPolicy::new().with_max_requests(0),
                || async { Ok(()) },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Policy { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_are_independent() {
        let slow = EndpointPolicy::new()
            .with_max_requests(1)
            .with_window(Duration::from_secs(60))
            .with_min_delay(Duration::from_secs(10))
            .with_max_concurrent(1);
        let limiter = limiter_with("slow", slow);

        // Saturate "slow".
        limiter.execute("slow", || async { Ok(()) }).await.unwrap();

        // "fast" (default policy) is unaffected by slow's full window.
        let start = Instant::now();
        limiter.execute("fast", || async { Ok(()) }).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
