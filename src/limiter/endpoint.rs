//! Per-endpoint admission state.
//!
//! One [`EndpointState`] exists per endpoint key, created on first use and
//! kept for the life of the process. It owns the three admission gates:
//!
//! - **Sliding window**: timestamps of admissions within the trailing
//!   `window`; at most `max_requests` of them.
//! - **Turn queue**: a fair async mutex; waiters are admitted in the order
//!   they arrived, so a newer request can never overtake one that has been
//!   waiting on a gate.
//! - **Concurrency slots**: a semaphore with `max_concurrent` permits; a
//!   permit is held for the whole execution of an operation.
//!
//! Gate evaluation happens while holding the turn, which means the window
//! and last-admission instant can only be mutated by the current turn
//! holder. Waiting on a gate therefore never invalidates an earlier check.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::policy::EndpointPolicy;

// ============================================================================
// AdmissionWindow
// ============================================================================

/// Sliding-window bookkeeping behind a short-lived lock.
struct AdmissionWindow {
    /// Admission instants inside the trailing window, oldest first.
    admissions: VecDeque<Instant>,
    /// Most recent admission, for min-delay spacing.
    last_admission: Option<Instant>,
}

// ============================================================================
// EndpointState
// ============================================================================

/// Admission state for one endpoint.
pub(crate) struct EndpointState {
    /// Endpoint key, for logging.
    key: String,

    /// Policy fixed at first use.
    policy: EndpointPolicy,

    /// Fair FIFO turn queue; held while evaluating gates.
    turn: tokio::sync::Mutex<()>,

    /// Concurrency permits, one per in-flight operation.
    slots: Arc<Semaphore>,

    /// Window timestamps and last-admission instant.
    window: Mutex<AdmissionWindow>,
}

impl EndpointState {
    /// Creates state for an endpoint with a validated policy.
    pub(crate) fn new(key: impl Into<String>, policy: EndpointPolicy) -> Self {
        let slots = Arc::new(Semaphore::new(policy.max_concurrent as usize));
        let window = Mutex::new(AdmissionWindow {
            admissions: VecDeque::with_capacity(policy.max_requests as usize),
            last_admission: None,
        });
        Self {
            key: key.into(),
            policy,
            turn: tokio::sync::Mutex::new(()),
            slots,
            window,
        }
    }

    /// Returns the endpoint key.
    #[inline]
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Returns the policy this endpoint was created with.
    #[inline]
    pub(crate) fn policy(&self) -> &EndpointPolicy {
        &self.policy
    }

    /// Returns the turn queue.
    #[inline]
    pub(crate) fn turn(&self) -> &tokio::sync::Mutex<()> {
        &self.turn
    }

    /// Returns the concurrency semaphore.
    #[inline]
    pub(crate) fn slots(&self) -> &Arc<Semaphore> {
        &self.slots
    }

    /// Returns the number of operations currently in flight.
    #[inline]
    pub(crate) fn in_flight(&self) -> u32 {
        self.policy.max_concurrent - self.slots.available_permits() as u32
    }
}

// ============================================================================
// EndpointState - Gates
// ============================================================================

impl EndpointState {
    /// Window gate: evicts stale timestamps, then reports how long to wait.
    ///
    /// Returns `None` when the window has room, or the duration until the
    /// oldest admission leaves the window.
    pub(crate) fn window_wait(&self, now: Instant) -> Option<Duration> {
        let mut window = self.window.lock();

        while let Some(&oldest) = window.admissions.front() {
            if oldest + self.policy.window <= now {
                window.admissions.pop_front();
            } else {
                break;
            }
        }

        if (window.admissions.len() as u32) < self.policy.max_requests {
            None
        } else {
            // Full: wait until the oldest timestamp rolls out.
            let oldest = *window
                .admissions
                .front()
                .expect("window is full, so it is non-empty");
            Some(oldest + self.policy.window - now)
        }
    }

    /// Min-delay gate: reports the remaining spacing after the last admission.
    ///
    /// Returns `None` when enough time has passed (or nothing was admitted
    /// yet).
    pub(crate) fn min_delay_wait(&self, now: Instant) -> Option<Duration> {
        let window = self.window.lock();
        let last = window.last_admission?;
        let ready_at = last + self.policy.min_delay;
        if ready_at <= now {
            None
        } else {
            Some(ready_at - now)
        }
    }

    /// Records an admission at `now`.
    ///
    /// Must only be called by the turn holder after all gates passed.
    pub(crate) fn record_admission(&self, now: Instant) {
        let mut window = self.window.lock();
        window.admissions.push_back(now);
        window.last_admission = Some(now);
    }
}

// ============================================================================
// Tests
// ============================================================================
