//! Governance facade over the rate limiter and the session pool.
//!
//! The [`Governor`] is the one object scrapers talk to: operations go
//! through [`Governor::execute`] for admission control, and browser work
//! goes through [`Governor::acquire_session`] / [`Governor::acquire_page`]
//! for pooled, auth-persistent sessions. The two compose naturally: a
//! governed operation typically drives a pooled page.
//!
//! The governor is built once by the application's composition root and
//! passed by reference to collaborators. There are no module-level
//! singletons; lifecycle is explicit: build at startup,
//! [`Governor::shutdown`] at exit.
//!
//! # Example
//!
//! ```no_run
//! use scrape_governor::{Governor, PolicySet, SessionId, Result};
//! # use scrape_governor::AutomationEngine;
//! # use std::sync::Arc;
//!
//! # async fn example(engine: Arc<dyn AutomationEngine>) -> Result<()> {
//! let governor = Governor::builder()
//!     .engine(engine)
//!     .state_dir("/var/lib/market-helper/sessions")
//!     .policies(PolicySet::market_defaults())
//!     .build()?;
//!
//! let id = SessionId::new("ninja");
//! let html = governor
//!     .execute("market-api", || {
//!         let governor = governor.clone();
//!         let id = id.clone();
//!         async move {
//!             let page = governor.acquire_page(&id).await?;
//!             page.goto("https://poe.ninja/builds").await?;
//!             let html = page.content().await?;
//!             page.close().await?;
//!             Ok(html)
//!         }
//!     })
//!     .await?;
//!
//! governor.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::AutomationEngine;
use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::limiter::{EndpointPolicy, PolicySet, RateLimiter};
use crate::pool::{Page, PoolOptions, PoolStats, Session, SessionPool};
use crate::store::SessionStore;

// ============================================================================
// Governor
// ============================================================================

/// Composed governance layer: admission control plus session pooling.
///
/// Cheap to clone; clones share the same limiter and pool.
#[derive(Clone)]
pub struct Governor {
    /// Per-endpoint admission control.
    limiter: RateLimiter,
    /// Keyed browser session pool.
    pool: SessionPool,
}

// ============================================================================
// Governor - Display
// ============================================================================

impl fmt::Debug for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governor")
            .field("endpoint_count", &self.limiter.endpoint_count())
            .field("session_count", &self.pool.session_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Governor - Construction
// ============================================================================

impl Governor {
    /// Creates a configuration builder for the governor.
    #[inline]
    #[must_use]
    pub fn builder() -> GovernorBuilder {
        GovernorBuilder::new()
    }

    /// Returns the rate limiter.
    #[inline]
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Returns the session pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }
}

// ============================================================================
// Governor - Rate-Limited Execution
// ============================================================================

impl Governor {
    /// Runs `op` against `endpoint` under its admission policy.
    ///
    /// # Errors
    ///
    /// See [`RateLimiter::execute`].
    pub async fn execute<T, F, Fut>(&self, endpoint: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.limiter.execute(endpoint, op).await
    }

    /// Runs `op` with a caller-supplied policy override.
    ///
    /// # Errors
    ///
    /// See [`RateLimiter::execute_with_policy`].
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
        self.limiter.execute_with_policy(endpoint, policy, op).await
    }

    /// Runs `op`, bounding each admission wait by `ceiling`.
    ///
    /// # Errors
    ///
    /// See [`RateLimiter::execute_with_admission_timeout`].
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
        self.limiter
            .execute_with_admission_timeout(endpoint, ceiling, op)
            .await
    }
}

// ============================================================================
// Governor - Sessions
// ============================================================================

impl Governor {
    /// Returns the session for `id`, creating it if necessary.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::acquire_session`].
    pub async fn acquire_session(&self, id: &SessionId, headless: bool) -> Result<Session> {
        self.pool.acquire_session(id, headless).await
    }

    /// Opens a new page under `id`, creating the session lazily.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::acquire_page`].
    pub async fn acquire_page(&self, id: &SessionId) -> Result<Page> {
        self.pool.acquire_page(id).await
    }

    /// Returns `true` if `id` has evidence of authentication for `domain`.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::is_authenticated`].
    pub fn is_authenticated(&self, id: &SessionId, domain: &str) -> Result<bool> {
        self.pool.is_authenticated(id, domain)
    }

    /// Persists the session's auth state.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::save_state`].
    pub async fn save_state(&self, id: &SessionId) -> Result<()> {
        self.pool.save_state(id).await
    }

    /// Applies the persisted auth state to the live session.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::load_state`].
    pub async fn load_state(&self, id: &SessionId) -> Result<bool> {
        self.pool.load_state(id).await
    }

    /// Closes the session for `id`; a no-op for unknown ids.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::close_session`].
    pub async fn close_session(&self, id: &SessionId) -> Result<()> {
        self.pool.close_session(id).await
    }

    /// Closes every session. Safe to call at any time, including with
    /// zero sessions.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::close_all`].
    pub async fn close_all(&self) -> Result<()> {
        self.pool.close_all().await
    }

    /// Returns a read-only snapshot of the session pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stops the idle reaper and closes every session.
    ///
    /// # Errors
    ///
    /// See [`SessionPool::shutdown`].
    pub async fn shutdown(&self) -> Result<()> {
        info!("governor shutting down");
        self.pool.shutdown().await
    }
}

// ============================================================================
// GovernorBuilder
// ============================================================================

/// Builder for configuring a [`Governor`] instance.
///
/// Use [`Governor::builder()`] to create a new builder.
#[derive(Default)]
pub struct GovernorBuilder {
    /// Automation engine adapter.
    engine: Option<Arc<dyn AutomationEngine>>,
    /// Directory for persisted auth-state records.
    state_dir: Option<PathBuf>,
    /// Endpoint policies.
    policies: PolicySet,
    /// Session pool tuning.
    pool_options: PoolOptions,
}

// ============================================================================
// GovernorBuilder - Implementation
// ============================================================================

impl GovernorBuilder {
    /// Creates a new builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the automation engine adapter.
    #[inline]
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn AutomationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sets the directory for persisted auth-state records.
    ///
    /// The directory belongs to the application's data area; it is created
    /// if missing.
    #[inline]
    #[must_use]
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Sets the endpoint policy table.
    #[inline]
    #[must_use]
    pub fn policies(mut self, policies: PolicySet) -> Self {
        self.policies = policies;
        self
    }

    /// Sets the session pool tuning options.
    #[inline]
    #[must_use]
    pub fn pool_options(mut self, options: PoolOptions) -> Self {
        self.pool_options = options;
        self
    }

    /// Sets the idle-eviction threshold on the pool options.
    #[inline]
    #[must_use]
    pub fn idle_threshold(mut self, threshold: Duration) -> Self {
        self.pool_options.idle_threshold = threshold;
        self
    }

    /// Sets the reaper sweep interval on the pool options.
    #[inline]
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.pool_options.sweep_interval = interval;
        self
    }

    /// Builds the governor with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if engine or state directory are not set
    /// - [`Error::Policy`] if the policy table is invalid
    /// - [`Error::Io`] if the state directory cannot be created
    pub fn build(self) -> Result<Governor> {
        let engine = self.engine.ok_or_else(|| {
            Error::config(
                "Automation engine is required. Use .engine() to set it.\n\
                 Example: Governor::builder().engine(Arc::new(MyEngine::new()))",
            )
        })?;

        let state_dir = self.state_dir.ok_or_else(|| {
            Error::config(
                "State directory is required. Use .state_dir() to set it.\n\
                 Example: Governor::builder().state_dir(data_dir.join(\"sessions\"))",
            )
        })?;

        let limiter = RateLimiter::new(self.policies)?;
        let store = SessionStore::new(state_dir)?;
        let pool = SessionPool::new(engine, store, self.pool_options)?;

        info!("governor initialized");

        Ok(Governor { limiter, pool })
    }
}

// ============================================================================
// Tests
// ============================================================================
