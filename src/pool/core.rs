//! Keyed browser session pool.
//!
//! The [`SessionPool`] owns the map from logical session id to live
//! [`Session`]. Sessions are created lazily on first acquisition, reused
//! on every acquisition after that, and torn down either explicitly or by
//! the idle reaper. Persisted auth state is rehydrated at creation and
//! saved again at close, so a re-created session usually skips
//! re-authentication.
//!
//! # Example
//!
//! ```no_run
//! use scrape_governor::{SessionPool, SessionStore, PoolOptions, SessionId, Result};
//! # use scrape_governor::AutomationEngine;
//! # use std::sync::Arc;
//!
//! # async fn example(engine: Arc<dyn AutomationEngine>) -> Result<()> {
//! let store = SessionStore::new("/var/lib/market-helper/sessions")?;
//! let pool = SessionPool::new(engine, store, PoolOptions::default())?;
//!
//! let page = pool.acquire_page(&SessionId::new("ninja")).await?;
//! page.goto("https://poe.ninja/builds").await?;
//! page.close().await?;
//!
//! pool.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Creation races
//!
//! "Check if the id exists, else create" is a single atomic step per id:
//! creation runs under a per-id async lock, double-checked against the
//! session map, so N concurrent acquisitions of the same id launch exactly
//! one browser and share the resulting session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::AutomationEngine;
use crate::error::{Error, Result};
use crate::identifiers::{PageId, SessionId};
use crate::store::SessionStore;

use super::options::PoolOptions;
use super::reaper::ReaperControl;
use super::session::{Page, Session};

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the pool.
pub(crate) struct PoolInner {
    /// Engine used to launch browsers.
    pub(crate) engine: Arc<dyn AutomationEngine>,

    /// Durable auth-state records.
    pub(crate) store: SessionStore,

    /// Pool tuning.
    pub(crate) options: PoolOptions,

    /// Live sessions by id.
    pub(crate) sessions: Mutex<FxHashMap<SessionId, Session>>,

    /// Per-id creation/teardown locks.
    ///
    /// Entries are kept for the life of the pool; ids are stable logical
    /// names, so the map stays small.
    creating: Mutex<FxHashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,

    /// Reaper task control.
    pub(crate) reaper: ReaperControl,
}

// ============================================================================
// Stats
// ============================================================================

/// Read-only snapshot of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Logical session id.
    pub id: SessionId,
    /// Open pages.
    pub page_count: usize,
    /// Time since last page activity.
    #[serde(with = "humantime_serde")]
    pub idle: Duration,
    /// Whether the browser runs headless.
    pub headless: bool,
}

/// Read-only snapshot of the pool.
///
/// Serializable so the hosting application can report it over its status
/// surface. Safe to take at any time, including with zero sessions.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Live sessions.
    pub session_count: usize,
    /// Open pages across all sessions.
    pub total_pages: usize,
    /// Per-session details, ordered by id.
    pub per_session: Vec<SessionStats>,
}

// ============================================================================
// SessionPool
// ============================================================================

/// Keyed pool of long-lived browser sessions.
///
/// Cheap to clone; clones share the same pool. The idle reaper starts
/// with the pool and stops on [`SessionPool::shutdown`].
#[derive(Clone)]
pub struct SessionPool {
    /// Shared inner state.
    pub(crate) inner: Arc<PoolInner>,
}

// ============================================================================
// SessionPool - Display
// ============================================================================

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("session_count", &self.session_count())
            .field("idle_threshold", &self.inner.options.idle_threshold)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SessionPool - Constructor
// ============================================================================

impl SessionPool {
    /// Creates a pool and starts its idle reaper.
    ///
    /// Must be called from within a tokio runtime (the reaper task is
    /// spawned here).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn new(
        engine: Arc<dyn AutomationEngine>,
        store: SessionStore,
        options: PoolOptions,
    ) -> Result<Self> {
        options.validate()?;

        let pool = Self {
            inner: Arc::new(PoolInner {
                engine,
                store,
                options,
                sessions: Mutex::new(FxHashMap::default()),
                creating: Mutex::new(FxHashMap::default()),
                reaper: ReaperControl::new(),
            }),
        };

        pool.spawn_reaper();
        info!(
            idle_threshold_s = pool.inner.options.idle_threshold.as_secs(),
            sweep_interval_s = pool.inner.options.sweep_interval.as_secs(),
            "session pool started"
        );

        Ok(pool)
    }
}

// ============================================================================
// SessionPool - Acquisition
// ============================================================================

impl SessionPool {
    /// Returns the session for `id`, creating it if necessary.
    ///
    /// On reuse the `headless` argument is ignored; the flag only applies
    /// at creation. Concurrent calls for the same id share one creation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionCreation`] if the engine fails to launch.
    pub async fn acquire_session(&self, id: &SessionId, headless: bool) -> Result<Session> {
        if let Some(session) = self.get(id) {
            debug!(session_id = %id, "session reused");
            return Ok(session);
        }

        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        // Double check: another caller may have finished creating while we
        // waited for the lock.
        if let Some(session) = self.get(id) {
            debug!(session_id = %id, "session reused after awaiting creation");
            return Ok(session);
        }

        self.create_session(id, headless).await
    }

    /// Opens a new page under `id`, creating the session lazily.
    ///
    /// Lazily created sessions default to headless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionCreation`] or an engine error.
    pub async fn acquire_page(&self, id: &SessionId) -> Result<Page> {
        let session = self.acquire_session(id, true).await?;

        if session.is_closed() {
            return Err(Error::session_closed(id.clone()));
        }

        let handle = session.handle().new_page().await?;
        let page_id = PageId::next();
        session.track_page(page_id);
        session.touch();

        debug!(
            session_id = %id,
            page_id = %page_id,
            pages = session.page_count(),
            "page opened"
        );

        Ok(Page::new(page_id, session, handle))
    }
}

// ============================================================================
// SessionPool - Authentication State
// ============================================================================

impl SessionPool {
    /// Returns `true` if `id` has evidence of authentication for `domain`.
    ///
    /// Checks the live session's marked domains first, then the persisted
    /// record (explicit domains and cookie domains). Never mutates state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`]/[`Error::Json`] if the persisted record
    /// cannot be read.
    pub fn is_authenticated(&self, id: &SessionId, domain: &str) -> Result<bool> {
        if let Some(session) = self.get(id)
            && session.is_authenticated_live(domain)
        {
            return Ok(true);
        }

        match self.inner.store.load(id)? {
            Some(state) => Ok(state.covers_domain(domain)),
            None => Ok(false),
        }
    }

    /// Exports the session's auth state and persists it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if `id` is not live, or an
    /// engine/store error.
    pub async fn save_state(&self, id: &SessionId) -> Result<()> {
        let session = self
            .get(id)
            .ok_or_else(|| Error::session_not_found(id.clone()))?;
        self.export_and_save(&session).await
    }

    /// Imports the persisted auth state into the live session.
    ///
    /// Returns `true` if a record existed and was applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if `id` is not live, or an
    /// engine/store error.
    pub async fn load_state(&self, id: &SessionId) -> Result<bool> {
        let session = self
            .get(id)
            .ok_or_else(|| Error::session_not_found(id.clone()))?;

        match self.inner.store.load(id)? {
            Some(state) => {
                session.handle().import_auth_state(&state).await?;
                session.merge_domains(&state.domains);
                session.touch();
                debug!(session_id = %id, "auth state loaded into session");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Exports, stamps, and persists a session's auth state.
    pub(crate) async fn export_and_save(&self, session: &Session) -> Result<()> {
        let mut state = session.handle().export_auth_state().await?;

        for domain in session.auth_domains() {
            if !state.domains.contains(&domain) {
                state.domains.push(domain);
            }
        }
        state.saved_at = Some(SystemTime::now());

        self.inner.store.save(session.id(), &state)
    }
}

// ============================================================================
// SessionPool - Lifecycle
// ============================================================================

impl SessionPool {
    /// Closes the session for `id`: saves state, closes pages, releases
    /// the browser, removes it from the pool.
    ///
    /// Idempotent: closing an unknown or already-closed id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the browser fails to close; the session
    /// is removed from the pool regardless.
    pub async fn close_session(&self, id: &SessionId) -> Result<()> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        self.close_locked(id, false).await
    }

    /// Closes every session. Used at shutdown; deliberately tears down
    /// sessions even if they have open pages.
    ///
    /// Individual failures are logged and do not abort the rest.
    pub async fn close_all(&self) -> Result<()> {
        let ids: Vec<SessionId> = self.inner.sessions.lock().keys().cloned().collect();
        info!(count = ids.len(), "closing all sessions");

        for id in ids {
            if let Err(e) = self.close_session(&id).await {
                warn!(session_id = %id, error = %e, "error closing session during close_all");
            }
        }

        Ok(())
    }

    /// Stops the reaper and closes every session.
    ///
    /// The pool stays usable afterwards (new acquisitions work), but idle
    /// eviction no longer runs.
    pub async fn shutdown(&self) -> Result<()> {
        info!("session pool shutting down");
        self.stop_reaper().await;
        self.close_all().await
    }

    /// Teardown body; caller must hold the id lock.
    ///
    /// With `only_if_idle`, the session is re-checked for eligibility
    /// under the lock and left alone if a page opened meanwhile.
    pub(crate) async fn close_locked(&self, id: &SessionId, only_if_idle: bool) -> Result<()> {
        let session = {
            let mut sessions = self.inner.sessions.lock();
            let Some(current) = sessions.get(id) else {
                return Ok(());
            };
            if only_if_idle
                && !(current.is_idle() && current.idle_for() >= self.inner.options.idle_threshold)
            {
                return Ok(());
            }
            sessions.remove(id)
        };

        let Some(session) = session else {
            return Ok(());
        };

        session.set_closed();

        // State must hit disk before the browser (and its cookies) go away.
        if let Err(e) = self.export_and_save(&session).await {
            warn!(session_id = %id, error = %e, "failed to save auth state on close");
        }

        session.handle().close().await?;
        info!(session_id = %id, instance = %session.instance(), "session closed");
        Ok(())
    }
}

// ============================================================================
// SessionPool - Introspection
// ============================================================================

impl SessionPool {
    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Returns a read-only snapshot of the pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let sessions = self.inner.sessions.lock();

        let mut per_session: Vec<SessionStats> = sessions
            .values()
            .map(|s| SessionStats {
                id: s.id().clone(),
                page_count: s.page_count(),
                idle: s.idle_for(),
                headless: s.headless(),
            })
            .collect();
        per_session.sort_by(|a, b| a.id.cmp(&b.id));

        PoolStats {
            session_count: per_session.len(),
            total_pages: per_session.iter().map(|s| s.page_count).sum(),
            per_session,
        }
    }
}

// ============================================================================
// SessionPool - Internal
// ============================================================================

impl SessionPool {
    /// Returns the live session for `id`, if any.
    fn get(&self, id: &SessionId) -> Option<Session> {
        self.inner.sessions.lock().get(id).cloned()
    }

    /// Returns the creation/teardown lock for `id`.
    pub(super) fn id_lock(&self, id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.inner
                .creating
                .lock()
                .entry(id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Launches and registers a new session; caller must hold the id lock.
    async fn create_session(&self, id: &SessionId, headless: bool) -> Result<Session> {
        let mut launch = self.inner.options.launch.clone();
        launch.headless = headless;

        let handle = self
            .inner
            .engine
            .launch(&launch)
            .await
            .map_err(|e| Error::session_creation(id.clone(), e.to_string()))?;

        // Rehydrate persisted auth state, if any. A broken record costs a
        // re-login, not the session.
        let mut domains = Vec::new();
        match self.inner.store.load(id) {
            Ok(Some(state)) => match handle.import_auth_state(&state).await {
                Ok(()) => {
                    domains = state.domains.clone();
                    debug!(
                        session_id = %id,
                        cookies = state.cookies.len(),
                        "persisted auth state rehydrated"
                    );
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "auth-state rehydration failed");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(session_id = %id, error = %e, "failed to read persisted auth state");
            }
        }

        let session = Session::new(id.clone(), headless, handle, domains);
        self.inner
            .sessions
            .lock()
            .insert(id.clone(), session.clone());

        info!(
            session_id = %id,
            instance = %session.instance(),
            headless,
            session_count = self.session_count(),
            "session created"
        );

        Ok(session)
    }
}

// ============================================================================
// Tests
// ============================================================================
