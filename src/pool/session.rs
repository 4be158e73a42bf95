//! Pooled browser sessions and their pages.
//!
//! Each [`Session`] owns:
//! - One browser handle from the automation engine
//! - The set of open page ids under that browser
//! - The domains it is known to be authenticated against
//!
//! A session with zero open pages is idle; idle time is measured from
//! `last_activity`, which every page open/use/close refreshes. The pool's
//! reaper evicts sessions that stay idle too long, but never one with an
//! open page.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::engine::{BrowserHandle, PageHandle};
use crate::error::{Error, Result};
use crate::identifiers::{PageId, SessionId};
use crate::store::{domain_matches, normalize_domain};

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for a session.
pub(crate) struct SessionInner {
    /// Logical session name.
    id: SessionId,
    /// Unique per-creation identity; a re-created id gets a new instance.
    instance: Uuid,
    /// Whether the underlying browser was launched headless.
    headless: bool,
    /// Browser handle, exclusively owned by this session.
    handle: Box<dyn BrowserHandle>,
    /// Open pages under this session.
    pages: Mutex<FxHashSet<PageId>>,
    /// Last page creation/use/close.
    last_activity: Mutex<Instant>,
    /// Domains with known-good authentication, normalized.
    auth_domains: RwLock<FxHashSet<String>>,
    /// Set once the pool tears the session down.
    closed: AtomicBool,
}

// ============================================================================
// Session
// ============================================================================

/// A handle to a pooled browser session.
///
/// Cheap to clone; all clones observe the same session. The pool owns the
/// id → session map; callers interact through handles like this one.
#[derive(Clone)]
pub struct Session {
    /// Shared inner state.
    pub(crate) inner: Arc<SessionInner>,
}

// ============================================================================
// Session - Display
// ============================================================================

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("instance", &self.inner.instance)
            .field("headless", &self.inner.headless)
            .field("page_count", &self.page_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Constructor
// ============================================================================

impl Session {
    /// Creates a session over a freshly launched browser handle.
    pub(crate) fn new(
        id: SessionId,
        headless: bool,
        handle: Box<dyn BrowserHandle>,
        auth_domains: impl IntoIterator<Item = String>,
    ) -> Self {
        let instance = Uuid::new_v4();
        let domains: FxHashSet<String> = auth_domains
            .into_iter()
            .map(|d| normalize_domain(&d))
            .collect();

        debug!(session_id = %id, instance = %instance, headless, "session handle created");

        Self {
            inner: Arc::new(SessionInner {
                id,
                instance,
                headless,
                handle,
                pages: Mutex::new(FxHashSet::default()),
                last_activity: Mutex::new(Instant::now()),
                auth_domains: RwLock::new(domains),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Returns the logical session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Returns the unique identity of this creation.
    #[inline]
    #[must_use]
    pub fn instance(&self) -> &Uuid {
        &self.inner.instance
    }

    /// Returns whether the browser was launched headless.
    #[inline]
    #[must_use]
    pub fn headless(&self) -> bool {
        self.inner.headless
    }

    /// Returns the number of open pages.
    #[inline]
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.inner.pages.lock().len()
    }

    /// Returns `true` if the session has zero open pages.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.pages.lock().is_empty()
    }

    /// Returns how long since the last page activity.
    #[inline]
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.inner.last_activity.lock().elapsed()
    }

    /// Returns `true` once the pool has torn this session down.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Session - Authentication
// ============================================================================

impl Session {
    /// Marks `domain` as authenticated for this session.
    ///
    /// Called by scrapers after completing a login flow; the domain is
    /// persisted with the next state save.
    pub fn mark_authenticated(&self, domain: &str) {
        let normalized = normalize_domain(domain);
        debug!(session_id = %self.inner.id, domain = %normalized, "domain marked authenticated");
        self.inner.auth_domains.write().insert(normalized);
    }

    /// Returns `true` if live state marks `domain` (or a parent/subdomain)
    /// authenticated.
    #[must_use]
    pub fn is_authenticated_live(&self, domain: &str) -> bool {
        let wanted = normalize_domain(domain);
        self.inner
            .auth_domains
            .read()
            .iter()
            .any(|known| domain_matches(known, &wanted))
    }

    /// Snapshot of the marked domains.
    pub(crate) fn auth_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.inner.auth_domains.read().iter().cloned().collect();
        domains.sort();
        domains
    }

    /// Merges domains from a loaded auth-state record.
    pub(crate) fn merge_domains(&self, domains: &[String]) {
        let mut live = self.inner.auth_domains.write();
        for domain in domains {
            live.insert(normalize_domain(domain));
        }
    }
}

// ============================================================================
// Session - Internal
// ============================================================================

impl Session {
    /// Returns the browser handle.
    #[inline]
    pub(crate) fn handle(&self) -> &dyn BrowserHandle {
        self.inner.handle.as_ref()
    }

    /// Refreshes the activity timestamp.
    pub(crate) fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    /// Adds a page to the open set.
    pub(crate) fn track_page(&self, page_id: PageId) {
        self.inner.pages.lock().insert(page_id);
    }

    /// Removes a page from the open set.
    pub(crate) fn untrack_page(&self, page_id: PageId) {
        self.inner.pages.lock().remove(&page_id);
    }

    /// Marks the session closed.
    pub(crate) fn set_closed(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Page
// ============================================================================

/// An open page under a pooled session.
///
/// Every use refreshes the session's activity timestamp. Close explicitly
/// with [`Page::close`]; a dropped page is untracked (so the session can
/// go idle) but its engine-side resources are only reclaimed when the
/// session closes.
pub struct Page {
    /// Unique page id.
    id: PageId,
    /// Owning session.
    session: Session,
    /// Engine-side page handle; taken by `close`.
    handle: Option<Box<dyn PageHandle>>,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("session_id", self.session.id())
            .finish_non_exhaustive()
    }
}

impl Page {
    /// Creates a tracked page handle.
    pub(crate) fn new(id: PageId, session: Session, handle: Box<dyn PageHandle>) -> Self {
        Self {
            id,
            session,
            handle: Some(handle),
        }
    }

    /// Returns the page id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Returns the owning session's id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// Navigates to a URL.
    ///
    /// # Errors
    ///
    /// Returns an engine error if navigation fails.
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.session.touch();
        self.handle()?.goto(url).await
    }

    /// Returns the current page content as HTML.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the content cannot be read.
    pub async fn content(&self) -> Result<String> {
        self.session.touch();
        self.handle()?.content().await
    }

    /// Evaluates a script in the page.
    ///
    /// # Errors
    ///
    /// Returns an engine error if evaluation fails.
    pub async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        self.session.touch();
        self.handle()?.evaluate(script).await
    }

    /// Closes the page and untracks it from the session.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the page fails to close; the page is
    /// untracked either way.
    pub async fn close(mut self) -> Result<()> {
        let handle = self.handle.take();
        self.session.untrack_page(self.id);
        self.session.touch();
        debug!(
            session_id = %self.session.id(),
            page_id = %self.id,
            remaining = self.session.page_count(),
            "page closed"
        );

        if let Some(handle) = handle {
            handle.close().await?;
        }
        Ok(())
    }

    /// Returns the engine-side handle.
    fn handle(&self) -> Result<&dyn PageHandle> {
        self.handle
            .as_deref()
            .ok_or_else(|| Error::engine("page already closed"))
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.session.untrack_page(self.id);
            self.session.touch();
            debug!(
                session_id = %self.session.id(),
                page_id = %self.id,
                "page dropped without explicit close"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::mock::MockEngine;
    use crate::engine::{AutomationEngine, LaunchOptions};

    async fn test_session() -> Session {
        let engine = MockEngine::new();
        let handle = engine.launch(&LaunchOptions::headless()).await.unwrap();
        Session::new(SessionId::new("test"), true, handle, Vec::new())
    }

    #[tokio::test]
    async fn test_session_starts_idle() {
        let session = test_session().await;
        assert!(session.is_idle());
        assert_eq!(session.page_count(), 0);
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_page_tracking() {
        let session = test_session().await;
        let a = PageId::next();
        let b = PageId::next();

        session.track_page(a);
        session.track_page(b);
        assert_eq!(session.page_count(), 2);
        assert!(!session.is_idle());

        session.untrack_page(a);
        session.untrack_page(b);
        assert!(session.is_idle());
    }

    #[tokio::test]
    async fn test_mark_authenticated_matches_subdomains() {
        let session = test_session().await;
        session.mark_authenticated("pathofexile.com");

        assert!(session.is_authenticated_live("pathofexile.com"));
        assert!(session.is_authenticated_live("www.pathofexile.com"));
        assert!(session.is_authenticated_live("https://www.pathofexile.com/trade"));
        assert!(!session.is_authenticated_live("poe.ninja"));
    }

    #[tokio::test]
    async fn test_page_drop_untracks() {
        let session = test_session().await;
        let handle = session.handle().new_page().await.unwrap();
        let page_id = PageId::next();
        session.track_page(page_id);

        let page = Page::new(page_id, session.clone(), handle);
        assert_eq!(session.page_count(), 1);

        drop(page);
        assert_eq!(session.page_count(), 0);
    }

    #[tokio::test]
    async fn test_page_close_untracks() {
        let session = test_session().await;
        let handle = session.handle().new_page().await.unwrap();
        let page_id = PageId::next();
        session.track_page(page_id);

        let page = Page::new(page_id, session.clone(), handle);
        page.goto("https://poe.ninja/builds").await.unwrap();
        page.close().await.unwrap();

        assert!(session.is_idle());
    }
}
