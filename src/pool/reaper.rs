//! Idle session reaper.
//!
//! A background task owned by the pool: every `sweep_interval` it closes
//! sessions that have had zero open pages for at least `idle_threshold`.
//! A session with open pages is never evicted, regardless of age.
//!
//! The task starts with the pool and stops on `shutdown()`. Sweeps run
//! sequentially on the one task, so at most one sweep is ever in flight,
//! and a session that fails to close cleanly is logged and skipped rather
//! than blocking the eviction of the others.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::identifiers::SessionId;

use super::core::SessionPool;

// ============================================================================
// ReaperControl
// ============================================================================

/// Shutdown coordination for the reaper task.
pub(crate) struct ReaperControl {
    /// Set when the pool shuts down.
    shutdown: AtomicBool,
    /// Wakes the task out of its interval wait.
    wake: Notify,
    /// Handle of the running task.
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReaperControl {
    /// Creates idle control state.
    pub(crate) fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            wake: Notify::new(),
            handle: Mutex::new(None),
        }
    }
}

// ============================================================================
// SessionPool - Reaper
// ============================================================================

impl SessionPool {
    /// Spawns the reaper task. Called once from the pool constructor.
    pub(crate) fn spawn_reaper(&self) {
        let pool = self.clone();
        let handle = tokio::spawn(async move {
            pool.reap_loop().await;
        });
        *self.inner.reaper.handle.lock() = Some(handle);
    }

    /// Signals the reaper to stop and waits for it to finish.
    pub(crate) async fn stop_reaper(&self) {
        self.inner.reaper.shutdown.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so the signal is not lost even if
        // the task is mid-sweep rather than parked on notified().
        self.inner.reaper.wake.notify_one();

        let handle = self.inner.reaper.handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            debug!(error = %e, "reaper task join failed");
        }
    }

    /// Interval loop; exits when shutdown is signalled.
    async fn reap_loop(self) {
        debug!(
            interval_s = self.inner.options.sweep_interval.as_secs(),
            "idle reaper started"
        );

        let mut interval = tokio::time::interval(self.inner.options.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; consume it so the first sweep
        // happens one full interval after startup.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.inner.reaper.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    self.sweep().await;
                }
                _ = self.inner.reaper.wake.notified() => {
                    if self.inner.reaper.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }

        debug!("idle reaper stopped");
    }

    /// One sweep: close every session idle beyond the threshold.
    ///
    /// Candidates are snapshotted first, then each close re-checks
    /// eligibility under the per-id lock, so a page opened mid-sweep
    /// rescues its session.
    pub(crate) async fn sweep(&self) {
        let threshold = self.inner.options.idle_threshold;

        let candidates: Vec<SessionId> = {
            let sessions = self.inner.sessions.lock();
            sessions
                .iter()
                .filter(|(_, s)| s.is_idle() && s.idle_for() >= threshold)
                .map(|(id, _)| id.clone())
                .collect()
        };

        if candidates.is_empty() {
            trace!("sweep found no idle sessions");
            return;
        }

        debug!(count = candidates.len(), "sweeping idle sessions");

        for id in candidates {
            if let Err(e) = self.close_if_idle(&id).await {
                warn!(
                    session_id = %id,
                    error = %e,
                    "failed to close idle session; continuing sweep"
                );
            }
        }
    }

    /// Closes `id` only if it is still idle past the threshold.
    async fn close_if_idle(&self, id: &SessionId) -> crate::error::Result<()> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        self.close_locked(id, true).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::time::sleep;

    use crate::engine::mock::MockEngine;
    use crate::pool::options::PoolOptions;
    use crate::store::SessionStore;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn reaper_pool(engine: Arc<MockEngine>) -> (SessionPool, tempfile::TempDir) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let options = PoolOptions::new()
            .with_idle_threshold(Duration::from_secs(300))
            .with_sweep_interval(Duration::from_secs(60));
        let pool = SessionPool::new(engine, store, options).unwrap();
        (pool, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_reaped() {
        let engine = MockEngine::new();
        let (pool, _dir) = reaper_pool(Arc::clone(&engine));
        let id = SessionId::new("stale");

        pool.acquire_session(&id, true).await.unwrap();
        assert_eq!(pool.session_count(), 1);

        // Sweeps run at 60s ticks; the 300s threshold is hit on the fifth.
        sleep(Duration::from_secs(360)).await;

        assert_eq!(pool.session_count(), 0);
        assert!(engine.browsers()[0].is_closed());

        pool.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaped_session_state_is_saved() {
        let engine = MockEngine::new();
        let (pool, dir) = reaper_pool(Arc::clone(&engine));
        let id = SessionId::new("stale");

        let session = pool.acquire_session(&id, true).await.unwrap();
        session.mark_authenticated("pathofexile.com");

        sleep(Duration::from_secs(360)).await;
        assert_eq!(pool.session_count(), 0);

        let store = SessionStore::new(dir.path()).unwrap();
        let saved = store.load(&id).unwrap().expect("state saved by reaper");
        assert!(saved.domains.contains(&"pathofexile.com".to_string()));

        pool.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_page_protects_session() {
        let engine = MockEngine::new();
        let (pool, _dir) = reaper_pool(Arc::clone(&engine));
        let id = SessionId::new("active");

        let page = pool.acquire_page(&id).await.unwrap();

        // Far past the threshold, but the page keeps the session alive.
        sleep(Duration::from_secs(1000)).await;
        assert_eq!(pool.session_count(), 1);

        // Closing the page restarts the idle clock; eviction follows.
        page.close().await.unwrap();
        sleep(Duration::from_secs(360)).await;
        assert_eq!(pool.session_count(), 0);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_session_survives_early_sweeps() {
        let engine = MockEngine::new();
        let (pool, _dir) = reaper_pool(engine);
        let id = SessionId::new("young");

        pool.acquire_session(&id, true).await.unwrap();

        // Two sweeps happen, but the session is under the threshold.
        sleep(Duration::from_secs(150)).await;
        assert_eq!(pool.session_count(), 1);

        pool.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_continues_past_failing_session() {
        let engine = MockEngine::new();
        let (pool, _dir) = reaper_pool(Arc::clone(&engine));

        pool.acquire_session(&SessionId::new("bad"), true).await.unwrap();
        pool.acquire_session(&SessionId::new("good"), true).await.unwrap();

        // "bad" launched first; its browser refuses to close.
        engine.browsers()[0]
            .shared
            .fail_close
            .store(true, Ordering::SeqCst);

        sleep(Duration::from_secs(360)).await;

        // Both left the pool; the healthy browser actually closed.
        assert_eq!(pool.session_count(), 0);
        assert!(engine.browsers()[1].is_closed());

        pool.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reaper() {
        let engine = MockEngine::new();
        let (pool, _dir) = reaper_pool(engine);

        pool.shutdown().await.unwrap();

        // The pool stays usable, but idle eviction no longer runs.
        pool.acquire_session(&SessionId::new("late"), true).await.unwrap();
        sleep(Duration::from_secs(1000)).await;
        assert_eq!(pool.session_count(), 1);

        pool.close_all().await.unwrap();
    }
}
