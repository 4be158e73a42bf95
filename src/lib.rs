//! Scrape Governor - request governance for rate-limited market scrapers.
//!
//! This library is the traffic-control layer of a game-market data
//! aggregator: every automated request (HTTP call or headless-browser
//! navigation) against a rate-limited provider passes through it.
//!
//! # Architecture
//!
//! Two cooperating halves behind one facade:
//!
//! ```text
//! ┌──────────────────────── Governor ────────────────────────┐
//! │                                                          │
//! │  execute(endpoint, op)          acquire_session / page   │
//! │        │                                  │              │
//! │        ▼                                  ▼              │
//! │  ┌─────────────┐                   ┌─────────────┐       │
//! │  │ RateLimiter │                   │ SessionPool │       │
//! │  │ window      │                   │ keyed reuse │       │
//! │  │ concurrency │                   │ idle reaper │       │
//! │  │ min delay   │                   │ auth state ─┼──► SessionStore
//! │  │ backoff     │                   └──────┬──────┘       │
//! │  └─────────────┘                          │              │
//! │                                    AutomationEngine      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Key design principles:
//!
//! - Per-endpoint admission is FIFO: window, concurrency, and spacing
//!   gates are evaluated under a fair turn queue, never by promise racing
//! - Sessions are keyed by logical name and reused; authentication state
//!   persists across restarts through the [`SessionStore`]
//! - The idle reaper closes pageless sessions, never active ones
//! - The automation engine plugs in behind capability traits; the pool's
//!   lifecycle logic is engine-agnostic
//! - No global singletons: the composition root builds one [`Governor`]
//!   and shuts it down explicitly
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use scrape_governor::{AutomationEngine, Governor, PolicySet, SessionId, Result};
//!
//! # async fn example(engine: Arc<dyn AutomationEngine>) -> Result<()> {
//! let governor = Governor::builder()
//!     .engine(engine)
//!     .state_dir("/var/lib/market-helper/sessions")
//!     .policies(PolicySet::market_defaults())
//!     .build()?;
//!
//! // Rate-limited scrape through a pooled, auth-persistent session.
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
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`limiter`] | Per-endpoint admission control and retry |
//! | [`pool`] | Keyed browser session pool with idle eviction |
//! | [`store`] | Durable per-session authentication state |
//! | [`engine`] | Automation engine capability traits |
//! | [`governor`] | Composed facade and builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//!
//! # Guarantees
//!
//! - **Window bound**: at most `max_requests` admissions per endpoint in
//!   any trailing `window`
//! - **Concurrency bound**: at most `max_concurrent` in-flight operations
//!   per endpoint
//! - **Spacing**: consecutive admissions are at least `min_delay` apart
//! - **FIFO**: same-endpoint requests are admitted in arrival order
//! - **Session singleton**: concurrent acquisitions of one id launch
//!   exactly one browser
//! - **Idle protection**: a session with open pages is never reaped

// ============================================================================
// Modules
// ============================================================================

/// Automation engine capability traits.
///
/// The pool drives browsers through [`AutomationEngine`],
/// [`BrowserHandle`], and [`PageHandle`]; concrete engines live in the
/// hosting application.
pub mod engine;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Composed governance facade.
///
/// Use [`Governor::builder()`] to wire the limiter, pool, and store
/// together at the application's composition root.
pub mod governor;

/// Type-safe identifiers for governed resources.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Per-endpoint rate limiting.
///
/// Sliding-window admission, concurrency caps, minimum spacing, and
/// exponential-backoff retry.
pub mod limiter;

/// Browser session pooling.
///
/// Keyed, lazily created, idle-evicted sessions with persisted
/// authentication state.
pub mod pool;

/// Durable per-session authentication state.
///
/// One atomic JSON record per session id under an application-owned
/// directory.
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

// Engine types
pub use engine::{AutomationEngine, BrowserHandle, LaunchOptions, PageHandle};

// Error types
pub use error::{Error, Result};

// Facade types
pub use governor::{Governor, GovernorBuilder};

// Identifier types
pub use identifiers::{PageId, SessionId};

// Limiter types
pub use limiter::{EndpointPolicy, PolicySet, RateLimiter};

// Pool types
pub use pool::{
    DEFAULT_IDLE_THRESHOLD, DEFAULT_SWEEP_INTERVAL, Page, PoolOptions, PoolStats, Session,
    SessionPool, SessionStats,
};

// Store types
pub use store::{AuthState, Cookie, SessionStore, StorageEntry};
