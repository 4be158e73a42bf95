//! Browser session pooling.
//!
//! Spinning up an automated browser costs seconds; losing its cookies
//! costs a login. The [`SessionPool`] amortizes both: sessions are keyed
//! by logical name, created lazily, reused across scrapes, and evicted by
//! a background reaper once they sit idle with no open pages. Auth state
//! is persisted through the [`crate::SessionStore`] at save/close time and
//! rehydrated at creation.
//!
//! # Session lifecycle
//!
//! ```text
//! acquire_session(id)                     reaper / close_session
//!        │                                          │
//!        ▼                                          ▼
//!    Created ──(page opened)──► Active ──► Idle ──► Closed
//!        │                        ▲          │
//!        └── zero pages ── Idle ──┴──────────┘
//!                                 (page opened / closed)
//! ```
//!
//! `Closed` is terminal: the session leaves the pool, and re-acquiring the
//! id creates a brand-new instance.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`SessionPool`], stats snapshots |
//! | `session` | [`Session`] and [`Page`] handles |
//! | `options` | [`PoolOptions`] tuning |
//! | `reaper` | Idle eviction task (internal) |

// ============================================================================
// Submodules
// ============================================================================

/// [`SessionPool`] and stats snapshots.
pub mod core;

/// Pool tuning options.
pub mod options;

/// Idle eviction task.
mod reaper;

/// [`Session`] and [`Page`] handles.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::{PoolStats, SessionPool, SessionStats};
pub use options::{DEFAULT_IDLE_THRESHOLD, DEFAULT_SWEEP_INTERVAL, PoolOptions};
pub use session::{Page, Session};
