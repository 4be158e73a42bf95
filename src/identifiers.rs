//! Type-safe identifiers for governed resources.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time:
//!
//! - [`SessionId`] - caller-chosen logical session name (e.g. `"trade-main"`)
//! - [`PageId`] - process-unique page handle id
//!
//! Session ids are stable across process restarts (they key persisted auth
//! state on disk); page ids are ephemeral and monotonically assigned.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// SessionId
// ============================================================================

/// Logical session name, chosen by the caller.
///
/// The same id always maps to the same pooled session (and the same
/// persisted auth-state record), so scrapers can share a long-lived
/// authenticated browser by agreeing on a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id from a logical name.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the logical name as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    #[inline]
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for SessionId {
    #[inline]
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for SessionId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// PageId
// ============================================================================

/// Process-unique identifier for an open page handle.
///
/// Assigned from a monotonic counter; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(u64);

/// Next page id to hand out. Starts at 1 so 0 never denotes a real page.
static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

impl PageId {
    /// Returns the next unique page id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
