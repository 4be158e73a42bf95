//! Error types for the scrape governor.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use scrape_governor::{Result, Error};
//!
//! async fn example(governor: &Governor) -> Result<()> {
//!     let page = governor.acquire_page(&"trade".into()).await?;
//!     page.goto("https://example.com/trade").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Policy`] |
//! | Admission | [`Error::AdmissionTimeout`], [`Error::RetriesExhausted`] |
//! | Operation | [`Error::Operation`] |
//! | Session | [`Error::SessionCreation`], [`Error::SessionNotFound`], [`Error::SessionClosed`] |
//! | Engine | [`Error::Engine`] |
//! | External | [`Error::Io`], [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::SessionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when governor configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid endpoint policy.
    ///
    /// Returned when a policy fails validation at registration.
    /// Policies are rejected up front, never mid-admission.
    #[error("Invalid policy for endpoint '{endpoint}': {message}")]
    Policy {
        /// Endpoint key the policy was registered for.
        endpoint: String,
        /// Description of the invalid field.
        message: String,
    },

    // ========================================================================
    // Admission Errors
    // ========================================================================
    /// Admission gate wait exceeded the caller-supplied ceiling.
    ///
    /// Only produced by the admission-timeout execute variant; the limiter
    /// does not retry it.
    #[error("Admission timed out for endpoint '{endpoint}' after {waited_ms}ms")]
    AdmissionTimeout {
        /// Endpoint the operation was queued for.
        endpoint: String,
        /// Milliseconds spent waiting on the admission gates.
        waited_ms: u64,
    },

    /// All retry attempts for an operation failed.
    ///
    /// Wraps the final underlying failure. `attempts` counts every
    /// invocation of the operation, including the first.
    #[error("Retries exhausted for endpoint '{endpoint}' after {attempts} attempts")]
    RetriesExhausted {
        /// Endpoint the operation ran against.
        endpoint: String,
        /// Total attempts made (`retry_attempts + 1`).
        attempts: u32,
        /// The last failure produced by the operation.
        #[source]
        source: Box<Error>,
    },

    // ========================================================================
    // Operation Errors
    // ========================================================================
    /// A governed operation failed.
    ///
    /// Carries the caller-side failure of a scrape/fetch operation so it
    /// can flow through the retry machinery.
    #[error("Operation failed: {message}")]
    Operation {
        /// Description of the operation failure.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Underlying automation engine failed to start a session.
    ///
    /// Surfaced immediately; the pool does not retry creation.
    #[error("Failed to create session '{id}': {message}")]
    SessionCreation {
        /// The session id that failed to launch.
        id: SessionId,
        /// Description of the launch failure.
        message: String,
    },

    /// Session not found in the pool.
    ///
    /// Returned by operations that require an existing session.
    #[error("Session not found: {id}")]
    SessionNotFound {
        /// The missing session id.
        id: SessionId,
    },

    /// Session has been closed.
    ///
    /// Returned when an operation reaches a session after teardown.
    #[error("Session closed: {id}")]
    SessionClosed {
        /// The closed session id.
        id: SessionId,
    },

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// Automation engine operation failed.
    ///
    /// Returned when the engine rejects a page or state operation.
    #[error("Engine error: {message}")]
    Engine {
        /// Description of the engine failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid policy error.
    #[inline]
    pub fn policy(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Policy {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an admission timeout error.
    #[inline]
    pub fn admission_timeout(endpoint: impl Into<String>, waited_ms: u64) -> Self {
        Self::AdmissionTimeout {
            endpoint: endpoint.into(),
            waited_ms,
        }
    }

    /// Creates a retries exhausted error wrapping the last failure.
    #[inline]
    pub fn retries_exhausted(endpoint: impl Into<String>, attempts: u32, last: Error) -> Self {
        Self::RetriesExhausted {
            endpoint: endpoint.into(),
            attempts,
            source: Box::new(last),
        }
    }

    /// Creates an operation failure.
    #[inline]
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    /// Creates a session creation error.
    #[inline]
    pub fn session_creation(id: SessionId, message: impl Into<String>) -> Self {
        Self::SessionCreation {
            id,
            message: message.into(),
        }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(id: SessionId) -> Self {
        Self::SessionNotFound { id }
    }

    /// Creates a session closed error.
    #[inline]
    pub fn session_closed(id: SessionId) -> Self {
        Self::SessionClosed { id }
    }

    /// Creates an engine error.
    #[inline]
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is an admission timeout.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AdmissionTimeout { .. })
    }

    /// Returns `true` if this is a retries-exhausted error.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// Returns `true` if this is a session lifecycle error.
    #[inline]
    #[must_use]
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::SessionCreation { .. } | Self::SessionNotFound { .. } | Self::SessionClosed { .. }
        )
    }

    /// Returns the final underlying failure of a retries-exhausted error.
    ///
    /// Returns `None` for all other variants.
    #[inline]
    #[must_use]
    pub fn last_failure(&self) -> Option<&Error> {
        match self {
            Self::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::policy("market-api", "window must be > 0");
        assert_eq!(
            err.to_string(),
            "Invalid policy for endpoint 'market-api': window must be > 0"
        );
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing automation engine");
        assert_eq!(
            err.to_string(),
            "Configuration error: missing automation engine"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::admission_timeout("official-trade", 5000);
        let other_err = Error::engine("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_session_error() {
        let creation = Error::session_creation(SessionId::new("main"), "launch failed");
        let missing = Error::session_not_found(SessionId::new("main"));
        let closed = Error::session_closed(SessionId::new("main"));
        let other = Error::config("test");

        assert!(creation.is_session_error());
        assert!(missing.is_session_error());
        assert!(closed.is_session_error());
        assert!(!other.is_session_error());
    }

    #[test]
    fn test_retries_exhausted_wraps_last_failure() {
        let last = Error::operation("503 from upstream");
        let err = Error::retries_exhausted("market-api", 3, last);

        assert!(err.is_exhausted());
        let inner = err.last_failure().expect("wrapped failure");
        assert_eq!(inner.to_string(), "Operation failed: 503 from upstream");

        // The wrapped failure is also reachable through the std error chain.
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "Operation failed: 503 from upstream");
    }

    #[test]
    fn test_last_failure_on_other_variants() {
        assert!(Error::config("test").last_failure().is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
