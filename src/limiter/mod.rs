//! Per-endpoint rate limiting.
//!
//! Every outbound request to a rate-limited provider goes through a
//! [`RateLimiter`], which enforces that endpoint's [`EndpointPolicy`]:
//!
//! - at most `max_requests` admissions in any trailing `window`
//! - at most `max_concurrent` operations in flight
//! - at least `min_delay` between consecutive admissions
//! - failed operations retried up to `retry_attempts` times with
//!   exponential backoff
//!
//! Endpoints are independent of each other; within one endpoint, waiting
//! requests are admitted strictly first-come-first-served.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `policy` | [`EndpointPolicy`], presets, [`PolicySet`] |
//! | `endpoint` | Per-endpoint gate state (internal) |
//! | `core` | [`RateLimiter`] admission and retry loop |

// ============================================================================
// Submodules
// ============================================================================

/// [`RateLimiter`] admission and retry loop.
pub mod core;

/// Per-endpoint gate state.
mod endpoint;

/// Admission policies and presets.
pub mod policy;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::RateLimiter;
pub use policy::{EndpointPolicy, PolicySet};
