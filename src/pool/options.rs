//! Session pool tuning options.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::LaunchOptions;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default idle time before a pageless session is eligible for eviction.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Default interval between reaper sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// PoolOptions
// ============================================================================

/// Tuning knobs for the session pool.
///
/// Duration fields deserialize from humane strings (`"5m"`, `"60s"`) so
/// the hosting application can ship them as config data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Idle time after which a session with zero open pages is evicted.
    #[serde(with = "humantime_serde")]
    pub idle_threshold: Duration,

    /// How often the reaper sweeps for idle sessions.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Launch template for new sessions; the per-acquire headless flag
    /// overrides the template's.
    #[serde(skip)]
    pub launch: LaunchOptions,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            launch: LaunchOptions::new(),
        }
    }
}

// ============================================================================
// PoolOptions - Builder Methods
// ============================================================================

impl PoolOptions {
    /// Creates options with the default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle-eviction threshold.
    #[inline]
    #[must_use]
    pub fn with_idle_threshold(mut self, idle_threshold: Duration) -> Self {
        self.idle_threshold = idle_threshold;
        self
    }

    /// Sets the reaper sweep interval.
    #[inline]
    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Sets the launch template for new sessions.
    #[inline]
    #[must_use]
    pub fn with_launch(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either duration is zero.
    pub fn validate(&self) -> Result<()> {
        if self.idle_threshold.is_zero() {
            return Err(Error::config("idle_threshold must be > 0"));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::config("sweep_interval must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
