//! Endpoint admission policies.
//!
//! An [`EndpointPolicy`] is pure data describing how aggressively one
//! rate-limited provider may be called: sliding-window budget, minimum
//! spacing, concurrency cap, and retry schedule. Policies are grouped in a
//! [`PolicySet`] keyed by endpoint name, with a default for endpoints that
//! were never configured explicitly.
//!
//! Duration fields deserialize from humane strings (`"60s"`, `"1500ms"`),
//! so the hosting application can ship policy tables as config data.
//!
//! # Example
//!
//! ```
//! use scrape_governor::EndpointPolicy;
//! use std::time::Duration;
//!
//! let policy = EndpointPolicy::conservative()
//!     .with_max_concurrent(2)
//!     .with_min_delay(Duration::from_millis(750));
//!
//! assert!(policy.validate("official-trade").is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// EndpointPolicy
// ============================================================================

/// Admission policy for a single rate-limited endpoint.
///
/// All fields must be non-zero except `retry_attempts`, which may be 0
/// (no retry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointPolicy {
    /// Maximum admissions within any trailing `window`.
    pub max_requests: u32,

    /// Length of the sliding admission window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Minimum spacing between two consecutive admissions.
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,

    /// Maximum operations in flight at once.
    pub max_concurrent: u32,

    /// Retries after the initial attempt fails (0 = no retry).
    #[serde(default)]
    pub retry_attempts: u32,

    /// Base delay for exponential backoff between retries.
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
}

impl Default for EndpointPolicy {
    /// Middle-of-the-road defaults for unconfigured endpoints.
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(60),
            min_delay: Duration::from_millis(250),
            max_concurrent: 4,
            retry_attempts: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

// ============================================================================
// EndpointPolicy - Presets
// ============================================================================

impl EndpointPolicy {
    /// Creates a policy with the default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for unofficial or ban-happy providers.
    ///
    /// Single-file access with generous spacing and patient retries.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
            min_delay: Duration::from_secs(2),
            max_concurrent: 1,
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
        }
    }

    /// Preset for tolerant providers and bulk refreshes.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(10),
            min_delay: Duration::from_millis(50),
            max_concurrent: 8,
            retry_attempts: 1,
            retry_base_delay: Duration::from_millis(250),
        }
    }
}

// ============================================================================
// EndpointPolicy - Builder Methods
// ============================================================================

impl EndpointPolicy {
    /// Sets the sliding-window request budget.
    #[inline]
    #[must_use]
    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Sets the sliding-window length.
    #[inline]
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the minimum spacing between admissions.
    #[inline]
    #[must_use]
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Sets the concurrency cap.
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Sets the retry budget.
    #[inline]
    #[must_use]
    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    /// Sets the base backoff delay.
    #[inline]
    #[must_use]
    pub fn with_retry_base_delay(mut self, retry_base_delay: Duration) -> Self {
        self.retry_base_delay = retry_base_delay;
        self
    }
}

// ============================================================================
// EndpointPolicy - Validation & Schedule
// ============================================================================

impl EndpointPolicy {
    /// Validates the policy for the given endpoint key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Policy`] if any field other than `retry_attempts`
    /// is zero.
    pub fn validate(&self, endpoint: &str) -> Result<()> {
        if self.max_requests == 0 {
            return Err(Error::policy(endpoint, "max_requests must be > 0"));
        }
        if self.window.is_zero() {
            return Err(Error::policy(endpoint, "window must be > 0"));
        }
        if self.min_delay.is_zero() {
            return Err(Error::policy(endpoint, "min_delay must be > 0"));
        }
        if self.max_concurrent == 0 {
            return Err(Error::policy(endpoint, "max_concurrent must be > 0"));
        }
        if self.retry_base_delay.is_zero() {
            return Err(Error::policy(endpoint, "retry_base_delay must be > 0"));
        }
        Ok(())
    }

    /// Returns the backoff delay before retrying after `attempt` failures.
    ///
    /// Deterministic exponential: `retry_base_delay × 2^attempt`, saturating
    /// on overflow. Attempt numbering starts at 0.
    #[inline]
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

// ============================================================================
// PolicySet
// ============================================================================

/// Named policies plus a default for unknown endpoints.
///
/// Pure data; the limiter consults it once per endpoint (on first use).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySet {
    /// Explicitly configured endpoints.
    #[serde(default)]
    policies: FxHashMap<String, EndpointPolicy>,

    /// Fallback for endpoints without an explicit entry.
    #[serde(default)]
    default: EndpointPolicy,
}

impl PolicySet {
    /// Creates an empty set with the given default policy.
    #[inline]
    #[must_use]
    pub fn new(default: EndpointPolicy) -> Self {
        Self {
            policies: FxHashMap::default(),
            default,
        }
    }

    /// Preset table for the game-market providers this crate was built for.
    ///
    /// | Endpoint | Shape |
    /// |----------|-------|
    /// | `official-trade` | strict: the official trade API suspends clients that burst |
    /// | `market-api` | moderate: bulk price overviews, cache-backed upstream |
    /// | `mod-db` | slow bulk: long scrapes of reference tables |
    #[must_use]
    pub fn market_defaults() -> Self {
        let mut set = Self::new(EndpointPolicy::default());
        set.policies.insert(
            "official-trade".to_string(),
            EndpointPolicy {
                max_requests: 5,
                window: Duration::from_secs(10),
                min_delay: Duration::from_millis(1500),
                max_concurrent: 1,
                retry_attempts: 2,
                retry_base_delay: Duration::from_secs(2),
            },
        );
        set.policies.insert(
            "market-api".to_string(),
            EndpointPolicy {
                max_requests: 30,
                window: Duration::from_secs(60),
                min_delay: Duration::from_millis(500),
                max_concurrent: 2,
                retry_attempts: 2,
                retry_base_delay: Duration::from_secs(1),
            },
        );
        set.policies.insert(
            "mod-db".to_string(),
            EndpointPolicy {
                max_requests: 20,
                window: Duration::from_secs(60),
                min_delay: Duration::from_secs(1),
                max_concurrent: 2,
                retry_attempts: 3,
                retry_base_delay: Duration::from_secs(2),
            },
        );
        set
    }

    /// Registers a policy for an endpoint, validating it first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Policy`] if the policy is invalid.
    pub fn insert(&mut self, endpoint: impl Into<String>, policy: EndpointPolicy) -> Result<()> {
        let endpoint = endpoint.into();
        policy.validate(&endpoint)?;
        self.policies.insert(endpoint, policy);
        Ok(())
    }

    /// Returns the policy for an endpoint, falling back to the default.
    #[inline]
    #[must_use]
    pub fn get(&self, endpoint: &str) -> &EndpointPolicy {
        self.policies.get(endpoint).unwrap_or(&self.default)
    }

    /// Returns `true` if the endpoint has an explicit policy.
    #[inline]
    #[must_use]
    pub fn contains(&self, endpoint: &str) -> bool {
        self.policies.contains_key(endpoint)
    }

    /// Returns the fallback policy.
    #[inline]
    #[must_use]
    pub fn default_policy(&self) -> &EndpointPolicy {
        &self.default
    }

    /// Validates every entry, including the default.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Policy`] encountered.
    pub fn validate(&self) -> Result<()> {
        self.default.validate("(default)")?;
        for (endpoint, policy) in &self.policies {
            policy.validate(endpoint)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_default_policy_is_valid() {
        assert!(EndpointPolicy::default().validate("any").is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(EndpointPolicy::conservative().validate("a").is_ok());
        assert!(EndpointPolicy::aggressive().validate("b").is_ok());
        assert!(PolicySet::market_defaults().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_fields() {
        let cases = [
            EndpointPolicy::new().with_max_requests(0),
            EndpointPolicy::new().with_window(Duration::ZERO),
            EndpointPolicy::new().with_min_delay(Duration::ZERO),
            EndpointPolicy::new().with_max_concurrent(0),
            EndpointPolicy::new().with_retry_base_delay(Duration::ZERO),
        ];

        for policy in cases {
            let err = policy.validate("bad").unwrap_err();
            assert!(matches!(err, Error::Policy { .. }), "got {err}");
        }
    }

    #[test]
    fn test_zero_retry_attempts_is_valid() {
        let policy = EndpointPolicy::new().with_retry_attempts(0);
        assert!(policy.validate("ok").is_ok());
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let policy = EndpointPolicy::new().with_retry_base_delay(Duration::from_millis(200));

        assert_eq!(policy.backoff_delay(0), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_delay_saturates() {
        let policy = EndpointPolicy::new().with_retry_base_delay(Duration::from_secs(1));
        // Far beyond any realistic retry budget; must not panic.
        let huge = policy.backoff_delay(500);
        assert!(huge >= policy.backoff_delay(31));
    }

    #[test]
    fn test_policy_set_fallback() {
        let set = PolicySet::market_defaults();

        assert!(set.contains("official-trade"));
        assert!(!set.contains("wiki"));
        assert_eq!(set.get("wiki"), set.default_policy());
        assert_eq!(set.get("official-trade").max_concurrent, 1);
    }

    #[test]
    fn test_policy_set_insert_validates() {
        let mut set = PolicySet::default();
        let err = set
            .insert("bad", EndpointPolicy::new().with_max_requests(0))
            .unwrap_err();
        assert!(matches!(err, Error::Policy { .. }));
        assert!(!set.contains("bad"));
    }

    #[test]
    fn test_policy_deserializes_humantime() {
        let toml_ish = r#"{
            "max_requests": 5,
            "window": "10s",
            "min_delay": "1500ms",
            "max_concurrent": 1,
            "retry_attempts": 2,
            "retry_base_delay": "2s"
        }"#;

        let policy: EndpointPolicy = serde_json::from_str(toml_ish).unwrap();
        assert_eq!(policy.window, Duration::from_secs(10));
        assert_eq!(policy.min_delay, Duration::from_millis(1500));
        assert_eq!(policy.retry_base_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_policy_serde_round_trip() {
        let policy = EndpointPolicy::conservative();
        let json = serde_json::to_string(&policy).unwrap();
        let back: EndpointPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }

    proptest! {
        #[test]
        fn prop_backoff_is_monotone(base_ms in 1u64..=10_000, attempt in 0u32..30) {
            let policy = EndpointPolicy::new()
                .with_retry_base_delay(Duration::from_millis(base_ms));
            prop_assert!(policy.backoff_delay(attempt + 1) >= policy.backoff_delay(attempt));
        }

        #[test]
        fn prop_backoff_doubles_below_saturation(base_ms in 1u64..=1000, attempt in 0u32..16) {
            let policy = EndpointPolicy::new()
                .with_retry_base_delay(Duration::from_millis(base_ms));
            prop_assert_eq!(
                policy.backoff_delay(attempt + 1),
                policy.backoff_delay(attempt) * 2
            );
        }

        #[test]
        fn prop_nonzero_policies_validate(
            max_requests in 1u32..1000,
            window_ms in 1u64..=600_000,
            min_delay_ms in 1u64..=60_000,
            max_concurrent in 1u32..64,
            retry_attempts in 0u32..10,
            base_ms in 1u64..=60_000,
        ) {
            let policy = EndpointPolicy {
                max_requests,
                window: Duration::from_millis(window_ms),
                min_delay: Duration::from_millis(min_delay_ms),
                max_concurrent,
                retry_attempts,
                retry_base_delay: Duration::from_millis(base_ms),
            };
            prop_assert!(policy.validate("any").is_ok());
        }
    }
}
