//! Automation engine capability boundary.
//!
//! The session pool manages browser lifecycles without knowing which
//! automation engine drives them (or which anti-detection strategy it
//! ships with). Engines plug in behind three object-safe traits:
//!
//! - [`AutomationEngine`] - launches browser instances
//! - [`BrowserHandle`] - one live browser: pages plus auth-state transfer
//! - [`PageHandle`] - one open page: navigation and evaluation
//!
//! The crate ships no concrete engine; the hosting application provides an
//! adapter for whatever it automates with. Tests use an in-crate mock.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::store::AuthState;

// ============================================================================
// LaunchOptions
// ============================================================================

/// Browser launch configuration.
///
/// # Example
///
/// ```
/// use scrape_governor::LaunchOptions;
///
/// let options = LaunchOptions::new()
///     .with_headless()
///     .with_window_size(1920, 1080);
///
/// assert!(options.headless);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Run the browser without a visible window.
    pub headless: bool,

    /// Window dimensions in pixels (width, height).
    pub window_size: Option<(u32, u32)>,

    /// Additional engine-specific arguments.
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    /// Creates options with default settings (visible window).
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            headless: false,
            window_size: None,
            extra_args: Vec::new(),
        }
    }

    /// Creates options configured for headless mode.
    #[inline]
    #[must_use]
    pub fn headless() -> Self {
        Self {
            headless: true,
            ..Default::default()
        }
    }

    /// Enables headless mode.
    #[inline]
    #[must_use]
    pub fn with_headless(mut self) -> Self {
        self.headless = true;
        self
    }

    /// Sets window size in pixels.
    #[inline]
    #[must_use]
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = Some((width, height));
        self
    }

    /// Appends an engine-specific argument.
    #[inline]
    #[must_use]
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

// ============================================================================
// AutomationEngine
// ============================================================================

/// Factory for browser instances.
///
/// Implementations adapt a concrete automation stack (WebDriver, CDP,
/// Playwright-style drivers) to the pool's lifecycle needs.
#[async_trait]
pub trait AutomationEngine: Send + Sync {
    /// Starts a new browser instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine process cannot be started; the pool
    /// surfaces this as a session-creation failure without retrying.
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserHandle>>;
}

// ============================================================================
// BrowserHandle
// ============================================================================

/// One live browser instance, exclusively owned by a pooled session.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Opens a new page.
    async fn new_page(&self) -> Result<Box<dyn PageHandle>>;

    /// Serializes the browser's authentication state (cookies, storage).
    async fn export_auth_state(&self) -> Result<AuthState>;

    /// Restores previously exported authentication state.
    ///
    /// Applied at the browser-context level; every page of the session
    /// observes the imported state.
    async fn import_auth_state(&self, state: &AuthState) -> Result<()>;

    /// Shuts the browser down, closing any remaining pages.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// PageHandle
// ============================================================================

/// One open page within a browser.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigates to a URL and waits for the engine's load criterion.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Returns the current page content as HTML.
    async fn content(&self) -> Result<String>;

    /// Evaluates a script in the page and returns its JSON result.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Closes the page.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Mock Engine (test only)
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
