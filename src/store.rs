//! Durable per-session authentication state.
//!
//! The [`SessionStore`] keeps one JSON record per session id under an
//! application-owned directory. A record is an opaque-to-callers
//! [`AuthState`] blob: cookies, web-storage entries, and the domains the
//! session is known to be authenticated against. Records are written
//! atomically (temp file + rename) and survive process restarts, so a
//! re-created session can skip re-authentication.
//!
//! The directory belongs to the application's data area and must never be
//! checked into source control.
//!
//! # Example
//!
//! ```no_run
//! use scrape_governor::{AuthState, SessionStore, SessionId, Result};
//!
//! # fn example() -> Result<()> {
//! let store = SessionStore::new("/var/lib/market-helper/sessions")?;
//! let id = SessionId::new("trade-main");
//!
//! if let Some(state) = store.load(&id)? {
//!     println!("{} cookies on record", state.cookies.len());
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

// ============================================================================
// Cookie
// ============================================================================

/// Browser cookie captured from or restored into a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Secure flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    /// HttpOnly flag.
    #[serde(rename = "httpOnly", skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    /// SameSite attribute.
    #[serde(rename = "sameSite", skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    /// Expiration timestamp (seconds).
    #[serde(rename = "expirationDate", skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
}

impl Cookie {
    /// Creates a new cookie with name and value.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            secure: None,
            http_only: None,
            same_site: None,
            expiration_date: None,
        }
    }

    /// Sets the cookie domain.
    #[inline]
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

// ============================================================================
// StorageEntry
// ============================================================================

/// A single web-storage key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEntry {
    /// Storage key.
    pub key: String,
    /// Stored value.
    pub value: String,
}

// ============================================================================
// AuthState
// ============================================================================

/// Serialized authentication state for one session.
///
/// This layer treats the contents as opaque evidence of authentication;
/// only the engine knows how to apply it to a live browser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    /// Cookies captured from the session.
    #[serde(default)]
    pub cookies: Vec<Cookie>,

    /// localStorage entries worth restoring (API tokens and the like).
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,

    /// Domains explicitly marked authenticated by callers.
    #[serde(default)]
    pub domains: Vec<String>,

    /// When this record was written.
    #[serde(default, with = "humantime_serde::option")]
    pub saved_at: Option<SystemTime>,
}

impl AuthState {
    /// Creates an empty state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the state carries no evidence at all.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.local_storage.is_empty() && self.domains.is_empty()
    }

    /// Returns `true` if this state evidences authentication for `domain`.
    ///
    /// Checks the explicit domain list first, then cookie domains. A
    /// record for `pathofexile.com` also covers its subdomains.
    #[must_use]
    pub fn covers_domain(&self, domain: &str) -> bool {
        let wanted = normalize_domain(domain);

        let explicit = self.domains.iter().map(String::as_str);
        let from_cookies = self.cookies.iter().filter_map(|c| c.domain.as_deref());

        explicit
            .chain(from_cookies)
            .map(normalize_domain)
            .any(|known| domain_matches(&known, &wanted))
    }
}

// ============================================================================
// Domain Helpers
// ============================================================================

/// Normalizes a domain or URL to a bare lowercase host.
///
/// Accepts `"https://www.pathofexile.com/trade"`, `".pathofexile.com"`, or
/// `"PathOfExile.com"` and yields `"www.pathofexile.com"` /
/// `"pathofexile.com"` respectively.
pub(crate) fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim();
    let host = Url::parse(trimmed)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .unwrap_or_else(|| trimmed.to_string());
    host.trim_start_matches('.').to_ascii_lowercase()
}

/// Returns `true` if an auth record for `known` covers `wanted`.
///
/// Exact match, or either side is a subdomain of the other (a cookie for
/// `pathofexile.com` authenticates `www.pathofexile.com` and vice versa).
pub(crate) fn domain_matches(known: &str, wanted: &str) -> bool {
    known == wanted
        || wanted.ends_with(&format!(".{known}"))
        || known.ends_with(&format!(".{wanted}"))
}

// ============================================================================
// SessionStore
// ============================================================================

/// Durable store of [`AuthState`] records, one per session id.
///
/// All writes are atomic: the record is serialized to a temp file in the
/// same directory and renamed over the destination, so a crash never
/// leaves a torn record behind.
#[derive(Debug, Clone)]
pub struct SessionStore {
    /// Directory holding one `<id>.json` per session.
    dir: PathBuf,
}

impl SessionStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "session store opened");
        Ok(Self { dir })
    }

    /// Returns the store directory.
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists `state` for `id`, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on filesystem failure or [`Error::Json`] if
    /// serialization fails.
    pub fn save(&self, id: &SessionId, state: &AuthState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(self.record_path(id))
            .map_err(|e| Error::Io(e.error))?;

        debug!(
            session_id = %id,
            cookies = state.cookies.len(),
            domains = state.domains.len(),
            "auth state saved"
        );
        Ok(())
    }

    /// Loads the record for `id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on filesystem failure or [`Error::Json`] if
    /// the record is corrupt. A missing record is `Ok(None)`, not an error.
    pub fn load(&self, id: &SessionId) -> Result<Option<AuthState>> {
        let path = self.record_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: AuthState = serde_json::from_str(&contents)?;
        debug!(session_id = %id, "auth state loaded");
        Ok(Some(state))
    }

    /// Removes the record for `id`. Removing a missing record is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on filesystem failure.
    pub fn remove(&self, id: &SessionId) -> Result<()> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the record names currently on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path of the record file for `id`.
    fn record_path(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_record_name(id.as_str())))
    }
}

// ============================================================================
// Record Names
// ============================================================================

/// Maps a session id to a safe file stem.
///
/// Keeps ASCII alphanumerics, `-`, `_` and interior `.`; everything else
/// becomes `_`. The result is never empty and never starts with a dot, so
/// an id cannot escape the store directory or hide the record file.
fn sanitize_record_name(id: &str) -> String {
    let mut name: String = id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    if name.starts_with('.') {
        name.replace_range(0..1, "_");
    }

    if name.is_empty() {
        name.push('_');
    }
    name
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn sample_state() -> AuthState {
        AuthState {
            cookies: vec![
                Cookie::new("POESESSID", "abc123").with_domain(".pathofexile.com"),
            ],
            local_storage: vec![StorageEntry {
                key: "league".to_string(),
                value: "Standard".to_string(),
            }],
            domains: vec!["pathofexile.com".to_string()],
            saved_at: Some(SystemTime::UNIX_EPOCH),
        }
    }

    #[test]
    fn test_save_load_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SessionStore::new(dir.path())?;
        let id = SessionId::new("trade-main");

        store.save(&id, &sample_state())?;
        let loaded = store.load(&id)?.expect("record exists");
        assert_eq!(loaded, sample_state());
        Ok(())
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        assert!(store.load(&SessionId::new("ghost")).unwrap().is_none());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = SessionId::new("persistent");

        {
            let store = SessionStore::new(dir.path()).unwrap();
            store.save(&id, &sample_state()).unwrap();
        }

        // A fresh store over the same directory sees the record.
        let reopened = SessionStore::new(dir.path()).unwrap();
        assert!(reopened.load(&id).unwrap().is_some());
    }

    #[test]
    fn test_save_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let id = SessionId::new("x");

        store.save(&id, &sample_state()).unwrap();

        let mut updated = sample_state();
        updated.domains.push("poe.ninja".to_string());
        store.save(&id, &updated).unwrap();

        let loaded = store.load(&id).unwrap().unwrap();
        assert_eq!(loaded.domains.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let id = SessionId::new("x");

        store.save(&id, &sample_state()).unwrap();
        store.remove(&id).unwrap();
        store.remove(&id).unwrap();
        assert!(store.load(&id).unwrap().is_none());
    }

    #[test]
    fn test_list_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        store.save(&SessionId::new("b"), &AuthState::new()).unwrap();
        store.save(&SessionId::new("a"), &AuthState::new()).unwrap();

        assert_eq!(store.list().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_hostile_id_stays_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let id = SessionId::new("../../etc/passwd");

        store.save(&id, &sample_state()).unwrap();

        // The record landed inside the store directory.
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.load(&id).unwrap().is_some());
    }

    #[test]
    fn test_covers_domain_via_explicit_list() {
        let state = sample_state();
        assert!(state.covers_domain("pathofexile.com"));
        assert!(state.covers_domain("www.pathofexile.com"));
        assert!(state.covers_domain("https://www.pathofexile.com/trade"));
        assert!(!state.covers_domain("poe.ninja"));
    }

    #[test]
    fn test_covers_domain_via_cookie_domain() {
        let state = AuthState {
            cookies: vec![Cookie::new("sid", "v").with_domain(".poe.ninja")],
            ..AuthState::new()
        };
        assert!(state.covers_domain("poe.ninja"));
        assert!(!state.covers_domain("pathofexile.com"));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("PathOfExile.com"), "pathofexile.com");
        assert_eq!(normalize_domain(".pathofexile.com"), "pathofexile.com");
        assert_eq!(
            normalize_domain("https://www.pathofexile.com/trade/search"),
            "www.pathofexile.com"
        );
    }

    #[test]
    fn test_empty_state() {
        assert!(AuthState::new().is_empty());
        assert!(!sample_state().is_empty());
    }

    proptest! {
        #[test]
        fn prop_record_names_are_safe(id in ".*") {
            let name = sanitize_record_name(&id);
            prop_assert!(!name.is_empty());
            prop_assert!(!name.starts_with('.'));
            prop_assert!(!name.contains('/'));
            prop_assert!(!name.contains('\\'));
        }
    }
}
