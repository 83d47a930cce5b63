//! Browser automation driver contract.
//!
//! The browser tier delegates real page interaction to an external driver.
//! The contract is deliberately narrow: open a session shaped by a
//! fingerprint profile, navigate, read back the rendered document, close.
//! Session close is the caller's responsibility on every path, success or
//! failure.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::modules::fingerprint::FingerprintProfile;

/// Opaque handle to one live browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserHandle {
    pub id: String,
}

/// Navigation outcome. The document itself is read separately, after any
/// in-page scripts have settled.
#[derive(Debug, Clone)]
pub struct BrowserPage {
    pub status: u16,
    pub set_cookies: Vec<String>,
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser driver unavailable: {0}")]
    Unavailable(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser session {0} already closed")]
    SessionClosed(String),
}

/// Shared interface implemented by browser automation drivers.
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    /// Open a session presenting the given fingerprint profile.
    async fn open_session(
        &self,
        profile: &FingerprintProfile,
    ) -> Result<BrowserHandle, BrowserError>;

    /// Navigate and report the navigation outcome.
    async fn navigate(&self, handle: &BrowserHandle, url: &Url)
    -> Result<BrowserPage, BrowserError>;

    /// Read back the rendered document for the session's current page.
    async fn extract_raw_content(&self, handle: &BrowserHandle)
    -> Result<String, BrowserError>;

    /// Close the session and release driver resources. Idempotent.
    async fn close(&self, handle: BrowserHandle) -> Result<(), BrowserError>;
}
