//! Transport implementations behind the escalation tiers.
//!
//! The controller only sees [`SearchTransport`]; whether a request went out
//! as a shaped HTTP call or through a driven browser session is invisible
//! above this seam.

mod browser;
mod http;

pub use browser::BrowserTransport;
pub use http::PlainHttpTransport;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::external_deps::browser::BrowserError;
use crate::modules::endpoint_pool::Endpoint;
use crate::modules::fingerprint::FingerprintProfile;
use crate::modules::obfuscation::RequestShape;

/// One outbound attempt, fully shaped.
#[derive(Debug)]
pub struct TransportRequest<'a> {
    pub url: Url,
    pub shape: &'a RequestShape,
    pub endpoint: &'a Endpoint,
    pub profile: &'a FingerprintProfile,
}

/// Raw reply handed to the classifier.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
    pub set_cookies: Vec<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid request header: {0}")]
    Header(String),
    #[error("request timed out")]
    Timeout,
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Executes one shaped request over a concrete transport.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn execute(&self, request: TransportRequest<'_>)
    -> Result<TransportReply, TransportError>;
}
