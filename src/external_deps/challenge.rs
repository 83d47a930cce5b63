//! Challenge solver integrations.
//!
//! When the target issues an interactive verification, the orchestrator
//! hands a descriptor to a solving collaborator and waits for a verdict. The
//! escalation logic never knows how the solution was produced, only whether
//! one exists.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Broad challenge categories the classifier can distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    /// Script-based proof of work embedded in the page.
    JavaScript,
    /// Widget requiring interaction (checkbox, puzzle, captcha).
    Interactive,
    Unknown,
}

impl ChallengeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::JavaScript => "javascript",
            ChallengeKind::Interactive => "interactive",
            ChallengeKind::Unknown => "unknown",
        }
    }
}

/// Everything the solver needs, extracted from the challenge page.
#[derive(Debug, Clone)]
pub struct ChallengeDescriptor {
    pub kind: ChallengeKind,
    pub page_url: Url,
    pub site_key: Option<String>,
    pub data: HashMap<String, String>,
}

impl ChallengeDescriptor {
    pub fn new(kind: ChallengeKind, page_url: Url) -> Self {
        Self {
            kind,
            page_url,
            site_key: None,
            data: HashMap::new(),
        }
    }

    pub fn with_site_key(mut self, site_key: impl Into<String>) -> Self {
        self.site_key = Some(site_key.into());
        self
    }

    pub fn insert_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Token proving a challenge was solved, submitted with the retried request.
#[derive(Debug, Clone)]
pub struct SolutionToken {
    pub token: String,
    pub expires_in: Option<Duration>,
}

impl SolutionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_in: None,
        }
    }

    pub fn with_expiry(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }
}

/// What the solver concluded. `Unsolved` is a legitimate verdict, not an
/// error; the escalation logic treats it as a failed attempt at the current
/// tier.
#[derive(Debug, Clone)]
pub enum SolverVerdict {
    Solved(SolutionToken),
    Unsolved,
}

/// Timeouts controlling a solve round trip.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Errors surfaced by solving collaborators.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver misconfigured: {0}")]
    Configuration(String),
    #[error("solver request failed: {0}")]
    Provider(String),
    #[error("challenge solving timed out after {0:?}")]
    Timeout(Duration),
    #[error("solver {0} not implemented")]
    NotImplemented(&'static str),
}

/// Shared interface implemented by solving vendors.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn solve(&self, descriptor: &ChallengeDescriptor) -> Result<SolverVerdict, SolverError>;
}

/// Placeholder adapter for the TwoCaptcha service.
#[derive(Debug, Clone)]
pub struct TwoCaptchaSolver {
    pub api_key: String,
    pub config: SolverConfig,
}

impl TwoCaptchaSolver {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            config: SolverConfig::default(),
        }
    }

    pub fn with_config(api_key: impl Into<String>, config: SolverConfig) -> Self {
        Self {
            api_key: api_key.into(),
            config,
        }
    }
}

#[async_trait]
impl ChallengeSolver for TwoCaptchaSolver {
    fn name(&self) -> &'static str {
        "twocaptcha"
    }

    async fn solve(&self, _descriptor: &ChallengeDescriptor) -> Result<SolverVerdict, SolverError> {
        Err(SolverError::NotImplemented(self.name()))
    }
}
