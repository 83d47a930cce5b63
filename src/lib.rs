//! # veilsearch
//!
//! Resilient person-lookup orchestration against bot-defended search
//! targets.
//!
//! A query walks an escalation ladder of transports, from cheap shaped
//! HTTP requests up to driven browser sessions, until the target either
//! answers or every tier is exhausted. Around that core the engine keeps
//! endpoint health scores, internally-consistent fingerprint identities,
//! persistent sessions, and human-plausible pacing.
//!
//! ## Features
//!
//! - Three-tier escalation: direct HTTP, proxied HTTP, browser automation
//! - Endpoint pool with cooldowns, retirement, and LRU rotation
//! - Fingerprint profiles validated for cross-signal consistency
//! - Deterministic per-session request shaping and cookie lifecycle
//! - Durable session persistence with restore-time revalidation
//! - Bounded-concurrency bulk execution with per-item fault isolation
//!
//! ## Example
//!
//! ```no_run
//! use url::Url;
//! use veilsearch::{SearchEngine, SearchQuery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = SearchEngine::builder(Url::parse("https://lookup.example/search")?)
//!         .build()?;
//!     let report = engine.search(&SearchQuery::person("Maria Rodriguez")).await;
//!     println!("{:?}: {:?}", report.outcome, report.tier_reached);
//!     Ok(())
//! }
//! ```

mod engine;

pub mod bulk;
pub mod escalation;
pub mod external_deps;
pub mod modules;
pub mod query;

pub use crate::engine::{EngineBuilder, EngineConfig, EngineError, EngineResult, SearchEngine};

pub use crate::bulk::{BulkConfig, BulkCoordinator, BulkResult, ProgressCallback};

pub use crate::escalation::{
    AttemptCounts,
    AttemptState,
    BackoffStrategy,
    EscalationSignal,
    Outcome,
    StepDecision,
    Tier,
    TierPolicy,
};

pub use crate::escalation::controller::{ControllerConfig, EscalationController};

pub use crate::escalation::detectors::{Classification, ReplyContext, classify};

pub use crate::escalation::transports::{
    BrowserTransport,
    PlainHttpTransport,
    SearchTransport,
    TransportError,
    TransportReply,
    TransportRequest,
};

pub use crate::external_deps::browser::{
    BrowserAutomation,
    BrowserError,
    BrowserHandle,
    BrowserPage,
};

pub use crate::external_deps::challenge::{
    ChallengeDescriptor,
    ChallengeKind,
    ChallengeSolver,
    SolutionToken,
    SolverConfig,
    SolverError,
    SolverVerdict,
    TwoCaptchaSolver,
};

pub use crate::query::{QueryPayload, SearchQuery, SearchReport};

pub use crate::modules::{
    BehavioralTiming,
    BrowserFamily,
    CookieJar,
    DeviceClass,
    DeviceMix,
    Endpoint,
    EndpointPool,
    EventDispatcher,
    EventHandler,
    FingerprintProfile,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    PoolConfig,
    PoolHealthReport,
    ProfileProvider,
    RequestObfuscator,
    RequestShape,
    RotationPolicy,
    SearchEvent,
    Session,
    SessionConfig,
    SessionManager,
    TimingConfig,
    TransportKind,
    is_consistent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
