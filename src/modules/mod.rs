//! Cross-cutting services module
//!
//! Everything the escalation controller leans on: endpoint health,
//! fingerprint identity, request shaping, behavioral pacing, session
//! persistence, events, and metrics.

pub mod endpoint_pool;
pub mod events;
pub mod fingerprint;
pub mod metrics;
pub mod obfuscation;
pub mod session;
pub mod timing;

// Re-export commonly used types
pub use endpoint_pool::{
    Endpoint,
    EndpointPool,
    EndpointSource,
    EndpointStats,
    PoolConfig,
    PoolError,
    PoolHealthReport,
    ReportOutcome,
    StaticEndpointSource,
    TransportKind,
};
pub use events::{
    AttemptFinishedEvent, AttemptStartEvent, ChallengeRoutedEvent, EndpointRetiredEvent,
    ErrorEvent, EventDispatcher, EventHandler, LoggingHandler, MetricsHandler,
    QueryFinishedEvent, SearchEvent, TierAdvanceEvent,
};
pub use fingerprint::{
    BrowserFamily, DeviceClass, DeviceMix, FingerprintError, FingerprintProfile,
    ProfileProvider, ProviderConfig, SubGenerators, is_consistent,
};
pub use metrics::{GlobalStats, MetricsCollector, MetricsSnapshot, TierStats};
pub use obfuscation::{
    CookieCategory, CookieJar, RequestObfuscator, RequestShape, RotationPolicy, StoredCookie,
};
pub use session::{Session, SessionConfig, SessionError, SessionManager};
pub use timing::{BehavioralTiming, InteractionStep, PacingContext, TimingConfig};
