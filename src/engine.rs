//! High level search orchestration.
//!
//! Wires together the endpoint pool, session manager, fingerprint
//! provider, pacing, escalation controller, and bulk coordinator behind an
//! ergonomic facade. Construction goes through [`EngineBuilder`]; the
//! built engine is cheap to share and safe to use from many tasks.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::bulk::{BulkConfig, BulkCoordinator, BulkResult, ProgressCallback};
use crate::escalation::TierPolicy;
use crate::escalation::controller::{ControllerConfig, EscalationController};
use crate::escalation::transports::{BrowserTransport, SearchTransport};
use crate::external_deps::browser::BrowserAutomation;
use crate::external_deps::challenge::ChallengeSolver;
use crate::modules::endpoint_pool::{
    Endpoint, EndpointPool, PoolConfig, PoolHealthReport, StaticEndpointSource,
};
use crate::modules::events::{EventDispatcher, EventHandler, LoggingHandler, MetricsHandler};
use crate::modules::fingerprint::{ProfileProvider, ProviderConfig};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::modules::session::{SessionConfig, SessionError, SessionManager};
use crate::modules::timing::{BehavioralTiming, TimingConfig};
use crate::query::{SearchQuery, SearchReport};

/// Result alias used across the orchestration layer.
pub type EngineResult<T> = Result<T, EngineError>;

/// High-level error surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine misconfigured: {0}")]
    Configuration(String),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Everything tunable about the engine. Field-level defaults are the
/// per-module defaults; only the target URL is mandatory.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Search endpoint of the target.
    pub target: Url,
    pub endpoints: Vec<Endpoint>,
    pub pool: PoolConfig,
    pub policy: TierPolicy,
    pub timing: TimingConfig,
    pub session: SessionConfig,
    /// Durable session store location; in-memory only when `None`.
    pub session_store: Option<PathBuf>,
    pub provider: ProviderConfig,
    pub bulk: BulkConfig,
    pub query_timeout: Duration,
    pub request_timeout: Duration,
    pub enable_metrics: bool,
}

impl EngineConfig {
    pub fn new(target: Url) -> Self {
        Self {
            target,
            endpoints: Vec::new(),
            pool: PoolConfig::default(),
            policy: TierPolicy::default(),
            timing: TimingConfig::default(),
            session: SessionConfig::default(),
            session_store: None,
            provider: ProviderConfig::default(),
            bulk: BulkConfig::default(),
            query_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            enable_metrics: true,
        }
    }
}

/// Builder for [`SearchEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    browser: Option<Arc<dyn BrowserAutomation>>,
    solver: Option<Arc<dyn ChallengeSolver>>,
    http_transport: Option<Arc<dyn SearchTransport>>,
    progress: Option<ProgressCallback>,
    extra_handlers: Vec<Arc<dyn EventHandler>>,
}

impl EngineBuilder {
    pub fn new(target: Url) -> Self {
        Self {
            config: EngineConfig::new(target),
            browser: None,
            solver: None,
            http_transport: None,
            progress: None,
            extra_handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_endpoints<I>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = Endpoint>,
    {
        self.config.endpoints.extend(endpoints);
        self
    }

    pub fn with_policy(mut self, policy: TierPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    /// Hard deadline for one query across all tiers.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.config.query_timeout = timeout;
        self
    }

    pub fn with_session_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.session_store = Some(path.into());
        self
    }

    pub fn with_bulk_config(mut self, bulk: BulkConfig) -> Self {
        self.config.bulk = bulk;
        self
    }

    pub fn with_browser_driver(mut self, driver: Arc<dyn BrowserAutomation>) -> Self {
        self.browser = Some(driver);
        self
    }

    pub fn with_challenge_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Override the HTTP transport. Used to route through a custom client
    /// stack, or to stub the network out in tests.
    pub fn with_http_transport(mut self, transport: Arc<dyn SearchTransport>) -> Self {
        self.http_transport = Some(transport);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.extra_handlers.push(handler);
        self
    }

    pub fn disable_metrics(mut self) -> Self {
        self.config.enable_metrics = false;
        self
    }

    pub fn build(self) -> EngineResult<SearchEngine> {
        let config = self.config;

        let mut pool = EndpointPool::new(config.pool.clone());
        if config.endpoints.is_empty() {
            // Direct egress is always available even with no proxy
            // inventory configured.
            pool.add_endpoint(Endpoint::direct("direct-default"));
        } else {
            pool.add_source(StaticEndpointSource(config.endpoints.clone()));
        }
        let pool = Arc::new(Mutex::new(pool));

        let provider = ProfileProvider::new(config.provider.clone());
        let sessions = match &config.session_store {
            Some(path) => Arc::new(SessionManager::with_store(
                config.session.clone(),
                provider,
                path,
            )?),
            None => Arc::new(SessionManager::new(config.session.clone(), provider)),
        };

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        let metrics = if config.enable_metrics {
            let collector = MetricsCollector::new();
            dispatcher.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
            Some(collector)
        } else {
            None
        };
        for handler in self.extra_handlers {
            dispatcher.register_handler(handler);
        }
        let events = Arc::new(dispatcher);

        let controller_config = ControllerConfig {
            target: config.target.clone(),
            policy: config.policy.clone(),
            query_timeout: config.query_timeout,
            request_timeout: config.request_timeout,
        };
        let mut controller = EscalationController::new(
            controller_config,
            pool.clone(),
            sessions.clone(),
            events.clone(),
        )
        .with_timing(BehavioralTiming::new(config.timing.clone()));

        if let Some(transport) = self.http_transport {
            controller = controller.with_http_transport(transport);
        }
        if let Some(driver) = self.browser {
            controller = controller.with_browser_transport(Arc::new(BrowserTransport::new(driver)));
        }
        if let Some(solver) = self.solver {
            controller = controller.with_solver(solver);
        }
        let controller = Arc::new(controller);

        let mut bulk = BulkCoordinator::new(controller.clone(), config.bulk.clone());
        if let Some(progress) = self.progress {
            bulk = bulk.with_progress(progress);
        }

        Ok(SearchEngine {
            controller,
            bulk,
            pool,
            sessions,
            metrics,
            cancel_root: CancellationToken::new(),
        })
    }
}

/// Main orchestrator facade.
pub struct SearchEngine {
    controller: Arc<EscalationController>,
    bulk: BulkCoordinator,
    pool: Arc<Mutex<EndpointPool>>,
    sessions: Arc<SessionManager>,
    metrics: Option<MetricsCollector>,
    cancel_root: CancellationToken,
}

impl SearchEngine {
    /// Obtain a builder for the given target search endpoint.
    pub fn builder(target: Url) -> EngineBuilder {
        EngineBuilder::new(target)
    }

    /// Run one query to a terminal report.
    pub async fn search(&self, query: &SearchQuery) -> SearchReport {
        let cancel = self.cancel_root.child_token();
        self.controller.run(query, &cancel).await
    }

    /// Run a batch under the configured concurrency cap.
    pub async fn search_bulk(&self, queries: Vec<SearchQuery>) -> BulkResult {
        let cancel = self.cancel_root.child_token();
        self.bulk.run(queries, &cancel).await
    }

    /// Cancel everything in flight. Subsequent searches fail fast until a
    /// new engine is built.
    pub fn shutdown(&self) {
        self.cancel_root.cancel();
    }

    pub fn metrics_snapshot(&self) -> Option<MetricsSnapshot> {
        self.metrics.as_ref().map(MetricsCollector::snapshot)
    }

    pub fn pool_health(&self) -> PoolHealthReport {
        self.pool
            .lock()
            .expect("endpoint pool poisoned")
            .health_report()
    }

    /// Drop retired and lease-expired endpoints and pull replacements.
    pub fn refresh_endpoints(&self) {
        self.pool.lock().expect("endpoint pool poisoned").refresh();
    }

    /// Sweep expired sessions from cache and store.
    pub fn expire_sessions(&self) -> EngineResult<usize> {
        Ok(self.sessions.expire()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Url {
        Url::parse("https://lookup.example/search").unwrap()
    }

    #[test]
    fn builder_provides_direct_egress_by_default() {
        let engine = SearchEngine::builder(target()).build().unwrap();
        let health = engine.pool_health();
        assert_eq!(health.total, 1);
        assert_eq!(health.selectable, 1);
    }

    #[test]
    fn configured_endpoints_replace_the_default() {
        let engine = SearchEngine::builder(target())
            .with_endpoints([
                Endpoint::direct("direct-1"),
                Endpoint::residential("res-1", "http://10.0.0.1:8080"),
            ])
            .build()
            .unwrap();
        assert_eq!(engine.pool_health().total, 2);
    }

    #[test]
    fn metrics_are_on_by_default_and_can_be_disabled() {
        let engine = SearchEngine::builder(target()).build().unwrap();
        assert!(engine.metrics_snapshot().is_some());

        let engine = SearchEngine::builder(target()).disable_metrics().build().unwrap();
        assert!(engine.metrics_snapshot().is_none());
    }

    #[tokio::test]
    async fn shutdown_fails_searches_fast() {
        let engine = SearchEngine::builder(target()).build().unwrap();
        engine.shutdown();

        let report = engine.search(&SearchQuery::person("Maria Rodriguez")).await;
        assert_eq!(report.error.as_deref(), Some("cancelled"));
    }
}
