//! Async escalation driver.
//!
//! Walks one query through the transport tiers using the pure transition
//! logic in the parent module. All I/O lives here: endpoint selection,
//! session shaping, pacing delays, transport execution, classification,
//! and challenge routing. Cancellation and the per-query deadline are
//! honored at every suspension point.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::detectors::{Classification, ReplyContext, classify};
use super::transports::{
    PlainHttpTransport, SearchTransport, TransportReply, TransportRequest,
};
use super::{
    AttemptState, BackoffStrategy, EscalationSignal, Outcome, StepDecision, Tier, TierPolicy,
};
use crate::external_deps::challenge::{ChallengeDescriptor, ChallengeSolver, SolverVerdict};
use crate::modules::endpoint_pool::{Endpoint, EndpointPool, ReportOutcome, TransportKind};
use crate::modules::events::{
    AttemptFinishedEvent, AttemptStartEvent, ChallengeRoutedEvent, EndpointRetiredEvent,
    ErrorEvent, EventDispatcher, QueryFinishedEvent, SearchEvent, TierAdvanceEvent,
};
use crate::modules::obfuscation::RequestObfuscator;
use crate::modules::session::SessionManager;
use crate::modules::timing::{BehavioralTiming, InteractionStep, PacingContext};
use crate::query::{SearchQuery, SearchReport};

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Search endpoint of the target.
    pub target: Url,
    pub policy: TierPolicy,
    /// Hard deadline for one query across all tiers.
    pub query_timeout: Duration,
    /// Timeout for one HTTP round trip.
    pub request_timeout: Duration,
}

impl ControllerConfig {
    pub fn new(target: Url) -> Self {
        Self {
            target,
            policy: TierPolicy::default(),
            query_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Drives queries through the tiers. Shared by all concurrent searches.
pub struct EscalationController {
    config: ControllerConfig,
    pool: Arc<Mutex<EndpointPool>>,
    sessions: Arc<SessionManager>,
    obfuscator: RequestObfuscator,
    timing: BehavioralTiming,
    http: Arc<dyn SearchTransport>,
    browser: Option<Arc<dyn SearchTransport>>,
    solver: Option<Arc<dyn ChallengeSolver>>,
    events: Arc<EventDispatcher>,
}

struct DriveResult {
    outcome: Outcome,
    raw_payload: Option<String>,
    error: Option<String>,
}

impl EscalationController {
    pub fn new(
        config: ControllerConfig,
        pool: Arc<Mutex<EndpointPool>>,
        sessions: Arc<SessionManager>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        let request_timeout = config.request_timeout;
        Self {
            config,
            pool,
            sessions,
            obfuscator: RequestObfuscator::new(),
            timing: BehavioralTiming::default(),
            http: Arc::new(PlainHttpTransport::new(request_timeout)),
            browser: None,
            solver: None,
            events,
        }
    }

    pub fn with_timing(mut self, timing: BehavioralTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_http_transport(mut self, transport: Arc<dyn SearchTransport>) -> Self {
        self.http = transport;
        self
    }

    pub fn with_browser_transport(mut self, transport: Arc<dyn SearchTransport>) -> Self {
        self.browser = Some(transport);
        self
    }

    pub fn with_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Run one query to a terminal outcome.
    ///
    /// A deadline or cancellation never reads as `NotFound`; the walk ends
    /// in `Exhausted` or `Error` with whatever attempts were made.
    pub async fn run(&self, query: &SearchQuery, cancel: &CancellationToken) -> SearchReport {
        let started = Instant::now();
        let query_id = format!("q-{:08x}", rand::thread_rng().r#gen::<u32>());
        let state = Arc::new(Mutex::new(AttemptState::new()));

        let result = tokio::select! {
            _ = cancel.cancelled() => DriveResult {
                outcome: Outcome::Error,
                raw_payload: None,
                error: Some("cancelled".to_string()),
            },
            timed = tokio::time::timeout(
                self.config.query_timeout,
                self.drive(query, &query_id, state.clone()),
            ) => match timed {
                Ok(result) => result,
                Err(_) => DriveResult {
                    outcome: Outcome::Exhausted,
                    raw_payload: None,
                    error: None,
                },
            },
        };

        let state = state.lock().expect("attempt state poisoned");
        let elapsed = started.elapsed();
        self.events
            .dispatch(SearchEvent::QueryFinished(QueryFinishedEvent {
                query_id: query_id.clone(),
                outcome: result.outcome,
                tier_reached: state.tier(),
                elapsed,
                timestamp: Utc::now(),
            }));

        SearchReport {
            outcome: result.outcome,
            raw_payload: result.raw_payload,
            tier_reached: state.tier(),
            attempt_counts: state.counts(),
            elapsed_ms: elapsed.as_millis() as u64,
            error: result.error,
            metadata: [("query_id".to_string(), query_id)].into(),
        }
    }

    async fn drive(
        &self,
        query: &SearchQuery,
        query_id: &str,
        state: Arc<Mutex<AttemptState>>,
    ) -> DriveResult {
        let mut backoff = BackoffStrategy::from_policy(&self.config.policy);
        let mut error_streak = 0u32;
        let mut raw_payload = None;
        let mut last_error = None;

        loop {
            let tier = state.lock().expect("attempt state poisoned").tier();

            // Browser tier without a configured driver cannot proceed.
            if tier == Tier::BrowserAutomated && self.browser.is_none() {
                log::warn!("{query_id}: browser tier reached but no driver configured");
                return DriveResult {
                    outcome: Outcome::Exhausted,
                    raw_payload,
                    error: last_error,
                };
            }

            let endpoint = {
                let mut pool = self.pool.lock().expect("endpoint pool poisoned");
                pool.acquire(kinds_for(tier))
            };
            let endpoint = match endpoint {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    log::debug!("{query_id}: {err} at {tier:?}");
                    let decision = self.step(&state, EscalationSignal::PoolExhausted, query_id, tier);
                    match decision {
                        StepDecision::Finish(outcome) => {
                            return DriveResult {
                                outcome,
                                raw_payload,
                                error: last_error,
                            };
                        }
                        _ => continue,
                    }
                }
            };

            let session = match self.checkout_session(&endpoint) {
                Ok(session) => session,
                Err(err) => {
                    return DriveResult {
                        outcome: Outcome::Error,
                        raw_payload,
                        error: Some(err.to_string()),
                    };
                }
            };

            let attempt_no = {
                let mut guard = state.lock().expect("attempt state poisoned");
                guard.record_attempt();
                guard.counts().get(tier)
            };

            // Pace like a person: typing before the first try, navigation
            // otherwise, plus a page-read pause at the browser tier.
            let ctx = PacingContext {
                consecutive_requests: attempt_no.saturating_sub(1),
                recent_errors: error_streak,
            };
            let step = if attempt_no <= 1 {
                InteractionStep::Typing
            } else {
                InteractionStep::Navigation
            };
            tokio::time::sleep(self.timing.delay_for(step, &ctx)).await;
            if tier == Tier::BrowserAutomated {
                tokio::time::sleep(self.timing.delay_for(InteractionStep::PageRead, &ctx)).await;
            }

            self.events
                .dispatch(SearchEvent::AttemptStart(AttemptStartEvent {
                    query_id: query_id.to_string(),
                    tier,
                    endpoint_id: endpoint.id.clone(),
                    attempt: attempt_no,
                    timestamp: Utc::now(),
                }));

            let attempt_started = Instant::now();
            let shape = self
                .obfuscator
                .prepare(&session.id, &session.profile, &session.jar);
            let url = self.search_url(query, None);
            let transport = self.transport_for(tier);

            let outcome = transport
                .execute(TransportRequest {
                    url,
                    shape: &shape,
                    endpoint: &endpoint,
                    profile: &session.profile,
                })
                .await;
            let latency = attempt_started.elapsed();

            let signal = match outcome {
                Err(err) => {
                    error_streak = error_streak.saturating_add(1);
                    last_error = Some(err.to_string());
                    self.report_endpoint(&endpoint.id, ReportOutcome::Failure);
                    self.events.dispatch(SearchEvent::Error(ErrorEvent {
                        query_id: query_id.to_string(),
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    }));
                    EscalationSignal::TransientNetwork
                }
                Ok(reply) => {
                    self.absorb_cookies(&endpoint.id, &reply);
                    match classify(&ReplyContext {
                        url: &self.config.target,
                        status: reply.status,
                        body: &reply.body,
                    }) {
                        Classification::Success { raw_payload: body } => {
                            error_streak = 0;
                            raw_payload = Some(body);
                            self.report_endpoint(&endpoint.id, ReportOutcome::Success);
                            EscalationSignal::Success
                        }
                        Classification::NotFound => {
                            error_streak = 0;
                            self.report_endpoint(&endpoint.id, ReportOutcome::Success);
                            EscalationSignal::NotFound
                        }
                        Classification::Detected { reason } => {
                            log::info!("{query_id}: detected at {tier:?} ({reason})");
                            self.report_endpoint(&endpoint.id, ReportOutcome::Failure);
                            EscalationSignal::Detected
                        }
                        Classification::Challenged(descriptor) => {
                            self.handle_challenge(
                                query,
                                query_id,
                                tier,
                                &endpoint,
                                descriptor,
                                &mut raw_payload,
                            )
                            .await
                        }
                    }
                }
            };

            let success = signal == EscalationSignal::Success;
            self.events
                .dispatch(SearchEvent::AttemptFinished(AttemptFinishedEvent {
                    query_id: query_id.to_string(),
                    tier,
                    endpoint_id: endpoint.id.clone(),
                    success,
                    latency,
                    timestamp: Utc::now(),
                }));

            match self.step(&state, signal, query_id, tier) {
                StepDecision::Finish(outcome) => {
                    return DriveResult {
                        outcome,
                        raw_payload,
                        error: if outcome == Outcome::Error {
                            last_error.clone()
                        } else {
                            None
                        },
                    };
                }
                StepDecision::RetrySameTier => {
                    backoff.register_failure();
                    tokio::time::sleep(backoff.next_delay()).await;
                }
                StepDecision::AdvanceTier(_) => {
                    backoff.reset();
                }
            }
        }
    }

    /// Apply one signal to the state machine and emit the advance event.
    fn step(
        &self,
        state: &Mutex<AttemptState>,
        signal: EscalationSignal,
        query_id: &str,
        tier: Tier,
    ) -> StepDecision {
        let decision = state
            .lock()
            .expect("attempt state poisoned")
            .advance(signal, &self.config.policy);
        if let StepDecision::AdvanceTier(next) = decision {
            self.events
                .dispatch(SearchEvent::TierAdvance(TierAdvanceEvent {
                    query_id: query_id.to_string(),
                    from: tier,
                    to: next,
                    reason: format!("{signal:?}"),
                    timestamp: Utc::now(),
                }));
        }
        decision
    }

    /// At the browser tier, route the challenge to the solving collaborator
    /// and retry with the token. Anywhere else, or with no solver, the
    /// challenge stands.
    async fn handle_challenge(
        &self,
        query: &SearchQuery,
        query_id: &str,
        tier: Tier,
        endpoint: &Endpoint,
        descriptor: ChallengeDescriptor,
        raw_payload: &mut Option<String>,
    ) -> EscalationSignal {
        let solver = match (&self.solver, tier) {
            (Some(solver), Tier::BrowserAutomated) => solver,
            _ => {
                self.report_endpoint(&endpoint.id, ReportOutcome::Failure);
                return EscalationSignal::Challenged;
            }
        };

        let verdict = solver.solve(&descriptor).await;
        let solved = matches!(verdict, Ok(SolverVerdict::Solved(_)));
        self.events
            .dispatch(SearchEvent::ChallengeRouted(ChallengeRoutedEvent {
                query_id: query_id.to_string(),
                challenge_kind: descriptor.kind.as_str().to_string(),
                solved,
                timestamp: Utc::now(),
            }));

        let token = match verdict {
            Ok(SolverVerdict::Solved(token)) => token,
            Ok(SolverVerdict::Unsolved) => {
                self.report_endpoint(&endpoint.id, ReportOutcome::Failure);
                return EscalationSignal::Challenged;
            }
            Err(err) => {
                log::warn!("{query_id}: solver failed: {err}");
                self.report_endpoint(&endpoint.id, ReportOutcome::Failure);
                return EscalationSignal::Challenged;
            }
        };

        // Resubmit with the solution token on the same session.
        let session = match self.checkout_session(endpoint) {
            Ok(session) => session,
            Err(err) => {
                log::warn!("{query_id}: session lost during challenge retry: {err}");
                return EscalationSignal::Challenged;
            }
        };
        let shape = self
            .obfuscator
            .prepare(&session.id, &session.profile, &session.jar);
        let url = self.search_url(query, Some(&token.token));
        let retry = self
            .transport_for(tier)
            .execute(TransportRequest {
                url,
                shape: &shape,
                endpoint,
                profile: &session.profile,
            })
            .await;

        match retry {
            Ok(reply) => {
                self.absorb_cookies(&endpoint.id, &reply);
                match classify(&ReplyContext {
                    url: &self.config.target,
                    status: reply.status,
                    body: &reply.body,
                }) {
                    Classification::Success { raw_payload: body } => {
                        *raw_payload = Some(body);
                        self.report_endpoint(&endpoint.id, ReportOutcome::Success);
                        EscalationSignal::Success
                    }
                    Classification::NotFound => {
                        self.report_endpoint(&endpoint.id, ReportOutcome::Success);
                        EscalationSignal::NotFound
                    }
                    _ => {
                        self.report_endpoint(&endpoint.id, ReportOutcome::Failure);
                        EscalationSignal::Challenged
                    }
                }
            }
            Err(err) => {
                log::warn!("{query_id}: challenge retry failed: {err}");
                self.report_endpoint(&endpoint.id, ReportOutcome::Failure);
                EscalationSignal::Challenged
            }
        }
    }

    /// Fetch and freshen the session bound to this endpoint. Cookie
    /// rotation happens on checkout so a reused identity never presents
    /// day-old tracking tokens.
    fn checkout_session(
        &self,
        endpoint: &Endpoint,
    ) -> Result<crate::modules::session::Session, crate::modules::session::SessionError> {
        self.sessions.get(&endpoint.id)?;
        let rotation = self.sessions.config().rotation.clone();
        self.sessions.update(&endpoint.id, |session| {
            let mut rng = rand::rngs::StdRng::from_entropy();
            session.jar.prepare_for_reuse(&rotation, &mut rng);
            session.touch();
        })?;
        self.sessions.get(&endpoint.id)
    }

    fn absorb_cookies(&self, endpoint_id: &str, reply: &TransportReply) {
        if reply.set_cookies.is_empty() {
            return;
        }
        if let Err(err) = self.sessions.update(endpoint_id, |session| {
            session.jar.merge_response(&reply.set_cookies);
            session.touch();
        }) {
            log::warn!("cookie merge failed for {endpoint_id}: {err}");
        }
    }

    fn report_endpoint(&self, endpoint_id: &str, outcome: ReportOutcome) {
        let retired = self
            .pool
            .lock()
            .expect("endpoint pool poisoned")
            .report(endpoint_id, outcome);
        if retired {
            self.events
                .dispatch(SearchEvent::EndpointRetired(EndpointRetiredEvent {
                    endpoint_id: endpoint_id.to_string(),
                    timestamp: Utc::now(),
                }));
        }
    }

    fn transport_for(&self, tier: Tier) -> Arc<dyn SearchTransport> {
        match tier {
            Tier::BrowserAutomated => self
                .browser
                .clone()
                .unwrap_or_else(|| self.http.clone()),
            _ => self.http.clone(),
        }
    }

    fn search_url(&self, query: &SearchQuery, challenge_token: Option<&str>) -> Url {
        let mut url = self.config.target.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.request_params() {
                pairs.append_pair(key, &value);
            }
            if let Some(token) = challenge_token {
                pairs.append_pair("challenge_token", token);
            }
        }
        url
    }
}

/// Endpoint kinds acceptable at each tier. The proxied tier never falls
/// back to direct egress; a burned direct identity stays burned.
fn kinds_for(tier: Tier) -> &'static [TransportKind] {
    match tier {
        Tier::Direct => &[TransportKind::Direct],
        Tier::ProxiedHttp => &[
            TransportKind::ResidentialProxy,
            TransportKind::DatacenterProxy,
        ],
        Tier::BrowserAutomated => &[
            TransportKind::ResidentialProxy,
            TransportKind::DatacenterProxy,
            TransportKind::Direct,
        ],
    }
}
