//! Event system for the orchestration pipeline.
//!
//! Provides hooks for metrics, logging, and custom reactions around query
//! attempts, tier changes, and endpoint health activity.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::metrics::MetricsCollector;
use crate::escalation::{Outcome, Tier};

/// Structured attempt-start event.
#[derive(Debug, Clone)]
pub struct AttemptStartEvent {
    pub query_id: String,
    pub tier: Tier,
    pub endpoint_id: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// Structured attempt-finish event.
#[derive(Debug, Clone)]
pub struct AttemptFinishedEvent {
    pub query_id: String,
    pub tier: Tier,
    pub endpoint_id: String,
    pub success: bool,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TierAdvanceEvent {
    pub query_id: String,
    pub from: Tier,
    pub to: Tier,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChallengeRoutedEvent {
    pub query_id: String,
    pub challenge_kind: String,
    pub solved: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct QueryFinishedEvent {
    pub query_id: String,
    pub outcome: Outcome,
    pub tier_reached: Tier,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EndpointRetiredEvent {
    pub endpoint_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub query_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SearchEvent {
    AttemptStart(AttemptStartEvent),
    AttemptFinished(AttemptFinishedEvent),
    TierAdvance(TierAdvanceEvent),
    ChallengeRouted(ChallengeRoutedEvent),
    QueryFinished(QueryFinishedEvent),
    EndpointRetired(EndpointRetiredEvent),
    Error(ErrorEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &SearchEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: SearchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &SearchEvent) {
        match event {
            SearchEvent::AttemptStart(start) => {
                log::debug!(
                    "-> {} attempt {} at {:?} via {}",
                    start.query_id,
                    start.attempt,
                    start.tier,
                    start.endpoint_id
                );
            }
            SearchEvent::AttemptFinished(finished) => {
                log::debug!(
                    "<- {} {:?} success={} ({:.2}s)",
                    finished.query_id,
                    finished.tier,
                    finished.success,
                    finished.latency.as_secs_f64()
                );
            }
            SearchEvent::TierAdvance(advance) => {
                log::info!(
                    "escalating {} {:?} -> {:?} ({})",
                    advance.query_id,
                    advance.from,
                    advance.to,
                    advance.reason
                );
            }
            SearchEvent::ChallengeRouted(challenge) => {
                log::info!(
                    "challenge {} ({}) solved={}",
                    challenge.query_id,
                    challenge.challenge_kind,
                    challenge.solved
                );
            }
            SearchEvent::QueryFinished(finished) => {
                log::info!(
                    "finished {} {:?} at {:?} in {:.2}s",
                    finished.query_id,
                    finished.outcome,
                    finished.tier_reached,
                    finished.elapsed.as_secs_f64()
                );
            }
            SearchEvent::EndpointRetired(retired) => {
                log::warn!("endpoint {} retired", retired.endpoint_id);
            }
            SearchEvent::Error(error) => {
                log::warn!("warning {} -> {}", error.query_id, error.error);
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &SearchEvent) {
        match event {
            SearchEvent::AttemptFinished(finished) => {
                self.metrics
                    .record_attempt(finished.tier, finished.success, finished.latency);
            }
            SearchEvent::QueryFinished(finished) => {
                self.metrics
                    .record_query_finished(finished.outcome == Outcome::Exhausted);
            }
            _ => {}
        }
    }
}
